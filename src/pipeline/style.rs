//! Style resolution for the generate stage.
//!
//! Predefined styles map straight to fixed prompt text. A custom style is a
//! free-text wish ("watercolour with cats") that the LLM turns into a style
//! name, a colour palette, special elements and decorations, or rejects.
//! Rejection is fatal for the run: generating a whole deck in a style the
//! user did not ask for wastes the most expensive stage.

use crate::config::{OutputKind, Style};
use crate::error::PipelineError;
use crate::model::SectionKind;
use crate::pipeline::llm::LlmClient;
use crate::pipeline::postprocess::parse_json;
use crate::prompts;
use serde::Deserialize;
use tracing::{info, warn};

/// Concrete design directions for a custom style.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ProcessedStyle {
    #[serde(default)]
    pub style_name: String,
    #[serde(default)]
    pub color_tone: String,
    #[serde(default)]
    pub special_elements: String,
    #[serde(default)]
    pub decorations: String,
}

impl ProcessedStyle {
    /// The user's text as the style name; used when no LLM is available.
    pub fn verbatim(text: &str) -> Self {
        Self {
            style_name: text.trim().to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct StyleAnswer {
    #[serde(flatten)]
    style: ProcessedStyle,
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    error: Option<String>,
}

/// A style ready to be written into image prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStyle {
    pub style: Style,
    pub custom: Option<ProcessedStyle>,
}

impl ResolvedStyle {
    /// The style paragraph of a prompt.
    pub fn hint(&self, kind: OutputKind) -> String {
        match self.custom {
            Some(ref ps) => format!("Style: {}", custom_hint(ps, kind)),
            None => prompts::style_hint(&self.style, kind).to_string(),
        }
    }

    pub fn layout_rule(&self, kind: SectionKind) -> &'static str {
        prompts::layout_rule(&self.style, kind)
    }

    /// `Decorations: …` line, custom styles only.
    pub fn decorations(&self) -> Option<String> {
        self.custom
            .as_ref()
            .map(|ps| ps.decorations.trim())
            .filter(|d| !d.is_empty())
            .map(|d| format!("Decorations: {d}"))
    }
}

fn custom_hint(ps: &ProcessedStyle, kind: OutputKind) -> String {
    let common = match kind {
        OutputKind::Slides => prompts::SLIDE_COMMON_STYLE_RULES,
        OutputKind::Poster => prompts::POSTER_COMMON_STYLE_RULES,
    };
    let mut parts = vec![
        format!("{}.", ps.style_name.trim().trim_end_matches('.')),
        prompts::CUSTOM_STYLE_RULES.to_string(),
    ];
    if !ps.color_tone.trim().is_empty() {
        parts.push(format!(
            "LIMITED COLOR PALETTE (3-4 colors max): {}.",
            ps.color_tone.trim().trim_end_matches('.')
        ));
    }
    parts.push(common.to_string());
    if !ps.special_elements.trim().is_empty() {
        parts.push(format!(
            "{}.",
            ps.special_elements.trim().trim_end_matches('.')
        ));
    }
    parts.join(" ")
}

/// Resolve the configured style; custom text goes through the LLM when one
/// is available and is used verbatim otherwise.
pub async fn resolve_style(
    style: &Style,
    llm: Option<&LlmClient>,
) -> Result<ResolvedStyle, PipelineError> {
    let custom = match (style, llm) {
        (Style::Custom(text), Some(llm)) => Some(process_custom_style(llm, text).await?),
        (Style::Custom(text), None) => {
            warn!("No LLM provider: custom style used verbatim");
            Some(ProcessedStyle::verbatim(text))
        }
        _ => None,
    };
    Ok(ResolvedStyle {
        style: style.clone(),
        custom,
    })
}

async fn process_custom_style(llm: &LlmClient, text: &str) -> Result<ProcessedStyle, PipelineError> {
    let answer = llm
        .complete(prompts::STYLE_SYSTEM_PROMPT, &prompts::style_process_prompt(text))
        .await?;
    let parsed = parse_json::<StyleAnswer>(&answer).and_then(validate);
    match parsed {
        Ok(style) => {
            info!("Custom style: {}", style.style_name);
            Ok(style)
        }
        Err(PipelineError::InvalidResponse(detail)) => Err(PipelineError::InvalidStyle(detail)),
        Err(e) => Err(e),
    }
}

fn validate(answer: StyleAnswer) -> Result<ProcessedStyle, PipelineError> {
    if !answer.valid {
        return Err(PipelineError::InvalidStyle(
            answer
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| "style request rejected".to_string()),
        ));
    }
    if answer.style.style_name.trim().is_empty() {
        return Err(PipelineError::InvalidStyle("no style name returned".into()));
    }
    Ok(answer.style)
}
