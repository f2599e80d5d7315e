//! Plan stage: split the summary into ordered sections.
//!
//! The LLM answers with a JSON section list. Answers that cannot be parsed,
//! or parse to zero sections, fall back to the offline planner instead of
//! failing the run: a heuristic deck is more useful than none. Transport
//! errors still fail the stage.
//!
//! Section ids become artifact file names, so they are sanitised and made
//! unique whatever the model returns.

use crate::config::OutputFormat;
use crate::engine::StageContext;
use crate::error::PipelineError;
use crate::model::{
    FigureRef, OriginalElements, PlanResult, Section, SectionKind, ServiceMode, SummaryResult,
    TableRef,
};
use crate::pipeline::llm::LlmClient;
use crate::pipeline::postprocess::parse_json;
use crate::prompts;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{info, warn};

const OFFLINE_MIN_CHUNK: usize = 300;
const OFFLINE_EMPTY: &str = "Summary not available.";

/// Run the plan stage.
pub async fn run(
    ctx: &StageContext,
    summary: &SummaryResult,
    llm: Option<&LlmClient>,
) -> Result<PlanResult, PipelineError> {
    let output = ctx.config.output;
    let summary_md = summary.content.to_markdown();

    let (service, sections) = match llm {
        Some(llm) => match plan_remote(llm, output, &summary_md, &summary.origin).await {
            Ok(sections) => (ServiceMode::Remote, sections),
            Err(PipelineError::InvalidResponse(detail)) => {
                warn!("Plan answer unusable ({}); using offline planner", detail);
                (ServiceMode::Offline, offline_plan(output, &summary_md))
            }
            Err(e) => return Err(e),
        },
        None => {
            info!("No LLM provider: offline planner");
            (ServiceMode::Offline, offline_plan(output, &summary_md))
        }
    };

    let (min, max) = output.section_range();
    if sections.len() < min || sections.len() > max {
        warn!(
            "Plan has {} sections, outside the requested {}..={}",
            sections.len(),
            min,
            max
        );
    }
    info!("Plan: {} sections", sections.len());
    for (i, s) in sections.iter().enumerate() {
        info!("  [{}] {} ({:?})", i + 1, s.title, s.kind);
    }

    Ok(PlanResult {
        output_kind: output.kind(),
        service,
        sections,
        origin: summary.origin.clone(),
    })
}

// ── Remote ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PlanDoc {
    #[serde(default)]
    sections: Vec<PlannedSection>,
}

/// One section as the model writes it.
#[derive(Debug, Deserialize)]
struct PlannedSection {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default, rename = "type", alias = "kind")]
    kind: Option<String>,
    #[serde(default, alias = "text")]
    content: String,
    #[serde(default)]
    tables: Vec<TableRef>,
    #[serde(default)]
    figures: Vec<FigureRef>,
}

async fn plan_remote(
    llm: &LlmClient,
    output: OutputFormat,
    summary_md: &str,
    origin: &OriginalElements,
) -> Result<Vec<Section>, PipelineError> {
    let tables: Vec<String> = origin
        .tables
        .iter()
        .map(|t| labelled(&t.id, Some(t.caption.as_str())))
        .collect();
    let figures: Vec<String> = origin
        .figures
        .iter()
        .map(|f| labelled(&f.id, f.caption.as_deref()))
        .collect();
    let prompt = prompts::plan_prompt(
        output.kind(),
        output.section_range(),
        summary_md,
        &tables,
        &figures,
    );

    let answer = llm.complete(prompts::PLAN_SYSTEM_PROMPT, &prompt).await?;
    let doc: PlanDoc = parse_json(&answer)?;
    let sections = normalise_sections(doc.sections, origin);
    if sections.is_empty() {
        return Err(PipelineError::InvalidResponse("plan has no sections".into()));
    }
    Ok(sections)
}

fn labelled(id: &str, caption: Option<&str>) -> String {
    match caption {
        Some(c) if !c.trim().is_empty() => format!("{id}: {}", c.trim()),
        _ => id.to_string(),
    }
}

/// Turn model output into well-formed sections.
///
/// * ids are sanitised for use as file names and de-duplicated
/// * a missing or unknown type is inferred from position
/// * references to unknown tables or figures are dropped
fn normalise_sections(raw: Vec<PlannedSection>, origin: &OriginalElements) -> Vec<Section> {
    let total = raw.len();
    let mut used = HashSet::new();

    raw.into_iter()
        .enumerate()
        .map(|(i, p)| {
            let base = p
                .id
                .as_deref()
                .map(sanitise_id)
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| section_id(i));
            let mut id = base.clone();
            let mut n = 2;
            while !used.insert(id.clone()) {
                id = format!("{base}_{n}");
                n += 1;
            }

            let kind = p
                .kind
                .as_deref()
                .and_then(parse_kind)
                .unwrap_or_else(|| positional_kind(i, total));
            let title = if p.title.trim().is_empty() {
                format!("Section {}", i + 1)
            } else {
                p.title.trim().to_string()
            };

            let mut section = Section::new(id, title, kind).with_text(p.content.trim());
            section.table_refs = p
                .tables
                .into_iter()
                .filter(|r| known(origin.table(&r.table_id).is_some(), &r.table_id))
                .collect();
            section.figure_refs = p
                .figures
                .into_iter()
                .filter(|r| known(origin.figure(&r.figure_id).is_some(), &r.figure_id))
                .collect();
            section
        })
        .collect()
}

fn known(found: bool, id: &str) -> bool {
    if !found {
        warn!("Plan references unknown element '{}'; dropped", id);
    }
    found
}

fn sanitise_id(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

fn parse_kind(text: &str) -> Option<SectionKind> {
    match text.trim().to_ascii_lowercase().as_str() {
        "opening" | "title" | "cover" => Some(SectionKind::Opening),
        "content" | "body" => Some(SectionKind::Content),
        "ending" | "conclusion" | "closing" => Some(SectionKind::Ending),
        _ => None,
    }
}

fn positional_kind(index: usize, total: usize) -> SectionKind {
    if index == 0 {
        SectionKind::Opening
    } else if index + 1 == total {
        SectionKind::Ending
    } else {
        SectionKind::Content
    }
}

fn section_id(index: usize) -> String {
    format!("section_{:02}", index + 1)
}

// ── Offline ──────────────────────────────────────────────────────────────────

/// Heuristic plan: `max(min_sections, 3)` equal slices of the summary.
pub fn offline_plan(output: OutputFormat, summary_md: &str) -> Vec<Section> {
    let (min, _) = output.section_range();
    let count = min.max(3);
    let chars: Vec<char> = summary_md.chars().collect();
    let chunk_size = (chars.len() / count).max(OFFLINE_MIN_CHUNK);

    (0..count)
        .map(|i| {
            let start = (i * chunk_size).min(chars.len());
            let end = (start + chunk_size).min(chars.len());
            let mut text = chars[start..end].iter().collect::<String>().trim().to_string();
            if text.is_empty() && i == 0 {
                text = OFFLINE_EMPTY.to_string();
            }
            let kind = positional_kind(i, count);
            let title = match kind {
                SectionKind::Opening => "Overview",
                SectionKind::Content => "Details",
                SectionKind::Ending => "Conclusion",
            };
            Section::new(section_id(i), title, kind).with_text(text)
        })
        .collect()
}
