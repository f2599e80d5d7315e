//! Generate stage: turn planned sections into slide or poster images.
//!
//! ## Prompt layout
//!
//! ```text
//! slide:   format │ style │ layout(kind) │ [decorations] │ visualization │
//!          consistency │ figure hint │ "Slide i of n" │ deck context │ this slide
//! poster:  format │ style │ [decorations] │ visualization │ figure hint │ content
//! ```
//!
//! Parts are joined by blank lines. Every slide prompt carries the whole
//! deck as context so the model can keep terminology consistent, and ends
//! with the one section it should draw. The style reference image for
//! slides 3+ is attached by the scheduler, not here.
//!
//! Artifacts are written from the scheduler's save callback as each one
//! arrives, so a run that fails on slide 9 still leaves slides 1-8 on disk.
//! Multi-slide runs finish by binding the images into `slides.pdf`.

use crate::config::{EngineSettings, OutputKind};
use crate::engine::StageContext;
use crate::error::PipelineError;
use crate::model::{ArtifactEntry, GenerateResult, OriginalElements, PlanResult, Section, ServiceMode};
use crate::output::{GeneratedArtifact, ReferenceImage};
use crate::pipeline::deck::{self, DECK_PDF_NAME};
use crate::pipeline::encode::{figures_for, load_referenced_figures};
use crate::pipeline::llm::LlmClient;
use crate::pipeline::style::{resolve_style, ResolvedStyle};
use crate::progress::ProgressCallback;
use crate::prompts;
use crate::scheduler::{GenerationRequest, GenerationScheduler, ImageBackend, PromptComposer};
use std::sync::Arc;
use tracing::{debug, info};

/// [`PromptComposer`] for one deck.
#[derive(Debug, Clone)]
pub struct DeckPrompter {
    style: ResolvedStyle,
    kind: OutputKind,
    /// Every section rendered to markdown; shared context for slides.
    context_md: String,
    origin: OriginalElements,
    /// Loaded figure images, keyed by their label (the figure id).
    figures: Vec<ReferenceImage>,
}

impl DeckPrompter {
    pub fn new(style: ResolvedStyle, plan: &PlanResult, figures: Vec<ReferenceImage>) -> Self {
        Self {
            style,
            kind: plan.output_kind,
            context_md: plan.deck_markdown(),
            origin: plan.origin.clone(),
            figures,
        }
    }

    /// Figures referenced by `section`, in reference order.
    fn section_figures(&self, section: &Section) -> Vec<ReferenceImage> {
        section
            .figure_refs
            .iter()
            .filter_map(|r| self.figures.iter().find(|img| img.label == r.figure_id))
            .cloned()
            .collect()
    }
}

impl PromptComposer for DeckPrompter {
    fn slide(&self, section: &Section, index: usize, total: usize, _styled: bool) -> GenerationRequest {
        let mut parts = vec![
            prompts::FORMAT_SLIDE.to_string(),
            self.style.hint(self.kind),
            self.style.layout_rule(section.kind).to_string(),
        ];
        parts.extend(self.style.decorations());
        parts.extend([
            prompts::VISUALIZATION_HINTS.to_string(),
            prompts::CONSISTENCY_HINT.to_string(),
            prompts::SLIDE_FIGURE_HINT.to_string(),
            format!("Slide {} of {}", index + 1, total),
            format!("---\nFull presentation context:\n{}", self.context_md),
            format!("---\nThis slide content:\n{}", section.to_markdown(&self.origin)),
        ]);

        GenerationRequest {
            prompt: parts.join("\n\n"),
            references: self.section_figures(section),
        }
    }

    fn poster(&self, sections: &[Section]) -> GenerationRequest {
        let sections_md = sections
            .iter()
            .map(|s| s.to_markdown(&self.origin))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");

        let mut parts = vec![prompts::FORMAT_POSTER.to_string(), self.style.hint(OutputKind::Poster)];
        parts.extend(self.style.decorations());
        parts.extend([
            prompts::VISUALIZATION_HINTS.to_string(),
            prompts::POSTER_FIGURE_HINT.to_string(),
            format!("---\nContent:\n{sections_md}"),
        ]);

        GenerationRequest {
            prompt: parts.join("\n\n"),
            references: figures_for(sections, &self.figures),
        }
    }
}

/// Run the generate stage against `backend`.
///
/// `image_mode` is recorded in the manifest as the stage's service mode.
pub async fn run(
    ctx: &StageContext,
    plan: &PlanResult,
    llm: Option<&LlmClient>,
    backend: Arc<dyn ImageBackend>,
    image_mode: ServiceMode,
    settings: &EngineSettings,
    progress: Option<&ProgressCallback>,
) -> Result<GenerateResult, PipelineError> {
    let style = resolve_style(&ctx.config.style, llm).await?;
    let figures = load_referenced_figures(&plan.sections, &plan.origin);
    info!(
        "Generating {} {} with '{}' ({} figure(s) attached)",
        plan.sections.len(),
        plan.output_kind.as_str(),
        backend.name(),
        figures.len()
    );

    let output_dir = ctx.output_dir();
    std::fs::create_dir_all(&output_dir).map_err(|e| PipelineError::io(&output_dir, e))?;

    let prompter = DeckPrompter::new(style, plan, figures);
    let scheduler = GenerationScheduler::new(backend, settings.image_retry, settings.max_parallel);

    let save = |artifact: &GeneratedArtifact, index: usize, total: usize| -> Result<(), PipelineError> {
        let path = output_dir.join(artifact.file_name());
        ctx.store.write_bytes(&path, &artifact.payload)?;
        debug!("Saved {} ({}/{})", path.display(), index + 1, total);
        if let Some(cb) = progress {
            cb.on_artifact_complete(&artifact.section_id, index, total);
        }
        Ok(())
    };
    let artifacts = scheduler
        .generate(&plan.sections, plan.output_kind, &prompter, save)
        .await?;

    info!("Saved {} artifact(s) to {}", artifacts.len(), output_dir.display());

    let mut deck_pdf = None;
    if deck::wants_deck(plan.output_kind == OutputKind::Slides, artifacts.len()) {
        let pages = artifacts
            .iter()
            .map(|a| output_dir.join(a.file_name()))
            .collect();
        let target = output_dir.join(DECK_PDF_NAME);
        if let Some(bytes) = deck::assemble_deck(pages, &target).await? {
            ctx.store.write_bytes(&target, &bytes)?;
            info!("Saved {}", target.display());
            deck_pdf = Some(DECK_PDF_NAME.to_string());
        }
    }

    Ok(GenerateResult {
        output_dir,
        service: image_mode,
        deck_pdf,
        artifacts: artifacts
            .iter()
            .map(|a| ArtifactEntry {
                section_id: a.section_id.clone(),
                file_name: a.file_name(),
                media_type: a.media_type.clone(),
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Style;
    use crate::model::{FigureInfo, FigureRef, SectionKind};
    use crate::pipeline::style::ProcessedStyle;

    fn plan(kind: OutputKind) -> PlanResult {
        let mut method = Section::new("method", "Method", SectionKind::Content).with_text("We do X.");
        method.figure_refs.push(FigureRef {
            figure_id: "Figure 1".into(),
            focus: None,
        });
        PlanResult {
            output_kind: kind,
            service: ServiceMode::Offline,
            sections: vec![
                Section::new("intro", "Intro", SectionKind::Opening).with_text("Hello."),
                method,
                Section::new("end", "End", SectionKind::Ending).with_text("Bye."),
            ],
            origin: OriginalElements {
                tables: vec![],
                figures: vec![FigureInfo {
                    id: "Figure 1".into(),
                    caption: Some("Architecture".into()),
                    path: "fig1.png".into(),
                }],
                base_path: None,
            },
        }
    }

    fn academic() -> ResolvedStyle {
        ResolvedStyle {
            style: Style::Academic,
            custom: None,
        }
    }

    fn figure() -> ReferenceImage {
        ReferenceImage::from_bytes("Figure 1", Some("Architecture".into()), "image/png", b"fig")
    }

    #[test]
    fn slide_prompt_has_parts_in_order() {
        let plan = plan(OutputKind::Slides);
        let prompter = DeckPrompter::new(academic(), &plan, vec![figure()]);
        let req = prompter.slide(&plan.sections[1], 1, 3, false);

        let p = &req.prompt;
        assert!(p.starts_with(prompts::FORMAT_SLIDE));
        let order = [
            prompts::style_hint(&Style::Academic, OutputKind::Slides),
            prompts::layout_rule(&Style::Academic, SectionKind::Content),
            prompts::CONSISTENCY_HINT,
            "Slide 2 of 3",
            "---\nFull presentation context:\n## Intro",
            "---\nThis slide content:\n## Method",
        ];
        let positions: Vec<usize> = order.iter().map(|s| p.find(s).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
        assert!(!p.contains("Decorations:"));

        assert_eq!(req.references.len(), 1);
        assert_eq!(req.references[0].label, "Figure 1");
        assert!(prompter.slide(&plan.sections[0], 0, 3, false).references.is_empty());
    }

    #[test]
    fn poster_prompt_covers_every_section() {
        let plan = plan(OutputKind::Poster);
        let style = ResolvedStyle {
            style: Style::Custom("chalkboard".into()),
            custom: Some(ProcessedStyle {
                style_name: "Chalkboard sketch".into(),
                decorations: "chalk dust".into(),
                ..ProcessedStyle::default()
            }),
        };
        let prompter = DeckPrompter::new(style, &plan, vec![figure()]);
        let req = prompter.poster(&plan.sections);

        assert!(req.prompt.starts_with(prompts::FORMAT_POSTER));
        assert!(req.prompt.contains("Style: Chalkboard sketch."));
        assert!(req.prompt.contains("Decorations: chalk dust"));
        let content = req.prompt.split("---\nContent:\n").nth(1).unwrap();
        assert!(content.contains("## Intro") && content.contains("## Method") && content.contains("## End"));
        assert_eq!(req.references.len(), 1);
    }
}
