//! Stage result documents.
//!
//! Each type here is persisted verbatim as one stage checkpoint. They are
//! written once per run identity and never mutated by a later stage; the
//! later stage reads them and produces its own document.

use crate::config::{ContentKind, OutputKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Which path a stage took to produce its result.
///
/// `Offline` is the named degraded mode used when no LLM provider or image
/// API is available: deterministic heuristics instead of remote calls. It is
/// recorded in every checkpoint so a reader can tell a heuristic result from
/// a model-generated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    Remote,
    Offline,
}

impl fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceMode::Remote => f.write_str("remote"),
            ServiceMode::Offline => f.write_str("offline"),
        }
    }
}

// ── Index ────────────────────────────────────────────────────────────────

/// One input document after text extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Original input as given (path or URL).
    pub source: String,
    /// Extracted markdown written under the index directory.
    pub markdown_path: PathBuf,
    pub chars: usize,
}

/// Answer to one retrieval query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub query: String,
    pub answer: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Checkpoint of the `index` stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexResult {
    pub content_kind: ContentKind,
    /// `fast` (whole document as context) or `normal` (chunk retrieval).
    pub retrieval_mode: String,
    pub service: ServiceMode,
    pub documents: Vec<SourceDocument>,
    /// Query answers per category, each list in query order.
    pub answers: BTreeMap<String, Vec<QueryAnswer>>,
}

// ── Summarize ────────────────────────────────────────────────────────────

/// Extracted document content, shaped by content kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SummaryContent {
    Paper {
        paper_info: String,
        motivation: String,
        solution: String,
        results: String,
        contributions: String,
    },
    General {
        content: String,
    },
}

impl SummaryContent {
    /// Markdown rendering used as context for planning and generation.
    pub fn to_markdown(&self) -> String {
        match self {
            SummaryContent::Paper {
                paper_info,
                motivation,
                solution,
                results,
                contributions,
            } => [
                ("Paper Info", paper_info),
                ("Motivation", motivation),
                ("Solution", solution),
                ("Results", results),
                ("Contributions", contributions),
            ]
            .iter()
            .filter(|(_, body)| !body.trim().is_empty())
            .map(|(title, body)| format!("## {title}\n\n{}", body.trim()))
            .collect::<Vec<_>>()
            .join("\n\n"),
            SummaryContent::General { content } => content.trim().to_string(),
        }
    }
}

/// A table found in the source markdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub id: String,
    pub caption: String,
    /// HTML or GFM source of the table.
    pub html: String,
}

/// A figure found in the source markdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FigureInfo {
    pub id: String,
    pub caption: Option<String>,
    /// Image path, relative to the markdown file's directory.
    pub path: String,
}

/// Tables and figures of the original documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OriginalElements {
    pub tables: Vec<TableInfo>,
    pub figures: Vec<FigureInfo>,
    /// Directory figure paths are resolved against.
    pub base_path: Option<PathBuf>,
}

impl OriginalElements {
    pub fn table(&self, id: &str) -> Option<&TableInfo> {
        self.tables.iter().find(|t| t.id == id)
    }

    pub fn figure(&self, id: &str) -> Option<&FigureInfo> {
        self.figures.iter().find(|f| f.id == id)
    }
}

/// Checkpoint of the `summarize` stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub content_kind: ContentKind,
    pub service: ServiceMode,
    pub content: SummaryContent,
    pub origin: OriginalElements,
}

// ── Plan ─────────────────────────────────────────────────────────────────

/// Role of a section within the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    Opening,
    #[default]
    Content,
    Ending,
}

/// Reference from a section to a source table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRef {
    pub table_id: String,
    /// Subset of the table to show instead of the whole thing.
    #[serde(default)]
    pub extract: Option<String>,
    #[serde(default)]
    pub focus: Option<String>,
}

/// Reference from a section to a source figure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FigureRef {
    pub figure_id: String,
    #[serde(default)]
    pub focus: Option<String>,
}

/// An ordered content unit: one slide, or one block of a poster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub kind: SectionKind,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub table_refs: Vec<TableRef>,
    #[serde(default)]
    pub figure_refs: Vec<FigureRef>,
}

impl Section {
    pub fn new(id: impl Into<String>, title: impl Into<String>, kind: SectionKind) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            kind,
            text: String::new(),
            table_refs: Vec::new(),
            figure_refs: Vec::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Markdown rendering of this section with its table and figure refs
    /// resolved against `origin`.
    pub fn to_markdown(&self, origin: &OriginalElements) -> String {
        let mut lines = vec![format!("## {}", self.title), String::new(), self.text.clone()];

        for r in &self.table_refs {
            if let Some(table) = origin.table(&r.table_id) {
                let focus = r
                    .focus
                    .as_deref()
                    .map(|f| format!(" (focus: {f})"))
                    .unwrap_or_default();
                lines.push(String::new());
                lines.push(format!("**{}**{focus}:", r.table_id));
                lines.push(r.extract.clone().unwrap_or_else(|| table.html.clone()));
            }
        }

        for r in &self.figure_refs {
            if let Some(fig) = origin.figure(&r.figure_id) {
                let focus = r
                    .focus
                    .as_deref()
                    .map(|f| format!(" (focus: {f})"))
                    .unwrap_or_default();
                let caption = fig
                    .caption
                    .as_deref()
                    .map(|c| format!(": {c}"))
                    .unwrap_or_default();
                lines.push(String::new());
                lines.push(format!("**{}**{focus}{caption}", r.figure_id));
                lines.push("[Image attached]".to_string());
            }
        }

        lines.join("\n")
    }
}

/// Checkpoint of the `plan` stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    pub output_kind: OutputKind,
    pub service: ServiceMode,
    pub sections: Vec<Section>,
    pub origin: OriginalElements,
}

impl PlanResult {
    /// All sections rendered to markdown, separated by rules.
    pub fn deck_markdown(&self) -> String {
        self.sections
            .iter()
            .map(|s| s.to_markdown(&self.origin))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }
}

// ── Generate ─────────────────────────────────────────────────────────────

/// One saved artifact file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub section_id: String,
    pub file_name: String,
    pub media_type: String,
}

/// Checkpoint of the `generate` stage: a manifest of saved files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResult {
    pub output_dir: PathBuf,
    pub service: ServiceMode,
    pub artifacts: Vec<ArtifactEntry>,
    /// File name of the assembled slide deck PDF, when one was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deck_pdf: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> OriginalElements {
        OriginalElements {
            tables: vec![TableInfo {
                id: "Table 1".into(),
                caption: "Results".into(),
                html: "<table><tr><td>42</td></tr></table>".into(),
            }],
            figures: vec![FigureInfo {
                id: "Figure 2".into(),
                caption: Some("Architecture".into()),
                path: "images/arch.png".into(),
            }],
            base_path: None,
        }
    }

    #[test]
    fn section_markdown_resolves_refs() {
        let mut section = Section::new("s1", "Method", SectionKind::Content).with_text("We do X.");
        section.table_refs.push(TableRef {
            table_id: "Table 1".into(),
            extract: None,
            focus: Some("accuracy".into()),
        });
        section.figure_refs.push(FigureRef {
            figure_id: "Figure 2".into(),
            focus: None,
        });
        section.figure_refs.push(FigureRef {
            figure_id: "Figure 9".into(),
            focus: None,
        });

        let md = section.to_markdown(&origin());
        assert!(md.starts_with("## Method\n\nWe do X."));
        assert!(md.contains("**Table 1** (focus: accuracy):\n<table>"));
        assert!(md.contains("**Figure 2**: Architecture\n[Image attached]"));
        assert!(!md.contains("Figure 9"), "unknown refs are skipped");
    }

    #[test]
    fn paper_summary_skips_empty_parts() {
        let content = SummaryContent::Paper {
            paper_info: "Title: T".into(),
            motivation: "Why".into(),
            solution: "".into(),
            results: "  ".into(),
            contributions: "What".into(),
        };
        let md = content.to_markdown();
        assert!(md.contains("## Motivation\n\nWhy"));
        assert!(!md.contains("## Solution"));
        assert!(!md.contains("## Results"));
    }

    #[test]
    fn section_deserialises_with_defaults() {
        let s: Section = serde_json::from_str(r#"{"id":"a","title":"Intro"}"#).unwrap();
        assert_eq!(s.kind, SectionKind::Content);
        assert!(s.table_refs.is_empty());
    }
}
