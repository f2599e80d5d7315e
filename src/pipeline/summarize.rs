//! Summarize stage: condense query answers into presentation content.
//!
//! Papers get five named parts. `paper_info` is read straight from the
//! head of each document rather than from retrieval answers, because
//! title and author lines are short and chunk retrieval tends to miss them.
//! General documents get one free-form summary. Both paths also extract
//! the tables and figures the planner may reference.

use crate::config::ContentKind;
use crate::engine::StageContext;
use crate::error::PipelineError;
use crate::model::{
    IndexResult, OriginalElements, QueryAnswer, ServiceMode, SourceDocument, SummaryContent,
    SummaryResult,
};
use crate::pipeline::elements::collect_elements;
use crate::pipeline::input::{is_url, InputKind};
use crate::pipeline::llm::LlmClient;
use crate::pipeline::postprocess::clean_text;
use crate::prompts;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use tracing::info;

/// Characters of each document head sent for paper metadata.
const METADATA_HEAD_CHARS: usize = 3000;
/// Concurrent section extractions.
const SECTION_CONCURRENCY: usize = 5;

const OFFLINE_EMPTY: &str = "Content not available from parsed markdown.";
const OFFLINE_MIN_SEGMENT: usize = 300;

/// Run the summarize stage.
pub async fn run(
    ctx: &StageContext,
    index: &IndexResult,
    llm: Option<&LlmClient>,
) -> Result<SummaryResult, PipelineError> {
    let texts = read_documents(&index.documents).await?;
    let content_kind = index.content_kind;

    let (service, content) = match llm {
        Some(llm) => {
            info!("Summarizing {} content with LLM", content_kind.as_str());
            let content = match content_kind {
                ContentKind::Paper => summarize_paper(llm, index, &texts).await?,
                ContentKind::General => summarize_general(llm, index).await?,
            };
            (ServiceMode::Remote, content)
        }
        None => {
            info!("No LLM provider: offline summary");
            (ServiceMode::Offline, offline_summary(&index.documents, &texts))
        }
    };

    let origin = extract_origin(&index.documents, &texts);
    info!(
        "Summary: {} tables, {} figures",
        origin.tables.len(),
        origin.figures.len()
    );

    let summary_md = content.to_markdown();
    ctx.store
        .write_text(&ctx.retrieval_dir().join("summary.md"), &summary_md)?;
    info!("Summary: {} chars", summary_md.len());

    Ok(SummaryResult {
        content_kind,
        service,
        content,
        origin,
    })
}

async fn read_documents(documents: &[SourceDocument]) -> Result<Vec<String>, PipelineError> {
    let mut texts = Vec::with_capacity(documents.len());
    for doc in documents {
        let text = tokio::fs::read_to_string(&doc.markdown_path)
            .await
            .map_err(|e| PipelineError::io(&doc.markdown_path, e))?;
        texts.push(text);
    }
    Ok(texts)
}

/// Directory relative figure paths of a document resolve against: the
/// original file's directory for local markdown, else the extracted copy's.
fn document_dir(doc: &SourceDocument) -> PathBuf {
    let source = Path::new(&doc.source);
    let local_markdown =
        !is_url(&doc.source) && InputKind::from_path(source) == Some(InputKind::Markdown);
    let dir = if local_markdown {
        source.parent()
    } else {
        doc.markdown_path.parent()
    };
    match dir {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn extract_origin(documents: &[SourceDocument], texts: &[String]) -> OriginalElements {
    let pairs: Vec<(String, PathBuf)> = documents
        .iter()
        .zip(texts)
        .map(|(doc, text)| (text.clone(), document_dir(doc)))
        .collect();
    collect_elements(&pairs)
}

/// Successful answers of one category as notes for the summariser.
fn notes(answers: &[QueryAnswer]) -> String {
    let body: Vec<String> = answers
        .iter()
        .filter(|a| a.success)
        .filter_map(|a| {
            a.answer
                .as_deref()
                .map(|text| format!("### {}\n\n{}", a.query, text.trim()))
        })
        .collect();
    if body.is_empty() {
        "(no information retrieved)".to_string()
    } else {
        body.join("\n\n")
    }
}

// ── Remote ───────────────────────────────────────────────────────────────────

async fn summarize_paper(
    llm: &LlmClient,
    index: &IndexResult,
    texts: &[String],
) -> Result<SummaryContent, PipelineError> {
    let heads = texts
        .iter()
        .map(|t| t.chars().take(METADATA_HEAD_CHARS).collect::<String>())
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");
    let paper_info = llm
        .complete(prompts::SUMMARY_SYSTEM_PROMPT, &prompts::paper_metadata_prompt(&heads))
        .await
        .map(|t| clean_text(&t))?;

    let categories = ["motivation", "solution", "results", "contributions"];
    let parts: Vec<String> = stream::iter(categories)
        .map(|category| {
            let answers = index
                .answers
                .get(category)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let prompt = prompts::paper_section_prompt(category, &notes(answers));
            let llm = llm.clone();
            async move {
                llm.complete(prompts::SUMMARY_SYSTEM_PROMPT, &prompt)
                    .await
                    .map(|t| clean_text(&t))
            }
        })
        .buffered(SECTION_CONCURRENCY)
        .boxed()
        .try_collect()
        .await?;

    let [motivation, solution, results, contributions]: [String; 4] = parts
        .try_into()
        .map_err(|_| PipelineError::Internal("paper summary section count".into()))?;
    Ok(SummaryContent::Paper {
        paper_info,
        motivation,
        solution,
        results,
        contributions,
    })
}

async fn summarize_general(
    llm: &LlmClient,
    index: &IndexResult,
) -> Result<SummaryContent, PipelineError> {
    let all: Vec<QueryAnswer> = index.answers.values().flatten().cloned().collect();
    let content = llm
        .complete(
            prompts::SUMMARY_SYSTEM_PROMPT,
            &prompts::general_summary_prompt(&notes(&all)),
        )
        .await
        .map(|t| clean_text(&t))?;
    Ok(SummaryContent::General { content })
}

// ── Offline ──────────────────────────────────────────────────────────────────

/// Heuristic paper summary from the document text alone.
///
/// The title is the first markdown heading (else the first input's stem);
/// the joined paragraphs are cut into four equal segments that fill
/// motivation, solution, results and contributions in order.
pub fn offline_summary(documents: &[SourceDocument], texts: &[String]) -> SummaryContent {
    let combined = texts.join("\n\n");
    let title = combined
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with('#'))
        .map(|l| l.trim_start_matches(['#', ' ']).trim().to_string())
        .or_else(|| {
            documents.first().and_then(|d| {
                Path::new(&d.source)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
            })
        })
        .unwrap_or_else(|| "Document".to_string());

    let paragraphs: Vec<&str> = combined
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let plain = if paragraphs.is_empty() {
        OFFLINE_EMPTY.to_string()
    } else {
        paragraphs.join("\n\n")
    };

    let chars: Vec<char> = plain.chars().collect();
    let segment_size = chars.len().div_ceil(4).max(OFFLINE_MIN_SEGMENT);
    let mut segments: Vec<String> = chars
        .chunks(segment_size)
        .map(|c| c.iter().collect::<String>().trim().to_string())
        .collect();
    segments.resize(4, String::new());

    let solution = if segments[1].is_empty() {
        segments[0].clone()
    } else {
        segments[1].clone()
    };
    SummaryContent::Paper {
        paper_info: format!("Title: {title}"),
        motivation: segments[0].clone(),
        solution,
        results: segments[2].clone(),
        contributions: segments[3].clone(),
    }
}
