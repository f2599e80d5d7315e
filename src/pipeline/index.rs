//! Index stage: ingest the inputs and answer the retrieval queries.
//!
//! ## Retrieval modes
//!
//! * **fast**: every query sees the whole combined document text. Cheap to
//!   set up, expensive per query; only offered for papers.
//! * **normal**: the text is cut into paragraph-aligned chunks and each
//!   query sees the `TOP_K` chunks with the highest lexical overlap, in
//!   document order.
//!
//! Queries run through `buffer_unordered(query_concurrency)` and are put
//! back in query order per category. A query that fails is recorded with
//! `success = false`; the stage itself only fails when no text could be
//! extracted at all.

use crate::config::{ContentKind, EngineSettings};
use crate::engine::StageContext;
use crate::error::PipelineError;
use crate::identity::project_name;
use crate::model::{IndexResult, QueryAnswer, ServiceMode, SourceDocument};
use crate::pipeline::extract::extract_markdown;
use crate::pipeline::input::resolve_input;
use crate::pipeline::llm::LlmClient;
use crate::pipeline::postprocess::clean_text;
use crate::prompts::{self, GENERAL_CATEGORY};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// Target chunk size for normal-mode retrieval, in characters.
const CHUNK_CHARS: usize = 1500;
/// Chunks handed to the model per query in normal mode.
const TOP_K: usize = 6;
/// Characters of document text quoted in an offline answer.
const OFFLINE_SNIPPET_CHARS: usize = 2000;

const OFFLINE_EMPTY: &str = "Content unavailable in offline mode.";
const OFFLINE_GENERAL_QUERY: &str = "document overview";

/// One ingested input: its checkpoint entry plus the extracted text.
#[derive(Debug, Clone)]
pub struct IngestedDocument {
    pub entry: SourceDocument,
    pub text: String,
}

/// Run the index stage.
pub async fn run(
    ctx: &StageContext,
    llm: Option<&LlmClient>,
    settings: &EngineSettings,
) -> Result<IndexResult, PipelineError> {
    let docs_dir = ctx.retrieval_dir().join("documents");
    let documents = ingest(ctx, &docs_dir, settings.download_timeout_secs).await?;

    let content_kind = ctx.config.content_kind;
    let (service, answers) = match llm {
        Some(llm) => {
            let retriever = Retriever::new(&documents, ctx.config.fast_mode);
            let answers =
                answer_queries(llm, &retriever, content_kind, settings.query_concurrency).await;
            (ServiceMode::Remote, answers)
        }
        None => {
            info!("No LLM provider: using offline query answers");
            (ServiceMode::Offline, offline_answers(&documents, content_kind))
        }
    };

    let total: usize = answers.values().map(Vec::len).sum();
    let failed = answers.values().flatten().filter(|a| !a.success).count();
    info!("Index: {} queries answered ({} failed)", total, failed);

    Ok(IndexResult {
        content_kind,
        retrieval_mode: ctx.config.retrieval_mode().to_string(),
        service,
        documents: documents.into_iter().map(|d| d.entry).collect(),
        answers,
    })
}

/// Resolve, extract and persist every input as markdown under `docs_dir`.
pub async fn ingest(
    ctx: &StageContext,
    docs_dir: &Path,
    download_timeout_secs: u64,
) -> Result<Vec<IngestedDocument>, PipelineError> {
    let mut documents = Vec::with_capacity(ctx.inputs.len());

    for (i, input) in ctx.inputs.iter().enumerate() {
        let resolved = resolve_input(input, download_timeout_secs).await?;
        let text = extract_markdown(&resolved).await?;
        if text.trim().is_empty() {
            warn!("No text extracted from {}", input);
        }

        let stem = project_name(std::slice::from_ref(input));
        let markdown_path = docs_dir.join(format!("{:02}_{}.md", i + 1, stem));
        ctx.store.write_text(&markdown_path, &text)?;
        debug!("{} → {} ({} chars)", input, markdown_path.display(), text.len());

        documents.push(IngestedDocument {
            entry: SourceDocument {
                source: input.clone(),
                markdown_path,
                chars: text.chars().count(),
            },
            text,
        });
    }

    if documents.iter().all(|d| d.text.trim().is_empty()) {
        return Err(PipelineError::EmptyDocument {
            count: documents.len(),
        });
    }
    Ok(documents)
}

/// Non-empty document texts, trimmed, joined by blank lines.
fn combined_text(documents: &[IngestedDocument]) -> String {
    documents
        .iter()
        .map(|d| d.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ── Retrieval ────────────────────────────────────────────────────────────────

/// Chooses the context a query is answered from.
#[derive(Debug, Clone)]
pub enum Retriever {
    Whole(String),
    Chunks(Vec<String>),
}

impl Retriever {
    pub fn new(documents: &[IngestedDocument], fast: bool) -> Self {
        let labelled = if documents.len() > 1 {
            documents
                .iter()
                .filter(|d| !d.text.trim().is_empty())
                .map(|d| format!("=== {} ===\n\n{}", d.entry.source, d.text.trim()))
                .collect::<Vec<_>>()
                .join("\n\n")
        } else {
            combined_text(documents)
        };
        if fast {
            Retriever::Whole(labelled)
        } else {
            Retriever::Chunks(chunk_text(&labelled, CHUNK_CHARS))
        }
    }

    /// Context for one query.
    pub fn context_for(&self, query: &str) -> String {
        match self {
            Retriever::Whole(text) => text.clone(),
            Retriever::Chunks(chunks) => top_chunks(chunks, query, TOP_K).join("\n\n---\n\n"),
        }
    }
}

/// Paragraph-aligned chunks of at most `max_chars` (a single longer
/// paragraph is cut at character boundaries).
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if para.chars().count() > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = para.chars().collect();
            chunks.extend(chars.chunks(max_chars).map(|c| c.iter().collect::<String>()));
            continue;
        }
        if !current.is_empty() && current.chars().count() + para.chars().count() + 2 > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(para);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "what", "which", "this", "that", "with", "from", "does", "how",
    "its", "their", "them", "they", "was", "were", "has", "have", "any", "all", "into", "you",
    "your", "describe", "provide", "paper", "document", "mentioned", "main", "key",
];

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// The `k` best chunks for `query`, returned in document order.
///
/// Score is the sum over distinct query terms of their occurrences in the
/// chunk, capped at 3 per term so one repeated word cannot dominate.
pub fn top_chunks<'a>(chunks: &'a [String], query: &str, k: usize) -> Vec<&'a str> {
    let wanted: HashSet<String> = terms(query).into_iter().collect();
    let mut scored: Vec<(usize, usize)> = chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let words = terms(chunk);
            let score: usize = wanted
                .iter()
                .map(|t| words.iter().filter(|w| *w == t).count().min(3))
                .sum();
            (i, score)
        })
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut picked: Vec<usize> = scored.into_iter().take(k).map(|(i, _)| i).collect();
    picked.sort_unstable();
    picked.into_iter().map(|i| chunks[i].as_str()).collect()
}

// ── Queries ──────────────────────────────────────────────────────────────────

async fn answer_queries(
    llm: &LlmClient,
    retriever: &Retriever,
    kind: ContentKind,
    concurrency: usize,
) -> BTreeMap<String, Vec<QueryAnswer>> {
    let queries = prompts::queries_for(kind);
    let tasks: Vec<(&'static str, usize, &'static str)> = queries
        .iter()
        .flat_map(|(category, qs)| qs.iter().enumerate().map(move |(i, q)| (*category, i, *q)))
        .collect();
    info!(
        "Running {} queries ({} concurrent)",
        tasks.len(),
        concurrency.max(1)
    );

    let settled: Vec<(&'static str, usize, QueryAnswer)> =
        stream::iter(tasks.into_iter().map(|(category, idx, query)| {
            let llm = llm.clone();
            let prompt = prompts::query_prompt(&retriever.context_for(query), query);
            async move {
                let answer = match llm.complete(prompts::QUERY_SYSTEM_PROMPT, &prompt).await {
                    Ok(text) => QueryAnswer {
                        query: query.to_string(),
                        answer: Some(clean_text(&text)),
                        success: true,
                        error: None,
                    },
                    Err(e) => {
                        warn!("Query failed: {}: {}", query, e);
                        QueryAnswer {
                            query: query.to_string(),
                            answer: None,
                            success: false,
                            error: Some(e.to_string()),
                        }
                    }
                };
                (category, idx, answer)
            }
        }))
        .buffer_unordered(concurrency.max(1))
        .boxed()
        .collect()
        .await;

    let mut by_category: BTreeMap<String, Vec<(usize, QueryAnswer)>> = queries
        .iter()
        .map(|(c, _)| (c.to_string(), Vec::new()))
        .collect();
    for (category, idx, answer) in settled {
        by_category
            .entry(category.to_string())
            .or_default()
            .push((idx, answer));
    }
    by_category
        .into_iter()
        .map(|(category, mut answers)| {
            answers.sort_by_key(|(idx, _)| *idx);
            (category, answers.into_iter().map(|(_, a)| a).collect())
        })
        .collect()
}

fn snippet(text: &str) -> String {
    text.chars().take(OFFLINE_SNIPPET_CHARS).collect()
}

/// Answers built from the document text alone.
pub fn offline_answers(
    documents: &[IngestedDocument],
    kind: ContentKind,
) -> BTreeMap<String, Vec<QueryAnswer>> {
    let mut combined = combined_text(documents);
    if combined.is_empty() {
        combined = OFFLINE_EMPTY.to_string();
    }
    let answered = |query: &str, answer: String| QueryAnswer {
        query: query.to_string(),
        answer: Some(answer),
        success: true,
        error: None,
    };

    match kind {
        ContentKind::Paper => prompts::queries_for(kind)
            .into_iter()
            .map(|(category, queries)| {
                let answers = queries
                    .into_iter()
                    .map(|q| answered(q, format!("(Offline mode) {q}\n\n{}", snippet(&combined))))
                    .collect();
                (category.to_string(), answers)
            })
            .collect(),
        ContentKind::General => BTreeMap::from([(
            GENERAL_CATEGORY.to_string(),
            vec![answered(OFFLINE_GENERAL_QUERY, snippet(&combined))],
        )]),
    }
}
