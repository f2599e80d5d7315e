//! Error types for the paperdeck library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`]: **Fatal** for the call that returns it: the run was
//!   not admitted, a stage faulted, the caller cancelled, or generation of
//!   one artifact exhausted its retries. Every escalated error is written to
//!   the persisted [`crate::state::RunRecord`] before it reaches the caller.
//!
//! * [`ArtifactError`]: **Local**: a single image-generation attempt failed.
//!   The [`crate::scheduler::GenerationScheduler`] retries it and only turns
//!   it into [`PipelineError::GenerationExhausted`] once the retry policy is
//!   spent.
//!
//! [`PipelineError::Cancelled`] is deliberately separate from
//! [`PipelineError::StageFailed`] so callers can tell a user-initiated stop
//! from a genuine fault.

use crate::state::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the paperdeck library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Orchestration ─────────────────────────────────────────────────────
    /// Another run holds the session gate. The rejected run never started.
    #[error("Another run is already active ({active}); '{requested}' was not started")]
    AdmissionRejected { requested: String, active: String },

    /// A stage needs its predecessor's checkpoint, which is absent.
    #[error("Cannot run stage '{stage}': checkpoint for '{required}' is missing")]
    MissingCheckpoint { stage: Stage, required: Stage },

    /// A stage's work function faulted. Recorded in the run record; the
    /// pipeline halts and the stage is not retried.
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: Stage,
        #[source]
        source: Box<PipelineError>,
    },

    /// Cooperative cancellation was observed at a stage boundary.
    #[error("Run '{session_id}' cancelled by caller before stage '{before}'")]
    Cancelled { session_id: String, before: Stage },

    /// Every attempt to generate one artifact failed.
    #[error("Generation of '{section_id}' failed after {attempts} attempts: {last_error}")]
    GenerationExhausted {
        section_id: String,
        attempts: u32,
        last_error: String,
    },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The extension is not one of pdf, md, markdown or txt.
    #[error("Unsupported input '{path}': expected .pdf, .md, .markdown or .txt")]
    UnsupportedInput { path: PathBuf },

    /// The file has a `.pdf` extension but does not start with `%PDF`.
    #[error("File is not a valid PDF: '{path}' (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// pdfium could not open or read the document.
    #[error("Text extraction failed for '{path}': {detail}")]
    ExtractionFailed { path: PathBuf, detail: String },

    /// No input produced any text.
    #[error("No text could be extracted from {count} input document(s)")]
    EmptyDocument { count: usize },

    /// The slide images could not be assembled into `slides.pdf`.
    #[error("Deck PDF assembly failed for '{path}': {detail}")]
    DeckAssemblyFailed { path: PathBuf, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider could not be created.
    #[error("LLM provider '{provider}' is not configured: {hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API kept failing after retries.
    #[error("LLM API error after {attempts} attempts: {message}")]
    LlmApiError { attempts: u32, message: String },

    /// The LLM answered, but not in the shape we asked for.
    #[error("Unexpected LLM response: {0}")]
    InvalidResponse(String),

    /// A custom style description was rejected by the style processor.
    #[error("Invalid custom style: {0}")]
    InvalidStyle(String),

    // ── Checkpoint errors ─────────────────────────────────────────────────
    /// Checkpoints are write-once per run identity and stage.
    #[error("Checkpoint already exists: '{path}'")]
    CheckpointExists { path: PathBuf },

    /// A checkpoint or run record exists but could not be parsed.
    #[error("Corrupt checkpoint '{path}': {source}")]
    CorruptCheckpoint {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Reading or writing a file under the output root failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    /// `true` for a cooperative cancellation, as opposed to a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled { .. })
    }
}

/// A failed attempt to produce one artifact.
///
/// Returned by [`crate::scheduler::ImageBackend::generate_one`]; retried by
/// the scheduler rather than propagated.
#[derive(Debug, Clone, Error)]
pub enum ArtifactError {
    /// The transport or API call failed.
    #[error("image API call failed: {0}")]
    Api(String),

    /// The API answered without an image.
    #[error("no image in response: {0}")]
    EmptyResponse(String),

    /// The returned image could not be decoded or encoded.
    #[error("image payload invalid: {0}")]
    Payload(String),
}
