//! Progress-callback trait for per-stage and per-artifact pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::EngineSettings::progress_callback`] to receive events as
//! the engine walks the stages and the scheduler saves artifacts.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a terminal progress bar, a channel or a
//! status endpoint without the library knowing how the host application
//! communicates. The trait is `Send + Sync` because artifact events fire from
//! the scheduler's parallel batch.
//!
//! # Example
//!
//! ```rust
//! use paperdeck::{EngineSettings, PipelineProgressCallback, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     artifacts: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_artifact_complete(&self, section_id: &str, index: usize, total: usize) {
//!         let done = self.artifacts.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{section_id}: {done}/{total} (section {index})");
//!     }
//! }
//!
//! let settings = EngineSettings::default().progress_callback(Arc::new(CountingCallback {
//!     artifacts: AtomicUsize::new(0),
//! }));
//! ```

use crate::state::Stage;
use std::sync::Arc;

/// Called by the engine and the generation scheduler as a run progresses.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// `on_artifact_complete` may be called concurrently for sections of the
/// parallel batch. Stage events are always called from the engine's single
/// thread of control, in pipeline order.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once after admission, before any stage.
    ///
    /// # Arguments
    /// * `session_id`: id the run was admitted under
    /// * `resume_from`: first stage that will execute, `None` if all cached
    fn on_run_start(&self, session_id: &str, resume_from: Option<Stage>) {
        let _ = (session_id, resume_from);
    }

    /// Called for each stage reused from its checkpoint.
    fn on_stage_skipped(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called just before a stage's work function is invoked.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called after a stage's checkpoint has been written.
    fn on_stage_complete(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage faults. Not called for cancellation.
    fn on_stage_failed(&self, stage: Stage, error: &str) {
        let _ = (stage, error);
    }

    /// Called after each artifact has been saved.
    ///
    /// # Arguments
    /// * `section_id`: section the artifact was generated for
    /// * `index`:      0-based section index
    /// * `total`:      number of artifacts this call will produce
    fn on_artifact_complete(&self, section_id: &str, index: usize, total: usize) {
        let _ = (section_id, index, total);
    }

    /// Called once when the run ends, whatever the outcome.
    fn on_run_complete(&self, session_id: &str, success: bool) {
        let _ = (session_id, success);
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::EngineSettings`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
