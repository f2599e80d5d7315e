//! Generation scheduler: one artifact per section, in dependency order.
//!
//! ## Ordering
//!
//! ```text
//! slides:  [0] ──▶ [1] ──▶ StyleReference ──▶ [2..n] buffer_unordered(max_parallel)
//!                                                  │
//!                                                  └─▶ results buffer[index] ──▶ Vec in section order
//! poster:  compose(all sections) ──▶ one call
//! ```
//!
//! Sections 0 and 1 run strictly in sequence because the second artifact is
//! the visual anchor for the rest: the image model keeps no memory between
//! calls, so every later request carries slide 1's image as a
//! [`StyleReference`]. The parallel batch does not start until that
//! reference exists.
//!
//! ## Failure policy
//!
//! Every call is wrapped in [`RetryPolicy`] (3 attempts, 2 s linear step by
//! default). A section that exhausts its retries does not cancel siblings
//! already in flight; the batch drains, every success is saved, and only
//! then is the first exhausted failure returned as
//! [`PipelineError::GenerationExhausted`].

use crate::config::{OutputKind, RetryPolicy};
use crate::error::{ArtifactError, PipelineError};
use crate::model::Section;
use crate::output::{GeneratedArtifact, ReferenceImage, StyleReference};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Section id given to the single poster artifact.
pub const POSTER_ID: &str = "poster";

/// The external image-generation call.
///
/// Returns the image bytes and their media type. Errors are treated as
/// transient and retried by the scheduler.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn generate_one(
        &self,
        prompt: &str,
        references: &[ReferenceImage],
    ) -> Result<(Vec<u8>, String), ArtifactError>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "image"
    }
}

/// A prompt plus the images attached to it.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    pub references: Vec<ReferenceImage>,
}

/// Builds generation requests from planned sections.
pub trait PromptComposer: Send + Sync {
    /// Request for slide `index` of `total`. `styled` is true when the
    /// request will carry the style reference image.
    fn slide(&self, section: &Section, index: usize, total: usize, styled: bool)
        -> GenerationRequest;

    /// One request covering every section.
    fn poster(&self, sections: &[Section]) -> GenerationRequest;
}

/// Produces artifacts for a section list under a retry policy and a
/// bounded worker pool.
#[derive(Clone)]
pub struct GenerationScheduler {
    backend: Arc<dyn ImageBackend>,
    retry: RetryPolicy,
    max_parallel: usize,
}

impl std::fmt::Debug for GenerationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationScheduler")
            .field("backend", &self.backend.name())
            .field("retry", &self.retry)
            .field("max_parallel", &self.max_parallel)
            .finish()
    }
}

impl GenerationScheduler {
    pub fn new(backend: Arc<dyn ImageBackend>, retry: RetryPolicy, max_parallel: usize) -> Self {
        Self {
            backend,
            retry,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Generate every artifact for `sections`.
    ///
    /// `on_saved(artifact, index, total)` is called once per successful
    /// artifact as soon as it exists; a save error is treated like a
    /// generation failure for that section. Returns the artifacts in section
    /// order. Zero sections yields an empty vector.
    pub async fn generate<F>(
        &self,
        sections: &[Section],
        kind: OutputKind,
        composer: &dyn PromptComposer,
        on_saved: F,
    ) -> Result<Vec<GeneratedArtifact>, PipelineError>
    where
        F: Fn(&GeneratedArtifact, usize, usize) -> Result<(), PipelineError> + Send + Sync,
    {
        if sections.is_empty() {
            debug!("No sections to generate");
            return Ok(Vec::new());
        }
        match kind {
            OutputKind::Poster => self.generate_poster(sections, composer, &on_saved).await,
            OutputKind::Slides => self.generate_slides(sections, composer, &on_saved).await,
        }
    }

    async fn generate_poster<F>(
        &self,
        sections: &[Section],
        composer: &dyn PromptComposer,
        on_saved: &F,
    ) -> Result<Vec<GeneratedArtifact>, PipelineError>
    where
        F: Fn(&GeneratedArtifact, usize, usize) -> Result<(), PipelineError> + Send + Sync,
    {
        info!("Generating poster from {} sections", sections.len());
        let request = composer.poster(sections);
        let artifact = self.attempt(POSTER_ID, &request).await?;
        on_saved(&artifact, 0, 1)?;
        Ok(vec![artifact])
    }

    async fn generate_slides<F>(
        &self,
        sections: &[Section],
        composer: &dyn PromptComposer,
        on_saved: &F,
    ) -> Result<Vec<GeneratedArtifact>, PipelineError>
    where
        F: Fn(&GeneratedArtifact, usize, usize) -> Result<(), PipelineError> + Send + Sync,
    {
        let total = sections.len();
        let mut results: Vec<Option<GeneratedArtifact>> = vec![None; total];

        // ── Warm-up: sections 0 and 1, strictly in order ─────────────────
        let warmup = total.min(2);
        for (index, section) in sections.iter().enumerate().take(warmup) {
            let request = composer.slide(section, index, total, false);
            let artifact = self.attempt(&section.id, &request).await?;
            on_saved(&artifact, index, total)?;
            results[index] = Some(artifact);
        }

        if total <= 2 {
            return Ok(results.into_iter().flatten().collect());
        }

        let reference = match results[1].as_ref() {
            Some(second) => StyleReference::from_artifact(second),
            None => {
                return Err(PipelineError::Internal(
                    "second slide missing after warm-up".into(),
                ))
            }
        };
        debug!("Style reference established from '{}'", sections[1].id);

        // ── Parallel batch: sections 2.., index-tagged ───────────────────
        info!(
            "Generating {} remaining slides with {} worker(s)",
            total - 2,
            self.max_parallel
        );
        let mut pending = stream::iter(sections.iter().enumerate().skip(2).map(
            |(index, section)| {
                let mut request = composer.slide(section, index, total, true);
                request.references.insert(0, reference.image().clone());
                let backend = Arc::clone(&self.backend);
                let retry = self.retry;
                let section_id = section.id.clone();
                async move {
                    let outcome = attempt_with(backend.as_ref(), retry, &section_id, &request).await;
                    (index, outcome)
                }
            },
        ))
        .buffer_unordered(self.max_parallel)
        .boxed();

        // Saved in completion order; collected back into section order below.
        let mut settled = Vec::with_capacity(total - 2);
        while let Some((index, outcome)) = pending.next().await {
            let outcome = match outcome {
                Ok(artifact) => on_saved(&artifact, index, total).map(|_| artifact),
                Err(e) => Err(e),
            };
            settled.push((index, outcome));
        }

        let mut first_failure: Option<(usize, PipelineError)> = None;
        for (index, outcome) in settled {
            match outcome {
                Ok(artifact) => results[index] = Some(artifact),
                Err(e) => {
                    if first_failure.as_ref().map_or(true, |(i, _)| index < *i) {
                        first_failure = Some((index, e));
                    }
                }
            }
        }
        if let Some((_, e)) = first_failure {
            return Err(e);
        }

        Ok(results.into_iter().flatten().collect())
    }

    /// One section under the retry policy.
    async fn attempt(
        &self,
        section_id: &str,
        request: &GenerationRequest,
    ) -> Result<GeneratedArtifact, PipelineError> {
        attempt_with(self.backend.as_ref(), self.retry, section_id, request).await
    }
}

async fn attempt_with(
    backend: &dyn ImageBackend,
    retry: RetryPolicy,
    section_id: &str,
    request: &GenerationRequest,
) -> Result<GeneratedArtifact, PipelineError> {
    let max_attempts = retry.max_attempts.max(1);
    let mut last_err: Option<ArtifactError> = None;

    for attempt in 1..=max_attempts {
        match backend.generate_one(&request.prompt, &request.references).await {
            Ok((payload, media_type)) => {
                debug!(
                    "{}: {} bytes ({}) on attempt {}",
                    section_id,
                    payload.len(),
                    media_type,
                    attempt
                );
                return Ok(GeneratedArtifact {
                    section_id: section_id.to_string(),
                    payload,
                    media_type,
                });
            }
            Err(e) => {
                warn!(
                    "{}: attempt {}/{} failed: {}",
                    section_id, attempt, max_attempts, e
                );
                last_err = Some(e);
                if attempt < max_attempts {
                    sleep(retry.delay_after(attempt)).await;
                }
            }
        }
    }

    Err(PipelineError::GenerationExhausted {
        section_id: section_id.to_string(),
        attempts: max_attempts,
        last_error: last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string()),
    })
}
