//! Default stage implementations for document-to-deck runs.
//!
//! Each submodule implements exactly one step. Keeping them separate makes
//! each independently testable and lets the engine drive any
//! [`StageRunner`]; [`DefaultStages`] is the one wired to real services.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ index ──▶ summarize ──▶ plan ──▶ generate
//! (URL/path) (pdfium)  (queries)  (+elements)  (JSON)   (style, images)
//! ```
//!
//! 1. [`input`] / [`extract`]: canonicalise each path or URL and read its
//!    text; PDF extraction runs in `spawn_blocking`
//! 2. [`index`]: persist per-document markdown, answer retrieval queries
//! 3. [`summarize`]: condense answers; [`elements`] pulls tables and figures
//! 4. [`plan`]: JSON section plan, heuristic fallback
//! 5. [`generate`]: resolve [`style`], compose prompts, run the scheduler
//!    against an [`openrouter`] or [`placeholder`] backend, then bind the
//!    slides into one PDF with [`deck`]
//!
//! ## Degraded modes
//!
//! [`Backends::resolve`] picks the services once per engine. No text
//! provider means every text stage runs its offline heuristic; no image API
//! key means the placeholder backend draws local mock-ups. Each checkpoint
//! records which [`ServiceMode`] produced it.

pub mod deck;
pub mod elements;
pub mod encode;
pub mod extract;
pub mod generate;
pub mod index;
pub mod input;
pub mod llm;
pub mod openrouter;
pub mod placeholder;
pub mod plan;
pub mod postprocess;
pub mod style;
pub mod summarize;

use crate::config::EngineSettings;
use crate::engine::{StageContext, StageRunner};
use crate::error::PipelineError;
use crate::model::{GenerateResult, IndexResult, PlanResult, ServiceMode, SummaryResult};
use crate::scheduler::ImageBackend;
use async_trait::async_trait;
use llm::LlmClient;
use openrouter::OpenRouterBackend;
use placeholder::PlaceholderBackend;
use std::sync::Arc;
use tracing::{info, warn};

/// The external services one engine talks to.
#[derive(Clone)]
pub struct Backends {
    /// `None` runs the text stages offline.
    pub llm: Option<LlmClient>,
    pub image: Arc<dyn ImageBackend>,
    pub image_mode: ServiceMode,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("llm", &self.llm)
            .field("image", &self.image.name())
            .field("image_mode", &self.image_mode)
            .finish()
    }
}

impl Backends {
    /// Offline text stages and the placeholder image backend.
    pub fn offline() -> Self {
        Self {
            llm: None,
            image: Arc::new(PlaceholderBackend),
            image_mode: ServiceMode::Offline,
        }
    }

    /// Pick services from `settings`.
    ///
    /// A provider that cannot be resolved is not an error: the run degrades
    /// to offline text stages and says so in the log.
    pub fn resolve(settings: &EngineSettings) -> Result<Self, PipelineError> {
        let llm = if settings.offline {
            info!("Offline mode requested: text stages run without an LLM");
            None
        } else {
            match llm::resolve_provider(settings) {
                Ok(provider) => {
                    info!(
                        "LLM provider: {}",
                        settings.llm_provider.as_deref().unwrap_or("auto-detected")
                    );
                    Some(LlmClient::new(provider, settings))
                }
                Err(e) => {
                    warn!("{}; text stages run offline", e);
                    None
                }
            }
        };

        let remote = OpenRouterBackend::from_settings(&settings.image_api)
            .map_err(|e| PipelineError::InvalidConfig(format!("image backend: {e}")))?;
        let (image, image_mode): (Arc<dyn ImageBackend>, ServiceMode) = match remote {
            Some(backend) if !settings.offline => {
                info!("Image backend: {}", settings.image_api.model);
                (Arc::new(backend), ServiceMode::Remote)
            }
            _ => {
                info!("Image backend: placeholder (no IMAGE_GEN_API_KEY)");
                (Arc::new(PlaceholderBackend), ServiceMode::Offline)
            }
        };

        Ok(Self {
            llm,
            image,
            image_mode,
        })
    }
}

/// [`StageRunner`] over the stage modules of this crate.
#[derive(Debug, Clone)]
pub struct DefaultStages {
    settings: EngineSettings,
    backends: Backends,
}

impl DefaultStages {
    pub fn new(settings: EngineSettings, backends: Backends) -> Self {
        Self { settings, backends }
    }

    /// Resolve services from `settings` and wrap them.
    pub fn from_settings(settings: EngineSettings) -> Result<Self, PipelineError> {
        let backends = Backends::resolve(&settings)?;
        Ok(Self::new(settings, backends))
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }
}

#[async_trait]
impl StageRunner for DefaultStages {
    async fn index(&self, ctx: &StageContext) -> Result<IndexResult, PipelineError> {
        index::run(ctx, self.backends.llm.as_ref(), &self.settings).await
    }

    async fn summarize(
        &self,
        ctx: &StageContext,
        index: &IndexResult,
    ) -> Result<SummaryResult, PipelineError> {
        summarize::run(ctx, index, self.backends.llm.as_ref()).await
    }

    async fn plan(
        &self,
        ctx: &StageContext,
        summary: &SummaryResult,
    ) -> Result<PlanResult, PipelineError> {
        plan::run(ctx, summary, self.backends.llm.as_ref()).await
    }

    async fn generate(
        &self,
        ctx: &StageContext,
        plan: &PlanResult,
    ) -> Result<GenerateResult, PipelineError> {
        generate::run(
            ctx,
            plan,
            self.backends.llm.as_ref(),
            Arc::clone(&self.backends.image),
            self.backends.image_mode,
            &self.settings,
            self.settings.progress_callback.as_ref(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_settings_select_placeholder() {
        let mut settings = EngineSettings::default().offline(true);
        settings.image_api.api_key = Some("key".into());
        let backends = Backends::resolve(&settings).unwrap();
        assert!(backends.llm.is_none());
        assert_eq!(backends.image.name(), "placeholder");
        assert_eq!(backends.image_mode, ServiceMode::Offline);
    }

    #[test]
    fn offline_backends_have_no_llm() {
        let backends = Backends::offline();
        assert!(backends.llm.is_none());
        assert_eq!(backends.image.name(), "placeholder");
    }
}
