//! Text LLM calls: provider resolution and completion with retry.
//!
//! Prompt text lives in [`crate::prompts`]; this module only owns transport
//! concerns.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent under
//! concurrent load. Exponential backoff (`llm_backoff_ms * 2^attempt`)
//! avoids a thundering herd: with 500 ms base and 3 retries the wait
//! sequence is 500 ms → 1 s → 2 s.

use crate::config::EngineSettings;
use crate::error::PipelineError;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// A provider plus the completion and retry settings of one engine.
#[derive(Clone)]
pub struct LlmClient {
    provider: Arc<dyn LLMProvider>,
    max_retries: u32,
    backoff_ms: u64,
    temperature: f32,
    max_tokens: usize,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("provider", &"<dyn LLMProvider>")
            .field("max_retries", &self.max_retries)
            .field("backoff_ms", &self.backoff_ms)
            .finish()
    }
}

impl LlmClient {
    pub fn new(provider: Arc<dyn LLMProvider>, settings: &EngineSettings) -> Self {
        Self {
            provider,
            max_retries: settings.llm_max_retries,
            backoff_ms: settings.llm_backoff_ms,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }

    /// One system + user exchange; returns the completion text.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String, PipelineError> {
        let start = Instant::now();
        let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
        let options = build_options(self.temperature, self.max_tokens);
        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "LLM retry {}/{} after {}ms",
                    attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "LLM: {} input tokens, {} output tokens, {:?}",
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(response.content);
                }
                Err(e) => {
                    let err_msg = format!("{}", e);
                    warn!("LLM attempt {} failed: {}", attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(PipelineError::LlmApiError {
            attempts: self.max_retries + 1,
            message: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

fn build_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        PipelineError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the text provider, from most-specific to least-specific.
///
/// 1. **Named provider** (`settings.llm_provider`, from `PAPERDECK_LLM_PROVIDER`)
///    with `settings.llm_model` or a default model.
/// 2. **Full auto-detection** (`ProviderFactory::from_env`), which scans the
///    known API-key variables and picks the first available provider.
pub fn resolve_provider(settings: &EngineSettings) -> Result<Arc<dyn LLMProvider>, PipelineError> {
    if let Some(ref name) = settings.llm_provider {
        let model = settings.llm_model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| PipelineError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or PAPERDECK_LLM_PROVIDER.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_options_defaults() {
        let settings = EngineSettings::default();
        let opts = build_options(settings.temperature, settings.max_tokens);
        assert_eq!(opts.temperature, Some(0.3));
        assert_eq!(opts.max_tokens, Some(4096));
    }
}
