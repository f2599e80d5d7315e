//! Configuration types.
//!
//! Two structs split the knobs by whether they change *what* is produced:
//!
//! * [`Configuration`] is the immutable run configuration. It is part of the
//!   run identity (two runs with equal configurations share checkpoints), is
//!   embedded into every [`crate::state::RunRecord`], and is never mutated
//!   once built. Stages read it; none write it.
//!
//! * [`EngineSettings`] controls *how* the engine works: where outputs go,
//!   how many generations run at once, retry behaviour, which backends are
//!   used. Changing these never invalidates a checkpoint.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// What kind of document is being converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Academic paper: retrieval and summary follow fixed paper categories.
    #[default]
    Paper,
    /// Any other document: a single free-form summary.
    General,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Paper => "paper",
            ContentKind::General => "general",
        }
    }
}

/// Output kind without its sizing parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Slides,
    Poster,
}

impl OutputKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputKind::Slides => "slides",
            OutputKind::Poster => "poster",
        }
    }
}

/// Deck length for slide output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlidesLength {
    Short,
    #[default]
    Medium,
    Long,
}

/// Information density for poster output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PosterDensity {
    Sparse,
    #[default]
    Medium,
    Dense,
}

/// The artifact to produce together with its length or density.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "output_kind", rename_all = "lowercase")]
pub enum OutputFormat {
    Slides { length: SlidesLength },
    Poster { density: PosterDensity },
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Slides {
            length: SlidesLength::default(),
        }
    }
}

impl OutputFormat {
    pub fn kind(&self) -> OutputKind {
        match self {
            OutputFormat::Slides { .. } => OutputKind::Slides,
            OutputFormat::Poster { .. } => OutputKind::Poster,
        }
    }

    /// Length or density as it appears in the configuration fingerprint.
    pub fn extent_name(&self) -> &'static str {
        match self {
            OutputFormat::Slides { length } => match length {
                SlidesLength::Short => "short",
                SlidesLength::Medium => "medium",
                SlidesLength::Long => "long",
            },
            OutputFormat::Poster { density } => match density {
                PosterDensity::Sparse => "sparse",
                PosterDensity::Medium => "medium",
                PosterDensity::Dense => "dense",
            },
        }
    }

    /// Inclusive `(min, max)` number of sections the planner should produce.
    pub fn section_range(&self) -> (usize, usize) {
        match self {
            OutputFormat::Slides { length } => match length {
                SlidesLength::Short => (5, 8),
                SlidesLength::Medium => (8, 12),
                SlidesLength::Long => (12, 18),
            },
            OutputFormat::Poster { density } => match density {
                PosterDensity::Sparse => (3, 3),
                PosterDensity::Medium => (4, 4),
                PosterDensity::Dense => (6, 6),
            },
        }
    }
}

/// Visual style of the generated artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    #[default]
    Academic,
    Doraemon,
    /// Free-text description, resolved into concrete hints at generation time.
    Custom(String),
}

impl Style {
    /// Map a user-supplied style string onto a closed variant.
    ///
    /// `academic` and `doraemon` (any case) are the predefined styles; any
    /// other non-empty text is a custom description. Empty text falls back
    /// to the default style.
    pub fn parse(text: &str) -> Style {
        let trimmed = text.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "academic" => Style::Academic,
            "doraemon" => Style::Doraemon,
            _ => Style::Custom(trimmed.to_string()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Style::Academic => "academic",
            Style::Doraemon => "doraemon",
            Style::Custom(_) => "custom",
        }
    }
}

/// Immutable configuration consumed by every stage.
///
/// Built via [`Configuration::builder()`]; the builder is the only place
/// where cross-field rules (fast mode only for papers, non-empty custom
/// style) are enforced.
///
/// # Example
/// ```rust
/// use paperdeck::{Configuration, ContentKind, SlidesLength, Style};
///
/// let config = Configuration::builder()
///     .content_kind(ContentKind::Paper)
///     .slides(SlidesLength::Short)
///     .style(Style::Doraemon)
///     .fast_mode(true)
///     .build()
///     .unwrap();
/// assert!(config.fast_mode);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Configuration {
    pub content_kind: ContentKind,
    #[serde(flatten)]
    pub output: OutputFormat,
    pub style: Style,
    /// Skip chunked retrieval and query the whole document directly.
    /// Only meaningful for papers; forced off for general content.
    pub fast_mode: bool,
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder {
            config: Self::default(),
            message: None,
        }
    }

    pub fn output_kind(&self) -> OutputKind {
        self.output.kind()
    }

    /// Retrieval mode directory name: `fast` or `normal`.
    pub fn retrieval_mode(&self) -> &'static str {
        if self.fast_mode {
            "fast"
        } else {
            "normal"
        }
    }
}

/// Builder for [`Configuration`].
#[derive(Debug)]
pub struct ConfigurationBuilder {
    config: Configuration,
    message: Option<String>,
}

impl ConfigurationBuilder {
    pub fn content_kind(mut self, kind: ContentKind) -> Self {
        self.config.content_kind = kind;
        self
    }

    pub fn slides(mut self, length: SlidesLength) -> Self {
        self.config.output = OutputFormat::Slides { length };
        self
    }

    pub fn poster(mut self, density: PosterDensity) -> Self {
        self.config.output = OutputFormat::Poster { density };
        self
    }

    pub fn output(mut self, output: OutputFormat) -> Self {
        self.config.output = output;
        self
    }

    pub fn style(mut self, style: Style) -> Self {
        self.config.style = style;
        self
    }

    /// A free-text message from the user. When non-empty it overrides the
    /// style parameter and becomes a custom style description.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn fast_mode(mut self, v: bool) -> Self {
        self.config.fast_mode = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<Configuration, PipelineError> {
        let mut config = self.config;

        if let Some(msg) = self.message.as_deref().map(str::trim) {
            if !msg.is_empty() {
                config.style = Style::Custom(msg.to_string());
            }
        }
        if let Style::Custom(ref text) = config.style {
            if text.trim().is_empty() {
                return Err(PipelineError::InvalidConfig(
                    "custom style description must not be empty".into(),
                ));
            }
        }
        if config.content_kind == ContentKind::General {
            config.fast_mode = false;
        }
        Ok(config)
    }
}

/// Retry policy for one artifact generation.
///
/// Attempt `n` (1-based) that fails waits `step * n` before the next one,
/// so the default waits 2 s, then 4 s, before giving up on the 3rd failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            step: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.step * attempt
    }
}

/// Connection settings for the image-generation endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageApiSettings {
    /// `None` selects the offline placeholder backend.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for ImageApiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "google/gemini-3-pro-image-preview".to_string(),
            timeout_secs: 300,
        }
    }
}

impl fmt::Debug for ImageApiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageApiSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Engine-level settings. None of these affect the run identity.
#[derive(Clone)]
pub struct EngineSettings {
    /// Root directory for checkpoints, run records and artifacts. Default: `outputs`.
    pub output_root: PathBuf,

    /// Worker-pool size for slides after the style reference. Default: 1.
    ///
    /// Image APIs are slow and rate-limited; one worker keeps a run polite.
    /// Raise it when the endpoint tolerates concurrent requests.
    pub max_parallel: usize,

    /// Per-artifact retry policy. Default: 3 attempts, 2 s linear step.
    pub image_retry: RetryPolicy,

    pub image_api: ImageApiSettings,

    /// LLM provider name (e.g. "openai", "anthropic"). `None` auto-detects.
    pub llm_provider: Option<String>,

    /// LLM model identifier. `None` uses the provider default.
    pub llm_model: Option<String>,

    /// Retries on a failed LLM completion. Default: 3.
    pub llm_max_retries: u32,

    /// Initial LLM retry delay in milliseconds, doubled per attempt. Default: 500.
    pub llm_backoff_ms: u64,

    /// Sampling temperature for text stages. Default: 0.3.
    pub temperature: f32,

    /// Maximum completion tokens for text stages. Default: 4096.
    pub max_tokens: usize,

    /// Concurrent retrieval queries during indexing. Default: 5.
    pub query_concurrency: usize,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Force the offline text path even when a provider could be resolved.
    pub offline: bool,

    pub progress_callback: Option<ProgressCallback>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("outputs"),
            max_parallel: 1,
            image_retry: RetryPolicy::default(),
            image_api: ImageApiSettings::default(),
            llm_provider: None,
            llm_model: None,
            llm_max_retries: 3,
            llm_backoff_ms: 500,
            temperature: 0.3,
            max_tokens: 4096,
            query_concurrency: 5,
            download_timeout_secs: 120,
            offline: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for EngineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSettings")
            .field("output_root", &self.output_root)
            .field("max_parallel", &self.max_parallel)
            .field("image_retry", &self.image_retry)
            .field("image_api", &self.image_api)
            .field("llm_provider", &self.llm_provider)
            .field("llm_model", &self.llm_model)
            .field("llm_max_retries", &self.llm_max_retries)
            .field("query_concurrency", &self.query_concurrency)
            .field("offline", &self.offline)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl EngineSettings {
    /// Defaults overlaid with environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `PAPERDECK_LLM_PROVIDER` | `llm_provider` |
    /// | `PAPERDECK_MODEL` | `llm_model` |
    /// | `IMAGE_GEN_API_KEY` | `image_api.api_key` |
    /// | `IMAGE_GEN_BASE_URL` | `image_api.base_url` |
    /// | `IMAGE_GEN_MODEL` | `image_api.model` |
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.llm_provider = non_empty_env("PAPERDECK_LLM_PROVIDER");
        settings.llm_model = non_empty_env("PAPERDECK_MODEL");
        settings.image_api.api_key = non_empty_env("IMAGE_GEN_API_KEY");
        if let Some(url) = non_empty_env("IMAGE_GEN_BASE_URL") {
            settings.image_api.base_url = url;
        }
        if let Some(model) = non_empty_env("IMAGE_GEN_MODEL") {
            settings.image_api.model = model;
        }
        settings
    }

    pub fn output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    pub fn max_parallel(mut self, n: usize) -> Self {
        self.max_parallel = n.max(1);
        self
    }

    pub fn image_retry(mut self, policy: RetryPolicy) -> Self {
        self.image_retry = policy;
        self
    }

    pub fn offline(mut self, v: bool) -> Self {
        self.offline = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.progress_callback = Some(cb);
        self
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
