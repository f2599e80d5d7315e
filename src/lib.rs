//! # paperdeck
//!
//! Turn research papers and other documents into slide decks or posters
//! through a four-stage, checkpointed LLM pipeline.
//!
//! ## Why checkpoints?
//!
//! Every stage calls slow, paid, rate-limited services, and the last one
//! (image generation) is the slowest of all. Each stage persists its result
//! under a directory derived from the inputs and the [`Configuration`], so
//! a failed or cancelled run resumes at the first missing stage and two
//! configurations that differ only in style share their index and summary.
//!
//! ## Pipeline Overview
//!
//! ```text
//! inputs (PDF / Markdown / URL)
//!  │
//!  ├─ 1. index      extract text, answer retrieval queries     index.json
//!  ├─ 2. summarize  condense answers, collect tables/figures   summary.json
//!  ├─ 3. plan       split into opening/content/ending sections plan.json
//!  └─ 4. generate   one image per slide (or one poster)        generate.json + output/
//!                  plus output/slides.pdf for multi-slide decks
//! ```
//!
//! Three pieces hold the run together:
//!
//! * [`SessionGate`]: admits one run at a time and carries cooperative
//!   cancellation, observed between stages
//! * [`StageEngine`]: resume point, ordered execution, persisted [`RunRecord`]
//! * [`GenerationScheduler`]: slides 1 and 2 in order, slide 2 as the style
//!   reference for the rest, then a bounded worker pool with per-slide retry
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use paperdeck::{run, Configuration, EngineSettings, SessionGate, Style};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Text provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / ...
//!     // Images from IMAGE_GEN_API_KEY; without it placeholders are drawn.
//!     let engine = run::default_engine(EngineSettings::from_env())?;
//!     let config = Configuration::builder().style(Style::Academic).build()?;
//!
//!     let gate = SessionGate::new();
//!     let inputs = vec!["paper.pdf".to_string()];
//!     let outcome = run::run(&gate, &engine, &run::new_session_id(), &inputs, config).await?;
//!     eprintln!("resumed from {:?}, ran {:?}", outcome.resumed_from, outcome.executed);
//!     Ok(())
//! }
//! ```
//!
//! ## Degraded mode
//!
//! Without a text provider every text stage falls back to a deterministic
//! heuristic, and without an image key the placeholder backend draws local
//! mock-ups. Checkpoints record which [`ServiceMode`] produced them.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `paperdeck` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! paperdeck = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod identity;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod run;
pub mod scheduler;
pub mod state;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use checkpoint::CheckpointStore;
pub use config::{
    Configuration, ConfigurationBuilder, ContentKind, EngineSettings, ImageApiSettings,
    OutputFormat, OutputKind, PosterDensity, RetryPolicy, SlidesLength, Style,
};
pub use engine::{StageContext, StageEngine, StageRunner};
pub use error::{ArtifactError, PipelineError};
pub use gate::{CancelToken, SessionGate, SessionGuard};
pub use identity::RunIdentity;
pub use model::{
    GenerateResult, IndexResult, PlanResult, Section, SectionKind, ServiceMode, SummaryResult,
};
pub use output::{GeneratedArtifact, ReferenceImage, RunOutcome, StyleReference};
pub use pipeline::{Backends, DefaultStages};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use scheduler::{GenerationRequest, GenerationScheduler, ImageBackend, PromptComposer};
pub use state::{RunRecord, RunStatus, Stage, StageStatus};
