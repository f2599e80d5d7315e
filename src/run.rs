//! Entry points: admit a run through the gate, then drive the engine.
//!
//! ```rust,no_run
//! use paperdeck::{run, Configuration, ContentKind, EngineSettings, SessionGate, SlidesLength};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gate = SessionGate::new();
//!     let engine = run::default_engine(EngineSettings::from_env())?;
//!     let config = Configuration::builder()
//!         .content_kind(ContentKind::Paper)
//!         .slides(SlidesLength::Short)
//!         .build()?;
//!
//!     let session = run::new_session_id();
//!     let outcome = run::run(&gate, &engine, &session, &["paper.pdf".to_string()], config).await?;
//!     for path in outcome.artifact_paths() {
//!         println!("{}", path.display());
//!     }
//!     Ok(())
//! }
//! ```

use crate::config::{Configuration, EngineSettings};
use crate::engine::StageEngine;
use crate::error::PipelineError;
use crate::gate::SessionGate;
use crate::identity::RunIdentity;
use crate::output::RunOutcome;
use crate::pipeline::DefaultStages;
use crate::state::RunRecord;
use std::sync::Arc;
use tracing::info;

/// Fresh random session id.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Engine over [`DefaultStages`] with services resolved from `settings`.
pub fn default_engine(settings: EngineSettings) -> Result<StageEngine, PipelineError> {
    let stages = DefaultStages::from_settings(settings.clone())?;
    Ok(StageEngine::from_settings(&settings, Arc::new(stages)))
}

/// Run the pipeline for `inputs` under `config` as session `session_id`.
///
/// Fails with [`PipelineError::AdmissionRejected`] while another run holds
/// the gate. The slot is released on every exit path, including panics
/// inside a stage.
pub async fn run(
    gate: &SessionGate,
    engine: &StageEngine,
    session_id: &str,
    inputs: &[String],
    config: Configuration,
) -> Result<RunOutcome, PipelineError> {
    if inputs.is_empty() {
        return Err(PipelineError::InvalidConfig("no input documents".into()));
    }
    let guard = gate.admit(session_id)?;
    let identity = RunIdentity::derive(inputs, &config);
    info!("Admitted run '{}' for {}", session_id, identity);

    engine.execute(inputs, identity, config, guard.token()).await
}

/// Persisted record of the run these inputs and configuration address.
///
/// Read-only; `Ok(None)` when no run has been started for them.
pub fn status(
    engine: &StageEngine,
    inputs: &[String],
    config: &Configuration,
) -> Result<Option<RunRecord>, PipelineError> {
    engine.snapshot(&RunIdentity::derive(inputs, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(new_session_id(), new_session_id());
        assert_eq!(new_session_id().len(), 36);
    }
}
