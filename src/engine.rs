//! Stage engine: resume point, ordered execution and the run record.
//!
//! ## Resume
//!
//! [`StageEngine::resume_stage_for`] scans the checkpoints of a
//! [`RunIdentity`] in pipeline order; the first stage without one is where
//! execution starts. Earlier stages are marked `completed` in the fresh
//! [`RunRecord`] without invoking their work functions. When all four exist
//! the resume point is `None` and the cached generate manifest is returned.
//!
//! ## Execution
//!
//! ```text
//! for stage in resume..=generate:
//!     poll cancel token          (not before the first executed stage)
//!     record[stage] = running    → persist record
//!     result = runner.stage(..)  → write checkpoint
//!     record[stage] = completed  → persist record
//! ```
//!
//! A fault marks the stage `failed`, records the error and halts; there is
//! no stage-level retry. Cancellation is only observed between stages, so
//! its latency is the remaining duration of the current stage.

use crate::checkpoint::CheckpointStore;
use crate::config::{Configuration, EngineSettings};
use crate::error::PipelineError;
use crate::gate::CancelToken;
use crate::identity::RunIdentity;
use crate::model::{GenerateResult, IndexResult, PlanResult, SummaryResult};
use crate::output::RunOutcome;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::state::{RunRecord, Stage, StageStatus};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Record error text for a cooperative cancellation.
pub const CANCELLED_MESSAGE: &str = "cancelled by caller";

/// Everything a stage's work function may read.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Input paths or URLs as given by the caller.
    pub inputs: Vec<String>,
    pub identity: RunIdentity,
    pub config: Configuration,
    pub store: CheckpointStore,
    pub token: CancelToken,
}

impl StageContext {
    /// Directory shared by the index and summarize stages.
    pub fn retrieval_dir(&self) -> PathBuf {
        self.store.retrieval_dir(&self.identity)
    }

    /// Per-configuration directory of the plan and generate stages.
    pub fn run_dir(&self) -> PathBuf {
        self.store.run_dir(&self.identity)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.store.output_dir(&self.identity)
    }
}

/// The four stage work functions.
///
/// Implementations must be idempotent per [`RunIdentity`]; the engine owns
/// checkpoint writing and status tracking.
#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn index(&self, ctx: &StageContext) -> Result<IndexResult, PipelineError>;

    async fn summarize(
        &self,
        ctx: &StageContext,
        index: &IndexResult,
    ) -> Result<SummaryResult, PipelineError>;

    async fn plan(
        &self,
        ctx: &StageContext,
        summary: &SummaryResult,
    ) -> Result<PlanResult, PipelineError>;

    async fn generate(
        &self,
        ctx: &StageContext,
        plan: &PlanResult,
    ) -> Result<GenerateResult, PipelineError>;
}

/// Stage results loaded or produced so far in one run.
#[derive(Default)]
struct Carry {
    index: Option<IndexResult>,
    summary: Option<SummaryResult>,
    plan: Option<PlanResult>,
    generated: Option<GenerateResult>,
}

/// Drives one run through the stages against a checkpoint store.
#[derive(Clone)]
pub struct StageEngine {
    store: CheckpointStore,
    stages: Arc<dyn StageRunner>,
    progress: ProgressCallback,
}

impl std::fmt::Debug for StageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageEngine")
            .field("store", &self.store)
            .field("stages", &"<dyn StageRunner>")
            .finish()
    }
}

impl StageEngine {
    pub fn new(store: CheckpointStore, stages: Arc<dyn StageRunner>) -> Self {
        Self {
            store,
            stages,
            progress: Arc::new(NoopProgressCallback),
        }
    }

    /// Engine over `settings.output_root`, reporting to the configured callback.
    pub fn from_settings(settings: &EngineSettings, stages: Arc<dyn StageRunner>) -> Self {
        let engine = Self::new(CheckpointStore::new(&settings.output_root), stages);
        match settings.progress_callback {
            Some(ref cb) => engine.with_progress(Arc::clone(cb)),
            None => engine,
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// First stage without a checkpoint, or `None` when all are present.
    ///
    /// Pure read of the file system: calling it twice without intervening
    /// execution yields the same answer.
    pub fn resume_stage_for(&self, identity: &RunIdentity) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .find(|s| !self.store.has_checkpoint(identity, *s))
    }

    /// Read-only view of the persisted run record.
    pub fn snapshot(&self, identity: &RunIdentity) -> Result<Option<RunRecord>, PipelineError> {
        self.store.load_record(identity)
    }

    /// Run every stage from the resume point onward.
    ///
    /// The session id is the token's. Admission is the caller's job; see
    /// [`crate::run::run`].
    pub async fn execute(
        &self,
        inputs: &[String],
        identity: RunIdentity,
        config: Configuration,
        token: CancelToken,
    ) -> Result<RunOutcome, PipelineError> {
        let session_id = token.session_id().to_string();
        let result = self.execute_inner(inputs, identity, config, token).await;
        self.progress.on_run_complete(&session_id, result.is_ok());
        result
    }

    async fn execute_inner(
        &self,
        inputs: &[String],
        identity: RunIdentity,
        config: Configuration,
        token: CancelToken,
    ) -> Result<RunOutcome, PipelineError> {
        let started = Instant::now();
        let session_id = token.session_id().to_string();
        let resume = self.resume_stage_for(&identity);

        let mut record = RunRecord::new(&session_id, config.clone());
        match resume {
            Some(stage) => record.complete_before(stage),
            None => {
                for stage in Stage::ALL {
                    record.set(stage, StageStatus::Completed);
                }
            }
        }
        self.store.save_record(&identity, &record)?;

        info!(
            "Run '{}' for {}: resuming from {}",
            session_id,
            identity,
            resume.map_or("(all cached)", Stage::as_str)
        );
        self.progress.on_run_start(&session_id, resume);
        let reused = resume.map_or(Stage::ALL.len(), Stage::position);
        for stage in Stage::ALL.into_iter().take(reused) {
            self.progress.on_stage_skipped(stage);
        }

        let ctx = StageContext {
            inputs: inputs.to_vec(),
            identity,
            config,
            store: self.store.clone(),
            token,
        };

        // From here on every error leaves its trace in the record.
        let driven = match self.drive(&ctx, &mut record, resume).await {
            Ok((executed, carry)) => carry
                .generated
                .ok_or(PipelineError::MissingCheckpoint {
                    stage: Stage::Generate,
                    required: Stage::Generate,
                })
                .map(|generated| (executed, generated)),
            Err(e) => Err(e),
        };
        let (executed, generated) = match driven {
            Ok(done) => done,
            Err(e) => {
                self.record_fault(&ctx.identity, &mut record, &e);
                return Err(e);
            }
        };

        info!(
            "Run '{}' complete in {}ms ({} stage(s) executed)",
            session_id,
            started.elapsed().as_millis(),
            executed.len()
        );
        Ok(RunOutcome {
            identity: ctx.identity,
            record,
            resumed_from: resume,
            executed,
            generated,
        })
    }

    /// Execute from `resume` onward, keeping `record` current.
    ///
    /// Cancellation and stage faults are written to `record` here; any other
    /// error is left for [`Self::record_fault`].
    async fn drive(
        &self,
        ctx: &StageContext,
        record: &mut RunRecord,
        resume: Option<Stage>,
    ) -> Result<(Vec<Stage>, Carry), PipelineError> {
        let mut carry = Carry::default();
        let mut executed = Vec::new();

        let Some(start) = resume else {
            self.load(&ctx.identity, Stage::Generate, &mut carry)?;
            return Ok((executed, carry));
        };

        if let Some(required) = start.predecessor() {
            if !self.load(&ctx.identity, required, &mut carry)? {
                return Err(PipelineError::MissingCheckpoint {
                    stage: start,
                    required,
                });
            }
        }

        for stage in start.from_here() {
            if !executed.is_empty() && ctx.token.is_cancelled() {
                warn!(
                    "Run '{}' cancelled before stage {}",
                    ctx.token.session_id(),
                    stage
                );
                record.fail(CANCELLED_MESSAGE);
                self.persist_after_fault(&ctx.identity, record);
                return Err(PipelineError::Cancelled {
                    session_id: ctx.token.session_id().to_string(),
                    before: stage,
                });
            }

            // A later checkpoint can outlive an earlier one that was removed;
            // it is reused rather than overwritten.
            if stage != start && self.load(&ctx.identity, stage, &mut carry)? {
                debug!("Stage {}: reusing existing checkpoint", stage);
                record.set(stage, StageStatus::Completed);
                self.store.save_record(&ctx.identity, record)?;
                self.progress.on_stage_skipped(stage);
                continue;
            }

            record.set(stage, StageStatus::Running);
            self.store.save_record(&ctx.identity, record)?;
            self.progress.on_stage_start(stage);
            info!("Stage {}: started", stage);
            let stage_start = Instant::now();

            if let Err(e) = self.run_stage(stage, ctx, &mut carry).await {
                error!("Stage {} failed: {}", stage, e);
                record.fail(e.to_string());
                self.persist_after_fault(&ctx.identity, record);
                self.progress.on_stage_failed(stage, &e.to_string());
                return Err(PipelineError::StageFailed {
                    stage,
                    source: Box::new(e),
                });
            }

            record.set(stage, StageStatus::Completed);
            self.store.save_record(&ctx.identity, record)?;
            self.progress.on_stage_complete(stage);
            info!(
                "Stage {}: completed in {}ms",
                stage,
                stage_start.elapsed().as_millis()
            );
            executed.push(stage);
        }

        Ok((executed, carry))
    }

    /// Invoke one work function and write its checkpoint.
    async fn run_stage(
        &self,
        stage: Stage,
        ctx: &StageContext,
        carry: &mut Carry,
    ) -> Result<(), PipelineError> {
        let missing = |required| PipelineError::MissingCheckpoint { stage, required };
        let id = &ctx.identity;
        match stage {
            Stage::Index => {
                let result = self.stages.index(ctx).await?;
                self.store.write_checkpoint(id, stage, &result)?;
                carry.index = Some(result);
            }
            Stage::Summarize => {
                let input = carry.index.as_ref().ok_or_else(|| missing(Stage::Index))?;
                let result = self.stages.summarize(ctx, input).await?;
                self.store.write_checkpoint(id, stage, &result)?;
                carry.summary = Some(result);
            }
            Stage::Plan => {
                let input = carry
                    .summary
                    .as_ref()
                    .ok_or_else(|| missing(Stage::Summarize))?;
                let result = self.stages.plan(ctx, input).await?;
                self.store.write_checkpoint(id, stage, &result)?;
                carry.plan = Some(result);
            }
            Stage::Generate => {
                let input = carry.plan.as_ref().ok_or_else(|| missing(Stage::Plan))?;
                let result = self.stages.generate(ctx, input).await?;
                self.store.write_checkpoint(id, stage, &result)?;
                carry.generated = Some(result);
            }
        }
        Ok(())
    }

    /// Load a stage's checkpoint into `carry`; `false` if it is absent.
    fn load(
        &self,
        id: &RunIdentity,
        stage: Stage,
        carry: &mut Carry,
    ) -> Result<bool, PipelineError> {
        let found = match stage {
            Stage::Index => {
                carry.index = self.store.read_checkpoint(id, stage)?;
                carry.index.is_some()
            }
            Stage::Summarize => {
                carry.summary = self.store.read_checkpoint(id, stage)?;
                carry.summary.is_some()
            }
            Stage::Plan => {
                carry.plan = self.store.read_checkpoint(id, stage)?;
                carry.plan.is_some()
            }
            Stage::Generate => {
                carry.generated = self.store.read_checkpoint(id, stage)?;
                carry.generated.is_some()
            }
        };
        Ok(found)
    }

    /// The caller gets the original error even if the record cannot be saved.
    fn persist_after_fault(&self, id: &RunIdentity, record: &RunRecord) {
        if let Err(e) = self.store.save_record(id, record) {
            warn!("Could not persist run record for {}: {}", id, e);
        }
    }

    /// Record an error that escaped [`Self::drive`] unrecorded.
    ///
    /// The running stage, or else the first stage not yet completed, is
    /// marked `failed`.
    fn record_fault(&self, id: &RunIdentity, record: &mut RunRecord, e: &PipelineError) {
        if record.error.is_some() {
            return;
        }
        error!("Run for {} failed: {}", id, e);
        let stalled = record.running_stage().or_else(|| {
            Stage::ALL
                .into_iter()
                .find(|s| record.status(*s) != StageStatus::Completed)
        });
        record.fail(e.to_string());
        if let Some(stage) = stalled {
            record.set(stage, StageStatus::Failed);
        }
        self.persist_after_fault(id, record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServiceMode;
    use tempfile::TempDir;

    struct Unreachable;

    #[async_trait]
    impl StageRunner for Unreachable {
        async fn index(&self, _: &StageContext) -> Result<IndexResult, PipelineError> {
            Err(PipelineError::Internal("index should not run".into()))
        }
        async fn summarize(
            &self,
            _: &StageContext,
            _: &IndexResult,
        ) -> Result<SummaryResult, PipelineError> {
            Err(PipelineError::Internal("summarize should not run".into()))
        }
        async fn plan(&self, _: &StageContext, _: &SummaryResult) -> Result<PlanResult, PipelineError> {
            Err(PipelineError::Internal("plan should not run".into()))
        }
        async fn generate(
            &self,
            _: &StageContext,
            _: &PlanResult,
        ) -> Result<GenerateResult, PipelineError> {
            Err(PipelineError::Internal("generate should not run".into()))
        }
    }

    fn engine(dir: &TempDir) -> StageEngine {
        StageEngine::new(CheckpointStore::new(dir.path()), Arc::new(Unreachable))
    }

    #[test]
    fn fresh_identity_resumes_from_index() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let id = RunIdentity::derive(&["a.pdf"], &Configuration::default());
        assert_eq!(engine.resume_stage_for(&id), Some(Stage::Index));
        assert_eq!(engine.resume_stage_for(&id), Some(Stage::Index));
        assert!(engine.snapshot(&id).unwrap().is_none());
    }

    #[tokio::test]
    async fn stage_fault_is_recorded_and_wrapped() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let config = Configuration::default();
        let id = RunIdentity::derive(&["a.pdf"], &config);

        let err = engine
            .execute(&["a.pdf".into()], id.clone(), config, CancelToken::never("s1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StageFailed {
                stage: Stage::Index,
                ..
            }
        ));

        let record = engine.snapshot(&id).unwrap().unwrap();
        assert_eq!(record.status(Stage::Index), StageStatus::Failed);
        assert_eq!(record.status(Stage::Summarize), StageStatus::Pending);
        assert!(record.error.unwrap().contains("index should not run"));
    }

    #[tokio::test]
    async fn all_cached_returns_manifest_without_running() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let config = Configuration::default();
        let id = RunIdentity::derive(&["a.pdf"], &config);
        let store = engine.store();
        for stage in [Stage::Index, Stage::Summarize, Stage::Plan] {
            store
                .write_checkpoint(&id, stage, &serde_json::json!({}))
                .unwrap();
        }
        let manifest = GenerateResult {
            output_dir: store.output_dir(&id),
            service: ServiceMode::Offline,
            artifacts: Vec::new(),
            deck_pdf: None,
        };
        store.write_checkpoint(&id, Stage::Generate, &manifest).unwrap();

        let outcome = engine
            .execute(&[], id.clone(), config, CancelToken::never("s2"))
            .await
            .unwrap();
        assert_eq!(outcome.resumed_from, None);
        assert!(outcome.executed.is_empty());
        assert_eq!(outcome.generated, manifest);
        assert_eq!(outcome.record.overall(), crate::state::RunStatus::Completed);
    }
}
