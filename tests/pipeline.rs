//! Integration tests for the run lifecycle: admission, resume, cancellation,
//! failure recording, and an offline end-to-end run over a Markdown input.
//!
//! Every test works in its own `TempDir`; none needs network access or an
//! API key.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use async_trait::async_trait;
use paperdeck::model::{ArtifactEntry, OriginalElements, SummaryContent};
use paperdeck::{
    run, Backends, CheckpointStore, Configuration, ContentKind, DefaultStages, EngineSettings,
    GenerateResult, IndexResult, PipelineError, PipelineProgressCallback, PlanResult, RetryPolicy,
    RunIdentity, RunStatus, Section, SectionKind, ServiceMode, SessionGate, SlidesLength, Stage,
    StageContext, StageEngine, StageRunner, StageStatus, SummaryResult,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Stage runner that records calls and can fail or cancel at a given stage.
#[derive(Default)]
struct SpyStages {
    calls: Mutex<Vec<Stage>>,
    fail_at: Option<Stage>,
    /// Request cancellation of this session from inside `index`.
    cancel_from_index: Option<(SessionGate, String)>,
}

impl SpyStages {
    fn failing_at(stage: Stage) -> Self {
        Self {
            fail_at: Some(stage),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<Stage> {
        self.calls.lock().unwrap().clone()
    }

    fn enter(&self, stage: Stage) -> Result<(), PipelineError> {
        self.calls.lock().unwrap().push(stage);
        if self.fail_at == Some(stage) {
            return Err(PipelineError::Internal(format!("{stage} exploded")));
        }
        Ok(())
    }
}

#[async_trait]
impl StageRunner for SpyStages {
    async fn index(&self, ctx: &StageContext) -> Result<IndexResult, PipelineError> {
        self.enter(Stage::Index)?;
        if let Some((gate, id)) = &self.cancel_from_index {
            assert!(gate.request_cancel(id));
        }
        Ok(IndexResult {
            content_kind: ctx.config.content_kind,
            retrieval_mode: ctx.config.retrieval_mode().to_string(),
            service: ServiceMode::Offline,
            documents: Vec::new(),
            answers: BTreeMap::new(),
        })
    }

    async fn summarize(
        &self,
        ctx: &StageContext,
        _index: &IndexResult,
    ) -> Result<SummaryResult, PipelineError> {
        self.enter(Stage::Summarize)?;
        Ok(SummaryResult {
            content_kind: ctx.config.content_kind,
            service: ServiceMode::Offline,
            content: SummaryContent::General {
                content: "summary".into(),
            },
            origin: OriginalElements::default(),
        })
    }

    async fn plan(
        &self,
        ctx: &StageContext,
        _summary: &SummaryResult,
    ) -> Result<PlanResult, PipelineError> {
        self.enter(Stage::Plan)?;
        Ok(PlanResult {
            output_kind: ctx.config.output_kind(),
            service: ServiceMode::Offline,
            sections: vec![Section::new("section_01", "Only", SectionKind::Opening)],
            origin: OriginalElements::default(),
        })
    }

    async fn generate(
        &self,
        ctx: &StageContext,
        plan: &PlanResult,
    ) -> Result<GenerateResult, PipelineError> {
        self.enter(Stage::Generate)?;
        Ok(GenerateResult {
            output_dir: ctx.output_dir(),
            service: ServiceMode::Offline,
            artifacts: plan
                .sections
                .iter()
                .map(|s| ArtifactEntry {
                    section_id: s.id.clone(),
                    file_name: format!("{}.png", s.id),
                    media_type: "image/png".into(),
                })
                .collect(),
            deck_pdf: None,
        })
    }
}

fn engine(dir: &TempDir, stages: Arc<SpyStages>) -> StageEngine {
    StageEngine::new(CheckpointStore::new(dir.path()), stages)
}

fn inputs() -> Vec<String> {
    vec!["paper.pdf".to_string()]
}

// ── Resume ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rerun_resumes_after_last_checkpoint() {
    let dir = TempDir::new().unwrap();
    let gate = SessionGate::new();
    let config = Configuration::default();
    let id = RunIdentity::derive(inputs().as_slice(), &config);

    let failing = Arc::new(SpyStages::failing_at(Stage::Plan));
    let err = run::run(&gate, &engine(&dir, failing.clone()), "s1", &inputs(), config.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::StageFailed { stage: Stage::Plan, .. }));
    assert_eq!(failing.calls(), vec![Stage::Index, Stage::Summarize, Stage::Plan]);

    let spy = Arc::new(SpyStages::default());
    let engine = engine(&dir, spy.clone());
    assert_eq!(engine.resume_stage_for(&id), Some(Stage::Plan));
    assert_eq!(engine.resume_stage_for(&id), Some(Stage::Plan));

    let outcome = run::run(&gate, &engine, "s2", &inputs(), config)
        .await
        .unwrap();
    assert_eq!(spy.calls(), vec![Stage::Plan, Stage::Generate]);
    assert_eq!(outcome.resumed_from, Some(Stage::Plan));
    assert_eq!(outcome.executed, vec![Stage::Plan, Stage::Generate]);
    assert_eq!(outcome.record.session_id, "s2");
    assert_eq!(outcome.record.status(Stage::Index), StageStatus::Completed);
    assert_eq!(outcome.record.overall(), RunStatus::Completed);
    assert_eq!(outcome.generated.artifacts.len(), 1);
}

#[tokio::test]
async fn completed_run_is_not_executed_again() {
    let dir = TempDir::new().unwrap();
    let gate = SessionGate::new();

    let first = Arc::new(SpyStages::default());
    let a = run::run(&gate, &engine(&dir, first.clone()), "s1", &inputs(), Configuration::default())
        .await
        .unwrap();
    assert_eq!(first.calls().len(), 4);

    let second = Arc::new(SpyStages::default());
    let b = run::run(&gate, &engine(&dir, second.clone()), "s2", &inputs(), Configuration::default())
        .await
        .unwrap();
    assert!(second.calls().is_empty());
    assert_eq!(b.resumed_from, None);
    assert_eq!(a.generated, b.generated);
}

#[tokio::test]
async fn style_change_reuses_index_and_summary() {
    let dir = TempDir::new().unwrap();
    let gate = SessionGate::new();
    let spy = Arc::new(SpyStages::default());
    let engine = engine(&dir, spy.clone());

    run::run(&gate, &engine, "s1", &inputs(), Configuration::default())
        .await
        .unwrap();
    let doraemon = Configuration::builder()
        .style(paperdeck::Style::Doraemon)
        .build()
        .unwrap();
    let outcome = run::run(&gate, &engine, "s2", &inputs(), doraemon)
        .await
        .unwrap();

    assert_eq!(outcome.resumed_from, Some(Stage::Plan));
    let calls = spy.calls();
    assert_eq!(calls.iter().filter(|s| **s == Stage::Index).count(), 1);
    assert_eq!(calls.iter().filter(|s| **s == Stage::Plan).count(), 2);
}

// ── Gate ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn busy_gate_rejects_without_running() {
    let dir = TempDir::new().unwrap();
    let gate = SessionGate::new();
    assert!(gate.try_start("other"));

    let spy = Arc::new(SpyStages::default());
    let err = run::run(&gate, &engine(&dir, spy.clone()), "mine", &inputs(), Configuration::default())
        .await
        .unwrap_err();
    match err {
        PipelineError::AdmissionRejected { requested, active } => {
            assert_eq!(requested, "mine");
            assert_eq!(active, "other");
        }
        other => panic!("expected AdmissionRejected, got {other}"),
    }
    assert!(spy.calls().is_empty());
    assert_eq!(gate.active_run().as_deref(), Some("other"));
}

#[test]
fn gate_is_released_after_failure() {
    let dir = TempDir::new().unwrap();
    let gate = SessionGate::new();
    let spy = Arc::new(SpyStages::failing_at(Stage::Index));

    let result = tokio_test::block_on(run::run(
        &gate,
        &engine(&dir, spy),
        "s1",
        &inputs(),
        Configuration::default(),
    ));
    assert!(result.is_err());
    assert!(gate.active_run().is_none());
    assert!(gate.try_start("s2"));
}

#[tokio::test]
async fn empty_inputs_are_rejected_before_admission() {
    let dir = TempDir::new().unwrap();
    let gate = SessionGate::new();
    let err = run::run(
        &gate,
        &engine(&dir, Arc::new(SpyStages::default())),
        "s1",
        &[],
        Configuration::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidConfig(_)));
    assert!(gate.active_run().is_none());
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_takes_effect_at_next_stage_boundary() {
    let dir = TempDir::new().unwrap();
    let gate = SessionGate::new();
    let config = Configuration::default();
    let spy = Arc::new(SpyStages {
        cancel_from_index: Some((gate.clone(), "s1".to_string())),
        ..SpyStages::default()
    });
    let engine = engine(&dir, spy.clone());

    let err = run::run(&gate, &engine, "s1", &inputs(), config.clone())
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    match err {
        PipelineError::Cancelled { session_id, before } => {
            assert_eq!(session_id, "s1");
            assert_eq!(before, Stage::Summarize);
        }
        other => panic!("expected Cancelled, got {other}"),
    }
    // The in-flight stage finished; nothing after it started.
    assert_eq!(spy.calls(), vec![Stage::Index]);

    let record = run::status(&engine, &inputs(), &config).unwrap().unwrap();
    assert_eq!(record.status(Stage::Index), StageStatus::Completed);
    assert_eq!(record.status(Stage::Summarize), StageStatus::Pending);
    assert_eq!(record.error.as_deref(), Some("cancelled by caller"));

    assert!(gate.active_run().is_none());
    assert!(!gate.is_cancelled("s1"));
}

// ── Failure recording ────────────────────────────────────────────────────────

#[tokio::test]
async fn stage_failure_is_recorded_before_returning() {
    let dir = TempDir::new().unwrap();
    let gate = SessionGate::new();
    let config = Configuration::default();
    let engine = engine(&dir, Arc::new(SpyStages::failing_at(Stage::Summarize)));

    let err = run::run(&gate, &engine, "s1", &inputs(), config.clone())
        .await
        .unwrap_err();
    assert!(!err.is_cancelled());

    let record = run::status(&engine, &inputs(), &config).unwrap().unwrap();
    assert_eq!(record.status(Stage::Index), StageStatus::Completed);
    assert_eq!(record.status(Stage::Summarize), StageStatus::Failed);
    assert_eq!(record.status(Stage::Plan), StageStatus::Pending);
    assert_eq!(record.overall(), RunStatus::Failed);
    assert!(record.error.unwrap().contains("summarize exploded"));
}

/// Leaves index and summary checkpoints behind, then fails at plan.
async fn run_until_plan_fails(dir: &TempDir, gate: &SessionGate) -> RunIdentity {
    let config = Configuration::default();
    let failing = Arc::new(SpyStages::failing_at(Stage::Plan));
    run::run(gate, &engine(dir, failing), "s1", &inputs(), config.clone())
        .await
        .unwrap_err();
    RunIdentity::derive(inputs().as_slice(), &config)
}

#[tokio::test]
async fn corrupt_predecessor_checkpoint_is_recorded() {
    let dir = TempDir::new().unwrap();
    let gate = SessionGate::new();
    let id = run_until_plan_fails(&dir, &gate).await;

    let store = CheckpointStore::new(dir.path());
    std::fs::write(store.checkpoint_path(&id, Stage::Summarize), "{not json").unwrap();

    let spy = Arc::new(SpyStages::default());
    let engine = engine(&dir, spy.clone());
    let err = run::run(&gate, &engine, "s2", &inputs(), Configuration::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::CorruptCheckpoint { .. }), "{err}");
    assert!(spy.calls().is_empty());

    let record = run::status(&engine, &inputs(), &Configuration::default())
        .unwrap()
        .unwrap();
    assert_eq!(record.session_id, "s2");
    assert!(record.error.as_deref().unwrap().contains("Corrupt checkpoint"));
    assert_eq!(record.status(Stage::Summarize), StageStatus::Completed);
    assert_eq!(record.status(Stage::Plan), StageStatus::Failed);
    assert_eq!(record.overall(), RunStatus::Failed);
    assert!(gate.active_run().is_none());
}

/// Removes one checkpoint when the run starts, after the resume point was chosen.
struct RemoveOnStart(std::path::PathBuf);

impl PipelineProgressCallback for RemoveOnStart {
    fn on_run_start(&self, _session_id: &str, _resume_from: Option<Stage>) {
        std::fs::remove_file(&self.0).unwrap();
    }
}

#[tokio::test]
async fn predecessor_removed_mid_start_is_missing_checkpoint() {
    let dir = TempDir::new().unwrap();
    let gate = SessionGate::new();
    let id = run_until_plan_fails(&dir, &gate).await;

    let store = CheckpointStore::new(dir.path());
    let summary = store.checkpoint_path(&id, Stage::Summarize);
    let spy = Arc::new(SpyStages::default());
    let engine = engine(&dir, spy.clone()).with_progress(Arc::new(RemoveOnStart(summary)));

    let err = run::run(&gate, &engine, "s2", &inputs(), Configuration::default())
        .await
        .unwrap_err();
    match err {
        PipelineError::MissingCheckpoint { stage, required } => {
            assert_eq!(stage, Stage::Plan);
            assert_eq!(required, Stage::Summarize);
        }
        other => panic!("expected MissingCheckpoint, got {other}"),
    }
    assert!(spy.calls().is_empty());

    let record = engine.snapshot(&id).unwrap().unwrap();
    assert!(record.error.is_some());
    assert_eq!(record.status(Stage::Plan), StageStatus::Failed);
    assert!(gate.active_run().is_none());
}

// ── Offline end-to-end ───────────────────────────────────────────────────────

#[derive(Default)]
struct ArtifactCounter {
    artifacts: AtomicUsize,
}

impl PipelineProgressCallback for ArtifactCounter {
    fn on_artifact_complete(&self, _section_id: &str, _index: usize, total: usize) {
        assert_eq!(total, 5);
        self.artifacts.fetch_add(1, Ordering::SeqCst);
    }
}

const NOTES: &str = "# Efficient Deck Generation\n\n\
Slides take hours to make by hand. This document describes a pipeline that \
turns papers into decks.\n\n\
Table 1: Timing per stage\n\n\
| Stage | Seconds |\n|---|---|\n| index | 12 |\n| generate | 340 |\n\n\
Image generation dominates the cost, so it runs with bounded parallelism \
and a shared style reference.\n\n\
![Pipeline overview](figures/overview.png)\n\n\
In conclusion, checkpointing makes retries cheap.\n";

#[tokio::test]
async fn offline_markdown_run_produces_placeholder_slides() {
    let dir = TempDir::new().unwrap();
    let doc = dir.path().join("notes.md");
    std::fs::write(&doc, NOTES).unwrap();
    let inputs = vec![doc.to_string_lossy().into_owned()];

    let counter = Arc::new(ArtifactCounter::default());
    let settings = EngineSettings::default()
        .output_root(dir.path().join("outputs"))
        .max_parallel(2)
        .image_retry(RetryPolicy {
            max_attempts: 1,
            step: Duration::from_millis(1),
        })
        .progress_callback(counter.clone());
    let stages = DefaultStages::new(settings.clone(), Backends::offline());
    let engine = StageEngine::from_settings(&settings, Arc::new(stages));

    let config = Configuration::builder()
        .content_kind(ContentKind::General)
        .slides(SlidesLength::Short)
        .build()
        .unwrap();
    let gate = SessionGate::new();
    let outcome = run::run(&gate, &engine, &run::new_session_id(), &inputs, config.clone())
        .await
        .unwrap();

    assert_eq!(outcome.identity.project_name, "notes");
    assert_eq!(outcome.generated.service, ServiceMode::Offline);
    let ids: Vec<&str> = outcome
        .generated
        .artifacts
        .iter()
        .map(|a| a.section_id.as_str())
        .collect();
    assert_eq!(
        ids,
        vec!["section_01", "section_02", "section_03", "section_04", "section_05"]
    );
    for path in outcome.artifact_paths() {
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG", "{}", path.display());
    }
    assert_eq!(counter.artifacts.load(Ordering::SeqCst), 5);

    // slides.pdf is bound when a pdfium library is installed on the host.
    let deck = outcome.generated.output_dir.join("slides.pdf");
    match outcome.deck_pdf_path() {
        Some(path) => {
            assert_eq!(path, deck);
            assert!(std::fs::read(&path).unwrap().starts_with(b"%PDF"));
        }
        None => assert!(!deck.exists()),
    }

    let store = engine.store();
    let retrieval = store.retrieval_dir(&outcome.identity);
    assert!(retrieval.join("documents/01_notes.md").is_file());
    let summary_md = std::fs::read_to_string(retrieval.join("summary.md")).unwrap();
    assert!(summary_md.contains("Title: Efficient Deck Generation"));

    let summary: SummaryResult = store
        .read_checkpoint(&outcome.identity, Stage::Summarize)
        .unwrap()
        .unwrap();
    assert_eq!(summary.origin.tables.len(), 1);
    assert_eq!(summary.origin.tables[0].id, "Table 1");
    assert_eq!(summary.origin.figures.len(), 1);
    assert_eq!(summary.origin.figures[0].caption.as_deref(), Some("Pipeline overview"));

    // Second run reuses everything.
    let again = run::run(&gate, &engine, &run::new_session_id(), &inputs, config)
        .await
        .unwrap();
    assert_eq!(again.resumed_from, None);
    assert_eq!(again.generated, outcome.generated);
    assert_eq!(counter.artifacts.load(Ordering::SeqCst), 5);
}
