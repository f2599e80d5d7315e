//! Pipeline stages and the persisted run record.
//!
//! The [`RunRecord`] is the sole source of truth for "what happened" during
//! a run. [`crate::engine::StageEngine`] mutates it at stage boundaries and
//! persists it after every transition; status pollers only ever read it.

use crate::config::Configuration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One phase of the pipeline, in execution order.
///
/// The derived `Ord` follows declaration order, which is pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Index,
    Summarize,
    Plan,
    Generate,
}

impl Stage {
    /// Every stage in pipeline order.
    pub const ALL: [Stage; 4] = [Stage::Index, Stage::Summarize, Stage::Plan, Stage::Generate];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Index => "index",
            Stage::Summarize => "summarize",
            Stage::Plan => "plan",
            Stage::Generate => "generate",
        }
    }

    /// Position in [`Stage::ALL`].
    pub fn position(self) -> usize {
        self as usize
    }

    /// The stage whose checkpoint this one consumes.
    pub fn predecessor(self) -> Option<Stage> {
        match self {
            Stage::Index => None,
            Stage::Summarize => Some(Stage::Index),
            Stage::Plan => Some(Stage::Summarize),
            Stage::Generate => Some(Stage::Plan),
        }
    }

    /// Stages from `self` (inclusive) to the end of the pipeline.
    pub fn from_here(self) -> impl Iterator<Item = Stage> {
        Stage::ALL.into_iter().skip(self.position())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "index" | "rag" => Ok(Stage::Index),
            "summarize" | "summary" => Ok(Stage::Summarize),
            "plan" => Ok(Stage::Plan),
            "generate" => Ok(Stage::Generate),
            other => Err(format!("unknown stage '{other}'")),
        }
    }
}

/// Per-stage status: `pending → running → completed`, or `running → failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

/// Overall status derived from the per-stage statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Persisted status and metadata for one pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stages: BTreeMap<Stage, StageStatus>,
    pub error: Option<String>,
    pub config: Configuration,
}

impl RunRecord {
    /// A fresh record with every stage `pending`.
    pub fn new(session_id: impl Into<String>, config: Configuration) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            created_at: now,
            updated_at: now,
            stages: Stage::ALL
                .into_iter()
                .map(|s| (s, StageStatus::Pending))
                .collect(),
            error: None,
            config,
        }
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        self.stages.get(&stage).copied().unwrap_or_default()
    }

    /// Set one stage's status and bump `updated_at`.
    pub fn set(&mut self, stage: Stage, status: StageStatus) {
        self.stages.insert(stage, status);
        self.touch();
    }

    /// Mark every stage before `stage` as completed (reused from checkpoints).
    pub fn complete_before(&mut self, stage: Stage) {
        for s in Stage::ALL.into_iter().take(stage.position()) {
            self.stages.insert(s, StageStatus::Completed);
        }
        self.touch();
    }

    /// The stage currently marked `running`, if any.
    pub fn running_stage(&self) -> Option<Stage> {
        self.stages
            .iter()
            .find(|(_, st)| **st == StageStatus::Running)
            .map(|(s, _)| *s)
    }

    /// Record a terminal error, marking the running stage (if any) failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        if let Some(stage) = self.running_stage() {
            self.stages.insert(stage, StageStatus::Failed);
        }
        self.error = Some(error.into());
        self.touch();
    }

    /// Failed beats completed beats running beats pending.
    pub fn overall(&self) -> RunStatus {
        let statuses: Vec<StageStatus> = Stage::ALL.iter().map(|s| self.status(*s)).collect();
        if statuses.contains(&StageStatus::Failed) {
            RunStatus::Failed
        } else if statuses.iter().all(|s| *s == StageStatus::Completed) {
            RunStatus::Completed
        } else if statuses.contains(&StageStatus::Running) {
            RunStatus::Running
        } else {
            RunStatus::Pending
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> RunRecord {
        RunRecord::new("session-1", Configuration::default())
    }

    #[test]
    fn stages_are_in_pipeline_order() {
        let mut sorted = Stage::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, Stage::ALL.to_vec());
        assert_eq!(Stage::Plan.predecessor(), Some(Stage::Summarize));
        assert_eq!(
            Stage::Summarize.from_here().collect::<Vec<_>>(),
            vec![Stage::Summarize, Stage::Plan, Stage::Generate]
        );
    }

    #[test]
    fn stage_parses_legacy_names() {
        assert_eq!("rag".parse::<Stage>(), Ok(Stage::Index));
        assert_eq!("Summary".parse::<Stage>(), Ok(Stage::Summarize));
        assert!("render".parse::<Stage>().is_err());
    }

    #[test]
    fn new_record_is_pending() {
        let r = record();
        assert_eq!(r.overall(), RunStatus::Pending);
        assert!(r.error.is_none());
        assert_eq!(r.stages.len(), 4);
    }

    #[test]
    fn complete_before_marks_reused_stages() {
        let mut r = record();
        r.complete_before(Stage::Plan);
        assert_eq!(r.status(Stage::Index), StageStatus::Completed);
        assert_eq!(r.status(Stage::Summarize), StageStatus::Completed);
        assert_eq!(r.status(Stage::Plan), StageStatus::Pending);
        assert_eq!(r.overall(), RunStatus::Pending);
    }

    #[test]
    fn fail_marks_running_stage() {
        let mut r = record();
        r.set(Stage::Index, StageStatus::Running);
        assert_eq!(r.overall(), RunStatus::Running);
        r.fail("boom");
        assert_eq!(r.status(Stage::Index), StageStatus::Failed);
        assert_eq!(r.error.as_deref(), Some("boom"));
        assert_eq!(r.overall(), RunStatus::Failed);
    }

    #[test]
    fn record_serialises_stage_names_as_keys() {
        let r = record();
        let json = serde_json::to_value(&r).unwrap();
        let stages = json["stages"].as_object().unwrap();
        let keys: Vec<&str> = stages.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["generate", "index", "plan", "summarize"]);
        assert_eq!(stages["index"], "pending");
        assert!(json["error"].is_null());

        let back: RunRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
    }
}
