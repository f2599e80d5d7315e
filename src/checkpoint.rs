//! Checkpoint store: per-stage result documents and the run record on disk.
//!
//! ## Layout
//!
//! ```text
//! <root>/<project>/<content_kind>/
//!  ├─ <fast|normal>/            shared by every configuration with this retrieval mode
//!  │   ├─ index.json
//!  │   ├─ summary.json
//!  │   ├─ summary.md
//!  │   └─ documents/<stem>.md
//!  └─ <fingerprint>/            one per configuration
//!      ├─ plan.json
//!      ├─ generate.json
//!      ├─ state.json            RunRecord
//!      └─ output/               artifacts
//! ```
//!
//! Every path is a pure function of the [`RunIdentity`]. Existence of a
//! stage's checkpoint file is the resume signal.
//!
//! Writes go through a temp file in the target directory followed by a
//! rename, so a crash never leaves a half-written checkpoint that a later
//! run would mistake for a completed stage. Checkpoints are additionally
//! no-clobber: a stage's output is written once per identity.

use crate::error::PipelineError;
use crate::identity::RunIdentity;
use crate::state::{RunRecord, Stage};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Reads and writes checkpoints under one output root.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<project>/<content_kind>`
    pub fn project_dir(&self, id: &RunIdentity) -> PathBuf {
        self.root
            .join(&id.project_name)
            .join(id.content_kind.as_str())
    }

    /// Directory of the index and summary checkpoints.
    pub fn retrieval_dir(&self, id: &RunIdentity) -> PathBuf {
        self.project_dir(id).join(id.retrieval_mode)
    }

    /// Directory of the plan and generate checkpoints and the run record.
    pub fn run_dir(&self, id: &RunIdentity) -> PathBuf {
        self.project_dir(id).join(&id.fingerprint)
    }

    /// Where generated artifacts are saved.
    pub fn output_dir(&self, id: &RunIdentity) -> PathBuf {
        self.run_dir(id).join("output")
    }

    pub fn checkpoint_path(&self, id: &RunIdentity, stage: Stage) -> PathBuf {
        match stage {
            Stage::Index => self.retrieval_dir(id).join("index.json"),
            Stage::Summarize => self.retrieval_dir(id).join("summary.json"),
            Stage::Plan => self.run_dir(id).join("plan.json"),
            Stage::Generate => self.run_dir(id).join("generate.json"),
        }
    }

    pub fn record_path(&self, id: &RunIdentity) -> PathBuf {
        self.run_dir(id).join("state.json")
    }

    /// Does stage `stage`'s output already exist for this identity?
    pub fn has_checkpoint(&self, id: &RunIdentity, stage: Stage) -> bool {
        self.checkpoint_path(id, stage).is_file()
    }

    /// Load a stage's checkpoint; `Ok(None)` when it does not exist.
    pub fn read_checkpoint<T: DeserializeOwned>(
        &self,
        id: &RunIdentity,
        stage: Stage,
    ) -> Result<Option<T>, PipelineError> {
        read_json(&self.checkpoint_path(id, stage))
    }

    /// Persist a stage's checkpoint. Fails with
    /// [`PipelineError::CheckpointExists`] if it is already present.
    pub fn write_checkpoint<T: Serialize>(
        &self,
        id: &RunIdentity,
        stage: Stage,
        value: &T,
    ) -> Result<PathBuf, PipelineError> {
        let path = self.checkpoint_path(id, stage);
        if path.exists() {
            return Err(PipelineError::CheckpointExists { path });
        }
        let bytes = to_json(&path, value)?;
        atomic_write(&path, &bytes, false)?;
        debug!("Saved {} checkpoint: {}", stage, path.display());
        Ok(path)
    }

    /// Load the run record for this identity, if one has been written.
    pub fn load_record(&self, id: &RunIdentity) -> Result<Option<RunRecord>, PipelineError> {
        read_json(&self.record_path(id))
    }

    /// Overwrite the run record. Unlike checkpoints the record is mutable.
    pub fn save_record(&self, id: &RunIdentity, record: &RunRecord) -> Result<(), PipelineError> {
        let path = self.record_path(id);
        let bytes = to_json(&path, record)?;
        atomic_write(&path, &bytes, true)
    }

    /// Write an auxiliary text file (e.g. `summary.md`), replacing any old copy.
    pub fn write_text(&self, path: &Path, text: &str) -> Result<(), PipelineError> {
        atomic_write(path, text.as_bytes(), true)
    }

    /// Write a generated artifact, replacing any old copy.
    pub fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
        atomic_write(path, bytes, true)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PipelineError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PipelineError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| PipelineError::CorruptCheckpoint {
            path: path.to_path_buf(),
            source,
        })
}

fn to_json<T: Serialize>(path: &Path, value: &T) -> Result<Vec<u8>, PipelineError> {
    serde_json::to_vec_pretty(value).map_err(|source| PipelineError::CorruptCheckpoint {
        path: path.to_path_buf(),
        source,
    })
}

/// Temp file in the destination directory, then rename into place.
fn atomic_write(path: &Path, bytes: &[u8], overwrite: bool) -> Result<(), PipelineError> {
    let parent = path
        .parent()
        .ok_or_else(|| PipelineError::Internal(format!("no parent for {}", path.display())))?;
    std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| PipelineError::io(parent, e))?;
    tmp.write_all(bytes).map_err(|e| PipelineError::io(tmp.path(), e))?;

    let persisted = if overwrite {
        tmp.persist(path)
    } else {
        tmp.persist_noclobber(path)
    };
    persisted.map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::AlreadyExists {
            PipelineError::CheckpointExists {
                path: path.to_path_buf(),
            }
        } else {
            PipelineError::io(path, e.error)
        }
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, SlidesLength};
    use tempfile::TempDir;

    fn identity(config: &Configuration) -> RunIdentity {
        RunIdentity::derive(&["paper.pdf"], config)
    }

    #[test]
    fn layout_separates_shared_and_per_config_dirs() {
        let store = CheckpointStore::new("/out");
        let short = Configuration::builder().slides(SlidesLength::Short).build().unwrap();
        let long = Configuration::builder().slides(SlidesLength::Long).build().unwrap();
        let (a, b) = (identity(&short), identity(&long));

        assert_eq!(
            store.checkpoint_path(&a, Stage::Index),
            PathBuf::from("/out/paper/paper/normal/index.json")
        );
        assert_eq!(
            store.checkpoint_path(&a, Stage::Summarize),
            store.checkpoint_path(&b, Stage::Summarize)
        );
        assert_ne!(
            store.checkpoint_path(&a, Stage::Plan),
            store.checkpoint_path(&b, Stage::Plan)
        );
        assert_eq!(
            store.record_path(&a),
            PathBuf::from("/out/paper/paper/slides_academic_short/state.json")
        );
    }

    #[test]
    fn checkpoints_are_write_once() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let id = identity(&Configuration::default());

        assert!(!store.has_checkpoint(&id, Stage::Plan));
        store
            .write_checkpoint(&id, Stage::Plan, &serde_json::json!({"n": 1}))
            .unwrap();
        assert!(store.has_checkpoint(&id, Stage::Plan));

        let err = store
            .write_checkpoint(&id, Stage::Plan, &serde_json::json!({"n": 2}))
            .unwrap_err();
        assert!(matches!(err, PipelineError::CheckpointExists { .. }));

        let kept: serde_json::Value = store.read_checkpoint(&id, Stage::Plan).unwrap().unwrap();
        assert_eq!(kept["n"], 1);
    }

    #[test]
    fn missing_checkpoint_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let id = identity(&Configuration::default());
        let v: Option<serde_json::Value> = store.read_checkpoint(&id, Stage::Index).unwrap();
        assert!(v.is_none());
        assert!(store.load_record(&id).unwrap().is_none());
    }

    #[test]
    fn corrupt_checkpoint_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let id = identity(&Configuration::default());
        let path = store.checkpoint_path(&id, Stage::Index);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();

        let err = store
            .read_checkpoint::<serde_json::Value>(&id, Stage::Index)
            .unwrap_err();
        assert!(matches!(err, PipelineError::CorruptCheckpoint { .. }));
    }

    #[test]
    fn record_round_trips_and_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path());
        let config = Configuration::default();
        let id = identity(&config);

        let mut record = RunRecord::new("s1", config);
        store.save_record(&id, &record).unwrap();
        record.fail("stopped");
        store.save_record(&id, &record).unwrap();

        let loaded = store.load_record(&id).unwrap().unwrap();
        assert_eq!(loaded.error.as_deref(), Some("stopped"));
        assert_eq!(loaded.session_id, "s1");
    }
}
