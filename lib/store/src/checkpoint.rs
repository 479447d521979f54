//! Resumable run checkpoints.
//!
//! A checkpoint is a restart-safe snapshot of a run's progress: the current
//! step plus the accumulated workflow context. At most one checkpoint exists
//! per run. Writes are atomic (temp file + rename), and the checkpoint is
//! deleted when the run completes, so any checkpoint surviving startup marks
//! an interrupted run.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_core::RunId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::RwLock;

/// A snapshot of an in-flight run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The run this checkpoint belongs to.
    pub run_id: RunId,
    /// Path or name identifying the workflow.
    pub workflow: String,
    /// Identifier of the step the run is on.
    pub step_id: String,
    /// Ordinal index of the step within the workflow.
    pub step_index: u32,
    /// Accumulated step outputs, keyed by output name.
    pub context: HashMap<String, JsonValue>,
    /// When the checkpoint was written.
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Creates the initial checkpoint for a freshly-submitted run.
    #[must_use]
    pub fn initial(run_id: RunId, workflow: impl Into<String>) -> Self {
        Self {
            run_id,
            workflow: workflow.into(),
            step_id: String::new(),
            step_index: 0,
            context: HashMap::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Checkpoint persistence.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Writes (or replaces) the checkpoint for a run. Atomic.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// Loads the checkpoint for a run, if one exists.
    async fn load(&self, run_id: RunId) -> Result<Option<Checkpoint>, StoreError>;

    /// Deletes the checkpoint for a run. Idempotent.
    async fn delete(&self, run_id: RunId) -> Result<(), StoreError>;

    /// Lists runs with surviving checkpoints (interrupted runs).
    async fn list_interrupted(&self) -> Result<Vec<RunId>, StoreError>;
}

/// In-memory checkpoint store for tests.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<RunId, Checkpoint>>,
}

impl MemoryCheckpointStore {
    /// Creates an empty in-memory checkpoint store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.checkpoints
            .write()
            .unwrap()
            .insert(checkpoint.run_id, checkpoint.clone());
        Ok(())
    }

    async fn load(&self, run_id: RunId) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.checkpoints.read().unwrap().get(&run_id).cloned())
    }

    async fn delete(&self, run_id: RunId) -> Result<(), StoreError> {
        self.checkpoints.write().unwrap().remove(&run_id);
        Ok(())
    }

    async fn list_interrupted(&self) -> Result<Vec<RunId>, StoreError> {
        Ok(self.checkpoints.read().unwrap().keys().copied().collect())
    }
}

/// Disk-backed checkpoint store, one JSON file per run.
///
/// Writes go to a `.tmp` sibling first and are renamed into place, so a
/// crash mid-write never leaves a truncated checkpoint behind.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Creates a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, run_id: RunId) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        let target = self.path_for(checkpoint.run_id);
        let tmp = target.with_extension("json.tmp");

        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }

    async fn load(&self, run_id: RunId) -> Result<Option<Checkpoint>, StoreError> {
        let path = self.path_for(run_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, run_id: RunId) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(run_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_interrupted(&self) -> Result<Vec<RunId>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            // Leftover temp files are not checkpoints
            if let Ok(run_id) = RunId::from_str(stem) {
                ids.push(run_id);
            }
        }
        Ok(ids)
    }
}
