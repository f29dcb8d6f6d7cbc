//! Durable workflow snapshots and the stores that hold them.
//!
//! A checkpoint is written after every completed phase, before the machine
//! advances. Each one carries an explicit monotonically increasing `seq`;
//! "latest" always means highest `seq`, never file-name or timestamp order.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ResolvaError;
use crate::state_machine::WorkflowState;

/// Durable snapshot of a [`WorkflowState`] at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub task_id: String,
    pub state_name: String,
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
    /// The serialized workflow. Kept as raw JSON so stores stay independent
    /// of the concrete state type.
    pub workflow: Value,
}

impl Checkpoint {
    /// Snapshot a workflow at sequence number `seq`.
    pub fn for_workflow<S>(workflow: &WorkflowState<S>, seq: u64) -> Result<Self, ResolvaError>
    where
        S: fmt::Display + Serialize,
    {
        Ok(Self {
            task_id: workflow.task_id.clone(),
            state_name: workflow.current_state.to_string(),
            seq,
            recorded_at: Utc::now(),
            workflow: serde_json::to_value(workflow)?,
        })
    }

    /// Checkpoint file name for the filesystem tier:
    /// `{task_id}_state_{state_name}.json`.
    pub fn file_name(&self) -> String {
        format!("{}_state_{}.json", self.task_id, self.state_name)
    }
}

/// Persistence contract consumed by the workflow engine.
///
/// The store owns "most recent" semantics; the engine only ever asks for the
/// latest checkpoint of a task. Checkpoints are never deleted by the core.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), ResolvaError>;
    async fn load_latest(&self, task_id: &str) -> Result<Option<Checkpoint>, ResolvaError>;
}

/// In-memory store for tests and the demo command.
///
/// One slot per `(task_id, state_name)` pair, latest write wins.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), ResolvaError> {
        let mut guard = self
            .checkpoints
            .write()
            .map_err(|e| ResolvaError::Checkpoint(e.to_string()))?;
        let slots = guard.entry(checkpoint.task_id.clone()).or_default();
        slots.retain(|c| c.state_name != checkpoint.state_name);
        slots.push(checkpoint.clone());
        Ok(())
    }

    async fn load_latest(&self, task_id: &str) -> Result<Option<Checkpoint>, ResolvaError> {
        let guard = self
            .checkpoints
            .read()
            .map_err(|e| ResolvaError::Checkpoint(e.to_string()))?;
        Ok(guard
            .get(task_id)
            .and_then(|slots| slots.iter().max_by_key(|c| c.seq))
            .cloned())
    }
}

/// Filesystem store, used directly or as the fallback tier below the
/// networked cache.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn prefix(task_id: &str) -> String {
        format!("{task_id}_state_")
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), ResolvaError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(checkpoint.file_name());
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn load_latest(&self, task_id: &str) -> Result<Option<Checkpoint>, ResolvaError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let prefix = Self::prefix(task_id);
        let mut latest: Option<Checkpoint> = None;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(&prefix) || !name.ends_with(".json") {
                continue;
            }
            let bytes = tokio::fs::read(entry.path()).await?;
            let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
            if checkpoint.task_id != task_id {
                continue;
            }
            if latest.as_ref().is_none_or(|c| checkpoint.seq > c.seq) {
                latest = Some(checkpoint);
            }
        }
        Ok(latest)
    }
}

/// Dual-tier store: every write goes to the primary (the networked cache);
/// if the primary is unreachable the write falls back to the secondary (the
/// local filesystem). Reads consult the primary first, then the fallback, and
/// report a miss only when neither tier has a record.
pub struct TieredCheckpointStore<P, F> {
    primary: P,
    fallback: F,
}

impl<P, F> TieredCheckpointStore<P, F>
where
    P: CheckpointStore,
    F: CheckpointStore,
{
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl<P, F> CheckpointStore for TieredCheckpointStore<P, F>
where
    P: CheckpointStore,
    F: CheckpointStore,
{
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), ResolvaError> {
        match self.primary.save(checkpoint).await {
            Ok(()) => Ok(()),
            Err(_) => self.fallback.save(checkpoint).await,
        }
    }

    async fn load_latest(&self, task_id: &str) -> Result<Option<Checkpoint>, ResolvaError> {
        match self.primary.load_latest(task_id).await {
            Ok(Some(checkpoint)) => Ok(Some(checkpoint)),
            Ok(None) | Err(_) => self.fallback.load_latest(task_id).await,
        }
    }
}
