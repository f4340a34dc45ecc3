//! Persistent storage for simulator checkpoints
//!
//! A store holds the latest checkpoint of one run. The simulator saves after
//! each completed episode when a store is attached, and `resume` reads it back.

use crate::orchestrator::checkpoint::SimulatorCheckpoint;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint JSON is malformed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Where checkpoints live between runs
pub trait StateStore: Send + Sync {
    /// Latest saved checkpoint, if any
    fn load(&self) -> Result<Option<SimulatorCheckpoint>, StoreError>;

    /// Replace the saved checkpoint
    fn save(&self, checkpoint: &SimulatorCheckpoint) -> Result<(), StoreError>;
}

/// Process-local store, mainly for tests
#[derive(Debug, Default)]
pub struct InMemoryStore {
    slot: Mutex<Option<SimulatorCheckpoint>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStore {
    fn load(&self) -> Result<Option<SimulatorCheckpoint>, StoreError> {
        let slot = self.slot.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(slot.clone())
    }

    fn save(&self, checkpoint: &SimulatorCheckpoint) -> Result<(), StoreError> {
        let mut slot = self.slot.lock().map_err(|_| StoreError::Poisoned)?;
        *slot = Some(checkpoint.clone());
        Ok(())
    }
}

/// One pretty-printed JSON file per run
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves the previous checkpoint intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<Option<SimulatorCheckpoint>, StoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn save(&self, checkpoint: &SimulatorCheckpoint) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).map_err(|e| self.io_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        Ok(())
    }
}
