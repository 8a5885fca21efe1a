//! Durable storage for model records

use super::record::ModelRecord;
use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

const STORE_VERSION: u32 = 1;

pub trait RecordStore: Send + Sync {
    fn load(&self) -> Result<Vec<ModelRecord>>;

    /// Replaces the stored set with `records`
    fn save(&self, records: &[ModelRecord]) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    models: Vec<ModelRecord>,
}

/// Records kept in a single JSON file, rewritten through a temp file and a
/// rename so a crash never leaves a half-written registry behind
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
}

impl RecordStore for JsonFileStore {
    fn load(&self) -> Result<Vec<ModelRecord>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No registry file yet");
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)?;
        let file: StoreFile = serde_json::from_str(&content).map_err(|e| {
            AgentError::storage(format!("corrupt registry {}: {}", self.path.display(), e))
        })?;

        if file.version > STORE_VERSION {
            return Err(AgentError::storage(format!(
                "registry version {} is newer than supported version {}",
                file.version, STORE_VERSION
            )));
        }

        Ok(file.models)
    }

    fn save(&self, records: &[ModelRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = StoreFile {
            version: STORE_VERSION,
            models: records.to_vec(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<ModelRecord>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ModelRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            saves: Mutex::new(0),
        }
    }

    /// Number of completed saves
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RecordStore for MemoryStore {
    fn load(&self) -> Result<Vec<ModelRecord>> {
        Ok(self.records.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, records: &[ModelRecord]) -> Result<()> {
        *self.records.lock().unwrap_or_else(|e| e.into_inner()) = records.to_vec();
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}
