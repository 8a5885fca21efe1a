//! Shared fakes for integration tests

use async_trait::async_trait;
use modeld::fetch::{ArtifactLocator, ArtifactSource, TransferState};
use modeld::{AgentError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[allow(dead_code)]
pub fn modeld_binary() -> std::path::PathBuf {
    std::path::PathBuf::from(env!("CARGO_BIN_EXE_modeld"))
}

#[allow(dead_code)]
pub const CHUNK: usize = 64;

/// Serves in-memory files in small chunks with a delay between them
pub struct ScriptedSource {
    files: HashMap<String, Vec<u8>>,
    chunk_delay: Duration,
    pub downloads: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedSource {
    pub fn new(files: &[(&str, &[u8])], chunk_delay: Duration) -> Self {
        Self {
            files: files
                .iter()
                .map(|(name, data)| (name.to_string(), data.to_vec()))
                .collect(),
            chunk_delay,
            downloads: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ArtifactSource for ScriptedSource {
    async fn content_length(
        &self,
        _locator: &ArtifactLocator,
        filename: &str,
        _token: Option<&str>,
    ) -> Result<Option<u64>> {
        Ok(self.files.get(filename).map(|d| d.len() as u64))
    }

    async fn download(
        &self,
        _locator: &ArtifactLocator,
        filename: &str,
        _token: Option<&str>,
        dest: &Path,
        state: &TransferState,
    ) -> Result<u64> {
        let data = self
            .files
            .get(filename)
            .ok_or_else(|| AgentError::NotFound(filename.to_string()))?;
        self.downloads.fetch_add(1, Ordering::SeqCst);

        let existing = tokio::fs::metadata(dest).await.map(|m| m.len()).unwrap_or(0) as usize;
        state.resume_at(existing as u64);
        state.set_total(data.len() as u64);

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dest)
            .await?;
        for chunk in data[existing.min(data.len())..].chunks(CHUNK) {
            if state.is_cancelled() {
                file.flush().await?;
                return Err(AgentError::Cancelled(filename.to_string()));
            }
            file.write_all(chunk).await?;
            state.add(chunk.len() as u64);
            tokio::time::sleep(self.chunk_delay).await;
        }
        file.flush().await?;
        Ok(data.len() as u64)
    }

    async fn list_files(&self, _locator: &ArtifactLocator, _token: Option<&str>) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.files.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
