use crate::registry::ModelRecord;
use crate::util::format::{format_eta, format_speed};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Downloading,
    Complete,
    Error,
    Cancelled,
}

impl FetchStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FetchStatus::Downloading)
    }
}

/// One step of a download as seen by a stream consumer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub model_id: String,
    pub status: FetchStatus,
    pub bytes_downloaded: u64,
    /// 0 when the server did not report a size
    pub bytes_total: u64,
    /// Percentage in 0..=100, 0 while the total is unknown
    pub progress: f64,
    pub speed: String,
    pub eta: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The registered record, on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<ModelRecord>,
}

impl ProgressEvent {
    pub fn started(model_id: &str, bytes_total: u64) -> Self {
        Self {
            model_id: model_id.to_string(),
            status: FetchStatus::Downloading,
            bytes_downloaded: 0,
            bytes_total,
            progress: 0.0,
            speed: "Starting...".to_string(),
            eta: "...".to_string(),
            error: None,
            record: None,
        }
    }

    pub fn downloading(model_id: &str, state: &TransferState, elapsed: Duration) -> Self {
        let downloaded = state.downloaded();
        let total = state.total();
        Self {
            model_id: model_id.to_string(),
            status: FetchStatus::Downloading,
            bytes_downloaded: downloaded,
            bytes_total: total,
            progress: percent(downloaded, total),
            speed: format_speed(state.transferred_this_session(), elapsed),
            eta: format_eta(downloaded, total, elapsed),
            error: None,
            record: None,
        }
    }

    pub fn complete(record: ModelRecord, bytes: u64) -> Self {
        Self {
            model_id: record.id.clone(),
            status: FetchStatus::Complete,
            bytes_downloaded: bytes,
            bytes_total: bytes,
            progress: 100.0,
            speed: "Done".to_string(),
            eta: "0s".to_string(),
            error: None,
            record: Some(record),
        }
    }

    pub fn failed(model_id: &str, state: &TransferState, message: impl Into<String>) -> Self {
        Self {
            model_id: model_id.to_string(),
            status: FetchStatus::Error,
            bytes_downloaded: state.downloaded(),
            bytes_total: state.total(),
            progress: percent(state.downloaded(), state.total()),
            speed: String::new(),
            eta: String::new(),
            error: Some(message.into()),
            record: None,
        }
    }

    pub fn cancelled(model_id: &str, state: &TransferState) -> Self {
        Self {
            status: FetchStatus::Cancelled,
            ..Self::failed(model_id, state, "Download cancelled")
        }
    }
}

fn percent(downloaded: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = downloaded as f64 / total as f64 * 100.0;
    (pct.min(100.0) * 10.0).round() / 10.0
}

/// Counters and the cancel flag shared between a transfer and its observers
#[derive(Debug, Default)]
pub struct TransferState {
    cancelled: AtomicBool,
    downloaded: AtomicU64,
    resumed_from: AtomicU64,
    total: AtomicU64,
}

impl TransferState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Marks where this session started; bytes before it came from a
    /// previous partial download
    pub fn resume_at(&self, offset: u64) {
        self.resumed_from.store(offset, Ordering::SeqCst);
        self.downloaded.store(offset, Ordering::SeqCst);
    }

    pub fn add(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    fn transferred_this_session(&self) -> u64 {
        self.downloaded()
            .saturating_sub(self.resumed_from.load(Ordering::SeqCst))
    }
}
