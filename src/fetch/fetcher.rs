use super::locator::{default_model_id, local_filename, ArtifactLocator};
use super::progress::{FetchStatus, ProgressEvent, TransferState};
use super::source::ArtifactSource;
use crate::error::{AgentError, Result};
use crate::registry::{ModelRecord, ModelRegistry};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

const PROVIDER: &str = "huggingface";
const PART_SUFFIX: &str = ".part";
const TOKENIZER_FILE: &str = "tokenizer.json";
const EVENT_BUFFER: usize = 32;

/// What to download and how to register it
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub locator: ArtifactLocator,
    /// Defaults to the lowercased file stem
    pub model_id: Option<String>,
    /// Defaults to the last segment of the repository id
    pub name: Option<String>,
    pub dest_dir: PathBuf,
    pub token: Option<String>,
}

impl FetchRequest {
    pub fn new(locator: ArtifactLocator, dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            locator,
            model_id: None,
            name: None,
            dest_dir: dest_dir.into(),
            token: None,
        }
    }

    pub fn with_model_id(mut self, id: impl Into<String>) -> Self {
        self.model_id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }
}

/// A request with the file and id settled
#[derive(Debug, Clone)]
struct Job {
    locator: ArtifactLocator,
    filename: String,
    model_id: String,
    name: String,
    dir: PathBuf,
    token: Option<String>,
}

impl Job {
    fn artifact_path(&self) -> Result<PathBuf> {
        Ok(self.dir.join(local_filename(&self.filename)?))
    }
}

type JobTable = Arc<Mutex<HashMap<String, Arc<TransferState>>>>;

/// Removes the job from the in-flight table when the transfer ends
struct JobSlot {
    jobs: JobTable,
    model_id: String,
}

impl Drop for JobSlot {
    fn drop(&mut self) {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.model_id);
    }
}

/// Resumable, cancelable artifact downloads
///
/// At most one transfer runs per model id. Artifacts land in
/// `<dest_dir>/<model_id>/` next to a best-effort `tokenizer.json`, and the
/// finished artifact is registered in the [`ModelRegistry`].
pub struct ArtifactFetcher {
    source: Arc<dyn ArtifactSource>,
    registry: Arc<ModelRegistry>,
    jobs: JobTable,
    poll_interval: Duration,
}

impl ArtifactFetcher {
    pub fn new(
        source: Arc<dyn ArtifactSource>,
        registry: Arc<ModelRegistry>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            registry,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            poll_interval,
        }
    }

    /// Ids with a transfer in flight
    pub fn in_flight(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Asks the transfer for `model_id` to stop. Returns `false` when no
    /// transfer is in flight for it.
    pub fn cancel(&self, model_id: &str) -> bool {
        match self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(model_id)
        {
            Some(state) => {
                info!(model_id, "Download cancellation requested");
                state.cancel();
                true
            }
            None => false,
        }
    }

    /// Downloads and registers the artifact, returning the registered record
    pub async fn fetch(&self, request: FetchRequest) -> Result<ModelRecord> {
        let job = self.prepare(request).await?;
        let (state, _slot) = self.claim(&job.model_id)?;
        run_job(&*self.source, &self.registry, &job, &state).await
    }

    /// Starts a download and reports it as a stream of progress events
    ///
    /// The stream yields `downloading` events every poll interval and ends
    /// with exactly one terminal event: `complete`, `error` or `cancelled`.
    /// A transfer that finished before a cancellation took effect reports
    /// `complete`, so the terminal event always matches the registry.
    /// Dropping the stream cancels the transfer.
    pub async fn fetch_stream(&self, request: FetchRequest) -> Result<ReceiverStream<ProgressEvent>> {
        let job = self.prepare(request).await?;
        let (state, slot) = self.claim(&job.model_id)?;

        let total = match self
            .source
            .content_length(&job.locator, &job.filename, job.token.as_deref())
            .await
        {
            Ok(size) => size.unwrap_or(0),
            Err(e) => {
                debug!(model_id = %job.model_id, error = %e, "Size lookup failed");
                0
            }
        };
        state.set_total(total);

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let source = Arc::clone(&self.source);
        let registry = Arc::clone(&self.registry);
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let terminal = monitor(source, registry, job, state, &tx, poll_interval).await;
            // free the id before announcing the end so a follow-up fetch is accepted
            drop(slot);
            if let Some(event) = terminal {
                let _ = tx.send(event).await;
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    async fn prepare(&self, request: FetchRequest) -> Result<Job> {
        let filename = match &request.locator.filename {
            Some(name) => name.clone(),
            None => self.pick_gguf(&request).await?,
        };

        let model_id = request
            .model_id
            .clone()
            .unwrap_or_else(|| default_model_id(&filename));
        let name = request
            .name
            .clone()
            .unwrap_or_else(|| request.locator.default_name());
        let dir = request.dest_dir.join(local_filename(&model_id)?);

        Ok(Job {
            locator: request.locator.clone().with_filename(filename.clone()),
            filename,
            model_id,
            name,
            dir,
            token: request.token,
        })
    }

    /// A repository-only locator must contain exactly one GGUF file
    async fn pick_gguf(&self, request: &FetchRequest) -> Result<String> {
        let files = self
            .source
            .list_files(&request.locator, request.token.as_deref())
            .await?;
        let mut gguf: Vec<String> = files.into_iter().filter(|f| f.ends_with(".gguf")).collect();

        match gguf.len() {
            0 => Err(AgentError::InvalidLocator(format!(
                "no GGUF files in {}",
                request.locator.repo_id
            ))),
            1 => Ok(gguf.remove(0)),
            _ => Err(AgentError::InvalidLocator(format!(
                "{} has several GGUF files, pick one of: {}",
                request.locator.repo_id,
                gguf.join(", ")
            ))),
        }
    }

    fn claim(&self, model_id: &str) -> Result<(Arc<TransferState>, JobSlot)> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if jobs.contains_key(model_id) {
            return Err(AgentError::invalid_state(format!(
                "a download for {} is already in progress",
                model_id
            )));
        }
        let state = Arc::new(TransferState::new());
        jobs.insert(model_id.to_string(), Arc::clone(&state));
        Ok((
            state,
            JobSlot {
                jobs: Arc::clone(&self.jobs),
                model_id: model_id.to_string(),
            },
        ))
    }
}

async fn monitor(
    source: Arc<dyn ArtifactSource>,
    registry: Arc<ModelRegistry>,
    job: Job,
    state: Arc<TransferState>,
    tx: &mpsc::Sender<ProgressEvent>,
    poll_interval: Duration,
) -> Option<ProgressEvent> {
    let model_id = job.model_id.clone();
    if tx.send(ProgressEvent::started(&model_id, state.total())).await.is_err() {
        return None;
    }

    let transfer_state = Arc::clone(&state);
    let mut transfer = tokio::spawn(async move {
        run_job(&*source, &registry, &job, &transfer_state).await
    });
    let started = Instant::now();

    let terminal = loop {
        tokio::select! {
            biased;

            outcome = &mut transfer => break terminal_event(outcome, &model_id, &state),
            _ = tokio::time::sleep(poll_interval) => {
                if state.is_cancelled() {
                    // the transfer may have registered the model since its last poll
                    transfer.abort();
                    break terminal_event((&mut transfer).await, &model_id, &state);
                }
                let event = ProgressEvent::downloading(&model_id, &state, started.elapsed());
                if tx.send(event).await.is_err() {
                    debug!(model_id = %model_id, "Progress consumer went away, cancelling");
                    state.cancel();
                    transfer.abort();
                    return None;
                }
            }
        }
    };

    debug_assert!(terminal.status.is_terminal());
    match terminal.status {
        FetchStatus::Complete => info!(model_id = %model_id, "Download complete"),
        FetchStatus::Cancelled => info!(model_id = %model_id, "Download cancelled"),
        _ => warn!(model_id = %model_id, error = ?terminal.error, "Download failed"),
    }
    Some(terminal)
}

fn terminal_event(
    outcome: std::result::Result<Result<ModelRecord>, JoinError>,
    model_id: &str,
    state: &TransferState,
) -> ProgressEvent {
    match outcome {
        Ok(Ok(record)) => {
            let bytes = state.downloaded().max(state.total());
            ProgressEvent::complete(record, bytes)
        }
        Ok(Err(AgentError::Cancelled(_))) => ProgressEvent::cancelled(model_id, state),
        Ok(Err(AgentError::AuthRequired(_))) => ProgressEvent::failed(
            model_id,
            state,
            "Authentication failed. Check your Hugging Face token.",
        ),
        Ok(Err(e)) => ProgressEvent::failed(model_id, state, e.to_string()),
        Err(e) if e.is_cancelled() => ProgressEvent::cancelled(model_id, state),
        Err(e) => ProgressEvent::failed(model_id, state, format!("download task failed: {}", e)),
    }
}

async fn run_job(
    source: &dyn ArtifactSource,
    registry: &ModelRegistry,
    job: &Job,
    state: &TransferState,
) -> Result<ModelRecord> {
    tokio::fs::create_dir_all(&job.dir).await?;
    let artifact = job.artifact_path()?;

    let existing = tokio::fs::metadata(&artifact).await.map(|m| m.len()).unwrap_or(0);
    if existing > 0 {
        info!(path = %artifact.display(), "Artifact already present");
        state.resume_at(existing);
        state.set_total(existing);
    } else {
        let part = part_path(&artifact);
        source
            .download(&job.locator, &job.filename, job.token.as_deref(), &part, state)
            .await?;
        if state.is_cancelled() {
            return Err(AgentError::Cancelled(job.model_id.clone()));
        }
        tokio::fs::rename(&part, &artifact).await?;
    }

    fetch_tokenizer(source, job).await;

    let size_bytes = tokio::fs::metadata(&artifact).await?.len();
    let record = ModelRecord::local(&job.model_id, &job.name, &artifact)
        .with_size_mb(size_bytes as f64 / (1024.0 * 1024.0))
        .with_metadata("repo_id", &job.locator.repo_id)
        .with_metadata("filename", &job.filename)
        .with_metadata("artifact_dir", job.dir.display().to_string());
    let record = ModelRecord {
        provider: Some(PROVIDER.to_string()),
        ..record
    };

    registry.register(record)
}

/// GGUF repositories often ship no tokenizer; the runtime reports that at load
async fn fetch_tokenizer(source: &dyn ArtifactSource, job: &Job) {
    let target = job.dir.join(TOKENIZER_FILE);
    if tokio::fs::metadata(&target).await.is_ok() {
        return;
    }

    let part = part_path(&target);
    let scratch = TransferState::new();
    match source
        .download(&job.locator, TOKENIZER_FILE, job.token.as_deref(), &part, &scratch)
        .await
    {
        Ok(_) => {
            if let Err(e) = tokio::fs::rename(&part, &target).await {
                debug!(error = %e, "Could not move tokenizer into place");
            }
        }
        Err(e) => {
            debug!(repo = %job.locator.repo_id, error = %e, "No tokenizer in repository");
            let _ = tokio::fs::remove_file(&part).await;
        }
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}
