//! Artifact repository access

use super::locator::ArtifactLocator;
use super::progress::TransferState;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use hf_hub::api::tokio::ApiBuilder;
use hf_hub::{Repo, RepoType};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;
use std::path::Path;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("modeld/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Operations the fetcher needs from an artifact repository
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Size of a file in bytes, `None` when the server does not say
    async fn content_length(
        &self,
        locator: &ArtifactLocator,
        filename: &str,
        token: Option<&str>,
    ) -> Result<Option<u64>>;

    /// Downloads `filename` into `dest`, continuing from whatever `dest`
    /// already holds. Progress goes to `state`; a cancelled state stops the
    /// transfer between chunks with `AgentError::Cancelled`, leaving `dest`
    /// in place for a later resume.
    async fn download(
        &self,
        locator: &ArtifactLocator,
        filename: &str,
        token: Option<&str>,
        dest: &Path,
        state: &TransferState,
    ) -> Result<u64>;

    async fn list_files(&self, locator: &ArtifactLocator, token: Option<&str>) -> Result<Vec<String>>;
}

/// Hugging Face compatible hub
#[derive(Debug, Clone)]
pub struct HubSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HubSource {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AgentError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: reqwest::Method, url: &str, token: Option<&str>) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match token {
            Some(token) if !token.is_empty() => {
                builder.header(AUTHORIZATION, format!("Bearer {}", token))
            }
            _ => builder,
        }
    }
}

fn check_status(status: StatusCode, what: &str) -> Result<()> {
    match status.as_u16() {
        401 | 403 => Err(AgentError::AuthRequired(format!(
            "{} was refused ({}). Check your Hugging Face token.",
            what, status
        ))),
        404 => Err(AgentError::NotFound(what.to_string())),
        _ if status.is_success() => Ok(()),
        _ => Err(AgentError::Network(format!("{} failed with status {}", what, status))),
    }
}

#[async_trait]
impl ArtifactSource for HubSource {
    async fn content_length(
        &self,
        locator: &ArtifactLocator,
        filename: &str,
        token: Option<&str>,
    ) -> Result<Option<u64>> {
        let url = locator.file_url(&self.endpoint, filename);
        let response = self.request(reqwest::Method::HEAD, &url, token).send().await?;
        check_status(response.status(), &url)?;

        // the hub reports the real size of LFS files separately from the redirect body
        let linked = response
            .headers()
            .get("x-linked-size")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|len| *len > 0);

        Ok(linked.or(length))
    }

    async fn download(
        &self,
        locator: &ArtifactLocator,
        filename: &str,
        token: Option<&str>,
        dest: &Path,
        state: &TransferState,
    ) -> Result<u64> {
        let url = locator.file_url(&self.endpoint, filename);
        let existing = tokio::fs::metadata(dest).await.map(|m| m.len()).unwrap_or(0);

        let mut request = self.request(reqwest::Method::GET, &url, token);
        if existing > 0 {
            request = request.header(RANGE, format!("bytes={}-", existing));
        }
        let mut response = request.send().await?;

        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE && existing > 0 {
            debug!(path = %dest.display(), "Partial file already complete");
            state.resume_at(existing);
            state.set_total(existing);
            return Ok(existing);
        }
        check_status(response.status(), &url)?;

        let resumed = response.status() == StatusCode::PARTIAL_CONTENT;
        let offset = if resumed { existing } else { 0 };
        if existing > 0 && !resumed {
            warn!(path = %dest.display(), "Server ignored range request, restarting download");
        }

        if let Some(remaining) = response.content_length() {
            state.set_total(offset + remaining);
        }
        state.resume_at(offset);
        info!(url = %url, resume_from = offset, total = state.total(), "Downloading artifact");

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(resumed)
            .truncate(!resumed)
            .open(dest)
            .await?;

        while let Some(chunk) = response.chunk().await? {
            if state.is_cancelled() {
                file.flush().await?;
                return Err(AgentError::Cancelled(filename.to_string()));
            }
            file.write_all(&chunk).await?;
            state.add(chunk.len() as u64);
        }
        file.flush().await?;

        let written = state.downloaded();
        let total = state.total();
        if total > 0 && written != total {
            return Err(AgentError::Network(format!(
                "download incomplete: got {} of {} bytes",
                written, total
            )));
        }
        Ok(written)
    }

    async fn list_files(&self, locator: &ArtifactLocator, token: Option<&str>) -> Result<Vec<String>> {
        let api = ApiBuilder::new()
            .with_endpoint(self.endpoint.clone())
            .with_token(token.map(str::to_string))
            .with_progress(false)
            .build()
            .map_err(|e| AgentError::Network(format!("hub client: {}", e)))?;

        let repo = api.repo(Repo::with_revision(
            locator.repo_id.clone(),
            RepoType::Model,
            locator.revision.clone(),
        ));
        let info = repo.info().await.map_err(|e| {
            let message = e.to_string();
            if message.contains("401") || message.contains("403") {
                AgentError::AuthRequired(format!("listing {}: {}", locator.repo_id, message))
            } else {
                AgentError::Network(format!("listing {}: {}", locator.repo_id, message))
            }
        })?;

        Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
    }
}
