//! Composition root
//!
//! [`Agent`] wires the probe, registry, fetcher and dispatcher together once
//! and exposes the operations the CLI (or any embedder) calls.

use crate::catalog::{self, Recommendation};
use crate::cloud::secrets::HUGGINGFACE;
use crate::cloud::{CloudProvider, EnvSecretStore, ProviderRegistry, SecretStore};
use crate::config::ModeldConfig;
use crate::dispatch::{GenerateParams, GenerationResult, InferenceDispatcher, TokenChunk};
use crate::error::{AgentError, Result};
use crate::fetch::{ArtifactFetcher, ArtifactLocator, ArtifactSource, FetchRequest, HubSource, ProgressEvent};
use crate::hardware::{CapabilityProbe, CapabilitySource, SystemCapability, SystemSource};
use crate::policy::{self, ExecutionPolicy};
use crate::registry::{JsonFileStore, ModelPurpose, ModelRecord, ModelRegistry, RecordStore};
use crate::runtime::{CandleRuntime, LocalRuntime};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fs;
use std::str::FromStr;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Swappable collaborators; [`Agent::new`] uses the real ones
pub struct AgentComponents {
    pub capability_source: Arc<dyn CapabilitySource>,
    pub record_store: Arc<dyn RecordStore>,
    pub artifact_source: Arc<dyn ArtifactSource>,
    pub runtime: Arc<dyn LocalRuntime>,
    pub providers: ProviderRegistry,
    pub secrets: Arc<dyn SecretStore>,
}

impl AgentComponents {
    pub fn from_config(config: &ModeldConfig) -> Result<Self> {
        Ok(Self {
            capability_source: Arc::new(SystemSource),
            record_store: Arc::new(JsonFileStore::new(config.registry_path())),
            artifact_source: Arc::new(HubSource::new(config.hub_endpoint.clone())?),
            runtime: Arc::new(CandleRuntime::new()),
            providers: ProviderRegistry::with_timeout(config.request_timeout()),
            secrets: Arc::new(EnvSecretStore),
        })
    }
}

/// What `pull` should fetch
#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Catalog id, `owner/repo[/file]` or a repository URL
    pub locator: String,
    pub model_id: Option<String>,
    pub name: Option<String>,
    /// Overrides the stored repository token
    pub token: Option<String>,
}

impl PullOptions {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            ..Default::default()
        }
    }
}

/// Capability and policy written to `system_profile.json` on refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemProfile {
    pub capability: SystemCapability,
    pub policy: ExecutionPolicy,
    pub detected_at: DateTime<Utc>,
}

/// One model's outcome in a comparison
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonEntry {
    pub model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<GenerationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub type ChunkStream = BoxStream<'static, Result<TokenChunk>>;

pub struct Agent {
    config: ModeldConfig,
    probe: Arc<CapabilityProbe>,
    registry: Arc<ModelRegistry>,
    fetcher: ArtifactFetcher,
    dispatcher: InferenceDispatcher,
    secrets: Arc<dyn SecretStore>,
}

impl Agent {
    /// Builds the agent with the system probe, the JSON registry under
    /// `data_dir`, the hub source, the Candle runtime and env-based secrets
    pub fn new(config: ModeldConfig) -> Result<Self> {
        let components = AgentComponents::from_config(&config)?;
        Self::with_components(config, components)
    }

    pub fn with_components(config: ModeldConfig, components: AgentComponents) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        fs::create_dir_all(&config.models_dir)?;

        let registry = Arc::new(ModelRegistry::open(components.record_store)?);
        let fetcher = ArtifactFetcher::new(
            components.artifact_source,
            Arc::clone(&registry),
            config.poll_interval(),
        );
        let dispatcher = InferenceDispatcher::new(
            components.runtime,
            Arc::new(components.providers),
            Arc::clone(&components.secrets),
        );

        info!(
            data_dir = %config.data_dir.display(),
            models = registry.list().len(),
            "Agent initialized"
        );

        Ok(Self {
            config,
            probe: Arc::new(CapabilityProbe::new(components.capability_source)),
            registry,
            fetcher,
            dispatcher,
            secrets: components.secrets,
        })
    }

    pub fn config(&self) -> &ModeldConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &InferenceDispatcher {
        &self.dispatcher
    }

    /// Probes the machine on a blocking thread; cached unless `force_refresh`
    pub async fn detect_capability(&self, force_refresh: bool) -> Arc<SystemCapability> {
        let probe = Arc::clone(&self.probe);
        match tokio::task::spawn_blocking(move || probe.detect(force_refresh)).await {
            Ok(capability) => capability,
            Err(e) => {
                warn!(error = %e, "Capability probe panicked, assuming a minimal CPU machine");
                self.probe
                    .cached()
                    .unwrap_or_else(|| Arc::new(SystemCapability::cpu_only(1, 0.0)))
            }
        }
    }

    /// Re-probes and snapshots the result to `system_profile.json`
    pub async fn refresh_capability(&self) -> SystemProfile {
        let capability = self.detect_capability(true).await;
        let profile = SystemProfile {
            policy: policy::resolve(&capability),
            capability: (*capability).clone(),
            detected_at: Utc::now(),
        };

        let path = self.config.profile_path();
        let written = serde_json::to_string_pretty(&profile)
            .map_err(AgentError::from)
            .and_then(|json| fs::write(&path, json).map_err(AgentError::from));
        match written {
            Ok(()) => debug!(path = %path.display(), "System profile saved"),
            Err(e) => warn!(path = %path.display(), error = %e, "Could not save system profile"),
        }

        profile
    }

    pub fn resolve_policy(&self, capability: &SystemCapability) -> ExecutionPolicy {
        policy::resolve(capability)
    }

    /// Policy for the cached (or freshly probed) capability
    pub async fn current_policy(&self) -> ExecutionPolicy {
        policy::resolve(&*self.detect_capability(false).await)
    }

    pub fn list_models(&self) -> Vec<ModelRecord> {
        self.registry.list()
    }

    pub fn get_model(&self, id: &str) -> Result<ModelRecord> {
        self.registry
            .get(id)
            .ok_or_else(|| AgentError::NotFound(id.to_string()))
    }

    /// The user's chat model; the system intent model never counts
    pub fn active_model(&self) -> Option<ModelRecord> {
        self.registry.get_active_excluding(ModelPurpose::SystemIntent)
    }

    pub fn set_active_model(&self, id: &str) -> Result<bool> {
        self.registry.set_active(id)
    }

    pub fn register_model(&self, record: ModelRecord) -> Result<ModelRecord> {
        self.registry.register(record)
    }

    /// Unloads and deletes a model. `Ok(false)` for unknown ids.
    pub async fn remove_model(&self, id: &str) -> Result<bool> {
        if let Some(record) = self.registry.get(id) {
            if record.is_base_model {
                return Err(AgentError::invalid_state(format!("cannot remove base model {}", id)));
            }
        }
        if self.fetcher.in_flight().iter().any(|m| m == id) {
            return Err(AgentError::invalid_state(format!("{} is still downloading", id)));
        }
        self.dispatcher.unload(id).await;
        self.registry.remove(id)
    }

    /// Registers a model served by a cloud provider
    ///
    /// `model_name` is what the provider API expects and defaults to `name`.
    /// Keys are not stored here; they are read from the secret store.
    pub fn add_cloud_model(
        &self,
        id: &str,
        name: &str,
        provider: &str,
        model_name: Option<&str>,
    ) -> Result<ModelRecord> {
        let provider = CloudProvider::from_str(provider)?;
        let mut record = ModelRecord::cloud(id, name, provider.as_str(), provider.api_base());
        if let Some(model_name) = model_name {
            record = record.with_metadata("cloud_model_name", model_name);
        }
        self.registry.register(record)
    }

    /// Checks a key with the provider without storing it
    pub async fn validate_cloud_key(&self, provider: &str, api_key: &str) -> Result<bool> {
        let client = self.dispatcher.providers().get(provider)?;
        let valid = client.validate_key(api_key).await;
        info!(provider = %client.provider(), valid, "API key validated");
        Ok(valid)
    }

    fn fetch_request(&self, options: PullOptions) -> Result<FetchRequest> {
        let mut model_id = options.model_id;
        let mut name = options.name;

        let locator = match catalog::get(&options.locator) {
            Some(entry) => {
                model_id.get_or_insert_with(|| entry.id.to_string());
                name.get_or_insert_with(|| entry.name.to_string());
                ArtifactLocator::new(entry.repo_id, entry.filename)
            }
            None => ArtifactLocator::parse(&options.locator)?,
        };

        let token = options.token.or_else(|| self.secrets.get(HUGGINGFACE));
        let mut request = FetchRequest::new(locator, &self.config.models_dir).with_token(token);
        if let Some(id) = model_id {
            request = request.with_model_id(id);
        }
        if let Some(name) = name {
            request = request.with_name(name);
        }
        Ok(request)
    }

    pub async fn pull_model(&self, options: PullOptions) -> Result<ModelRecord> {
        let request = self.fetch_request(options)?;
        self.fetcher.fetch(request).await
    }

    pub async fn pull_model_stream(&self, options: PullOptions) -> Result<ReceiverStream<ProgressEvent>> {
        let request = self.fetch_request(options)?;
        self.fetcher.fetch_stream(request).await
    }

    pub fn cancel_pull(&self, model_id: &str) -> bool {
        self.fetcher.cancel(model_id)
    }

    /// Explicit id, else the active user model
    fn resolve_target(&self, model_id: Option<&str>) -> Result<ModelRecord> {
        match model_id {
            Some(id) => self.get_model(id),
            None => self.active_model().ok_or(AgentError::NoActiveModel),
        }
    }

    async fn ensure_loaded(&self, record: &ModelRecord) -> Result<()> {
        if self.dispatcher.is_loaded(&record.id) {
            return Ok(());
        }
        let artifact = record.artifact_path().ok_or_else(|| {
            AgentError::invalid_state(format!("model {} has no local artifact", record.id))
        })?;
        let policy = self.current_policy().await;
        self.dispatcher.load(&record.id, &artifact, &policy).await
    }

    /// Generates with `model_id`, or with the active model when `None`
    ///
    /// Cloud records go to their provider; local records are loaded on
    /// demand with the policy for the current capability.
    pub async fn generate(
        &self,
        model_id: Option<&str>,
        prompt: &str,
        params: &GenerateParams,
    ) -> Result<GenerationResult> {
        let record = self.resolve_target(model_id)?;
        if record.is_cloud() {
            return self.dispatcher.generate_cloud(&record, prompt, params).await;
        }
        self.ensure_loaded(&record).await?;
        self.dispatcher.generate(&record.id, prompt, params).await
    }

    /// Streaming variant of [`generate`](Self::generate). Cloud replies
    /// arrive as a single chunk followed by the `done` chunk.
    pub async fn generate_stream(
        &self,
        model_id: Option<&str>,
        prompt: &str,
        params: &GenerateParams,
    ) -> Result<ChunkStream> {
        let record = self.resolve_target(model_id)?;
        if record.is_cloud() {
            let result = self.dispatcher.generate_cloud(&record, prompt, params).await?;
            let chunks = vec![
                Ok(TokenChunk::token(result.text)),
                Ok(TokenChunk::done(result.metrics)),
            ];
            return Ok(stream::iter(chunks).boxed());
        }
        self.ensure_loaded(&record).await?;
        Ok(self.dispatcher.generate_stream(&record.id, prompt, params)?.boxed())
    }

    /// Runs one prompt on each model in turn. A failing model is reported
    /// in its entry instead of failing the comparison.
    pub async fn compare(
        &self,
        model_ids: &[String],
        prompt: &str,
        params: &GenerateParams,
    ) -> Result<Vec<ComparisonEntry>> {
        if model_ids.len() < 2 {
            return Err(AgentError::invalid_state("comparison needs at least two models"));
        }

        let mut entries = Vec::with_capacity(model_ids.len());
        for id in model_ids {
            let entry = match self.generate(Some(id), prompt, params).await {
                Ok(result) => ComparisonEntry {
                    model_id: id.clone(),
                    result: Some(result),
                    error: None,
                },
                Err(e) => {
                    warn!(model_id = %id, error = %e, "Comparison run failed");
                    ComparisonEntry {
                        model_id: id.clone(),
                        result: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            entries.push(entry);
        }
        Ok(entries)
    }

    pub async fn recommend(&self, query: &str) -> Vec<Recommendation> {
        let capability = self.detect_capability(false).await;
        catalog::recommend(query, &capability)
    }
}
