//! Loaded-handle table and generation routing

use super::types::{GenerateParams, GenerationMetrics, GenerationResult, TokenChunk};
use crate::cloud::{CloudRequest, ProviderRegistry, SecretStore};
use crate::error::{AgentError, Result};
use crate::policy::ExecutionPolicy;
use crate::registry::ModelRecord;
use crate::runtime::{LoadParams, LocalRuntime, RuntimeHandle};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

const STREAM_BUFFER: usize = 64;

/// A constructed local model and the policy it was built with
pub struct LoadedHandle {
    pub model_id: String,
    pub artifact: PathBuf,
    pub policy: ExecutionPolicy,
    pub loaded_at: DateTime<Utc>,
    handle: Arc<dyn RuntimeHandle>,
}

impl fmt::Debug for LoadedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedHandle")
            .field("model_id", &self.model_id)
            .field("artifact", &self.artifact)
            .field("policy", &self.policy)
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

/// Per-id load state. `gate` serializes load and unload of one id; `handle`
/// is read without waiting on an in-flight construction.
#[derive(Default)]
struct LoadSlot {
    gate: tokio::sync::Mutex<()>,
    handle: Mutex<Option<Arc<LoadedHandle>>>,
}

impl LoadSlot {
    fn get(&self) -> Option<Arc<LoadedHandle>> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set(&self, handle: Option<Arc<LoadedHandle>>) -> Option<Arc<LoadedHandle>> {
        let mut guard = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, handle)
    }
}

/// Owns every loaded local handle and routes generation requests
///
/// A model id moves `Unloaded -> Loaded -> Unloaded`. Loads and unloads of
/// one id run one at a time: concurrent first loads share a single
/// construction, and an unload issued while a construction is in flight
/// waits for it and then drops the result. A failed construction leaves the
/// id unloaded. Handles stay loaded until [`unload`](Self::unload).
pub struct InferenceDispatcher {
    runtime: Arc<dyn LocalRuntime>,
    providers: Arc<ProviderRegistry>,
    secrets: Arc<dyn SecretStore>,
    slots: Mutex<HashMap<String, Arc<LoadSlot>>>,
}

impl InferenceDispatcher {
    pub fn new(
        runtime: Arc<dyn LocalRuntime>,
        providers: Arc<ProviderRegistry>,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            runtime,
            providers,
            secrets,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<LoadSlot>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slot(&self, model_id: &str) -> Arc<LoadSlot> {
        Arc::clone(self.table().entry(model_id.to_string()).or_default())
    }

    fn loaded(&self, model_id: &str) -> Option<Arc<LoadedHandle>> {
        self.table().get(model_id).and_then(|slot| slot.get())
    }

    pub fn is_loaded(&self, model_id: &str) -> bool {
        self.loaded(model_id).is_some()
    }

    pub fn loaded_models(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .table()
            .iter()
            .filter(|(_, slot)| slot.get().is_some())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Policy a loaded model was constructed with
    pub fn policy_for(&self, model_id: &str) -> Option<ExecutionPolicy> {
        self.loaded(model_id).map(|h| h.policy)
    }

    /// Constructs the model unless it is already loaded
    ///
    /// A model that is already loaded keeps its original policy. Callers
    /// arriving during a construction wait for it and reuse its handle.
    ///
    /// # Errors
    ///
    /// `LoadFailure` when the runtime cannot construct the artifact. The id
    /// stays unloaded and a later call retries.
    pub async fn load(&self, model_id: &str, artifact: &Path, policy: &ExecutionPolicy) -> Result<()> {
        let slot = self.slot(model_id);
        if slot.get().is_some() {
            debug!(model_id, "Model already loaded");
            return Ok(());
        }

        let _gate = slot.gate.lock().await;
        if slot.get().is_some() {
            debug!(model_id, "Model loaded by a concurrent caller");
            return Ok(());
        }

        let handle = self.construct(model_id, artifact, *policy).await?;
        slot.set(Some(handle));
        Ok(())
    }

    async fn construct(
        &self,
        model_id: &str,
        artifact: &Path,
        policy: ExecutionPolicy,
    ) -> Result<Arc<LoadedHandle>> {
        let params = LoadParams::from(&policy);
        info!(
            model_id,
            path = %artifact.display(),
            runtime = self.runtime.name(),
            backend = %policy.backend,
            gpu_layers = params.gpu_layers,
            context_length = params.context_length,
            "Loading model"
        );

        let runtime = Arc::clone(&self.runtime);
        let path = artifact.to_path_buf();
        let start = Instant::now();
        let constructed = tokio::task::spawn_blocking(move || runtime.construct(&path, &params))
            .await
            .map_err(|e| AgentError::LoadFailure {
                model_id: model_id.to_string(),
                path: artifact.to_path_buf(),
                reason: format!("load task failed: {}", e),
            })?;

        let handle = match constructed {
            Ok(handle) => handle,
            Err(AgentError::LoadFailure { path, reason, .. }) => {
                warn!(model_id, reason = %reason, "Model load failed");
                return Err(AgentError::LoadFailure {
                    model_id: model_id.to_string(),
                    path,
                    reason,
                });
            }
            Err(e) => {
                warn!(model_id, error = %e, "Model load failed");
                return Err(e);
            }
        };

        info!(
            model_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Model loaded"
        );
        Ok(Arc::new(LoadedHandle {
            model_id: model_id.to_string(),
            artifact: artifact.to_path_buf(),
            policy,
            loaded_at: Utc::now(),
            handle,
        }))
    }

    /// Releases the handle. Returns whether a loaded model was dropped.
    ///
    /// Waits for an in-flight load of the same id, so a model whose
    /// construction was under way when this was called ends up unloaded.
    pub async fn unload(&self, model_id: &str) -> bool {
        let Some(slot) = self.table().get(model_id).cloned() else {
            return false;
        };
        let _gate = slot.gate.lock().await;
        let was_loaded = slot.set(None).is_some();
        if was_loaded {
            info!(model_id, "Model unloaded");
        }
        was_loaded
    }

    fn require_loaded(&self, model_id: &str) -> Result<Arc<LoadedHandle>> {
        self.loaded(model_id)
            .ok_or_else(|| AgentError::NotLoaded(model_id.to_string()))
    }

    /// Runs a loaded local model to completion
    pub async fn generate(
        &self,
        model_id: &str,
        prompt: &str,
        params: &GenerateParams,
    ) -> Result<GenerationResult> {
        let loaded = self.require_loaded(model_id)?;
        let prompt = prompt.to_string();
        let sampling = params.sampling();

        let start = Instant::now();
        let output = tokio::task::spawn_blocking(move || {
            loaded.handle.generate(&prompt, &sampling, &mut |_| true)
        })
        .await
        .map_err(|e| AgentError::invalid_state(format!("generation task failed: {}", e)))??;

        let mut metrics = GenerationMetrics::measure(start.elapsed(), output.tokens_generated as u64);
        metrics.prompt_tokens = Some(output.prompt_tokens as u64);
        metrics.model = Some(model_id.to_string());

        debug!(
            model_id,
            tokens = metrics.tokens_generated,
            tokens_per_sec = metrics.tokens_per_sec,
            "Generation finished"
        );
        Ok(GenerationResult {
            text: output.text,
            metrics,
        })
    }

    /// Streams a loaded local model token by token
    ///
    /// The stream ends with a `done` chunk carrying the metrics, or with an
    /// error item. Dropping the stream stops generation at the next token.
    pub fn generate_stream(
        &self,
        model_id: &str,
        prompt: &str,
        params: &GenerateParams,
    ) -> Result<ReceiverStream<Result<TokenChunk>>> {
        let loaded = self.require_loaded(model_id)?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let prompt = prompt.to_string();
        let sampling = params.sampling();
        let model_id = model_id.to_string();

        tokio::task::spawn_blocking(move || {
            let start = Instant::now();
            let token_tx = tx.clone();
            let result = loaded.handle.generate(&prompt, &sampling, &mut |piece| {
                token_tx.blocking_send(Ok(TokenChunk::token(piece))).is_ok()
            });

            let last = match result {
                Ok(output) => {
                    let mut metrics =
                        GenerationMetrics::measure(start.elapsed(), output.tokens_generated as u64);
                    metrics.prompt_tokens = Some(output.prompt_tokens as u64);
                    metrics.model = Some(model_id);
                    Ok(TokenChunk::done(metrics))
                }
                Err(e) => Err(e),
            };
            // the receiver may already be gone
            let _ = tx.blocking_send(last);
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Sends the prompt to the record's cloud provider
    ///
    /// # Errors
    ///
    /// `AuthRequired` when no key is stored for the provider, `InvalidApiKey`
    /// on 401, `RateLimited` on 429, `ProviderError` otherwise.
    pub async fn generate_cloud(
        &self,
        record: &ModelRecord,
        prompt: &str,
        params: &GenerateParams,
    ) -> Result<GenerationResult> {
        let provider_name = record.provider.as_deref().ok_or_else(|| AgentError::ProviderError {
            provider: "unknown".to_string(),
            message: format!("model {} has no provider", record.id),
        })?;
        let client = self.providers.get(provider_name)?;
        let provider = client.provider();

        let api_key = self.secrets.get(provider.as_str()).ok_or_else(|| {
            AgentError::AuthRequired(format!("no API key configured for {}", provider))
        })?;

        let request = CloudRequest {
            model: record.cloud_model_name().to_string(),
            prompt: prompt.to_string(),
            max_tokens: u32::try_from(params.max_tokens).unwrap_or(u32::MAX),
            temperature: params.temperature,
        };

        let start = Instant::now();
        let response = client
            .generate(&api_key, &request)
            .await
            .map_err(|e| e.into_agent_error(provider.as_str()))?;

        let mut metrics = GenerationMetrics::measure(start.elapsed(), response.completion_tokens);
        metrics.prompt_tokens = Some(response.prompt_tokens);
        metrics.completion_tokens = Some(response.completion_tokens);
        metrics.provider = Some(provider.display_name().to_string());
        metrics.model = Some(request.model.clone());
        metrics.estimated_cost_usd = Some(client.estimate_cost(
            response.prompt_tokens,
            response.completion_tokens,
            &request.model,
        ));

        info!(
            model_id = %record.id,
            provider = %provider,
            latency_ms = metrics.latency_ms,
            "Cloud generation finished"
        );
        Ok(GenerationResult {
            text: response.text,
            metrics,
        })
    }
}

impl fmt::Debug for InferenceDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceDispatcher")
            .field("runtime", &self.runtime.name())
            .field("loaded", &self.loaded_models())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{
        BackendError, CloudProvider, CloudProviderClient, CloudResponse, StaticSecretStore,
    };
    use crate::hardware::{GpuVendor, SystemCapability};
    use crate::policy::{self, BackendKind};
    use crate::runtime::MockRuntime;
    use async_trait::async_trait;
    use futures_util::StreamExt;

    struct ScriptedCloud {
        reply: std::result::Result<CloudResponse, BackendError>,
    }

    #[async_trait]
    impl CloudProviderClient for ScriptedCloud {
        fn provider(&self) -> CloudProvider {
            CloudProvider::OpenAi
        }

        async fn generate(
            &self,
            _api_key: &str,
            _request: &CloudRequest,
        ) -> std::result::Result<CloudResponse, BackendError> {
            self.reply.clone()
        }

        async fn validate_key(&self, api_key: &str) -> bool {
            api_key == "sk-good"
        }
    }

    fn cpu_policy() -> ExecutionPolicy {
        policy::resolve(&SystemCapability::cpu_only(8, 12.0))
    }

    fn dispatcher(runtime: Arc<MockRuntime>) -> InferenceDispatcher {
        InferenceDispatcher::new(
            runtime,
            Arc::new(ProviderRegistry::empty()),
            Arc::new(StaticSecretStore::new()),
        )
    }

    fn cloud_dispatcher(
        reply: std::result::Result<CloudResponse, BackendError>,
        key: Option<&str>,
    ) -> InferenceDispatcher {
        let secrets = StaticSecretStore::new();
        if let Some(key) = key {
            secrets.set("openai", key);
        }
        InferenceDispatcher::new(
            Arc::new(MockRuntime::default()),
            Arc::new(ProviderRegistry::empty().with_client(Arc::new(ScriptedCloud { reply }))),
            Arc::new(secrets),
        )
    }

    fn gpt4o() -> ModelRecord {
        ModelRecord::cloud("gpt", "gpt-4o", "openai", "https://api.openai.com/v1")
    }

    #[tokio::test]
    async fn test_generate_requires_load() {
        let runtime = Arc::new(MockRuntime::default());
        let dispatcher = dispatcher(runtime.clone());

        let err = dispatcher
            .generate("m1", "hi", &GenerateParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NotLoaded(ref id) if id == "m1"));
        assert!(err.to_string().contains("not loaded"));
        assert!(dispatcher.generate_stream("m1", "hi", &GenerateParams::default()).is_err());
        assert_eq!(runtime.construct_count(), 0);
        assert!(!dispatcher.is_loaded("m1"));
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let runtime = Arc::new(MockRuntime::default());
        let dispatcher = dispatcher(runtime.clone());
        let policy = cpu_policy();

        dispatcher.load("m1", Path::new("/m/m1.gguf"), &policy).await.unwrap();
        dispatcher.load("m1", Path::new("/m/m1.gguf"), &policy).await.unwrap();

        assert_eq!(runtime.construct_count(), 1);
        assert_eq!(dispatcher.loaded_models(), vec!["m1".to_string()]);
        assert_eq!(dispatcher.policy_for("m1"), Some(policy));
    }

    #[tokio::test]
    async fn test_gpu_layers_only_for_cuda() {
        let runtime = Arc::new(MockRuntime::default());
        let dispatcher = dispatcher(runtime.clone());

        let mut policy = cpu_policy();
        policy.gpu_layers = 20;
        assert_eq!(policy.backend, BackendKind::Cpu);
        dispatcher.load("cpu", Path::new("/m/cpu.gguf"), &policy).await.unwrap();
        assert_eq!(runtime.last_params().unwrap().gpu_layers, 0);

        let cap = SystemCapability::cpu_only(8, 12.0).with_gpu(GpuVendor::Nvidia, "RTX 3060", Some(6.0));
        dispatcher
            .load("gpu", Path::new("/m/gpu.gguf"), &policy::resolve(&cap))
            .await
            .unwrap();
        assert_eq!(runtime.last_params().unwrap().gpu_layers, 20);
    }

    #[tokio::test]
    async fn test_failed_load_stays_unloaded() {
        let runtime = Arc::new(MockRuntime::default());
        runtime.fail_on("/m/bad.gguf");
        let dispatcher = dispatcher(runtime.clone());

        let err = dispatcher
            .load("bad", Path::new("/m/bad.gguf"), &cpu_policy())
            .await
            .unwrap_err();
        match err {
            AgentError::LoadFailure { model_id, .. } => assert_eq!(model_id, "bad"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!dispatcher.is_loaded("bad"));
        assert!(dispatcher.loaded_models().is_empty());

        // a retry constructs again
        let _ = dispatcher.load("bad", Path::new("/m/bad.gguf"), &cpu_policy()).await;
        assert_eq!(runtime.construct_count(), 2);
    }

    #[tokio::test]
    async fn test_unload() {
        let runtime = Arc::new(MockRuntime::default());
        let dispatcher = dispatcher(runtime);
        assert!(!dispatcher.unload("m1").await);

        dispatcher.load("m1", Path::new("/m/m1.gguf"), &cpu_policy()).await.unwrap();
        assert!(dispatcher.unload("m1").await);
        assert!(!dispatcher.is_loaded("m1"));
        assert!(dispatcher.policy_for("m1").is_none());
    }

    #[tokio::test]
    async fn test_generate_metrics() {
        let runtime = Arc::new(MockRuntime::new("the quick brown fox"));
        let dispatcher = dispatcher(runtime);
        dispatcher.load("m1", Path::new("/m/m1.gguf"), &cpu_policy()).await.unwrap();

        let result = dispatcher
            .generate("m1", "tell me", &GenerateParams::default())
            .await
            .unwrap();
        assert_eq!(result.text, "the quick brown fox");
        assert_eq!(result.metrics.tokens_generated, 4);
        assert_eq!(result.metrics.prompt_tokens, Some(2));
        assert!(result.metrics.tokens_per_sec >= 0.0);
        assert!(result.metrics.estimated_cost_usd.is_none());
    }

    #[tokio::test]
    async fn test_generate_stream_ends_with_done() {
        let runtime = Arc::new(MockRuntime::new("a b c"));
        let dispatcher = dispatcher(runtime);
        dispatcher.load("m1", Path::new("/m/m1.gguf"), &cpu_policy()).await.unwrap();

        let chunks: Vec<TokenChunk> = dispatcher
            .generate_stream("m1", "x", &GenerateParams::default())
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 4);
        let text: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(text, "a b c");
        let last = chunks.last().unwrap();
        assert!(last.done);
        assert_eq!(last.metrics.as_ref().unwrap().tokens_generated, 3);
        assert!(chunks[..3].iter().all(|c| !c.done));
    }

    #[tokio::test]
    async fn test_cloud_success_metrics() {
        let dispatcher = cloud_dispatcher(
            Ok(CloudResponse {
                text: "Hello".into(),
                prompt_tokens: 1_000_000,
                completion_tokens: 1_000_000,
            }),
            Some("sk-good"),
        );

        let result = dispatcher
            .generate_cloud(&gpt4o(), "hi", &GenerateParams::default())
            .await
            .unwrap();
        assert_eq!(result.text, "Hello");
        assert_eq!(result.metrics.provider.as_deref(), Some("OpenAI"));
        assert_eq!(result.metrics.model.as_deref(), Some("gpt-4o"));
        assert_eq!(result.metrics.completion_tokens, Some(1_000_000));
        let cost = result.metrics.estimated_cost_usd.unwrap();
        assert!((cost - 12.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cloud_missing_key() {
        let dispatcher = cloud_dispatcher(
            Err(BackendError::NetworkError {
                message: "unreachable".into(),
            }),
            None,
        );
        let err = dispatcher
            .generate_cloud(&gpt4o(), "hi", &GenerateParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::AuthRequired(_)));
    }

    #[tokio::test]
    async fn test_cloud_status_mapping() {
        let dispatcher = cloud_dispatcher(
            Err(BackendError::from_status(401, "invalid".into(), None)),
            Some("sk-bad"),
        );
        let err = dispatcher
            .generate_cloud(&gpt4o(), "hi", &GenerateParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidApiKey { .. }));

        let dispatcher = cloud_dispatcher(
            Err(BackendError::from_status(429, String::new(), Some(5))),
            Some("sk-good"),
        );
        let err = dispatcher
            .generate_cloud(&gpt4o(), "hi", &GenerateParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::RateLimited { retry_after: Some(5), .. }));
    }

    #[tokio::test]
    async fn test_cloud_unknown_provider() {
        let dispatcher = cloud_dispatcher(
            Ok(CloudResponse {
                text: String::new(),
                prompt_tokens: 0,
                completion_tokens: 0,
            }),
            Some("sk-good"),
        );
        let record = ModelRecord::cloud("x", "x-large", "acme", "https://acme.invalid");
        let err = dispatcher
            .generate_cloud(&record, "hi", &GenerateParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ProviderError { .. }));
    }
}
