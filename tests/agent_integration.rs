//! Agent routing across local and cloud models

mod support;

use async_trait::async_trait;
use futures_util::StreamExt;
use modeld::cloud::{
    BackendError, CloudProvider, CloudProviderClient, CloudRequest, CloudResponse,
    ProviderRegistry, StaticSecretStore,
};
use modeld::hardware::{StaticSource, SystemCapability};
use modeld::registry::{JsonFileStore, ModelRecord};
use modeld::runtime::MockRuntime;
use modeld::{Agent, AgentComponents, AgentError, GenerateParams, ModeldConfig, PullOptions};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use support::ScriptedSource;
use tempfile::TempDir;

/// Echoes the requested model name and records what it was asked
struct EchoAnthropic {
    requests: Mutex<Vec<CloudRequest>>,
}

#[async_trait]
impl CloudProviderClient for EchoAnthropic {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Anthropic
    }

    async fn generate(&self, api_key: &str, request: &CloudRequest) -> Result<CloudResponse, BackendError> {
        if api_key != "sk-ant-good" {
            return Err(BackendError::AuthenticationError {
                message: "invalid x-api-key".to_string(),
            });
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(CloudResponse {
            text: format!("reply from {}", request.model),
            prompt_tokens: 1_000,
            completion_tokens: 2_000,
        })
    }

    async fn validate_key(&self, api_key: &str) -> bool {
        api_key == "sk-ant-good"
    }
}

struct Fixture {
    _dir: TempDir,
    agent: Agent,
    runtime: Arc<MockRuntime>,
    cloud: Arc<EchoAnthropic>,
}

fn fixture(key: Option<&str>) -> Fixture {
    let dir = TempDir::new().unwrap();
    let config = ModeldConfig::with_data_dir(dir.path());
    let runtime = Arc::new(MockRuntime::new("local model says hi"));
    let cloud = Arc::new(EchoAnthropic {
        requests: Mutex::new(Vec::new()),
    });
    let secrets = StaticSecretStore::new();
    if let Some(key) = key {
        secrets.set("anthropic", key);
    }
    let source = ScriptedSource::new(
        &[
            ("Phi-3-mini-4k-instruct-q4.gguf", &b"GGUF phi3 weights"[..]),
            ("tokenizer.json", &b"{}"[..]),
        ],
        Duration::ZERO,
    );

    let components = AgentComponents {
        capability_source: Arc::new(StaticSource(SystemCapability::cpu_only(16, 20.0))),
        record_store: Arc::new(JsonFileStore::new(config.registry_path())),
        artifact_source: Arc::new(source),
        runtime: runtime.clone(),
        providers: ProviderRegistry::empty().with_client(cloud.clone()),
        secrets: Arc::new(secrets),
    };
    let agent = Agent::with_components(config, components).unwrap();
    Fixture {
        _dir: dir,
        agent,
        runtime,
        cloud,
    }
}

#[tokio::test]
async fn test_cloud_model_routes_to_provider_with_cost() {
    let f = fixture(Some("sk-ant-good"));
    f.agent
        .add_cloud_model("sonnet", "Claude Sonnet", "anthropic", Some("claude-3-5-sonnet-20241022"))
        .unwrap();
    f.agent.set_active_model("sonnet").unwrap();

    let result = f
        .agent
        .generate(None, "hello", &GenerateParams::default())
        .await
        .unwrap();

    assert_eq!(result.text, "reply from claude-3-5-sonnet-20241022");
    assert_eq!(result.metrics.provider.as_deref(), Some("Anthropic"));
    assert_eq!(result.metrics.prompt_tokens, Some(1_000));
    assert_eq!(result.metrics.completion_tokens, Some(2_000));
    // 1k in at $3/M plus 2k out at $15/M
    let cost = result.metrics.estimated_cost_usd.unwrap();
    assert!((cost - 0.033).abs() < 1e-9);

    assert_eq!(f.runtime.construct_count(), 0);
    let requests = f.cloud.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].prompt, "hello");
}

#[tokio::test]
async fn test_cloud_model_without_key_needs_auth() {
    let f = fixture(None);
    f.agent.add_cloud_model("haiku", "claude-3-5-haiku-20241022", "anthropic", None).unwrap();

    let err = f
        .agent
        .generate(Some("haiku"), "hello", &GenerateParams::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::AuthRequired(_)));
}

#[tokio::test]
async fn test_rejected_key_is_invalid_api_key() {
    let f = fixture(Some("sk-ant-revoked"));
    f.agent.add_cloud_model("haiku", "claude-3-5-haiku-20241022", "anthropic", None).unwrap();

    let err = f
        .agent
        .generate(Some("haiku"), "hello", &GenerateParams::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::InvalidApiKey { ref provider } if provider == "anthropic"));
}

#[tokio::test]
async fn test_validate_key() {
    let f = fixture(None);
    assert!(f.agent.validate_cloud_key("anthropic", "sk-ant-good").await.unwrap());
    assert!(!f.agent.validate_cloud_key("Anthropic", "nope").await.unwrap());

    let err = f.agent.validate_cloud_key("openai", "sk").await.unwrap_err();
    assert!(matches!(err, AgentError::ProviderError { .. }));
}

#[tokio::test]
async fn test_pull_by_catalog_id_then_generate() {
    let f = fixture(None);
    let record = f.agent.pull_model(PullOptions::new("phi3")).await.unwrap();
    assert_eq!(record.id, "phi3");
    assert_eq!(record.name, "Phi-3 Mini 4K");
    assert_eq!(
        record.metadata.get("repo_id").map(String::as_str),
        Some("microsoft/Phi-3-mini-4k-instruct-gguf")
    );

    let result = f
        .agent
        .generate(Some("phi3"), "hi", &GenerateParams::default())
        .await
        .unwrap();
    assert_eq!(result.text, "local model says hi");
    assert_eq!(f.runtime.construct_count(), 1);

    // removing unloads and deletes the pulled directory
    let artifact_dir = record.artifact_path().unwrap().parent().unwrap().to_path_buf();
    assert!(f.agent.remove_model("phi3").await.unwrap());
    assert!(!f.agent.dispatcher().is_loaded("phi3"));
    assert!(!artifact_dir.exists());
}

#[tokio::test]
async fn test_compare_local_and_cloud() {
    let f = fixture(Some("sk-ant-good"));
    f.agent
        .register_model(ModelRecord::local("local", "Local", "/models/local.gguf"))
        .unwrap();
    f.agent.add_cloud_model("haiku", "claude-3-5-haiku-20241022", "anthropic", None).unwrap();

    let ids = vec!["local".to_string(), "haiku".to_string(), "ghost".to_string()];
    let entries = f
        .agent
        .compare(&ids, "hi", &GenerateParams::default())
        .await
        .unwrap();

    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].result.as_ref().unwrap().text, "local model says hi");
    assert_eq!(
        entries[1].result.as_ref().unwrap().text,
        "reply from claude-3-5-haiku-20241022"
    );
    assert!(entries[2].result.is_none());
    assert!(entries[2].error.as_ref().unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_cloud_stream_is_one_chunk_then_done() {
    let f = fixture(Some("sk-ant-good"));
    f.agent.add_cloud_model("haiku", "claude-3-5-haiku-20241022", "anthropic", None).unwrap();

    let chunks: Vec<_> = f
        .agent
        .generate_stream(Some("haiku"), "hi", &GenerateParams::default())
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(chunks.len(), 2);
    let first = chunks[0].as_ref().unwrap();
    assert!(!first.done);
    assert_eq!(first.text, "reply from claude-3-5-haiku-20241022");
    assert!(chunks[1].as_ref().unwrap().done);
}

#[tokio::test]
async fn test_registry_file_is_written() {
    let f = fixture(None);
    f.agent
        .register_model(ModelRecord::local("m1", "Model One", "/models/m1.gguf"))
        .unwrap();
    f.agent.set_active_model("m1").unwrap();

    let raw = std::fs::read_to_string(f.agent.config().registry_path()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["models"][0]["id"], "m1");
    assert_eq!(json["models"][0]["is_active"], true);
}
