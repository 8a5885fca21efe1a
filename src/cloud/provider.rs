//! Cloud provider abstraction
//!
//! Each provider implements [`CloudProviderClient`]; the [`ProviderRegistry`]
//! resolves a record's `provider` string to its client.

use super::error::BackendError;
use super::pricing;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Google,
    #[serde(rename = "deepseek")]
    DeepSeek,
}

impl CloudProvider {
    pub const ALL: [CloudProvider; 4] = [
        CloudProvider::OpenAi,
        CloudProvider::Anthropic,
        CloudProvider::Google,
        CloudProvider::DeepSeek,
    ];

    /// Identifier stored in model records and used as the secret name
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudProvider::OpenAi => "openai",
            CloudProvider::Anthropic => "anthropic",
            CloudProvider::Google => "google",
            CloudProvider::DeepSeek => "deepseek",
        }
    }

    /// Name reported in generation metrics
    pub fn display_name(&self) -> &'static str {
        match self {
            CloudProvider::OpenAi => "OpenAI",
            CloudProvider::Anthropic => "Anthropic",
            CloudProvider::Google => "Google",
            CloudProvider::DeepSeek => "DeepSeek",
        }
    }

    pub fn api_base(&self) -> &'static str {
        match self {
            CloudProvider::OpenAi => "https://api.openai.com/v1",
            CloudProvider::Anthropic => "https://api.anthropic.com/v1",
            CloudProvider::Google => "https://generativelanguage.googleapis.com/v1beta",
            CloudProvider::DeepSeek => "https://api.deepseek.com/v1",
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudProvider {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(CloudProvider::OpenAi),
            "anthropic" => Ok(CloudProvider::Anthropic),
            "google" | "gemini" => Ok(CloudProvider::Google),
            "deepseek" => Ok(CloudProvider::DeepSeek),
            _ => Err(AgentError::ProviderError {
                provider: s.to_string(),
                message: format!("Unknown provider: {}", s),
            }),
        }
    }
}

/// A single-turn completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl CloudRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            max_tokens: 512,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudResponse {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[async_trait]
pub trait CloudProviderClient: Send + Sync {
    fn provider(&self) -> CloudProvider;

    async fn generate(
        &self,
        api_key: &str,
        request: &CloudRequest,
    ) -> std::result::Result<CloudResponse, BackendError>;

    /// Whether the provider accepts the key. Network failures count as `false`.
    async fn validate_key(&self, api_key: &str) -> bool;

    fn estimate_cost(&self, prompt_tokens: u64, completion_tokens: u64, model: &str) -> f64 {
        pricing::estimate(self.provider(), model, prompt_tokens, completion_tokens)
    }
}

/// Reads the error body and `Retry-After` of a failed response
pub(crate) async fn error_from_response(response: reqwest::Response) -> BackendError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    BackendError::from_status(status, body, retry_after)
}

pub struct ProviderRegistry {
    clients: HashMap<CloudProvider, Arc<dyn CloudProviderClient>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_timeout(REQUEST_TIMEOUT)
    }
}

impl ProviderRegistry {
    /// All built-in providers, sharing one connection pool
    pub fn with_timeout(timeout: Duration) -> Self {
        let http = reqwest::Client::new();
        Self::empty()
            .with_client(Arc::new(
                super::OpenAiCompatibleClient::openai(http.clone()).with_timeout(timeout),
            ))
            .with_client(Arc::new(super::AnthropicClient::new(http.clone()).with_timeout(timeout)))
            .with_client(Arc::new(super::GoogleClient::new(http.clone()).with_timeout(timeout)))
            .with_client(Arc::new(
                super::OpenAiCompatibleClient::deepseek(http).with_timeout(timeout),
            ))
    }

    pub fn empty() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    /// Registers `client` under its own provider, replacing any previous one
    pub fn with_client(mut self, client: Arc<dyn CloudProviderClient>) -> Self {
        self.clients.insert(client.provider(), client);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn CloudProviderClient>> {
        let provider = CloudProvider::from_str(name)?;
        self.clients
            .get(&provider)
            .cloned()
            .ok_or_else(|| AgentError::ProviderError {
                provider: name.to_string(),
                message: format!("Unknown provider: {}", name),
            })
    }

    pub fn providers(&self) -> Vec<CloudProvider> {
        let mut providers: Vec<_> = self.clients.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_provider() {
        assert_eq!("OpenAI".parse::<CloudProvider>().unwrap(), CloudProvider::OpenAi);
        assert_eq!("gemini".parse::<CloudProvider>().unwrap(), CloudProvider::Google);
        assert_eq!(" deepseek ".parse::<CloudProvider>().unwrap(), CloudProvider::DeepSeek);
        for provider in CloudProvider::ALL {
            assert_eq!(provider.as_str().parse::<CloudProvider>().unwrap(), provider);
        }
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::default();
        let err = registry.get("mistral-cloud").err().unwrap();
        match err {
            AgentError::ProviderError { provider, message } => {
                assert_eq!(provider, "mistral-cloud");
                assert!(message.contains("Unknown provider"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_default_registry_has_all_providers() {
        let registry = ProviderRegistry::default();
        assert_eq!(registry.providers().len(), 4);
        for provider in CloudProvider::ALL {
            assert_eq!(registry.get(provider.as_str()).unwrap().provider(), provider);
        }
    }

    #[test]
    fn test_empty_registry_rejects_known_provider() {
        assert!(ProviderRegistry::empty().get("openai").is_err());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&CloudProvider::OpenAi).unwrap(), "\"openai\"");
        assert_eq!(serde_json::to_string(&CloudProvider::DeepSeek).unwrap(), "\"deepseek\"");
    }
}
