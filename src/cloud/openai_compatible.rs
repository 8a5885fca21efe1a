//! OpenAI-style chat completions client
//!
//! Serves both OpenAI and DeepSeek, which expose the same
//! `/chat/completions` and `/models` endpoints with bearer authentication.

use super::error::BackendError;
use super::provider::{
    error_from_response, CloudProvider, CloudProviderClient, CloudRequest, CloudResponse,
    REQUEST_TIMEOUT, VALIDATION_TIMEOUT,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

pub struct OpenAiCompatibleClient {
    provider: CloudProvider,
    base_url: String,
    http_client: Client,
    timeout: Duration,
}

impl OpenAiCompatibleClient {
    pub fn openai(http_client: Client) -> Self {
        Self::new(CloudProvider::OpenAi, http_client)
    }

    pub fn deepseek(http_client: Client) -> Self {
        Self::new(CloudProvider::DeepSeek, http_client)
    }

    fn new(provider: CloudProvider, http_client: Client) -> Self {
        Self {
            provider,
            base_url: provider.api_base().to_string(),
            http_client,
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// Points the client at another OpenAI-compatible server
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_request(request: &CloudRequest) -> ChatRequest {
        ChatRequest {
            model: request.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }

    fn parse_response(body: ChatResponse) -> Result<CloudResponse, BackendError> {
        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .map(|message| message.content)
            .ok_or_else(|| BackendError::InvalidResponse {
                message: "No content in response".to_string(),
                raw_response: None,
            })?;
        let usage = body.usage.unwrap_or_default();

        Ok(CloudResponse {
            text,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }
}

#[async_trait]
impl CloudProviderClient for OpenAiCompatibleClient {
    fn provider(&self) -> CloudProvider {
        self.provider
    }

    async fn generate(&self, api_key: &str, request: &CloudRequest) -> Result<CloudResponse, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(provider = %self.provider, model = %request.model, prompt_length = request.prompt.len(), "Sending chat completion");

        let start = Instant::now();
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .json(&Self::build_request(request))
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(e, self.timeout))?;

        if !response.status().is_success() {
            let err = error_from_response(response).await;
            error!(provider = %self.provider, error = %err, "Chat completion failed");
            return Err(err);
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::from_reqwest(e, self.timeout))?;
        let result = Self::parse_response(body)?;

        info!(
            provider = %self.provider,
            completion_tokens = result.completion_tokens,
            "Chat completion finished in {:.2}s",
            start.elapsed().as_secs_f64()
        );
        Ok(result)
    }

    async fn validate_key(&self, api_key: &str) -> bool {
        let url = format!("{}/models", self.base_url);
        match self
            .http_client
            .get(&url)
            .bearer_auth(api_key)
            .timeout(VALIDATION_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().as_u16() == 200,
            Err(e) => {
                debug!(provider = %self.provider, error = %e, "Key validation request failed");
                false
            }
        }
    }
}

impl fmt::Debug for OpenAiCompatibleClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiCompatibleClient")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: Option<Message>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body() {
        let request = CloudRequest::new("gpt-4o", "Hello");
        let body = serde_json::to_value(OpenAiCompatibleClient::build_request(&request)).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "gpt-4o",
                "messages": [{"role": "user", "content": "Hello"}],
                "max_tokens": 512,
                "temperature": 0.7
            })
        );
    }

    #[test]
    fn test_parse_response() {
        let body: ChatResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi!"}}],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
        }))
        .unwrap();

        let parsed = OpenAiCompatibleClient::parse_response(body).unwrap();
        assert_eq!(parsed.text, "Hi!");
        assert_eq!(parsed.prompt_tokens, 9);
        assert_eq!(parsed.completion_tokens, 3);
    }

    #[test]
    fn test_parse_response_without_choices() {
        let body: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            OpenAiCompatibleClient::parse_response(body),
            Err(BackendError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_base_urls() {
        let http = Client::new();
        let openai = OpenAiCompatibleClient::openai(http.clone());
        assert_eq!(openai.base_url, "https://api.openai.com/v1");
        let deepseek = OpenAiCompatibleClient::deepseek(http).with_base_url("http://localhost:8080/v1/");
        assert_eq!(deepseek.provider(), CloudProvider::DeepSeek);
        assert_eq!(deepseek.base_url, "http://localhost:8080/v1");
    }

    #[tokio::test]
    async fn test_validate_key_unreachable_is_false() {
        let client = OpenAiCompatibleClient::openai(Client::new()).with_base_url("http://127.0.0.1:9");
        assert!(!client.validate_key("sk-test").await);
    }
}
