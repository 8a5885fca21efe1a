//! Anthropic Messages API client

use super::error::BackendError;
use super::provider::{
    error_from_response, CloudProvider, CloudProviderClient, CloudRequest, CloudResponse,
    REQUEST_TIMEOUT, VALIDATION_TIMEOUT,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

const API_VERSION: &str = "2023-06-01";

/// Cheapest model, used for the key check
const VALIDATION_MODEL: &str = "claude-3-5-haiku-20241022";

#[derive(Debug)]
pub struct AnthropicClient {
    base_url: String,
    http_client: Client,
    timeout: Duration,
}

impl AnthropicClient {
    pub fn new(http_client: Client) -> Self {
        Self {
            base_url: CloudProvider::Anthropic.api_base().to_string(),
            http_client,
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn messages(&self, api_key: &str) -> RequestBuilder {
        self.http_client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
    }

    fn parse_response(body: MessagesResponse) -> Result<CloudResponse, BackendError> {
        let text = body
            .content
            .into_iter()
            .find_map(|block| block.text)
            .ok_or_else(|| BackendError::InvalidResponse {
                message: "No text block in response".to_string(),
                raw_response: None,
            })?;

        Ok(CloudResponse {
            text,
            prompt_tokens: body.usage.input_tokens,
            completion_tokens: body.usage.output_tokens,
        })
    }
}

#[async_trait]
impl CloudProviderClient for AnthropicClient {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Anthropic
    }

    async fn generate(&self, api_key: &str, request: &CloudRequest) -> Result<CloudResponse, BackendError> {
        let body = MessagesRequest {
            model: &request.model,
            messages: vec![UserMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
            temperature: Some(request.temperature),
        };

        let start = Instant::now();
        let response = self
            .messages(api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(e, self.timeout))?;

        if !response.status().is_success() {
            let err = error_from_response(response).await;
            error!(provider = "anthropic", error = %err, "Messages request failed");
            return Err(err);
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| BackendError::from_reqwest(e, self.timeout))?;
        let result = Self::parse_response(body)?;
        info!(
            provider = "anthropic",
            completion_tokens = result.completion_tokens,
            "Messages request finished in {:.2}s",
            start.elapsed().as_secs_f64()
        );
        Ok(result)
    }

    async fn validate_key(&self, api_key: &str) -> bool {
        // no dedicated endpoint; a five-token request is the cheapest probe
        let probe = json!({
            "model": VALIDATION_MODEL,
            "messages": [{"role": "user", "content": "test"}],
            "max_tokens": 5
        });
        match self
            .messages(api_key)
            .timeout(VALIDATION_TIMEOUT)
            .json(&probe)
            .send()
            .await
        {
            Ok(response) => response.status().as_u16() == 200,
            Err(e) => {
                debug!(provider = "anthropic", error = %e, "Key validation request failed");
                false
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    messages: Vec<UserMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: MessagesUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}
