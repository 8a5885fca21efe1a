//! Gemini `generateContent` client. The key travels as a query parameter.

use super::error::BackendError;
use super::provider::{
    error_from_response, CloudProvider, CloudProviderClient, CloudRequest, CloudResponse,
    REQUEST_TIMEOUT, VALIDATION_TIMEOUT,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

#[derive(Debug)]
pub struct GoogleClient {
    base_url: String,
    http_client: Client,
    timeout: Duration,
}

impl GoogleClient {
    pub fn new(http_client: Client) -> Self {
        Self {
            base_url: CloudProvider::Google.api_base().to_string(),
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

    fn build_request(request: &CloudRequest) -> Value {
        json!({
            "contents": [{"parts": [{"text": request.prompt}]}],
            "generationConfig": {
                "maxOutputTokens": request.max_tokens,
                "temperature": request.temperature,
            }
        })
    }

    fn parse_response(body: GenerateResponse) -> Result<CloudResponse, BackendError> {
        let text = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|content| content.parts.into_iter().find_map(|p| p.text))
            .ok_or_else(|| BackendError::InvalidResponse {
                message: "No candidate text in response".to_string(),
                raw_response: None,
            })?;
        let usage = body.usage_metadata.unwrap_or_default();

        Ok(CloudResponse {
            text,
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
        })
    }
}

#[async_trait]
impl CloudProviderClient for GoogleClient {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Google
    }

    async fn generate(&self, api_key: &str, request: &CloudRequest) -> Result<CloudResponse, BackendError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);

        let start = Instant::now();
        let response = self
            .http_client
            .post(&url)
            .query(&[("key", api_key)])
            .timeout(self.timeout)
            .json(&Self::build_request(request))
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(e, self.timeout))?;

        if !response.status().is_success() {
            let err = error_from_response(response).await;
            error!(provider = "google", error = %err, "generateContent failed");
            return Err(err);
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| BackendError::from_reqwest(e, self.timeout))?;
        let result = Self::parse_response(body)?;
        info!(
            provider = "google",
            completion_tokens = result.completion_tokens,
            "generateContent finished in {:.2}s",
            start.elapsed().as_secs_f64()
        );
        Ok(result)
    }

    async fn validate_key(&self, api_key: &str) -> bool {
        match self
            .http_client
            .get(format!("{}/models", self.base_url))
            .query(&[("key", api_key)])
            .timeout(VALIDATION_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().as_u16() == 200,
            Err(e) => {
                debug!(provider = "google", error = %e, "Key validation request failed");
                false
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}
