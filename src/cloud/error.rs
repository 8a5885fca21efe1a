//! Provider-level errors
//!
//! Kept separate from [`AgentError`] so a client can describe what went
//! wrong on the wire; the dispatcher converts at its boundary.

use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BackendError {
    /// Non-success HTTP status other than the auth and rate limit cases
    ApiError {
        message: String,
        status_code: Option<u16>,
    },

    /// The provider refused the API key
    AuthenticationError { message: String },

    TimeoutError { seconds: u64 },

    RateLimitError { retry_after: Option<u64> },

    /// The body did not have the expected shape
    InvalidResponse {
        message: String,
        raw_response: Option<String>,
    },

    NetworkError { message: String },
}

impl BackendError {
    /// Classifies a non-success response
    pub fn from_status(status: u16, body: String, retry_after: Option<u64>) -> Self {
        match status {
            401 => BackendError::AuthenticationError { message: body },
            429 => BackendError::RateLimitError { retry_after },
            _ => BackendError::ApiError {
                message: format!("HTTP {}: {}", status, body),
                status_code: Some(status),
            },
        }
    }

    pub fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            BackendError::TimeoutError {
                seconds: timeout.as_secs(),
            }
        } else if e.is_connect() {
            BackendError::NetworkError {
                message: format!("Connection failed: {}", e),
            }
        } else if e.is_decode() {
            BackendError::InvalidResponse {
                message: format!("JSON parse error: {}", e),
                raw_response: None,
            }
        } else {
            BackendError::NetworkError {
                message: format!("Request failed: {}", e),
            }
        }
    }

    pub fn into_agent_error(self, provider: &str) -> AgentError {
        let provider = provider.to_string();
        match self {
            BackendError::AuthenticationError { .. } => AgentError::InvalidApiKey { provider },
            BackendError::RateLimitError { retry_after } => AgentError::RateLimited {
                provider,
                retry_after,
            },
            other => AgentError::ProviderError {
                provider,
                message: other.to_string(),
            },
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::ApiError {
                message,
                status_code,
            } => {
                if let Some(code) = status_code {
                    write!(f, "API error ({}): {}", code, message)
                } else {
                    write!(f, "API error: {}", message)
                }
            }
            BackendError::AuthenticationError { message } => {
                write!(f, "Authentication failed: {}", message)
            }
            BackendError::TimeoutError { seconds } => {
                write!(f, "Request timed out after {} seconds", seconds)
            }
            BackendError::RateLimitError { retry_after } => match retry_after {
                Some(seconds) => write!(f, "Rate limit exceeded, retry after {} seconds", seconds),
                None => write!(f, "Rate limit exceeded"),
            },
            BackendError::InvalidResponse { message, .. } => {
                write!(f, "Invalid response from provider: {}", message)
            }
            BackendError::NetworkError { message } => write!(f, "Network error: {}", message),
        }
    }
}

impl std::error::Error for BackendError {}
