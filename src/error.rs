//! Error taxonomy surfaced by the agent's components

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Unknown model id
    #[error("Model not found: {0}")]
    NotFound(String),

    #[error("Invalid artifact locator: {0}")]
    InvalidLocator(String),

    /// The record or job forbids the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Model {0} not loaded")]
    NotLoaded(String),

    /// A loaded local model failed while producing tokens
    #[error("Generation failed: {0}")]
    Generation(String),

    /// No model id was given and no user-facing model is active
    #[error("No active model selected")]
    NoActiveModel,

    #[error("Failed to load model {model_id} from {path}: {reason}")]
    LoadFailure {
        model_id: String,
        path: PathBuf,
        reason: String,
    },

    /// A credential is missing or was refused by an artifact repository
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    #[error("Invalid API key for {provider}")]
    InvalidApiKey { provider: String },

    /// Retryable by the caller after a backoff
    #[error("Rate limit exceeded for {provider}")]
    RateLimited {
        provider: String,
        retry_after: Option<u64>,
    },

    #[error("{provider} error: {message}")]
    ProviderError { provider: String, message: String },

    /// Download stopped on request. A terminal state, reported as an error
    /// only to callers of the non-streaming fetch.
    #[error("Download cancelled: {0}")]
    Cancelled(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl AgentError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Whether retrying the same call later could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Network(_))
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(format!("serialization failed: {}", e))
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Self::AuthRequired(e.to_string());
            }
        }
        Self::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            AgentError::NotLoaded("m1".into()).to_string(),
            "Model m1 not loaded"
        );
        assert_eq!(
            AgentError::NotFound("x".into()).to_string(),
            "Model not found: x"
        );
        let err = AgentError::RateLimited {
            provider: "openai".into(),
            retry_after: Some(10),
        };
        assert!(err.to_string().contains("openai"));
    }

    #[test]
    fn test_generation_failure() {
        let err = AgentError::generation("decoding failed: bad id 7");
        assert!(matches!(err, AgentError::Generation(_)));
        assert_eq!(err.to_string(), "Generation failed: decoding failed: bad id 7");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable() {
        assert!(AgentError::Network("reset".into()).is_retryable());
        assert!(!AgentError::InvalidApiKey {
            provider: "anthropic".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: AgentError = io.into();
        assert!(matches!(err, AgentError::Io(_)));
    }
}
