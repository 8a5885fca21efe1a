//! API key lookup
//!
//! Keys are resolved at request time and never logged or written to the
//! model registry.

use std::collections::HashMap;
use std::env;
use std::sync::RwLock;

/// Secret name for the artifact repository token
pub const HUGGINGFACE: &str = "huggingface";

pub trait SecretStore: Send + Sync {
    /// Returns the secret for a provider name such as `"openai"`
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads well-known environment variables
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretStore;

impl EnvSecretStore {
    pub fn variables(name: &str) -> &'static [&'static str] {
        match name {
            "openai" => &["OPENAI_API_KEY"],
            "anthropic" => &["ANTHROPIC_API_KEY"],
            "google" | "gemini" => &["GOOGLE_API_KEY", "GEMINI_API_KEY"],
            "deepseek" => &["DEEPSEEK_API_KEY"],
            HUGGINGFACE => &["HF_TOKEN", "HUGGING_FACE_HUB_TOKEN"],
            _ => &[],
        }
    }
}

impl SecretStore for EnvSecretStore {
    fn get(&self, name: &str) -> Option<String> {
        Self::variables(&name.to_lowercase())
            .iter()
            .filter_map(|var| env::var(var).ok())
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
    }
}

/// In-memory store, for tests and embedders that manage keys themselves
#[derive(Debug, Default)]
pub struct StaticSecretStore {
    secrets: RwLock<HashMap<String, String>>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, name: &str, secret: &str) -> Self {
        self.set(name, secret);
        self
    }

    pub fn set(&self, name: &str, secret: &str) {
        self.secrets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_lowercase(), secret.to_string());
    }

    pub fn remove(&self, name: &str) -> bool {
        self.secrets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&name.to_lowercase())
            .is_some()
    }
}

impl SecretStore for StaticSecretStore {
    fn get(&self, name: &str) -> Option<String> {
        self.secrets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&name.to_lowercase())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_env_store() {
        env::set_var("DEEPSEEK_API_KEY", " sk-deep ");
        assert_eq!(EnvSecretStore.get("deepseek").as_deref(), Some("sk-deep"));
        assert_eq!(EnvSecretStore.get("DeepSeek").as_deref(), Some("sk-deep"));
        env::remove_var("DEEPSEEK_API_KEY");
        assert_eq!(EnvSecretStore.get("deepseek"), None);
    }

    #[test]
    #[serial]
    fn test_env_store_fallback_variable() {
        env::remove_var("GOOGLE_API_KEY");
        env::set_var("GEMINI_API_KEY", "g-key");
        assert_eq!(EnvSecretStore.get("google").as_deref(), Some("g-key"));
        env::remove_var("GEMINI_API_KEY");
    }

    #[test]
    #[serial]
    fn test_env_store_ignores_blank() {
        env::set_var("OPENAI_API_KEY", "   ");
        assert_eq!(EnvSecretStore.get("openai"), None);
        env::remove_var("OPENAI_API_KEY");
    }

    #[test]
    fn test_unknown_name() {
        assert_eq!(EnvSecretStore.get("acme"), None);
    }

    #[test]
    fn test_static_store() {
        let store = StaticSecretStore::new().with("OpenAI", "sk-1");
        assert_eq!(store.get("openai").as_deref(), Some("sk-1"));
        assert!(store.remove("openai"));
        assert_eq!(store.get("openai"), None);
    }
}
