//! Cloud inference providers

pub mod anthropic;
pub mod error;
pub mod google;
pub mod openai_compatible;
pub mod pricing;
pub mod provider;
pub mod secrets;

pub use anthropic::AnthropicClient;
pub use error::BackendError;
pub use google::GoogleClient;
pub use openai_compatible::OpenAiCompatibleClient;
pub use provider::{CloudProvider, CloudProviderClient, CloudRequest, CloudResponse, ProviderRegistry};
pub use secrets::{EnvSecretStore, SecretStore, StaticSecretStore};
