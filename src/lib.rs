//! modeld - a local inference agent
//!
//! modeld detects what the machine can run, picks an execution policy for it,
//! keeps a registry of local and cloud models, downloads GGUF artifacts from
//! the Hugging Face hub and routes generation requests either to a locally
//! loaded model or to a cloud provider.
//!
//! # Core Concepts
//!
//! - **Capability**: a snapshot of OS, CPU, RAM and GPU, detected once and cached
//! - **Policy**: backend, GPU layer count, threads, context length and
//!   quantization derived from a capability snapshot
//! - **Registry**: persisted model records with exactly zero or one active model
//! - **Fetcher**: single-flight, cancellable downloads with progress events
//! - **Dispatcher**: loads each model at most once and generates from it,
//!   or forwards to a cloud provider
//!
//! # Example Usage
//!
//! ```no_run
//! use modeld::{Agent, GenerateParams, ModeldConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ModeldConfig::from_env()?;
//! let agent = Agent::new(config)?;
//!
//! let policy = agent.current_policy().await;
//! println!("Running on {} with {} GPU layers", policy.backend, policy.gpu_layers);
//!
//! let params = GenerateParams::default();
//! let result = agent.generate(Some("phi3"), "Explain RAII", &params).await?;
//! println!("{}", result.text);
//! # Ok(())
//! # }
//! ```
//!
//! # Project Structure
//!
//! - [`hardware`]: capability detection
//! - [`policy`]: execution policy resolution
//! - [`registry`]: model records and persistence
//! - [`fetch`]: artifact downloads
//! - [`runtime`]: local inference runtimes
//! - [`cloud`]: cloud provider clients
//! - [`dispatch`]: load coalescing and generation routing
//! - [`agent`]: the facade tying everything together

pub mod agent;
pub mod catalog;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod hardware;
pub mod policy;
pub mod registry;
pub mod runtime;
pub mod util;

pub use agent::{Agent, AgentComponents, ComparisonEntry, PullOptions, SystemProfile};
pub use config::{ConfigError, ModeldConfig};
pub use dispatch::{GenerateParams, GenerationMetrics, GenerationResult, InferenceDispatcher, TokenChunk};
pub use error::{AgentError, Result};
pub use fetch::{ArtifactFetcher, ArtifactLocator, FetchRequest, FetchStatus, ProgressEvent};
pub use hardware::{CapabilityProbe, GpuVendor, SystemCapability};
pub use policy::{BackendKind, ExecutionPolicy};
pub use registry::{ModelKind, ModelPurpose, ModelRecord, ModelRegistry};
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name_is_modeld() {
        assert_eq!(NAME, "modeld");
    }
}
