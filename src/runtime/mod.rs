//! Local inference runtimes
//!
//! A [`LocalRuntime`] turns an artifact on disk into a ready [`RuntimeHandle`].
//! Both calls block, so callers run them on blocking worker threads.
//! Dropping the last reference to a handle releases the model.

pub mod candle;
pub mod mock;

pub use self::candle::CandleRuntime;
pub use mock::MockRuntime;

use crate::error::Result;
use crate::policy::ExecutionPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Construction parameters derived from an [`ExecutionPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadParams {
    pub context_length: u32,
    pub threads: usize,
    /// Layers to place on the GPU, already zero for non-CUDA policies
    pub gpu_layers: u32,
}

impl From<&ExecutionPolicy> for LoadParams {
    fn from(policy: &ExecutionPolicy) -> Self {
        Self {
            context_length: policy.max_context_length,
            threads: policy.max_threads,
            gpu_layers: policy.effective_gpu_layers(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub max_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub seed: u64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutput {
    pub text: String,
    pub prompt_tokens: usize,
    pub tokens_generated: usize,
}

/// Receives each decoded text piece; returning `false` stops generation
pub type TokenSink<'a> = &'a mut dyn FnMut(&str) -> bool;

pub trait RuntimeHandle: Send + Sync {
    fn generate(
        &self,
        prompt: &str,
        params: &SamplingParams,
        on_token: TokenSink<'_>,
    ) -> Result<GenerationOutput>;
}

pub trait LocalRuntime: Send + Sync {
    fn name(&self) -> &str;

    fn construct(&self, artifact: &Path, params: &LoadParams) -> Result<Arc<dyn RuntimeHandle>>;
}
