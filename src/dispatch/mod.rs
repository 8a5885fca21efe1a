//! Local and cloud generation

mod dispatcher;
mod types;

pub use dispatcher::{InferenceDispatcher, LoadedHandle};
pub use types::{GenerateParams, GenerationMetrics, GenerationResult, TokenChunk};
