//! Scripted runtime for tests and dry runs
//!
//! Counts constructions so callers can assert that concurrent loads of the
//! same model coalesce into one.

use super::{GenerationOutput, LoadParams, LocalRuntime, RuntimeHandle, SamplingParams, TokenSink};
use crate::error::{AgentError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct MockRuntime {
    reply: String,
    construct_delay: Duration,
    failing: Mutex<HashSet<PathBuf>>,
    constructs: AtomicUsize,
    last_params: Mutex<Option<LoadParams>>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new("Hello from the mock runtime")
    }
}

impl MockRuntime {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            construct_delay: Duration::ZERO,
            failing: Mutex::new(HashSet::new()),
            constructs: AtomicUsize::new(0),
            last_params: Mutex::new(None),
        }
    }

    /// Makes every construction block for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.construct_delay = delay;
        self
    }

    /// Constructions of `path` fail with a load error
    pub fn fail_on(&self, path: impl Into<PathBuf>) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into());
    }

    pub fn construct_count(&self) -> usize {
        self.constructs.load(Ordering::SeqCst)
    }

    pub fn last_params(&self) -> Option<LoadParams> {
        *self.last_params.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LocalRuntime for MockRuntime {
    fn name(&self) -> &str {
        "mock"
    }

    fn construct(&self, artifact: &Path, params: &LoadParams) -> Result<Arc<dyn RuntimeHandle>> {
        self.constructs.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock().unwrap_or_else(|e| e.into_inner()) = Some(*params);

        if !self.construct_delay.is_zero() {
            std::thread::sleep(self.construct_delay);
        }

        let fails = self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(artifact);
        if fails {
            return Err(AgentError::LoadFailure {
                model_id: artifact
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                path: artifact.to_path_buf(),
                reason: "mock construction failure".to_string(),
            });
        }

        Ok(Arc::new(MockHandle {
            reply: self.reply.clone(),
        }))
    }
}

struct MockHandle {
    reply: String,
}

impl RuntimeHandle for MockHandle {
    fn generate(
        &self,
        prompt: &str,
        params: &SamplingParams,
        on_token: TokenSink<'_>,
    ) -> Result<GenerationOutput> {
        let mut text = String::new();
        let mut generated = 0;

        // one token per whitespace-separated word, spaces kept on the left
        for (i, word) in self.reply.split_whitespace().take(params.max_tokens).enumerate() {
            let piece = if i == 0 {
                word.to_string()
            } else {
                format!(" {}", word)
            };
            text.push_str(&piece);
            generated += 1;
            if !on_token(&piece) {
                break;
            }
        }

        Ok(GenerationOutput {
            text,
            prompt_tokens: prompt.split_whitespace().count(),
            tokens_generated: generated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> LoadParams {
        LoadParams {
            context_length: 2048,
            threads: 4,
            gpu_layers: 0,
        }
    }

    #[test]
    fn test_counts_constructions() {
        let runtime = MockRuntime::default();
        runtime.construct(Path::new("/m/a.gguf"), &params()).unwrap();
        runtime.construct(Path::new("/m/b.gguf"), &params()).unwrap();
        assert_eq!(runtime.construct_count(), 2);
        assert_eq!(runtime.last_params(), Some(params()));
    }

    #[test]
    fn test_failing_path() {
        let runtime = MockRuntime::default();
        runtime.fail_on("/m/broken.gguf");
        let err = runtime
            .construct(Path::new("/m/broken.gguf"), &params())
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::LoadFailure { .. }));
    }

    #[test]
    fn test_generate_streams_words() {
        let runtime = MockRuntime::new("one two three");
        let handle = runtime.construct(Path::new("/m/a.gguf"), &params()).unwrap();

        let mut pieces = Vec::new();
        let out = handle
            .generate("hi there", &SamplingParams::default(), &mut |p| {
                pieces.push(p.to_string());
                true
            })
            .unwrap();

        assert_eq!(pieces, vec!["one", " two", " three"]);
        assert_eq!(out.text, "one two three");
        assert_eq!(out.tokens_generated, 3);
        assert_eq!(out.prompt_tokens, 2);
    }

    #[test]
    fn test_generate_respects_max_tokens_and_stop() {
        let runtime = MockRuntime::new("a b c d e");
        let handle = runtime.construct(Path::new("/m/a.gguf"), &params()).unwrap();

        let sampling = SamplingParams {
            max_tokens: 2,
            ..Default::default()
        };
        let out = handle.generate("x", &sampling, &mut |_| true).unwrap();
        assert_eq!(out.text, "a b");

        let out = handle
            .generate("x", &SamplingParams::default(), &mut |_| false)
            .unwrap();
        assert_eq!(out.tokens_generated, 1);
    }
}
