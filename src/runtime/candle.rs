//! GGUF runtime on Candle
//!
//! Supports the quantized Qwen2, Llama (including Mistral) and Phi-3 families.
//! The tokenizer is read from a `tokenizer.json` next to the artifact.
//!
//! Candle has no partial layer offload: any positive `gpu_layers` places the
//! whole model on the first CUDA device when the `cuda` feature is enabled.

use super::{GenerationOutput, LoadParams, LocalRuntime, RuntimeHandle, SamplingParams, TokenSink};
use crate::error::{AgentError, Result};
use candle_core::quantized::gguf_file;
use candle_core::{Device, IndexOp, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama::ModelWeights as QuantizedLlama;
use candle_transformers::models::quantized_phi3::ModelWeights as QuantizedPhi3;
use candle_transformers::models::quantized_qwen2::ModelWeights as QuantizedQwen2;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

const TOKENIZER_FILE: &str = "tokenizer.json";

/// End-of-sequence markers across the supported families
const EOS_TOKENS: &[&str] = &["<|im_end|>", "<|endoftext|>", "<|end|>", "<|eot_id|>", "</s>"];

enum QuantizedModel {
    Qwen2(QuantizedQwen2),
    Llama(QuantizedLlama),
    Phi3(QuantizedPhi3),
}

impl QuantizedModel {
    fn forward(&mut self, input: &Tensor, offset: usize) -> candle_core::Result<Tensor> {
        match self {
            QuantizedModel::Qwen2(m) => m.forward(input, offset),
            QuantizedModel::Llama(m) => m.forward(input, offset),
            QuantizedModel::Phi3(m) => m.forward(input, offset),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CandleRuntime;

impl CandleRuntime {
    pub fn new() -> Self {
        Self
    }

    fn device(params: &LoadParams) -> Device {
        if params.gpu_layers == 0 {
            return Device::Cpu;
        }

        #[cfg(feature = "cuda")]
        {
            match Device::new_cuda(0) {
                Ok(device) => return device,
                Err(e) => warn!(error = %e, "CUDA device unavailable, using CPU"),
            }
        }
        #[cfg(not(feature = "cuda"))]
        {
            warn!("GPU offload requested but built without the cuda feature, using CPU");
        }

        Device::Cpu
    }

    fn load_model(path: &Path, device: &Device) -> std::result::Result<QuantizedModel, String> {
        let mut file = File::open(path).map_err(|e| format!("cannot open artifact: {}", e))?;
        let content =
            gguf_file::Content::read(&mut file).map_err(|e| format!("not a GGUF file: {}", e))?;

        let arch = content
            .metadata
            .get("general.architecture")
            .and_then(|v| v.to_string().ok())
            .cloned()
            .unwrap_or_default();
        debug!(path = %path.display(), arch = %arch, "Reading GGUF weights");

        let model = match arch.as_str() {
            "qwen2" => QuantizedQwen2::from_gguf(content, &mut file, device).map(QuantizedModel::Qwen2),
            "llama" | "mistral" => {
                QuantizedLlama::from_gguf(content, &mut file, device).map(QuantizedModel::Llama)
            }
            "phi3" => QuantizedPhi3::from_gguf(false, content, &mut file, device).map(QuantizedModel::Phi3),
            other => return Err(format!("unsupported architecture '{}'", other)),
        };
        model.map_err(|e| format!("failed to load weights: {}", e))
    }
}

fn tokenizer_path(artifact: &Path) -> Option<PathBuf> {
    let sibling = artifact.with_file_name(TOKENIZER_FILE);
    if sibling.exists() {
        return Some(sibling);
    }
    let mut named = artifact.as_os_str().to_os_string();
    named.push(".tokenizer.json");
    let named = PathBuf::from(named);
    named.exists().then_some(named)
}

impl LocalRuntime for CandleRuntime {
    fn name(&self) -> &str {
        "candle"
    }

    fn construct(&self, artifact: &Path, params: &LoadParams) -> Result<Arc<dyn RuntimeHandle>> {
        let failure = |reason: String| AgentError::LoadFailure {
            model_id: artifact
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: artifact.to_path_buf(),
            reason,
        };

        let tokenizer_file = tokenizer_path(artifact)
            .ok_or_else(|| failure(format!("{} not found next to the artifact", TOKENIZER_FILE)))?;
        let tokenizer = Tokenizer::from_file(&tokenizer_file)
            .map_err(|e| failure(format!("failed to load tokenizer: {}", e)))?;

        let device = Self::device(params);
        let start = Instant::now();
        let model = match Self::load_model(artifact, &device) {
            Ok(model) => model,
            Err(e) if !device.is_cpu() => {
                warn!(error = %e, "GPU load failed, retrying on CPU");
                Self::load_model(artifact, &Device::Cpu).map_err(failure)?
            }
            Err(e) => return Err(failure(e)),
        };

        let eos: HashSet<u32> = EOS_TOKENS
            .iter()
            .filter_map(|t| tokenizer.token_to_id(t))
            .collect();

        info!(
            path = %artifact.display(),
            context_length = params.context_length,
            threads = params.threads,
            gpu = !device.is_cpu(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "GGUF model constructed"
        );

        Ok(Arc::new(CandleHandle {
            model: Mutex::new(model),
            tokenizer,
            device,
            eos,
            context_length: params.context_length as usize,
        }))
    }
}

struct CandleHandle {
    model: Mutex<QuantizedModel>,
    tokenizer: Tokenizer,
    device: Device,
    eos: HashSet<u32>,
    context_length: usize,
}

impl CandleHandle {
    fn next_logits(
        &self,
        model: &mut QuantizedModel,
        tokens: &[u32],
        offset: usize,
    ) -> candle_core::Result<Tensor> {
        let input = Tensor::new(tokens, &self.device)?.unsqueeze(0)?;
        let logits = model.forward(&input, offset)?;
        // [batch, seq, vocab] for some families, [batch, vocab] for others
        if logits.dims().len() == 3 {
            let seq_len = logits.dim(1)?;
            logits.i((0, seq_len - 1))
        } else {
            logits.squeeze(0)
        }
    }
}

fn generation_error(stage: &str, e: impl std::fmt::Display) -> AgentError {
    AgentError::generation(format!("{} failed: {}", stage, e))
}

impl RuntimeHandle for CandleHandle {
    fn generate(
        &self,
        prompt: &str,
        params: &SamplingParams,
        on_token: TokenSink<'_>,
    ) -> Result<GenerationOutput> {
        let runtime_err = |e: candle_core::Error| generation_error("inference", e);

        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| generation_error("tokenization", e))?;
        let mut prompt_ids: Vec<u32> = encoding.get_ids().to_vec();

        // keep room for the reply inside the context window
        let budget = self.context_length.saturating_sub(params.max_tokens).max(1);
        if prompt_ids.len() > budget {
            warn!(
                prompt_tokens = prompt_ids.len(),
                budget, "Prompt exceeds context window, keeping the tail"
            );
            prompt_ids = prompt_ids.split_off(prompt_ids.len() - budget);
        }
        let max_new = params
            .max_tokens
            .min(self.context_length.saturating_sub(prompt_ids.len()));

        let temperature = (params.temperature > 0.0).then_some(params.temperature);
        let top_p = (params.top_p > 0.0 && params.top_p < 1.0).then_some(params.top_p);
        let mut sampler = LogitsProcessor::new(params.seed, temperature, top_p);

        let mut model = self.model.lock().unwrap_or_else(|e| e.into_inner());
        let mut generated: Vec<u32> = Vec::new();
        let mut emitted = 0usize;
        let mut text = String::new();

        for i in 0..max_new {
            let logits = if i == 0 {
                self.next_logits(&mut model, &prompt_ids, 0)
            } else {
                let last = generated[generated.len() - 1];
                self.next_logits(&mut model, &[last], prompt_ids.len() + i - 1)
            }
            .map_err(runtime_err)?;

            let next = sampler.sample(&logits).map_err(runtime_err)?;
            if self.eos.contains(&next) {
                break;
            }
            generated.push(next);

            // decode the whole reply so multi-token characters come out whole
            let decoded = self
                .tokenizer
                .decode(&generated, true)
                .map_err(|e| generation_error("decoding", e))?;
            if decoded.len() > emitted && decoded.is_char_boundary(emitted) {
                let piece = &decoded[emitted..];
                let keep_going = on_token(piece);
                emitted = decoded.len();
                text = decoded;
                if !keep_going {
                    break;
                }
            }
        }

        Ok(GenerationOutput {
            text,
            prompt_tokens: prompt_ids.len(),
            tokens_generated: generated.len(),
        })
    }
}
