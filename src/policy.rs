//! Execution policy resolution
//!
//! [`resolve`] is a pure, total function from a capability snapshot to the
//! settings used to construct a local runtime handle. The tier cut points are
//! inclusive lower bounds and are relied upon by the model recommendation
//! bands, so they must not drift.

use crate::hardware::{GpuVendor, SystemCapability};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel for "offload every layer"
pub const FULL_OFFLOAD_LAYERS: u32 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Cpu,
    Cuda,
    Metal,
    OnnxGpu,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendKind::Cpu => "cpu",
            BackendKind::Cuda => "cuda",
            BackendKind::Metal => "metal",
            BackendKind::OnnxGpu => "onnx_gpu",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    pub backend: BackendKind,
    pub max_batch_size: u32,
    pub max_context_length: u32,
    pub use_quantization: bool,
    /// 4, 8 or 16
    pub quantization_bits: u8,
    pub gpu_layers: u32,
    pub max_threads: usize,
}

impl ExecutionPolicy {
    /// Layers to offload when constructing a runtime handle. Only CUDA
    /// offloads; every other backend runs all layers on the CPU.
    pub fn effective_gpu_layers(&self) -> u32 {
        match self.backend {
            BackendKind::Cuda => self.gpu_layers,
            _ => 0,
        }
    }

    pub fn offloads_all_layers(&self) -> bool {
        self.effective_gpu_layers() == FULL_OFFLOAD_LAYERS
    }
}

/// Picks the backend. AMD and Intel GPUs are detected but have no runtime
/// path yet, so they fall back to the CPU tiers.
pub fn select_backend(capability: &SystemCapability) -> BackendKind {
    let has_vram = capability.gpu_vram_gb.map(|v| v > 0.0).unwrap_or(false);
    match capability.gpu_vendor {
        GpuVendor::Nvidia if has_vram => BackendKind::Cuda,
        _ => BackendKind::Cpu,
    }
}

pub fn resolve(capability: &SystemCapability) -> ExecutionPolicy {
    let threads = capability.cpu_threads.max(1);

    match select_backend(capability) {
        BackendKind::Cuda => {
            let vram = capability.gpu_vram_gb.unwrap_or(0.0);
            let (batch, context, quantize, bits, layers) = if vram >= 8.0 {
                (8, 4096, false, 16, FULL_OFFLOAD_LAYERS)
            } else if vram >= 4.0 {
                (4, 2048, true, 8, 20)
            } else {
                (2, 2048, true, 4, 10)
            };
            ExecutionPolicy {
                backend: BackendKind::Cuda,
                max_batch_size: batch,
                max_context_length: context,
                use_quantization: quantize,
                quantization_bits: bits,
                gpu_layers: layers,
                max_threads: threads,
            }
        }
        backend => {
            let ram = capability.available_ram_gb;
            let (batch, context, bits, thread_cap) = if ram >= 16.0 {
                (2, 4096, 8, 8)
            } else if ram >= 8.0 {
                (1, 2048, 4, 4)
            } else {
                (1, 1024, 4, 2)
            };
            ExecutionPolicy {
                backend,
                max_batch_size: batch,
                max_context_length: context,
                use_quantization: true,
                quantization_bits: bits,
                gpu_layers: 0,
                max_threads: threads.min(thread_cap),
            }
        }
    }
}
