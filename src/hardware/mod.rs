//! Hardware capability detection
//!
//! [`CapabilityProbe`] produces an immutable [`SystemCapability`] snapshot from
//! local OS and driver queries. Snapshots are cached and only replaced as a
//! whole, on explicit refresh.

mod detector;
pub mod gpu;

pub use detector::{CapabilityProbe, CapabilitySource, StaticSource, SystemSource};
pub use gpu::{classify_vendor, GpuInfo};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    None,
}

impl fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GpuVendor::Nvidia => "nvidia",
            GpuVendor::Amd => "amd",
            GpuVendor::Intel => "intel",
            GpuVendor::None => "none",
        };
        f.write_str(s)
    }
}

/// Point-in-time read of CPU, memory and GPU characteristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemCapability {
    /// Physical cores, at least 1
    pub cpu_cores: usize,
    /// Logical threads, at least 1
    pub cpu_threads: usize,
    pub cpu_arch: String,
    pub cpu_brand: String,
    pub total_ram_gb: f64,
    pub available_ram_gb: f64,
    pub gpu_vendor: GpuVendor,
    pub gpu_name: Option<String>,
    pub gpu_vram_gb: Option<f64>,
    pub gpu_count: usize,
    pub platform_system: String,
    pub platform_release: String,
}

impl SystemCapability {
    /// A CPU-only machine, mostly useful for tests and overrides
    pub fn cpu_only(cpu_threads: usize, available_ram_gb: f64) -> Self {
        let threads = cpu_threads.max(1);
        Self {
            cpu_cores: threads,
            cpu_threads: threads,
            cpu_arch: std::env::consts::ARCH.to_string(),
            cpu_brand: String::new(),
            total_ram_gb: available_ram_gb.max(0.0),
            available_ram_gb: available_ram_gb.max(0.0),
            gpu_vendor: GpuVendor::None,
            gpu_name: None,
            gpu_vram_gb: None,
            gpu_count: 0,
            platform_system: platform_system_name().to_string(),
            platform_release: String::new(),
        }
    }

    pub fn with_gpu(mut self, vendor: GpuVendor, name: &str, vram_gb: Option<f64>) -> Self {
        self.gpu_vendor = vendor;
        self.gpu_name = Some(name.to_string());
        self.gpu_vram_gb = vram_gb;
        self.gpu_count = 1;
        self
    }

    pub fn has_gpu(&self) -> bool {
        self.gpu_vendor != GpuVendor::None
    }
}

pub(crate) fn platform_system_name() -> &'static str {
    match std::env::consts::OS {
        "linux" => "Linux",
        "macos" => "Darwin",
        "windows" => "Windows",
        other => other,
    }
}

/// Bytes to gigabytes, rounded to two decimals
pub(crate) fn bytes_to_gb(bytes: u64) -> f64 {
    let gb = bytes as f64 / (1024.0 * 1024.0 * 1024.0);
    (gb * 100.0).round() / 100.0
}
