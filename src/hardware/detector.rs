use super::gpu::{self, GpuInfo};
use super::{bytes_to_gb, platform_system_name, GpuVendor, SystemCapability};
use std::sync::{Arc, RwLock};
use sysinfo::System;
use tracing::{debug, info};

/// Where capability snapshots come from
pub trait CapabilitySource: Send + Sync {
    fn read(&self) -> SystemCapability;
}

/// Reads the live machine via `sysinfo` and the GPU vendor tools
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSource;

impl CapabilitySource for SystemSource {
    fn read(&self) -> SystemCapability {
        let mut sys = System::new_all();
        sys.refresh_all();

        let cpu_threads = sys.cpus().len().max(1);
        let cpu_cores = System::physical_core_count().unwrap_or(1).max(1);
        let cpu_brand = sys
            .cpus()
            .first()
            .map(|c| c.brand().trim().to_string())
            .unwrap_or_default();

        let gpu = gpu::detect_gpu();
        let (gpu_vendor, gpu_name, gpu_vram_gb, gpu_count) = match &gpu {
            Some(info) => (info.vendor(), Some(info.name.clone()), info.vram_gb(), info.count),
            None => (GpuVendor::None, None, None, 0),
        };

        SystemCapability {
            cpu_cores,
            cpu_threads,
            cpu_arch: std::env::consts::ARCH.to_string(),
            cpu_brand,
            total_ram_gb: bytes_to_gb(sys.total_memory()),
            available_ram_gb: bytes_to_gb(sys.available_memory()),
            gpu_vendor,
            gpu_name,
            gpu_vram_gb,
            gpu_count,
            platform_system: platform_system_name().to_string(),
            platform_release: System::kernel_version().unwrap_or_default(),
        }
    }
}

/// Always returns the same snapshot
#[derive(Debug, Clone)]
pub struct StaticSource(pub SystemCapability);

impl CapabilitySource for StaticSource {
    fn read(&self) -> SystemCapability {
        self.0.clone()
    }
}

impl From<GpuInfo> for StaticSource {
    fn from(info: GpuInfo) -> Self {
        let vendor = info.vendor();
        let vram = info.vram_gb();
        Self(SystemCapability::cpu_only(8, 16.0).with_gpu(vendor, &info.name, vram))
    }
}

/// Cached capability detection
///
/// Readers share the cached snapshot. A refresh builds a new snapshot outside
/// the lock and swaps it in, so a reader never sees a partially updated one.
pub struct CapabilityProbe {
    source: Arc<dyn CapabilitySource>,
    cache: RwLock<Option<Arc<SystemCapability>>>,
}

impl CapabilityProbe {
    pub fn new(source: Arc<dyn CapabilitySource>) -> Self {
        Self {
            source,
            cache: RwLock::new(None),
        }
    }

    /// Probe for the machine this process runs on
    pub fn system() -> Self {
        Self::new(Arc::new(SystemSource))
    }

    pub fn fixed(capability: SystemCapability) -> Self {
        Self::new(Arc::new(StaticSource(capability)))
    }

    /// Returns the cached snapshot, probing first when there is none or when
    /// `force_refresh` is set. Does blocking OS queries on a cache miss.
    pub fn detect(&self, force_refresh: bool) -> Arc<SystemCapability> {
        if !force_refresh {
            if let Some(cached) = self.cached() {
                return cached;
            }
        }

        let fresh = Arc::new(self.source.read());
        info!(
            cores = fresh.cpu_cores,
            threads = fresh.cpu_threads,
            available_ram_gb = fresh.available_ram_gb,
            gpu_vendor = %fresh.gpu_vendor,
            gpu_vram_gb = ?fresh.gpu_vram_gb,
            "Hardware detected"
        );
        debug!(capability = ?fresh, "Capability snapshot");

        let mut guard = self.cache.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Arc::clone(&fresh));
        fresh
    }

    pub fn cached(&self) -> Option<Arc<SystemCapability>> {
        self.cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(Arc::clone)
    }
}

impl std::fmt::Debug for CapabilityProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityProbe")
            .field("cached", &self.cached().is_some())
            .finish()
    }
}
