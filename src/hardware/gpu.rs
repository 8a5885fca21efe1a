//! GPU discovery through vendor tools
//!
//! Every probe is best effort. A missing binary, a non-zero exit status or
//! unparsable output all mean "no GPU found by this probe".

use super::GpuVendor;
use std::process::Command;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct GpuInfo {
    pub name: String,
    pub vram_mb: Option<u64>,
    pub count: usize,
}

impl GpuInfo {
    pub fn vendor(&self) -> GpuVendor {
        classify_vendor(&self.name)
    }

    pub fn vram_gb(&self) -> Option<f64> {
        self.vram_mb
            .filter(|mb| *mb > 0)
            .map(|mb| ((mb as f64 / 1024.0) * 100.0).round() / 100.0)
    }
}

/// Maps an adapter name to its vendor
pub fn classify_vendor(name: &str) -> GpuVendor {
    let lower = name.to_lowercase();
    const NVIDIA: &[&str] = &["nvidia", "geforce", "rtx", "gtx", "quadro", "tesla"];

    if NVIDIA.iter().any(|k| lower.contains(k)) {
        GpuVendor::Nvidia
    } else if lower.contains("amd") || lower.contains("radeon") {
        GpuVendor::Amd
    } else if lower.contains("intel") {
        GpuVendor::Intel
    } else {
        GpuVendor::None
    }
}

/// Runs the probes for this platform in order and returns the first hit
pub fn detect_gpu() -> Option<GpuInfo> {
    if let Some(info) = probe_nvidia_smi() {
        return Some(info);
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(info) = run("system_profiler", &["SPDisplaysDataType"])
            .and_then(|out| parse_system_profiler(&out))
        {
            return Some(info);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Some(info) = run("lspci", &[]).and_then(|out| parse_lspci(&out)) {
            return Some(info);
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(info) = run("wmic", &["path", "win32_VideoController", "get", "name"])
            .and_then(|out| parse_wmic(&out))
        {
            return Some(info);
        }
    }

    debug!("No GPU detected");
    None
}

fn probe_nvidia_smi() -> Option<GpuInfo> {
    run(
        "nvidia-smi",
        &[
            "--query-gpu=name,memory.total",
            "--format=csv,noheader,nounits",
        ],
    )
    .and_then(|out| parse_nvidia_smi(&out))
}

fn run(program: &str, args: &[&str]) -> Option<String> {
    let output = match Command::new(program).args(args).output() {
        Ok(output) => output,
        Err(e) => {
            debug!(program, error = %e, "GPU probe unavailable");
            return None;
        }
    };

    if !output.status.success() {
        debug!(program, status = ?output.status, "GPU probe failed");
        return None;
    }

    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parses `name, memory.total` CSV rows (MiB, no units). The first adapter
/// wins; the row count becomes the GPU count.
pub fn parse_nvidia_smi(output: &str) -> Option<GpuInfo> {
    let rows: Vec<(String, Option<u64>)> = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|line| {
            let mut parts = line.split(',').map(str::trim);
            let name = parts.next().filter(|n| !n.is_empty())?;
            let vram = parts.next().and_then(|v| v.parse::<f64>().ok()).map(|v| v as u64);
            Some((name.to_string(), vram))
        })
        .collect();

    let (name, vram_mb) = rows.first()?.clone();
    Some(GpuInfo {
        name,
        vram_mb,
        count: rows.len(),
    })
}

/// Picks display controllers out of `lspci`. VRAM is not reported there.
pub fn parse_lspci(output: &str) -> Option<GpuInfo> {
    let names: Vec<&str> = output
        .lines()
        .filter(|l| {
            l.contains("VGA compatible controller")
                || l.contains("3D controller")
                || l.contains("Display controller")
        })
        .filter_map(|l| l.splitn(3, ':').nth(2))
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .collect();

    // prefer a discrete adapter when an integrated one is listed first
    let best = names
        .iter()
        .find(|n| classify_vendor(n) == GpuVendor::Nvidia)
        .or_else(|| names.first())?;

    Some(GpuInfo {
        name: best.to_string(),
        vram_mb: None,
        count: names.len(),
    })
}

pub fn parse_system_profiler(output: &str) -> Option<GpuInfo> {
    let mut name: Option<String> = None;
    let mut vram_mb: Option<u64> = None;

    for line in output.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("Chipset Model:") {
            if name.is_none() && !rest.trim().is_empty() {
                name = Some(rest.trim().to_string());
            }
        } else if line.starts_with("VRAM") {
            let value = line.split(':').nth(1).unwrap_or("").trim();
            let mut parts = value.split_whitespace();
            if let (Some(amount), Some(unit)) = (parts.next(), parts.next()) {
                if let Ok(amount) = amount.parse::<u64>() {
                    vram_mb = Some(match unit.to_uppercase().as_str() {
                        "GB" => amount * 1024,
                        _ => amount,
                    });
                }
            }
        }
    }

    name.map(|name| GpuInfo {
        name,
        vram_mb,
        count: 1,
    })
}

pub fn parse_wmic(output: &str) -> Option<GpuInfo> {
    let names: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.eq_ignore_ascii_case("name"))
        .collect();

    let first = names.first()?;
    Some(GpuInfo {
        name: first.to_string(),
        vram_mb: None,
        count: names.len(),
    })
}
