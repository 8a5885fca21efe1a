//! Output formatting for JSON, YAML and human-readable text

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write;

use crate::agent::{ComparisonEntry, SystemProfile};
use crate::catalog::Recommendation;
use crate::config::ModeldConfig;
use crate::dispatch::{GenerationMetrics, GenerationResult};
use crate::hardware::SystemCapability;
use crate::policy::ExecutionPolicy;
use crate::registry::{ModelPurpose, ModelRecord};
use crate::util::format_size;

const RULE: &str = "\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Yaml,
    Human,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_human(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Serializes `value`, or renders it with `human` in human mode
    fn render<T: Serialize + ?Sized>(&self, value: &T, human: impl FnOnce(&T) -> String) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(value).context("Failed to serialize output to JSON"),
            OutputFormat::Yaml => serde_yaml::to_string(value).context("Failed to serialize output to YAML"),
            OutputFormat::Human => Ok(human(value)),
        }
    }

    pub fn format_capability(&self, capability: &SystemCapability) -> Result<String> {
        self.render(capability, human_capability)
    }

    pub fn format_profile(&self, profile: &SystemProfile) -> Result<String> {
        self.render(profile, |p| {
            let mut out = human_capability(&p.capability);
            out.push('\n');
            out.push_str(&human_policy(&p.policy));
            out
        })
    }

    pub fn format_policy(&self, policy: &ExecutionPolicy) -> Result<String> {
        self.render(policy, human_policy)
    }

    pub fn format_models(&self, models: &[ModelRecord]) -> Result<String> {
        self.render(models, |models| {
            if models.is_empty() {
                return "No models registered. Try `modeld pull <locator>`.\n".to_string();
            }
            let mut out = String::new();
            let _ = writeln!(out, "{:<2} {:<24} {:<7} {:<12} {:>10}  NAME", "", "ID", "KIND", "PROVIDER", "SIZE");
            for m in models {
                let marker = if m.is_active { "*" } else { "" };
                let size = m
                    .size_mb
                    .map(|mb| format_size((mb * 1024.0 * 1024.0) as u64))
                    .unwrap_or_else(|| "-".to_string());
                let mut name = m.name.clone();
                if m.is_base_model {
                    name.push_str(" [base]");
                }
                if m.purpose == ModelPurpose::SystemIntent {
                    name.push_str(" [system]");
                }
                let _ = writeln!(
                    out,
                    "{:<2} {:<24} {:<7} {:<12} {:>10}  {}",
                    marker,
                    m.id,
                    if m.is_cloud() { "cloud" } else { "local" },
                    m.provider.as_deref().unwrap_or("-"),
                    size,
                    name
                );
            }
            out
        })
    }

    pub fn format_model(&self, model: &ModelRecord) -> Result<String> {
        self.render(model, |m| {
            let mut out = String::new();
            let _ = writeln!(out, "{} ({})", m.name, m.id);
            let _ = writeln!(out, "{}", RULE);
            let _ = writeln!(out, "Kind:      {}", if m.is_cloud() { "cloud" } else { "local" });
            let _ = writeln!(out, "Backend:   {}", m.backend);
            let _ = writeln!(out, "Provider:  {}", m.provider.as_deref().unwrap_or("-"));
            let _ = writeln!(out, "Location:  {}", m.location);
            if let Some(mb) = m.size_mb {
                let _ = writeln!(out, "Size:      {:.1} MB", mb);
            }
            let _ = writeln!(out, "Active:    {}", if m.is_active { "yes" } else { "no" });
            if m.is_base_model {
                let _ = writeln!(out, "Base:      yes");
            }
            for (key, value) in &m.metadata {
                let _ = writeln!(out, "  {}: {}", key, value);
            }
            out
        })
    }

    pub fn format_generation(&self, result: &GenerationResult) -> Result<String> {
        self.render(result, |r| {
            let mut out = r.text.trim_end().to_string();
            out.push_str("\n\n");
            out.push_str(&human_metrics(&r.metrics));
            out
        })
    }

    pub fn format_metrics(&self, metrics: &GenerationMetrics) -> Result<String> {
        self.render(metrics, human_metrics)
    }

    pub fn format_comparison(&self, entries: &[ComparisonEntry]) -> Result<String> {
        self.render(entries, |entries| {
            let mut out = String::new();
            for entry in entries {
                let _ = writeln!(out, "\u{25B6} {}", entry.model_id);
                let _ = writeln!(out, "{}", RULE);
                match (&entry.result, &entry.error) {
                    (Some(result), _) => {
                        let _ = writeln!(out, "{}\n", result.text.trim_end());
                        out.push_str(&human_metrics(&result.metrics));
                    }
                    (None, Some(error)) => {
                        let _ = writeln!(out, "\u{2717} {}", error);
                    }
                    (None, None) => {}
                }
                out.push('\n');
            }
            out
        })
    }

    pub fn format_recommendations(&self, recommendations: &[Recommendation]) -> Result<String> {
        self.render(recommendations, |recs| {
            let mut out = String::new();
            for rec in recs {
                let mark = if rec.fits { "\u{2713}" } else { "\u{26A0}" };
                let _ = writeln!(out, "{}. {} {} ({})", rec.rank, mark, rec.entry.name, rec.entry.id);
                let _ = writeln!(out, "   {}", rec.reasoning);
                let _ = writeln!(out, "   modeld pull {}", rec.entry.id);
            }
            out
        })
    }

    pub fn format_config(&self, config: &ModeldConfig) -> Result<String> {
        match self.format {
            OutputFormat::Human => Ok(config.to_string()),
            _ => {
                let map: std::collections::BTreeMap<_, _> = config.to_display_map().into_iter().collect();
                self.render(&map, |_| String::new())
            }
        }
    }
}

fn human_capability(c: &SystemCapability) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "System Capability");
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "Platform:  {} {}", c.platform_system, c.platform_release);
    let _ = writeln!(out, "CPU:       {} ({} cores / {} threads, {})", c.cpu_brand, c.cpu_cores, c.cpu_threads, c.cpu_arch);
    let _ = writeln!(out, "RAM:       {:.1} GB available of {:.1} GB", c.available_ram_gb, c.total_ram_gb);
    match (&c.gpu_name, c.gpu_vram_gb) {
        (Some(name), Some(vram)) => {
            let _ = writeln!(out, "GPU:       {} ({}, {:.1} GB VRAM, x{})", name, c.gpu_vendor, vram, c.gpu_count);
        }
        (Some(name), None) => {
            let _ = writeln!(out, "GPU:       {} ({}, VRAM unknown)", name, c.gpu_vendor);
        }
        _ => {
            let _ = writeln!(out, "GPU:       none");
        }
    }
    out
}

fn human_policy(p: &ExecutionPolicy) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Execution Policy");
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "\u{251C}\u{2500} Backend:       {}", p.backend);
    let _ = writeln!(out, "\u{251C}\u{2500} Context:       {}", p.max_context_length);
    let _ = writeln!(out, "\u{251C}\u{2500} Batch size:    {}", p.max_batch_size);
    if p.use_quantization {
        let _ = writeln!(out, "\u{251C}\u{2500} Quantization:  {}-bit", p.quantization_bits);
    } else {
        let _ = writeln!(out, "\u{251C}\u{2500} Quantization:  off");
    }
    let layers = if p.offloads_all_layers() {
        "all".to_string()
    } else {
        p.gpu_layers.to_string()
    };
    let _ = writeln!(out, "\u{251C}\u{2500} GPU layers:    {}", layers);
    let _ = writeln!(out, "\u{2514}\u{2500} Threads:       {}", p.max_threads);
    out
}

fn human_metrics(m: &GenerationMetrics) -> String {
    let mut line = format!(
        "{} tokens in {:.0} ms ({:.2} tok/s)",
        m.tokens_generated, m.latency_ms, m.tokens_per_sec
    );
    if let Some(provider) = &m.provider {
        let _ = write!(line, " via {}", provider);
    }
    if let Some(cost) = m.estimated_cost_usd {
        let _ = write!(line, ", ~${:.6}", cost);
    }
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::GpuVendor;
    use crate::policy;

    fn records() -> Vec<ModelRecord> {
        let mut phi = ModelRecord::local("phi3", "Phi-3 Mini", "/m/phi3.gguf").with_size_mb(2300.0);
        phi.is_active = true;
        vec![
            phi,
            ModelRecord::cloud("gpt", "gpt-4o", "openai", "https://api.openai.com/v1"),
        ]
    }

    #[test]
    fn test_models_human() {
        let out = OutputFormatter::new(OutputFormat::Human)
            .format_models(&records())
            .unwrap();
        assert!(out.contains("phi3"));
        assert!(out.contains("cloud"));
        assert!(out.lines().nth(1).unwrap().starts_with('*'));
    }

    #[test]
    fn test_models_empty() {
        let out = OutputFormatter::new(OutputFormat::Human).format_models(&[]).unwrap();
        assert!(out.contains("No models registered"));
    }

    #[test]
    fn test_models_json() {
        let out = OutputFormatter::new(OutputFormat::Json)
            .format_models(&records())
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["id"], "phi3");
        assert_eq!(parsed[1]["backend"], "cloud_api");
    }

    #[test]
    fn test_policy_human() {
        let cap = SystemCapability::cpu_only(16, 64.0).with_gpu(GpuVendor::Nvidia, "RTX 4090", Some(24.0));
        let out = OutputFormatter::new(OutputFormat::Human)
            .format_policy(&policy::resolve(&cap))
            .unwrap();
        assert!(out.contains("cuda"));
        assert!(out.contains("GPU layers:    all"));
        assert!(out.contains("Quantization:  off"));
    }

    #[test]
    fn test_capability_yaml() {
        let out = OutputFormatter::new(OutputFormat::Yaml)
            .format_capability(&SystemCapability::cpu_only(4, 8.0))
            .unwrap();
        assert!(out.contains("gpu_vendor: none"));
    }

    #[test]
    fn test_metrics_with_cost() {
        let metrics = GenerationMetrics {
            latency_ms: 820.0,
            tokens_generated: 41,
            tokens_per_sec: 50.0,
            provider: Some("OpenAI".into()),
            estimated_cost_usd: Some(0.00042),
            ..Default::default()
        };
        let out = human_metrics(&metrics);
        assert!(out.contains("41 tokens"));
        assert!(out.contains("via OpenAI"));
        assert!(out.contains("$0.000420"));
    }

    #[test]
    fn test_config_json_is_sorted_map() {
        let config = ModeldConfig::with_data_dir("/tmp/modeld-test");
        let out = OutputFormatter::new(OutputFormat::Json).format_config(&config).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert!(parsed.is_object());
    }
}
