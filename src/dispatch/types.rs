use crate::config::ModeldConfig;
use crate::runtime::SamplingParams;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sampling options for one generation call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerateParams {
    pub max_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

impl GenerateParams {
    pub fn from_config(config: &ModeldConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
        }
    }

    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            ..Default::default()
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenerationMetrics {
    pub latency_ms: f64,
    pub tokens_generated: u64,
    /// Zero when no measurable time elapsed
    pub tokens_per_sec: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost_usd: Option<f64>,
}

impl GenerationMetrics {
    pub fn measure(elapsed: Duration, tokens_generated: u64) -> Self {
        let secs = elapsed.as_secs_f64();
        let tokens_per_sec = if secs > 0.0 {
            round2(tokens_generated as f64 / secs)
        } else {
            0.0
        };

        Self {
            latency_ms: round2(secs * 1000.0),
            tokens_generated,
            tokens_per_sec,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    pub metrics: GenerationMetrics,
}

/// One piece of a streamed reply. The last chunk has `done` set and
/// carries the metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenChunk {
    pub text: String,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<GenerationMetrics>,
}

impl TokenChunk {
    pub fn token(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: false,
            metrics: None,
        }
    }

    pub fn done(metrics: GenerationMetrics) -> Self {
        Self {
            text: String::new(),
            done: true,
            metrics: Some(metrics),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_elapsed_has_zero_throughput() {
        let metrics = GenerationMetrics::measure(Duration::ZERO, 10);
        assert_eq!(metrics.tokens_per_sec, 0.0);
        assert_eq!(metrics.latency_ms, 0.0);
        assert_eq!(metrics.tokens_generated, 10);
    }

    #[test]
    fn test_throughput_and_rounding() {
        let metrics = GenerationMetrics::measure(Duration::from_millis(1500), 30);
        assert_eq!(metrics.latency_ms, 1500.0);
        assert_eq!(metrics.tokens_per_sec, 20.0);

        let metrics = GenerationMetrics::measure(Duration::from_micros(1_234_567), 1);
        assert_eq!(metrics.latency_ms, 1234.57);
    }

    #[test]
    fn test_local_metrics_omit_cloud_fields() {
        let json = serde_json::to_value(GenerationMetrics::measure(Duration::from_secs(1), 5)).unwrap();
        assert!(json.get("provider").is_none());
        assert!(json.get("estimated_cost_usd").is_none());
        assert_eq!(json["tokens_per_sec"], 5.0);
    }

    #[test]
    fn test_params_from_config() {
        let mut config = ModeldConfig::default();
        config.max_tokens = 64;
        config.temperature = 0.0;
        let sampling = GenerateParams::from_config(&config).sampling();
        assert_eq!(sampling.max_tokens, 64);
        assert_eq!(sampling.temperature, 0.0);
        assert_eq!(sampling.top_p, 0.9);
    }
}
