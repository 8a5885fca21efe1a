//! Configuration for the modeld agent
//!
//! Settings come from `MODELD_*` environment variables layered over built-in
//! defaults. Provider API keys are not part of this struct; they are read on
//! demand through the secret store (see [`crate::cloud::secrets`]).
//!
//! # Environment Variables
//!
//! - `MODELD_DATA_DIR`: root for the registry file and profile snapshot
//! - `MODELD_MODELS_DIR`: where downloaded artifacts are stored - default: `<data_dir>/models`
//! - `MODELD_REQUEST_TIMEOUT`: cloud request timeout in seconds - default: "60"
//! - `MODELD_POLL_INTERVAL_MS`: download progress/cancel poll interval - default: "500"
//! - `MODELD_MAX_TOKENS`, `MODELD_TEMPERATURE`, `MODELD_TOP_P`: generation defaults
//! - `MODELD_HUB_ENDPOINT`: artifact repository base URL - default: "https://huggingface.co"
//! - `MODELD_LOG_LEVEL`: logging level - default: "info"
//!
//! # Example
//!
//! ```no_run
//! use modeld::ModeldConfig;
//!
//! let config = ModeldConfig::from_env().expect("bad environment");
//! config.validate().expect("invalid configuration");
//! println!("{}", config);
//! ```

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_MAX_TOKENS: usize = 512;
const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_TOP_P: f64 = 0.9;
const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";

const REGISTRY_FILE: &str = "models.json";
const PROFILE_FILE: &str = "system_profile.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },
}

#[derive(Debug, Clone)]
pub struct ModeldConfig {
    /// Registry and profile snapshot location
    pub data_dir: PathBuf,

    /// Downloaded model artifacts
    pub models_dir: PathBuf,

    /// Timeout for cloud generation requests
    pub request_timeout_secs: u64,

    /// How often a download stream reports progress and checks for cancellation
    pub poll_interval_ms: u64,

    pub max_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,

    /// Base URL of the artifact repository
    pub hub_endpoint: String,

    pub log_level: String,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("modeld"))
        .unwrap_or_else(|| PathBuf::from(".modeld"))
}

impl Default for ModeldConfig {
    /// Built-in defaults, ignoring the environment
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            models_dir: data_dir.join("models"),
            data_dir,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            hub_endpoint: DEFAULT_HUB_ENDPOINT.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::ParseError {
            field: key.to_string(),
            error: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

impl ModeldConfig {
    /// Loads `MODELD_*` variables over the defaults
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ParseError` when a numeric variable is set but
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let data_dir = env::var("MODELD_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let models_dir = env::var("MODELD_MODELS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        Ok(Self {
            data_dir,
            models_dir,
            request_timeout_secs: parse_env("MODELD_REQUEST_TIMEOUT", defaults.request_timeout_secs)?,
            poll_interval_ms: parse_env("MODELD_POLL_INTERVAL_MS", defaults.poll_interval_ms)?,
            max_tokens: parse_env("MODELD_MAX_TOKENS", defaults.max_tokens)?,
            temperature: parse_env("MODELD_TEMPERATURE", defaults.temperature)?,
            top_p: parse_env("MODELD_TOP_P", defaults.top_p)?,
            hub_endpoint: env::var("MODELD_HUB_ENDPOINT")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(defaults.hub_endpoint),
            log_level: env::var("MODELD_LOG_LEVEL")
                .unwrap_or(defaults.log_level)
                .to_lowercase(),
        })
    }

    /// Same as [`ModeldConfig::default`] but rooted at `data_dir`
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            models_dir: data_dir.join("models"),
            data_dir,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 || self.request_timeout_secs > 600 {
            return Err(ConfigError::ValidationFailed(
                "Request timeout must be between 1 and 600 seconds".to_string(),
            ));
        }

        // cancellation has to be observed within a second
        if !(50..=1000).contains(&self.poll_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "Poll interval must be between 50 and 1000 ms".to_string(),
            ));
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationFailed(
                "Max tokens must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(format!(
                "Temperature {} is outside 0.0..=2.0",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ConfigError::ValidationFailed(format!(
                "top_p {} is outside 0.0..=1.0",
                self.top_p
            )));
        }

        if !self.hub_endpoint.starts_with("http://") && !self.hub_endpoint.starts_with("https://") {
            return Err(ConfigError::ValidationFailed(format!(
                "Hub endpoint must be an http(s) URL: {}",
                self.hub_endpoint
            )));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join(REGISTRY_FILE)
    }

    pub fn profile_path(&self) -> PathBuf {
        self.data_dir.join(PROFILE_FILE)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn to_display_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("data_dir".to_string(), self.data_dir.display().to_string());
        map.insert("models_dir".to_string(), self.models_dir.display().to_string());
        map.insert(
            "request_timeout_secs".to_string(),
            self.request_timeout_secs.to_string(),
        );
        map.insert("poll_interval_ms".to_string(), self.poll_interval_ms.to_string());
        map.insert("max_tokens".to_string(), self.max_tokens.to_string());
        map.insert("temperature".to_string(), self.temperature.to_string());
        map.insert("top_p".to_string(), self.top_p.to_string());
        map.insert("hub_endpoint".to_string(), self.hub_endpoint.clone());
        map.insert("log_level".to_string(), self.log_level.clone());
        map
    }
}

impl fmt::Display for ModeldConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "modeld configuration:")?;
        writeln!(f, "  Data Dir: {}", self.data_dir.display())?;
        writeln!(f, "  Models Dir: {}", self.models_dir.display())?;
        writeln!(f, "  Hub Endpoint: {}", self.hub_endpoint)?;
        writeln!(f, "  Request Timeout: {}s", self.request_timeout_secs)?;
        writeln!(f, "  Poll Interval: {}ms", self.poll_interval_ms)?;
        writeln!(
            f,
            "  Sampling: max_tokens={} temperature={} top_p={}",
            self.max_tokens, self.temperature, self.top_p
        )?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}
