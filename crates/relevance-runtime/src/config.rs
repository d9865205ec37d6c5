//! Run configuration.
//!
//! A run is configured once, before any document is processed, and the
//! resulting [`RunConfig`] is immutable for the run's duration.

use relevance_core::{TopicSet, DEFAULT_MAX_CHARS};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::providers::{InvocationOptions, DEFAULT_CLOUD_MODEL, DEFAULT_LOCAL_MODEL};
use crate::resilience::RetryConfig;

#[cfg(feature = "cloud")]
use crate::providers::ANTHROPIC_API_KEY_ENV;

#[cfg(not(feature = "cloud"))]
const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Errors that can occur when loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid config: {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Which backend to talk to, and where.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    Cloud {
        #[serde(default = "default_cloud_url")]
        base_url: String,

        /// Environment variable holding the API key
        #[serde(default = "default_api_key_env")]
        api_key_env: String,

        #[serde(default = "default_api_version")]
        api_version: String,
    },
    Local {
        #[serde(default = "default_local_url")]
        base_url: String,
    },
}

fn default_cloud_url() -> String {
    "https://api.anthropic.com/v1".to_string()
}

fn default_api_key_env() -> String {
    ANTHROPIC_API_KEY_ENV.to_string()
}

fn default_api_version() -> String {
    "2023-06-01".to_string()
}

fn default_local_url() -> String {
    "http://localhost:11434".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::cloud()
    }
}

impl BackendConfig {
    pub fn cloud() -> Self {
        BackendConfig::Cloud {
            base_url: default_cloud_url(),
            api_key_env: default_api_key_env(),
            api_version: default_api_version(),
        }
    }

    pub fn local() -> Self {
        BackendConfig::Local {
            base_url: default_local_url(),
        }
    }

    /// Default settings for a backend type name.
    pub fn for_type(backend_type: &str) -> Option<Self> {
        match backend_type {
            "cloud" => Some(Self::cloud()),
            "local" => Some(Self::local()),
            _ => None,
        }
    }

    /// Registry name of this backend.
    pub fn backend_type(&self) -> &'static str {
        match self {
            BackendConfig::Cloud { .. } => "cloud",
            BackendConfig::Local { .. } => "local",
        }
    }

    pub fn base_url(&self) -> &str {
        match self {
            BackendConfig::Cloud { base_url, .. } | BackendConfig::Local { base_url } => base_url,
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            BackendConfig::Cloud { .. } => DEFAULT_CLOUD_MODEL,
            BackendConfig::Local { .. } => DEFAULT_LOCAL_MODEL,
        }
    }
}

/// Generation parameters; the model defaults per backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationConfig {
    pub model: Option<String>,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        let defaults = InvocationOptions::new("");
        Self {
            model: None,
            max_output_tokens: defaults.max_output_tokens,
            temperature: defaults.temperature,
            top_p: defaults.top_p,
        }
    }
}

/// Complete configuration for one scoring run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub backend: BackendConfig,
    pub invocation: InvocationConfig,

    /// Topics to score, in prompt order
    pub topics: TopicSet,

    /// Characters of each document sent to the backend
    pub truncate_chars: usize,

    pub retry: RetryConfig,

    /// Documents scored in parallel
    pub concurrency: usize,

    /// Abort the run once this many documents fail authentication
    pub abort_after_auth_failures: Option<u32>,

    /// JSON Lines destination; stdout when absent
    pub output: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            invocation: InvocationConfig::default(),
            topics: TopicSet::all(),
            truncate_chars: DEFAULT_MAX_CHARS,
            retry: RetryConfig::default(),
            concurrency: 1,
            abort_after_auth_failures: None,
            output: None,
        }
    }
}

impl RunConfig {
    /// Parse and validate a YAML config.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a YAML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Check value ranges. Call again after applying overrides.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if !(self.retry.backoff_multiplier >= 1.0) {
            return Err(ConfigError::invalid(
                "retry.backoff_multiplier",
                format!("must be >= 1.0, got {}", self.retry.backoff_multiplier),
            ));
        }
        if self.retry.base_backoff > self.retry.max_backoff {
            return Err(ConfigError::invalid(
                "retry.base_backoff",
                format!(
                    "must not exceed retry.max_backoff ({:?} > {:?})",
                    self.retry.base_backoff, self.retry.max_backoff
                ),
            ));
        }
        if self.retry.request_timeout.is_zero() {
            return Err(ConfigError::invalid("retry.request_timeout", "must be non-zero"));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::invalid("concurrency", "must be at least 1"));
        }
        if self.truncate_chars == 0 {
            return Err(ConfigError::invalid("truncate_chars", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.invocation.temperature) {
            return Err(ConfigError::invalid(
                "invocation.temperature",
                format!("must be within [0, 1], got {}", self.invocation.temperature),
            ));
        }
        if !(self.invocation.top_p > 0.0 && self.invocation.top_p <= 1.0) {
            return Err(ConfigError::invalid(
                "invocation.top_p",
                format!("must be within (0, 1], got {}", self.invocation.top_p),
            ));
        }
        if self.invocation.max_output_tokens == 0 {
            return Err(ConfigError::invalid("invocation.max_output_tokens", "must be at least 1"));
        }
        if matches!(&self.invocation.model, Some(m) if m.trim().is_empty()) {
            return Err(ConfigError::invalid("invocation.model", "must not be empty"));
        }
        if self.abort_after_auth_failures == Some(0) {
            return Err(ConfigError::invalid(
                "abort_after_auth_failures",
                "must be at least 1 when set",
            ));
        }
        let url = self.backend.base_url();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::invalid(
                "backend.base_url",
                "must start with http:// or https://",
            ));
        }
        Ok(())
    }

    /// Resolved per-call parameters.
    pub fn invocation_options(&self) -> InvocationOptions {
        let model = self
            .invocation
            .model
            .clone()
            .unwrap_or_else(|| self.backend.default_model().to_string());
        InvocationOptions {
            model,
            max_output_tokens: self.invocation.max_output_tokens,
            temperature: self.invocation.temperature,
            top_p: self.invocation.top_p,
        }
    }

    /// JSON handed to the backend factory.
    pub fn backend_json(&self) -> JsonValue {
        let timeout_ms = u64::try_from(self.retry.request_timeout.as_millis()).unwrap_or(u64::MAX);
        match &self.backend {
            BackendConfig::Cloud {
                base_url,
                api_key_env,
                api_version,
            } => serde_json::json!({
                "base_url": base_url,
                "api_key_env": api_key_env,
                "api_version": api_version,
                "timeout_ms": timeout_ms,
            }),
            BackendConfig::Local { base_url } => serde_json::json!({
                "base_url": base_url,
                "timeout_ms": timeout_ms,
            }),
        }
    }
}

/// Serde adapter for human-readable durations (`"30s"`, `"2m"`, `"500ms"`).
pub(crate) mod duration_human {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(de::Error::custom)
    }
}
