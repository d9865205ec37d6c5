//! API key handling for the cloud backend.
//!
//! The key is held in a [`SecretString`]: `Debug` and `Display` print
//! `[REDACTED]` and the memory is zeroed on drop.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::SetupError;

/// Backend config key holding an inline API key.
pub const API_KEY_FIELD: &str = "api_key";

/// Backend config key naming the environment variable to read instead.
pub const API_KEY_ENV_FIELD: &str = "api_key_env";

/// Where an [`ApiKey`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// Inline `api_key` in backend config
    Config,
    /// The named environment variable
    Env(String),
    /// Passed in by the caller
    Explicit,
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Config => f.write_str("config"),
            KeySource::Env(var) => write!(f, "${}", var),
            KeySource::Explicit => f.write_str("caller"),
        }
    }
}

/// A backend API key. Only [`expose`](Self::expose) reveals the value.
pub struct ApiKey {
    value: SecretString,
    source: KeySource,
}

impl ApiKey {
    pub fn explicit(value: impl Into<String>) -> Self {
        Self::from_source(value.into(), KeySource::Explicit)
    }

    fn from_source(value: String, source: KeySource) -> Self {
        Self {
            value: SecretString::from(value.trim().to_string()),
            source,
        }
    }

    /// Resolve the key for a backend config.
    ///
    /// An inline `api_key` wins. Otherwise the variable named by
    /// `api_key_env` is read, falling back to `default_env`.
    pub fn resolve(config: &JsonValue, default_env: &str) -> Result<Self, SetupError> {
        if let Some(value) = config[API_KEY_FIELD].as_str() {
            return Ok(Self::from_source(value.to_string(), KeySource::Config));
        }

        let var = env_var_name(config, default_env);
        match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => {
                Ok(Self::from_source(value, KeySource::Env(var.to_string())))
            }
            _ => Err(SetupError::NotConfigured(format!(
                "API key required: set '{}' in backend config or the {} environment variable",
                API_KEY_FIELD, var
            ))),
        }
    }

    /// Expose the value at the point of use. Never store the result.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    pub fn source(&self) -> &KeySource {
        &self.source
    }
}

/// The environment variable a config reads its key from.
pub fn env_var_name<'a>(config: &'a JsonValue, default_env: &'a str) -> &'a str {
    config[API_KEY_ENV_FIELD].as_str().unwrap_or(default_env)
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED] (from {})", self.source)
    }
}
