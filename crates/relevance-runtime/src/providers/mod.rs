//! Backend adapters.
//!
//! This module defines the trait every LLM backend implements and ships
//! two variants: a managed cloud Messages API and a locally hosted model
//! server. Both classify their failures into the same [`ErrorKind`]s so
//! the retry controller never needs to know which one it is talking to.
//!
//! ## Security
//!
//! The cloud variant keeps its API key in an [`ApiKey`], which never
//! appears in `Debug` or `Display` output.

use async_trait::async_trait;
use relevance_core::{ErrorKind, Prompt, Usage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod factory;
pub mod secrets;

#[cfg(any(feature = "cloud", feature = "local"))]
mod http;

#[cfg(feature = "cloud")]
mod cloud;

#[cfg(feature = "local")]
mod local;

pub use factory::{BackendFactory, BackendRegistry};
pub use secrets::{ApiKey, KeySource};

#[cfg(feature = "cloud")]
pub use cloud::{CloudBackend, CloudBackendFactory, ANTHROPIC_API_KEY_ENV};

#[cfg(feature = "local")]
pub use local::{LocalBackend, LocalBackendFactory};

/// A classified failure from a single backend call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {detail}")]
pub struct BackendError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl BackendError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Errors building a backend from configuration.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Backend not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid backend config: {0}")]
    InvalidConfig(String),

    #[error("Unknown backend type: '{name}'. Available: {available:?}")]
    UnknownBackend {
        name: String,
        available: Vec<String>,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Per-call generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationOptions {
    /// Model identifier understood by the backend
    pub model: String,

    /// Upper bound on generated tokens
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

/// Default model for the cloud backend.
pub const DEFAULT_CLOUD_MODEL: &str = "claude-3-5-sonnet-20241022";

/// Default model for the local backend.
pub const DEFAULT_LOCAL_MODEL: &str = "mistral";

fn default_max_output_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.5
}

fn default_top_p() -> f32 {
    0.9
}

impl InvocationOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
        }
    }
}

/// A successful backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOutput {
    /// The model's text, unparsed
    pub raw_text: String,

    /// Token usage, when the backend reports it
    pub usage: Option<Usage>,
}

/// Backend abstraction allows swapping LLM servers.
///
/// Calls are independent: an implementation may share a connection pool
/// but no other mutable state between concurrent invocations.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Send one judging prompt.
    async fn invoke(
        &self,
        prompt: &Prompt,
        options: &InvocationOptions,
    ) -> Result<BackendOutput, BackendError>;

    /// Check if the backend looks usable.
    async fn health_check(&self) -> bool;

    /// Backend name for logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_defaults() {
        let options = InvocationOptions::new("m");
        assert_eq!(options.model, "m");
        assert_eq!(options.max_output_tokens, 4096);
        assert_eq!(options.temperature, 0.5);
        assert_eq!(options.top_p, 0.9);
    }

    #[test]
    fn test_backend_error_display_carries_kind() {
        let err = BackendError::new(ErrorKind::RateLimited, "HTTP 429: slow down");
        assert_eq!(err.to_string(), "rate_limited error: HTTP 429: slow down");
    }
}
