//! Managed cloud backend speaking the Anthropic Messages API.
//!
//! ## Security
//!
//! The API key lives in an [`ApiKey`] and is exposed only while the
//! request headers are built.

use async_trait::async_trait;
use relevance_core::{ErrorKind, Prompt, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

use super::{
    factory::{timeout_from_config, BackendFactory},
    http::{build_client, status_detail, transport_error},
    secrets::ApiKey,
    BackendError, BackendOutput, InvocationOptions, LlmBackend, SetupError, DEFAULT_CLOUD_MODEL,
};

/// Environment variable read for the API key by default.
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_API_VERSION: &str = "2023-06-01";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Cloud inference backend.
pub struct CloudBackend {
    api_key: ApiKey,
    base_url: String,
    api_version: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for CloudBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudBackend")
            .field("api_key", &self.api_key)
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CloudBackend {
    /// Create a backend with an explicit key and default endpoint.
    pub fn new(api_key: impl Into<String>) -> Result<Self, SetupError> {
        Self::with_key(ApiKey::explicit(api_key), DEFAULT_TIMEOUT)
    }

    fn with_key(api_key: ApiKey, timeout: Duration) -> Result<Self, SetupError> {
        Ok(Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout,
            client: build_client(timeout)?,
        })
    }

    /// Create from JSON configuration.
    ///
    /// The key comes from `api_key`, else from the environment variable
    /// named by `api_key_env` (default `ANTHROPIC_API_KEY`).
    pub fn from_config(config: &JsonValue) -> Result<Self, SetupError> {
        let api_key = ApiKey::resolve(config, ANTHROPIC_API_KEY_ENV)?;
        let timeout = timeout_from_config(config, DEFAULT_TIMEOUT);
        let mut backend = Self::with_key(api_key, timeout)?;
        if let Some(url) = config["base_url"].as_str() {
            backend.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(version) = config["api_version"].as_str() {
            backend.api_version = version.to_string();
        }
        Ok(backend)
    }

    /// Set custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [UserMessage<'a>; 1],
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Map a non-success status to an error kind.
pub(crate) fn classify_status(status: u16) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::Auth,
        429 | 529 => ErrorKind::RateLimited,
        408 | 504 => ErrorKind::Timeout,
        400 | 404 | 413 | 422 => ErrorKind::Malformed,
        500 | 502 | 503 => ErrorKind::Transient,
        _ => ErrorKind::Unknown,
    }
}

#[async_trait]
impl LlmBackend for CloudBackend {
    async fn invoke(
        &self,
        prompt: &Prompt,
        options: &InvocationOptions,
    ) -> Result<BackendOutput, BackendError> {
        let request = MessagesRequest {
            model: &options.model,
            max_tokens: options.max_output_tokens,
            system: &prompt.system_instruction,
            messages: [UserMessage {
                role: "user",
                content: &prompt.user_content,
            }],
            temperature: options.temperature,
            top_p: options.top_p,
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.api_key.expose())
            .header("anthropic-version", &self.api_version)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .ok()
                .map(|b| b.error.message);
            return Err(BackendError::new(
                classify_status(status.as_u16()),
                status_detail(status.as_u16(), message.as_deref(), &body),
            ));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let raw_text = body
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(BackendOutput {
            raw_text,
            usage: body.usage.map(|u| Usage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
        })
    }

    async fn health_check(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn name(&self) -> &str {
        "cloud"
    }
}

/// Factory for cloud backends.
///
/// ## Configuration Format
/// ```json
/// {
///   "api_key": "sk-ant-...",           // Optional, falls back to api_key_env
///   "api_key_env": "ANTHROPIC_API_KEY", // Optional
///   "base_url": "https://...",          // Optional
///   "api_version": "2023-06-01",        // Optional
///   "timeout_ms": 120000                // Optional
/// }
/// ```
pub struct CloudBackendFactory;

impl BackendFactory for CloudBackendFactory {
    fn backend_type(&self) -> &'static str {
        "cloud"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmBackend>, SetupError> {
        Ok(Arc::new(CloudBackend::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), SetupError> {
        ApiKey::resolve(config, ANTHROPIC_API_KEY_ENV)?;

        if let Some(url) = config["base_url"].as_str() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(SetupError::InvalidConfig(
                    "base_url must start with http:// or https://".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({
            "base_url": DEFAULT_BASE_URL,
            "api_key_env": ANTHROPIC_API_KEY_ENV,
            "api_version": DEFAULT_API_VERSION,
            "model": DEFAULT_CLOUD_MODEL,
        })
    }

    fn description(&self) -> &'static str {
        "Managed cloud inference over the Anthropic Messages API"
    }
}
