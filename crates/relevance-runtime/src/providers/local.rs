//! Locally hosted model server (Ollama chat API).

use async_trait::async_trait;
use relevance_core::{ErrorKind, Prompt, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

use super::{
    factory::{timeout_from_config, BackendFactory},
    http::{build_client, status_detail, transport_error},
    BackendError, BackendOutput, InvocationOptions, LlmBackend, SetupError, DEFAULT_LOCAL_MODEL,
};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Local model server backend.
#[derive(Debug)]
pub struct LocalBackend {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl LocalBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SetupError> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            client: build_client(timeout)?,
        })
    }

    pub fn from_config(config: &JsonValue) -> Result<Self, SetupError> {
        let base_url = config["base_url"].as_str().unwrap_or(DEFAULT_BASE_URL);
        Self::new(base_url, timeout_from_config(config, DEFAULT_TIMEOUT))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ServerErrorBody {
    error: String,
}

/// Map a non-success status to an error kind.
///
/// 404 means the model has not been pulled, which no retry will fix.
pub(crate) fn classify_status(status: u16) -> ErrorKind {
    match status {
        400 => ErrorKind::Malformed,
        429 => ErrorKind::RateLimited,
        500..=599 => ErrorKind::Transient,
        _ => ErrorKind::Unknown,
    }
}

#[async_trait]
impl LlmBackend for LocalBackend {
    async fn invoke(
        &self,
        prompt: &Prompt,
        options: &InvocationOptions,
    ) -> Result<BackendOutput, BackendError> {
        let request = ChatRequest {
            model: &options.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system_instruction,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user_content,
                },
            ],
            stream: false,
            options: ChatOptions {
                temperature: options.temperature,
                top_p: options.top_p,
                num_predict: options.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ServerErrorBody>(&body)
                .ok()
                .map(|b| b.error);
            return Err(BackendError::new(
                classify_status(status.as_u16()),
                status_detail(status.as_u16(), message.as_deref(), &body),
            ));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let usage = match (body.prompt_eval_count, body.eval_count) {
            (Some(input_tokens), Some(output_tokens)) => Some(Usage {
                input_tokens,
                output_tokens,
            }),
            _ => None,
        };

        Ok(BackendOutput {
            raw_text: body.message.content,
            usage,
        })
    }

    async fn health_check(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, base_url = %self.base_url, "Local backend unreachable");
                false
            }
        }
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// Factory for local backends.
///
/// ## Configuration Format
/// ```json
/// {
///   "base_url": "http://localhost:11434", // Optional
///   "timeout_ms": 120000                  // Optional
/// }
/// ```
pub struct LocalBackendFactory;

impl BackendFactory for LocalBackendFactory {
    fn backend_type(&self) -> &'static str {
        "local"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmBackend>, SetupError> {
        Ok(Arc::new(LocalBackend::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), SetupError> {
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
            "model": DEFAULT_LOCAL_MODEL,
        })
    }

    fn description(&self) -> &'static str {
        "Locally hosted model server over the Ollama chat API"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn prompt() -> Prompt {
        Prompt {
            system_instruction: "judge".to_string(),
            user_content: "text".to_string(),
        }
    }

    #[tokio::test]
    async fn test_invoke_uses_chat_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({
                "model": "mistral",
                "stream": false,
                "options": {"num_predict": 4096}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "mistral",
                "message": {"role": "assistant", "content": "{\"Oscars Slap\": 80}"},
                "done": true,
                "prompt_eval_count": 300,
                "eval_count": 12
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = LocalBackend::new(server.uri(), Duration::from_secs(5)).unwrap();
        let output = backend
            .invoke(&prompt(), &InvocationOptions::new("mistral"))
            .await
            .unwrap();

        assert_eq!(output.raw_text, "{\"Oscars Slap\": 80}");
        assert_eq!(
            output.usage,
            Some(Usage {
                input_tokens: 300,
                output_tokens: 12
            })
        );
    }

    #[tokio::test]
    async fn test_missing_counts_leave_usage_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"role": "assistant", "content": "{}"}
            })))
            .mount(&server)
            .await;

        let backend = LocalBackend::new(server.uri(), Duration::from_secs(5)).unwrap();
        let output = backend
            .invoke(&prompt(), &InvocationOptions::new("mistral"))
            .await
            .unwrap();
        assert_eq!(output.usage, None);
    }

    #[tokio::test]
    async fn test_model_not_found_is_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": "model 'llama9' not found, try pulling it first"
            })))
            .mount(&server)
            .await;

        let backend = LocalBackend::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = backend
            .invoke(&prompt(), &InvocationOptions::new("llama9"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert!(err.detail.contains("not found"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        // Nothing listens on the discard port.
        let backend = LocalBackend::new("http://127.0.0.1:9", Duration::from_secs(5)).unwrap();
        let err = backend
            .invoke(&prompt(), &InvocationOptions::new("mistral"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_health_check_hits_tags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"models": []})))
            .mount(&server)
            .await;

        let backend = LocalBackend::new(format!("{}/", server.uri()), Duration::from_secs(5)).unwrap();
        assert!(backend.health_check().await);
    }

    #[test]
    fn test_classify_status_table() {
        assert_eq!(classify_status(400), ErrorKind::Malformed);
        assert_eq!(classify_status(404), ErrorKind::Unknown);
        assert_eq!(classify_status(429), ErrorKind::RateLimited);
        assert_eq!(classify_status(500), ErrorKind::Transient);
        assert_eq!(classify_status(503), ErrorKind::Transient);
    }

    #[test]
    fn test_factory_defaults() {
        let config = LocalBackendFactory.default_config();
        assert_eq!(config["model"], "mistral");
        assert!(LocalBackendFactory.validate_config(&config).is_ok());
        assert!(LocalBackendFactory
            .validate_config(&serde_json::json!({"base_url": "localhost"}))
            .is_err());
    }
}
