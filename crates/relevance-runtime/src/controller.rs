//! Retry/rate controller.
//!
//! Turns "score this document" into zero or more backend calls. Every call
//! is paced, backend failures are retried per [`RetryState`], and whatever
//! happens the caller gets exactly one [`Outcome`] back.

use std::sync::Arc;
use std::time::Duration;

use relevance_core::{
    Document, ErrorKind, Outcome, ProgressEvent, ProgressSink, PromptBuilder, ResponseValidator,
};

use crate::cancel::CancellationSignal;
use crate::providers::{InvocationOptions, LlmBackend};
use crate::resilience::{Pacer, RetryConfig, RetryDecision, RetryState, UsageTotals};

/// Message recorded when a document is abandoned without a cancel reason.
pub const CANCELLED_MESSAGE: &str = "run cancelled before this document finished";

/// Scores single documents against one backend.
///
/// Cheap to share: every worker in a run holds the same controller, and
/// therefore the same pacer.
pub struct RetryController {
    backend: Arc<dyn LlmBackend>,
    options: InvocationOptions,
    prompts: PromptBuilder,
    validator: ResponseValidator,
    retry: RetryConfig,
    pacer: Pacer,
    usage: Arc<UsageTotals>,
}

impl std::fmt::Debug for RetryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryController")
            .field("backend", &self.backend.name())
            .field("model", &self.options.model)
            .field("retry", &self.retry)
            .finish()
    }
}

impl RetryController {
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        options: InvocationOptions,
        prompts: PromptBuilder,
        retry: RetryConfig,
    ) -> Self {
        let validator = ResponseValidator::new(prompts.topics().clone());
        let pacer = Pacer::new(retry.inter_call_delay);
        Self {
            backend,
            options,
            prompts,
            validator,
            retry,
            pacer,
            usage: Arc::new(UsageTotals::new()),
        }
    }

    /// Share usage totals with the caller.
    pub fn with_usage(mut self, usage: Arc<UsageTotals>) -> Self {
        self.usage = usage;
        self
    }

    pub fn usage(&self) -> &Arc<UsageTotals> {
        &self.usage
    }

    /// Score one document. Never returns an error.
    pub async fn score_document(
        &self,
        document: &Document,
        progress: &dyn ProgressSink,
        cancel: &CancellationSignal,
    ) -> Outcome {
        let id = document.id.as_str();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut schedule = self.retry.backoff_schedule();
        let mut state = RetryState::new();
        let mut strict = false;

        progress.emit(ProgressEvent::Started {
            document_id: id.to_string(),
        });

        let mut attempt = 0;
        loop {
            attempt += 1;

            if self.pacer.wait(cancel).await.is_err() {
                return self.cancelled(id, attempt - 1, cancel, progress);
            }

            let prompt = if strict {
                self.prompts.build_strict(document)
            } else {
                self.prompts.build(document)
            };

            tracing::debug!(
                document_id = id,
                attempt,
                backend = self.backend.name(),
                strict,
                "Invoking backend"
            );

            let (kind, reason, delay) = match self.backend.invoke(&prompt, &self.options).await {
                Ok(output) => {
                    self.usage.record_call(output.usage);
                    match self.validator.validate(&output.raw_text, id, output.usage) {
                        Outcome::Success(record) => {
                            progress.emit(ProgressEvent::Succeeded {
                                document_id: id.to_string(),
                                attempts: attempt,
                            });
                            return Outcome::Success(record);
                        }
                        Outcome::Failure(failure) => {
                            if !self.retry.retry_on_invalid_response || attempt >= max_attempts {
                                return self.finish(Outcome::Failure(failure), attempt, progress);
                            }
                            strict = true;
                            (ErrorKind::Malformed, failure.message, Duration::ZERO)
                        }
                    }
                }
                Err(err) => {
                    self.usage.record_failed_call();
                    let kind = match state.on_backend_error(err.kind) {
                        RetryDecision::Retry(kind) if attempt < max_attempts => kind,
                        RetryDecision::Retry(kind) | RetryDecision::GiveUp(kind) => {
                            return self.finish(
                                Outcome::failure(id, kind, err.detail),
                                attempt,
                                progress,
                            );
                        }
                    };
                    let delay = schedule.next().unwrap_or(self.retry.max_backoff);
                    (kind, err.to_string(), delay)
                }
            };

            tracing::debug!(document_id = id, attempt, kind = %kind, "Attempt failed");
            progress.emit(ProgressEvent::Retrying {
                document_id: id.to_string(),
                attempt,
                reason,
                delay,
            });

            if cancel.sleep(delay).await.is_err() {
                return self.cancelled(id, attempt, cancel, progress);
            }
        }
    }

    fn finish(&self, outcome: Outcome, attempts: u32, progress: &dyn ProgressSink) -> Outcome {
        if let Outcome::Failure(failure) = &outcome {
            progress.emit(ProgressEvent::Failed {
                document_id: failure.document_id.clone(),
                kind: failure.kind,
                attempts,
            });
        }
        outcome
    }

    fn cancelled(
        &self,
        id: &str,
        attempts: u32,
        cancel: &CancellationSignal,
        progress: &dyn ProgressSink,
    ) -> Outcome {
        let message = cancel
            .reason()
            .unwrap_or_else(|| CANCELLED_MESSAGE.to_string());
        self.finish(
            Outcome::failure(id, ErrorKind::Cancelled, message),
            attempts,
            progress,
        )
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted backends for controller and pipeline tests.

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use relevance_core::{ErrorKind, Prompt, Usage};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use crate::providers::{BackendError, BackendOutput, InvocationOptions, LlmBackend};

    pub const VALID: &str = r#"{"Coach Carter":90,"Oscars Slap":0,"Trump-Ukraine Meeting":0}"#;

    pub type Reply = Result<String, ErrorKind>;

    /// Replays a fixed script of replies, repeating the last one.
    pub struct ScriptedBackend {
        script: Mutex<VecDeque<Reply>>,
        last: Mutex<Option<Reply>>,
        calls: AtomicU32,
        prompts: Mutex<Vec<Prompt>>,
    }

    impl ScriptedBackend {
        pub fn new(script: Vec<Reply>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                calls: AtomicU32::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn always(reply: Reply) -> Self {
            Self::new(vec![reply])
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn prompts(&self) -> Vec<Prompt> {
            self.prompts.lock().clone()
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        async fn invoke(
            &self,
            prompt: &Prompt,
            _options: &InvocationOptions,
        ) -> Result<BackendOutput, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().push(prompt.clone());
            let reply = {
                let mut script = self.script.lock();
                let mut last = self.last.lock();
                match script.pop_front() {
                    Some(reply) => {
                        *last = Some(reply.clone());
                        reply
                    }
                    None => last.clone().unwrap_or(Err(ErrorKind::Unknown)),
                }
            };
            match reply {
                Ok(raw_text) => Ok(BackendOutput {
                    raw_text,
                    usage: Some(Usage {
                        input_tokens: 10,
                        output_tokens: 2,
                    }),
                }),
                Err(kind) => Err(BackendError::new(kind, format!("scripted {}", kind))),
            }
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// Answers based on the document text, after a per-document delay.
    ///
    /// Text `"auth"` fails with `Auth`; text `"sleep:N"` waits N ms then
    /// answers validly; anything else answers validly at once.
    pub struct ByTextBackend {
        pub calls: AtomicU32,
    }

    impl ByTextBackend {
        pub fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for ByTextBackend {
        async fn invoke(
            &self,
            prompt: &Prompt,
            _options: &InvocationOptions,
        ) -> Result<BackendOutput, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let content = &prompt.user_content;
            if content.contains("\nauth\n") {
                return Err(BackendError::new(ErrorKind::Auth, "HTTP 401: invalid x-api-key"));
            }
            if let Some(start) = content.find("\nsleep:") {
                let rest = &content[start + 7..];
                let end = rest.find('\n').unwrap_or(rest.len());
                let ms: u64 = rest[..end].parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            Ok(BackendOutput {
                raw_text: VALID.to_string(),
                usage: None,
            })
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "by-text"
        }
    }
}
