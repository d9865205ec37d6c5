//! The scoring pipeline.
//!
//! Fans documents out to a bounded set of workers and fans their outcomes
//! back in, in submission order:
//! - Concurrency bounded by a semaphore, default 1
//! - One shared [`RetryController`] per run, so pacing spans all workers
//! - Cancellation stops new documents; in-flight calls finish
//! - Repeated `Auth` failures can abort the run early

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use relevance_core::source::check_documents;
use relevance_core::{
    AggregatorError, Document, ErrorKind, Outcome, ProgressSink, PromptBuilder, RunAggregator,
    RunResult, SourceError,
};

use crate::cancel::CancellationSignal;
use crate::config::{ConfigError, RunConfig};
use crate::controller::RetryController;
use crate::providers::{BackendRegistry, InvocationOptions, LlmBackend, SetupError};
use crate::resilience::{AuthEscalation, RetryConfig, UsageSnapshot, UsageTotals};

/// Errors that stop a run from starting or completing.
///
/// Per-document problems are never reported here; they are outcomes.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Backend not configured: {0}")]
    BackendNotConfigured(String),

    #[error("Backend setup failed: {0}")]
    Backend(#[from] SetupError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid documents: {0}")]
    Source(#[from] SourceError),

    #[error("Aggregation failed: {0}")]
    Aggregator(#[from] AggregatorError),
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunReport {
    /// One outcome per submitted document, in submission order
    pub result: RunResult,

    /// Backend calls and tokens across the run
    pub usage: UsageSnapshot,

    /// Whether the run was cut short by repeated auth failures
    pub aborted: bool,
}

/// Scores a batch of documents against one backend.
pub struct Pipeline {
    backend: Arc<dyn LlmBackend>,
    options: InvocationOptions,
    prompts: PromptBuilder,
    retry: RetryConfig,
    concurrency: usize,
    abort_after_auth_failures: Option<u32>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("backend", &self.backend.name())
            .field("options", &self.options)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl Pipeline {
    /// Create a pipeline from a validated config and a backend.
    pub fn new(backend: Arc<dyn LlmBackend>, config: &RunConfig) -> Self {
        Self {
            backend,
            options: config.invocation_options(),
            prompts: PromptBuilder::new(config.topics.clone(), config.truncate_chars),
            retry: config.retry.clone(),
            concurrency: config.concurrency.max(1),
            abort_after_auth_failures: config.abort_after_auth_failures,
        }
    }

    /// Validate `config` and build its backend from `registry`.
    pub fn from_config(config: &RunConfig, registry: &BackendRegistry) -> Result<Self, PipelineError> {
        PipelineBuilder::new()
            .config(config.clone())
            .registry_backend(registry)?
            .build()
    }

    pub fn backend(&self) -> &Arc<dyn LlmBackend> {
        &self.backend
    }

    pub fn options(&self) -> &InvocationOptions {
        &self.options
    }

    /// Score every document.
    ///
    /// Always yields one outcome per document, even when cancelled.
    pub async fn run(
        &self,
        documents: Vec<Document>,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationSignal,
    ) -> Result<RunReport, PipelineError> {
        check_documents(&documents)?;

        let aggregator = RunAggregator::new(documents.iter().map(|d| d.id.clone()));
        let usage = Arc::new(UsageTotals::new());
        let controller = Arc::new(
            RetryController::new(
                self.backend.clone(),
                self.options.clone(),
                self.prompts.clone(),
                self.retry.clone(),
            )
            .with_usage(usage.clone()),
        );
        let escalation = Arc::new(AuthEscalation::new(
            self.abort_after_auth_failures,
            cancel.clone(),
        ));

        tracing::info!(
            documents = documents.len(),
            backend = self.backend.name(),
            model = %self.options.model,
            concurrency = self.concurrency,
            "Starting scoring run"
        );

        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();
        let mut tasks = HashMap::new();

        for (index, document) in documents.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = sem.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else { break };
            if cancel.is_cancelled() {
                break;
            }

            let document_id = document.id.clone();
            let controller = controller.clone();
            let escalation = escalation.clone();
            let progress = progress.clone();
            let cancel = cancel.clone();
            let handle = join_set.spawn(async move {
                let _permit = permit;
                let outcome = controller
                    .score_document(&document, progress.as_ref(), &cancel)
                    .await;
                if let Some(kind) = outcome.failure_kind() {
                    escalation.record(kind);
                }
                (index, outcome)
            });
            tasks.insert(handle.id(), (index, document_id));
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => aggregator.record_at(index, outcome)?,
                Err(e) => {
                    let Some((index, document_id)) = tasks.remove(&e.id()) else {
                        tracing::error!(error = %e, "Scoring task failed");
                        continue;
                    };
                    tracing::error!(document_id = %document_id, error = %e, "Scoring task failed");
                    let kind = if e.is_cancelled() {
                        ErrorKind::Cancelled
                    } else {
                        ErrorKind::Unknown
                    };
                    let message = format!("scoring task failed: {}", e);
                    aggregator.record_at(index, Outcome::failure(document_id, kind, message))?;
                }
            }
        }

        let result = if escalation.is_tripped() {
            aggregator.finalize_with_reason(&escalation.abort_message())?
        } else {
            aggregator.finalize()?
        };

        let summary = result.summary();
        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Scoring run finished"
        );

        Ok(RunReport {
            result,
            usage: usage.snapshot(),
            aborted: escalation.is_tripped(),
        })
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    backend: Option<Arc<dyn LlmBackend>>,
    config: RunConfig,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            backend: None,
            config: RunConfig::default(),
        }
    }

    /// Set the backend.
    pub fn backend(mut self, backend: Arc<dyn LlmBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the configuration.
    pub fn config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the backend named by the current config from `registry`.
    pub fn registry_backend(mut self, registry: &BackendRegistry) -> Result<Self, PipelineError> {
        let backend_type = self.config.backend.backend_type();
        let json = self.config.backend_json();
        registry.validate(backend_type, &json)?;
        self.backend = Some(registry.create(backend_type, &json)?);
        Ok(self)
    }

    /// Validate the config and build the pipeline.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        self.config.validate()?;
        let backend = self
            .backend
            .ok_or_else(|| PipelineError::BackendNotConfigured("No backend set".to_string()))?;
        Ok(Pipeline::new(backend, &self.config))
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
