//! # relevance-runtime
//!
//! Backend-facing half of the relevance scorer.
//!
//! `relevance-core` decides what to ask and whether an answer is usable.
//! This crate does the asking: it talks to a cloud or local LLM backend,
//! paces and retries calls, and runs a batch of documents with bounded
//! concurrency and cancellation.
//!
//! ## Example
//!
//! ```rust,ignore
//! use relevance_runtime::{BackendRegistry, CancellationSignal, Pipeline, RunConfig};
//! use relevance_core::TracingProgress;
//!
//! let config = RunConfig::from_file("relevance.yaml")?;
//! let pipeline = Pipeline::from_config(&config, &BackendRegistry::with_defaults())?;
//!
//! let report = pipeline
//!     .run(documents, Arc::new(TracingProgress), CancellationSignal::new())
//!     .await?;
//! report.result.write_jsonl(std::io::stdout())?;
//! ```

pub mod cancel;
pub mod config;
pub mod controller;
pub mod pipeline;
pub mod providers;
pub mod resilience;

pub use cancel::{CancellationSignal, Cancelled};
pub use config::{BackendConfig, ConfigError, InvocationConfig, RunConfig};
pub use controller::RetryController;
pub use pipeline::{Pipeline, PipelineBuilder, PipelineError, RunReport};
pub use providers::{
    BackendError, BackendOutput, BackendRegistry, InvocationOptions, LlmBackend, SetupError,
};
pub use resilience::{RetryConfig, UsageSnapshot};
