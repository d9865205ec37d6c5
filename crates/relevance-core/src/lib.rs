//! # relevance-core
//!
//! Deterministic building blocks for LLM-judged topic relevance scoring.
//!
//! This crate answers everything about a run that does not involve talking
//! to a model:
//! - What exactly do we ask the judge?
//! - Is the judge's answer usable?
//! - What happened to every document?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic prompts**: same document and topics, byte-identical prompt
//! 2. **Injection containment**: document text never reaches the system instruction
//! 3. **No clamping**: a score outside 0-100 is a failure, not a 100
//! 4. **Full coverage**: a finalized run has exactly one outcome per document
//!
//! ## Example
//!
//! ```rust,ignore
//! use relevance_core::{Document, PromptBuilder, ResponseValidator, TopicSet};
//!
//! let topics = TopicSet::all();
//! let prompt = PromptBuilder::new(topics.clone(), 1500)
//!     .build(&Document::new("a", "I loved Coach Carter's halftime speech."));
//!
//! // ... send `prompt` to a backend ...
//!
//! let outcome = ResponseValidator::new(topics).validate(&raw, "a", usage);
//! ```

pub mod aggregator;
pub mod prompt;
pub mod report;
pub mod source;
pub mod types;
pub mod validator;

pub use aggregator::{AggregatorError, RunAggregator, RunResult, RunSummary};
pub use prompt::{PromptBuilder, DEFAULT_MAX_CHARS};
pub use report::{NoopProgress, ProgressEvent, ProgressSink, RecordingProgress, TracingProgress};
pub use source::{DocumentSource, SourceError, VecSource};
pub use types::{
    Document, ErrorKind, Failure, Outcome, Prompt, ScoreRecord, Scores, Topic, TopicSet,
    TopicSetError, Usage,
};
pub use validator::{ResponseValidator, ValidationError};
