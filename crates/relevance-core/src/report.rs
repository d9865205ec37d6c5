//! Progress reporting.
//!
//! Purely observational: sinks receive one event per document transition
//! and cannot influence the run.

use std::time::Duration;

use crate::types::ErrorKind;

/// A document-level transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The first attempt for a document is about to be made.
    Started { document_id: String },

    /// A failed attempt will be retried after `delay`.
    Retrying {
        document_id: String,
        attempt: u32,
        reason: String,
        delay: Duration,
    },

    Succeeded { document_id: String, attempts: u32 },

    Failed {
        document_id: String,
        kind: ErrorKind,
        attempts: u32,
    },
}

impl ProgressEvent {
    pub fn document_id(&self) -> &str {
        match self {
            ProgressEvent::Started { document_id }
            | ProgressEvent::Retrying { document_id, .. }
            | ProgressEvent::Succeeded { document_id, .. }
            | ProgressEvent::Failed { document_id, .. } => document_id,
        }
    }
}

/// Receives progress events. Must be safe to share across workers.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Renders events as `tracing` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn emit(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { document_id } => {
                tracing::info!(document_id = %document_id, "Scoring document");
            }
            ProgressEvent::Retrying {
                document_id,
                attempt,
                reason,
                delay,
            } => {
                tracing::warn!(
                    document_id = %document_id,
                    attempt,
                    delay = ?delay,
                    reason = %reason,
                    "Attempt failed, retrying"
                );
            }
            ProgressEvent::Succeeded {
                document_id,
                attempts,
            } => {
                tracing::info!(document_id = %document_id, attempts, "Document scored");
            }
            ProgressEvent::Failed {
                document_id,
                kind,
                attempts,
            } => {
                tracing::error!(document_id = %document_id, kind = %kind, attempts, "Document failed");
            }
        }
    }
}

impl<T: ProgressSink + ?Sized> ProgressSink for std::sync::Arc<T> {
    fn emit(&self, event: ProgressEvent) {
        (**self).emit(event)
    }
}

impl<T: ProgressSink + ?Sized> ProgressSink for &T {
    fn emit(&self, event: ProgressEvent) {
        (**self).emit(event)
    }
}

/// Collects events in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: parking_lot::Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// Events for one document, in emission order.
    pub fn events_for(&self, document_id: &str) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.document_id() == document_id)
            .cloned()
            .collect()
    }
}

impl ProgressSink for RecordingProgress {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}
