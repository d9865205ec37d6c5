//! Abort a run that keeps failing authentication.
//!
//! One `Auth` failure is a per-document outcome. Once the configured number
//! of documents have failed with `Auth`, the configuration is assumed to be
//! wrong and the rest of the run is cancelled.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use relevance_core::ErrorKind;

use crate::cancel::CancellationSignal;

#[derive(Debug)]
pub struct AuthEscalation {
    threshold: Option<u32>,
    failures: AtomicU32,
    tripped: AtomicBool,
    cancel: CancellationSignal,
}

impl AuthEscalation {
    /// `threshold` of `None` never escalates.
    pub fn new(threshold: Option<u32>, cancel: CancellationSignal) -> Self {
        Self {
            threshold,
            failures: AtomicU32::new(0),
            tripped: AtomicBool::new(false),
            cancel,
        }
    }

    /// Record a finished document's failure kind.
    ///
    /// Returns true on the call that trips the threshold.
    pub fn record(&self, kind: ErrorKind) -> bool {
        if kind != ErrorKind::Auth {
            return false;
        }
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        let Some(threshold) = self.threshold else {
            return false;
        };
        if failures >= threshold && !self.tripped.swap(true, Ordering::SeqCst) {
            tracing::error!(
                failures,
                threshold,
                "Aborting run after repeated authentication failures"
            );
            self.cancel.cancel_with(abort_message(failures));
            return true;
        }
        false
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Message attached to documents skipped because of the abort.
    ///
    /// Reports the count at the moment the threshold tripped.
    pub fn abort_message(&self) -> String {
        self.cancel
            .reason()
            .unwrap_or_else(|| abort_message(self.failures()))
    }
}

fn abort_message(failures: u32) -> String {
    format!("run aborted after {} authentication failures", failures)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trips_at_threshold_and_cancels() {
        let cancel = CancellationSignal::new();
        let escalation = AuthEscalation::new(Some(2), cancel.clone());

        assert!(!escalation.record(ErrorKind::Auth));
        assert!(!escalation.record(ErrorKind::RateLimited));
        assert!(!cancel.is_cancelled());

        assert!(escalation.record(ErrorKind::Auth));
        assert!(escalation.is_tripped());
        assert!(cancel.is_cancelled());
        assert!(escalation.abort_message().contains("2 authentication failures"));
        assert_eq!(cancel.reason(), Some(escalation.abort_message()));

        // Only the tripping call reports true; the message keeps the tripping count
        assert!(!escalation.record(ErrorKind::Auth));
        assert_eq!(escalation.failures(), 3);
        assert!(escalation.abort_message().contains("2 authentication failures"));
    }

    #[test]
    fn test_no_threshold_never_escalates() {
        let cancel = CancellationSignal::new();
        let escalation = AuthEscalation::new(None, cancel.clone());
        for _ in 0..10 {
            assert!(!escalation.record(ErrorKind::Auth));
        }
        assert_eq!(escalation.failures(), 10);
        assert!(!cancel.is_cancelled());
    }
}
