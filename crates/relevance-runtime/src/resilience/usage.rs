//! Token usage accounting across a run.

use relevance_core::Usage;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals, safe to update from concurrent workers.
#[derive(Debug, Default)]
pub struct UsageTotals {
    calls: AtomicU64,
    failed_calls: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

/// Point-in-time copy of [`UsageTotals`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    /// Backend calls issued, successful or not
    pub calls: u64,
    /// Calls that returned a backend error
    pub failed_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl UsageSnapshot {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

impl UsageTotals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call that returned text.
    pub fn record_call(&self, usage: Option<Usage>) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(usage) = usage {
            self.input_tokens
                .fetch_add(u64::from(usage.input_tokens), Ordering::Relaxed);
            self.output_tokens
                .fetch_add(u64::from(usage.output_tokens), Ordering::Relaxed);
        }
    }

    /// Record a call that returned a backend error.
    pub fn record_failed_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_accumulate() {
        let totals = UsageTotals::new();
        totals.record_call(Some(Usage {
            input_tokens: 100,
            output_tokens: 10,
        }));
        totals.record_call(None);
        totals.record_failed_call();

        let snap = totals.snapshot();
        assert_eq!(snap.calls, 3);
        assert_eq!(snap.failed_calls, 1);
        assert_eq!(snap.input_tokens, 100);
        assert_eq!(snap.total_tokens(), 110);
    }

    #[test]
    fn test_absurd_backend_counts_do_not_overflow() {
        let totals = UsageTotals::new();
        totals.record_call(Some(Usage {
            input_tokens: u32::MAX,
            output_tokens: u32::MAX,
        }));
        let snap = totals.snapshot();
        assert_eq!(snap.total_tokens(), 2 * u64::from(u32::MAX));

        let saturated = UsageSnapshot {
            calls: 1,
            failed_calls: 0,
            input_tokens: u64::MAX,
            output_tokens: 1,
        };
        assert_eq!(saturated.total_tokens(), u64::MAX);
    }
}
