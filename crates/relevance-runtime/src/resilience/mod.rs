//! Resilience patterns for relevance-runtime.
//!
//! This module provides:
//! - Retry policy and exponential backoff
//! - Inter-call pacing shared across workers
//! - Run abort on repeated authentication failures
//! - Token usage accounting

mod escalation;
mod pacer;
mod retry;
mod usage;

pub use escalation::AuthEscalation;
pub use pacer::Pacer;
pub use retry::{RetryConfig, RetryDecision, RetryState};
pub use usage::{UsageSnapshot, UsageTotals};
