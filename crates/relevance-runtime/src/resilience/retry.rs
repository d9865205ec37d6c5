//! Retry policy: which failures are retried, and how long to back off.

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use relevance_core::ErrorKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::duration_human;

/// Retry and pacing parameters for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Backend calls allowed per document, including the first
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration_human")]
    pub base_backoff: Duration,

    /// Growth factor applied to each further retry
    pub backoff_multiplier: f32,

    /// Cap on a single backoff delay
    #[serde(with = "duration_human")]
    pub max_backoff: Duration,

    /// Minimum spacing between any two backend calls in the run
    #[serde(with = "duration_human")]
    pub inter_call_delay: Duration,

    /// Retry with a stricter prompt when the response fails validation
    pub retry_on_invalid_response: bool,

    /// Per-call HTTP timeout
    #[serde(with = "duration_human")]
    pub request_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(600),
            inter_call_delay: Duration::from_secs(30),
            retry_on_invalid_response: false,
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    /// Delays between consecutive attempts of one document.
    pub fn backoff_schedule(&self) -> ExponentialBackoff {
        ExponentialBuilder::default()
            .with_min_delay(self.base_backoff)
            .with_factor(self.backoff_multiplier)
            .with_max_delay(self.max_backoff)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
            .build()
    }
}

/// What to do after a failed backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back off, then try again; failure kind if no attempts remain
    Retry(ErrorKind),
    /// Surface the failure now with this kind
    GiveUp(ErrorKind),
}

/// Per-document retry bookkeeping.
#[derive(Debug, Default, Clone)]
pub struct RetryState {
    timeouts: u32,
    unknowns: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a backend failure.
    ///
    /// `RateLimited` and `Transient` retry; the first `Timeout` retries and
    /// later ones count as `Transient`; `Unknown` retries once; `Auth` and
    /// `Malformed` never retry.
    pub fn on_backend_error(&mut self, kind: ErrorKind) -> RetryDecision {
        match kind {
            ErrorKind::RateLimited | ErrorKind::Transient => RetryDecision::Retry(kind),
            ErrorKind::Timeout => {
                self.timeouts += 1;
                if self.timeouts == 1 {
                    RetryDecision::Retry(ErrorKind::Timeout)
                } else {
                    RetryDecision::Retry(ErrorKind::Transient)
                }
            }
            ErrorKind::Unknown => {
                self.unknowns += 1;
                if self.unknowns == 1 {
                    RetryDecision::Retry(ErrorKind::Unknown)
                } else {
                    RetryDecision::GiveUp(ErrorKind::Unknown)
                }
            }
            ErrorKind::Auth | ErrorKind::Malformed | ErrorKind::Cancelled => {
                RetryDecision::GiveUp(kind)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule_is_exponential_and_capped() {
        let config = RetryConfig {
            max_attempts: 6,
            base_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(100),
            ..RetryConfig::default()
        };
        let delays: Vec<Duration> = config.backoff_schedule().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(30),
                Duration::from_secs(60),
                Duration::from_secs(100),
                Duration::from_secs(100),
                Duration::from_secs(100),
            ]
        );
    }

    #[test]
    fn test_single_attempt_has_no_backoff() {
        let config = RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        };
        assert_eq!(config.backoff_schedule().next(), None);
    }

    #[test]
    fn test_timeout_retried_once_then_transient() {
        let mut state = RetryState::new();
        assert_eq!(
            state.on_backend_error(ErrorKind::Timeout),
            RetryDecision::Retry(ErrorKind::Timeout)
        );
        assert_eq!(
            state.on_backend_error(ErrorKind::Timeout),
            RetryDecision::Retry(ErrorKind::Transient)
        );
    }

    #[test]
    fn test_unknown_retried_once() {
        let mut state = RetryState::new();
        assert_eq!(
            state.on_backend_error(ErrorKind::Unknown),
            RetryDecision::Retry(ErrorKind::Unknown)
        );
        assert_eq!(
            state.on_backend_error(ErrorKind::Unknown),
            RetryDecision::GiveUp(ErrorKind::Unknown)
        );
    }

    #[test]
    fn test_auth_and_malformed_not_retried() {
        let mut state = RetryState::new();
        assert_eq!(
            state.on_backend_error(ErrorKind::Auth),
            RetryDecision::GiveUp(ErrorKind::Auth)
        );
        assert_eq!(
            state.on_backend_error(ErrorKind::Malformed),
            RetryDecision::GiveUp(ErrorKind::Malformed)
        );
    }

    #[test]
    fn test_config_reads_human_durations() {
        let config: RetryConfig =
            serde_yaml::from_str("max_attempts: 5\nbase_backoff: 2s\ninter_call_delay: 500ms\n")
                .unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_backoff, Duration::from_secs(2));
        assert_eq!(config.inter_call_delay, Duration::from_millis(500));
        assert_eq!(config.max_backoff, Duration::from_secs(600));
    }
}
