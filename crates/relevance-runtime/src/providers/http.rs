//! HTTP plumbing shared by the reqwest-backed adapters.

use relevance_core::ErrorKind;
use std::time::Duration;

use super::{BackendError, SetupError};

/// Longest slice of an error body kept in a failure message.
const MAX_DETAIL_CHARS: usize = 300;

pub(super) fn build_client(timeout: Duration) -> Result<reqwest::Client, SetupError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SetupError::Client(e.to_string()))
}

/// Classify a transport-level failure (no HTTP status available).
pub(super) fn transport_error(e: reqwest::Error, timeout: Duration) -> BackendError {
    if e.is_timeout() {
        BackendError::new(ErrorKind::Timeout, format!("no response within {:?}", timeout))
    } else if e.is_connect() {
        BackendError::new(ErrorKind::Transient, format!("connection failed: {}", e))
    } else if e.is_decode() {
        BackendError::new(ErrorKind::Malformed, format!("undecodable response body: {}", e))
    } else if e.is_request() || e.is_body() {
        BackendError::new(ErrorKind::Transient, format!("request failed: {}", e))
    } else {
        BackendError::new(ErrorKind::Unknown, e.to_string())
    }
}

/// Build the detail string for a non-success status.
pub(super) fn status_detail(status: u16, message: Option<&str>, body: &str) -> String {
    let text = message.unwrap_or(body).trim();
    if text.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!(
            "HTTP {}: {}",
            status,
            relevance_core::prompt::truncate_chars(text, MAX_DETAIL_CHARS)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_detail_prefers_message() {
        assert_eq!(status_detail(429, Some("slow down"), "{...}"), "HTTP 429: slow down");
        assert_eq!(status_detail(500, None, "  "), "HTTP 500");
        let long = "x".repeat(1000);
        assert_eq!(status_detail(500, None, &long).len(), "HTTP 500: ".len() + 300);
    }
}
