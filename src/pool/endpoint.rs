//! Model endpoint capability.
//!
//! Epistemic foundation:
//! - K_i: Every forecaster talks to its model through `invoke(prompt) -> text`
//! - B_i: A single call may fail → `Result<String, TransportFailure>`
//! - I^B: Provider reliability is unknowable → the pool retries, then falls back

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// A call to a model endpoint that did not produce text.
///
/// A successful call with empty text is *not* a transport failure.
#[derive(Debug, Clone, Error)]
pub enum TransportFailure {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("rate limited (HTTP {status})")]
    RateLimited {
        status: u16,
        retry_after_secs: Option<f64>,
    },

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportFailure {
    /// Classify an unsuccessful HTTP status.
    ///
    /// 429 and 503 carry the server's `retry-after` hint when present.
    pub fn from_status(status: u16, message: String, retry_after_secs: Option<f64>) -> Self {
        match status {
            429 | 503 => Self::RateLimited {
                status,
                retry_after_secs,
            },
            _ => Self::Status { status, message },
        }
    }

    /// Whether another attempt on the same endpoint may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connection(_) | Self::RateLimited { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 408,
            Self::InvalidResponse(_) => false,
        }
    }

    /// Get retry delay hint, if applicable.
    ///
    /// Negative, NaN and out-of-range hints are dropped.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => Duration::try_from_secs_f64(*secs).ok(),
            _ => None,
        }
    }

    /// Classify a transport error from a client configured with `timeout`.
    ///
    /// reqwest does not report the configured timeout on the error.
    pub fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            Self::Timeout(timeout)
        } else if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Connection(e.to_string())
        }
    }
}

/// Something a forecaster slot can send a prompt to.
///
/// Implementations perform exactly one attempt per `invoke`; the pool owns
/// the retry loop and honours `max_attempts`.
#[async_trait]
pub trait ModelEndpoint: Send + Sync {
    /// Send the prompt and return the model's text.
    async fn invoke(&self, prompt: &str) -> Result<String, TransportFailure>;

    /// Attempt ceiling for one logical call (at least 1).
    fn max_attempts(&self) -> u32;

    /// Label for logs and transcripts (e.g., "openrouter:openai/o4-mini").
    fn label(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let rate = TransportFailure::from_status(429, String::new(), Some(3.0));
        assert!(rate.is_retryable());
        assert_eq!(rate.retry_after(), Some(Duration::from_secs(3)));

        let unavailable = TransportFailure::from_status(503, "down".into(), None);
        assert!(matches!(unavailable, TransportFailure::RateLimited { status: 503, .. }));
        assert_eq!(unavailable.retry_after(), None);

        assert!(TransportFailure::from_status(502, "bad gateway".into(), None).is_retryable());
        assert!(!TransportFailure::from_status(401, "unauthorized".into(), None).is_retryable());
        assert!(!TransportFailure::from_status(404, "no model".into(), None).is_retryable());
    }

    #[test]
    fn test_transport_errors_retryable() {
        assert!(TransportFailure::Timeout(Duration::from_secs(300)).is_retryable());
        assert!(TransportFailure::Connection("reset".into()).is_retryable());
        assert!(!TransportFailure::InvalidResponse("no choices".into()).is_retryable());
    }

    #[test]
    fn test_unusable_retry_after_ignored() {
        for secs in [-1.0, f64::NAN, f64::INFINITY, 1e20] {
            let failure = TransportFailure::from_status(429, String::new(), Some(secs));
            assert_eq!(failure.retry_after(), None, "{secs}");
        }
    }
}
