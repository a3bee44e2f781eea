//! Retry policy and the single-endpoint attempt loop.
//!
//! Epistemic foundation:
//! - K_i: Attempts per call ≤ endpoint ceiling, sleep per attempt ≤ max_delay
//! - B_i: A server `retry-after` hint is untrusted input → capped, never panics
//! - I^B: Whether the next attempt succeeds → unknowable, so the loop is bounded

use crate::models::RetryConfig;
use crate::pool::{ModelEndpoint, TransportFailure};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Backoff between attempts on the same endpoint.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay before attempt `n + 1` is `base_delay * n`
    pub base_delay: Duration,
    /// Upper bound on any single wait
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: DEFAULT_MAX_DELAY.max(base_delay),
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// No waiting between attempts.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO).with_max_delay(Duration::ZERO)
    }

    /// Delay after the given failed attempt (1-based).
    ///
    /// A server `retry-after` hint wins when it asks for longer, up to `max_delay`.
    pub fn delay(&self, attempt: u32, failure: &TransportFailure) -> Duration {
        let linear = self.base_delay.saturating_mul(attempt);
        let wanted = match failure.retry_after() {
            Some(hint) if hint > linear => hint,
            _ => linear,
        };
        wanted.min(self.max_delay)
    }

    /// Call one endpoint until it answers, fails for good, or hits its ceiling.
    ///
    /// B_i(endpoint answers within ceiling) → Result
    pub async fn invoke(
        &self,
        endpoint: &dyn ModelEndpoint,
        prompt: &str,
    ) -> Result<String, TransportFailure> {
        let max_attempts = endpoint.max_attempts().max(1);
        let mut attempt = 1;

        loop {
            debug!(endpoint = endpoint.label(), attempt = attempt, "Invoking endpoint");

            let failure = match endpoint.invoke(prompt).await {
                Ok(text) => return Ok(text),
                Err(e) => e,
            };

            if !failure.is_retryable() {
                warn!(
                    endpoint = endpoint.label(),
                    error = %failure,
                    "Non-retryable failure"
                );
                return Err(failure);
            }

            if attempt >= max_attempts {
                warn!(
                    endpoint = endpoint.label(),
                    attempts = attempt,
                    error = %failure,
                    "Attempts exhausted"
                );
                return Err(failure);
            }

            let backoff = self.delay(attempt, &failure);
            debug!(
                endpoint = endpoint.label(),
                attempt = attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %failure,
                "Retrying after transport failure"
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    /// Out-of-range seconds (rejected by `Config::validate`) clamp to the cap.
    fn from(config: &RetryConfig) -> Self {
        let max_delay =
            Duration::try_from_secs_f64(config.max_delay_secs).unwrap_or(DEFAULT_MAX_DELAY);
        let base_delay = Duration::try_from_secs_f64(config.base_delay_secs).unwrap_or(max_delay);
        Self::new(base_delay).with_max_delay(max_delay)
    }
}
