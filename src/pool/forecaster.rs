//! Forecaster pool: concurrent dispatch with per-slot retry and fallback.
//!
//! Epistemic foundation:
//! - K_i: One RawResponse per slot, in slot order, every dispatch
//! - K_i: Every retry loop has a fixed attempt ceiling → dispatch terminates
//! - B_i: Each call may fail → retried, then handed to the fallback
//! - I^B: Provider tail latency/failures → masked here, never propagated

use crate::models::{AugurError, RawResponse, RequestFailed, Result};
use crate::pool::{ModelEndpoint, RetryPolicy};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// One logical ensemble member.
#[derive(Clone)]
pub struct ForecasterSlot {
    /// Slot id, 1-based
    pub id: u32,
    pub label: String,
    pub primary: Arc<dyn ModelEndpoint>,
    /// Tried once the primary has exhausted its attempts
    pub fallback: Option<Arc<dyn ModelEndpoint>>,
}

impl ForecasterSlot {
    pub fn new(id: u32, label: impl Into<String>, primary: Arc<dyn ModelEndpoint>) -> Self {
        Self {
            id,
            label: label.into(),
            primary,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn ModelEndpoint>) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

impl std::fmt::Debug for ForecasterSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForecasterSlot")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("primary", &self.primary.label())
            .field("fallback", &self.fallback.as_ref().map(|f| f.label()))
            .finish()
    }
}

/// Fixed, ordered set of forecaster slots.
#[derive(Debug)]
pub struct ForecasterPool {
    slots: Vec<ForecasterSlot>,
    retry: RetryPolicy,
}

impl ForecasterPool {
    /// Create a pool. Slots are ordered by id; ids must be unique.
    pub fn new(mut slots: Vec<ForecasterSlot>, retry: RetryPolicy) -> Result<Self> {
        if slots.is_empty() {
            return Err(AugurError::Internal(
                "forecaster pool needs at least one slot".to_string(),
            ));
        }

        slots.sort_by_key(|s| s.id);
        if let Some(pair) = slots.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(AugurError::Internal(format!(
                "duplicate forecaster slot id {}",
                pair[0].id
            )));
        }

        Ok(Self { slots, retry })
    }

    pub fn slots(&self) -> &[ForecasterSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Send the prompt to every slot concurrently and wait for all of them.
    ///
    /// Returns one response per slot in slot-id order, whatever the
    /// completion order. Never fails: exhausted slots carry `error`.
    pub async fn dispatch_all(&self, prompt: &str) -> Vec<RawResponse> {
        let start = Instant::now();
        let calls = self.slots.iter().map(|slot| self.call_slot(slot, prompt));
        let responses = join_all(calls).await;

        let failed = responses.iter().filter(|r| !r.is_success()).count();
        info!(
            slots = responses.len(),
            failed = failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Dispatch complete"
        );

        responses
    }

    /// Run the primary → fallback protocol for one slot.
    async fn call_slot(&self, slot: &ForecasterSlot, prompt: &str) -> RawResponse {
        let primary_error = match self.retry.invoke(slot.primary.as_ref(), prompt).await {
            Ok(text) => {
                return RawResponse::success(slot.id, &slot.label, slot.primary.label(), text);
            }
            Err(e) => e,
        };

        let Some(fallback) = &slot.fallback else {
            warn!(slot = slot.id, error = %primary_error, "Forecaster failed, no fallback configured");
            return RawResponse::failed(
                slot.id,
                &slot.label,
                RequestFailed {
                    primary: primary_error.to_string(),
                    fallback: None,
                },
            );
        };

        info!(
            slot = slot.id,
            primary = slot.primary.label(),
            fallback = fallback.label(),
            "Primary exhausted, falling back"
        );

        match self.retry.invoke(fallback.as_ref(), prompt).await {
            Ok(text) => RawResponse::success(slot.id, &slot.label, fallback.label(), text),
            Err(fallback_error) => {
                warn!(
                    slot = slot.id,
                    primary_error = %primary_error,
                    fallback_error = %fallback_error,
                    "Forecaster failed on primary and fallback"
                );
                RawResponse::failed(
                    slot.id,
                    &slot.label,
                    RequestFailed {
                        primary: primary_error.to_string(),
                        fallback: Some(fallback_error.to_string()),
                    },
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::TransportFailure;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Endpoint that replays a script of outcomes, then repeats the last one.
    struct Scripted {
        label: String,
        max_attempts: u32,
        delay: Duration,
        script: Mutex<VecDeque<std::result::Result<String, TransportFailure>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(
            label: &str,
            max_attempts: u32,
            script: Vec<std::result::Result<String, TransportFailure>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                label: label.to_string(),
                max_attempts,
                delay: Duration::ZERO,
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn delayed(label: &str, delay: Duration, text: &str) -> Arc<Self> {
            Arc::new(Self {
                label: label.to_string(),
                max_attempts: 1,
                delay,
                script: Mutex::new(vec![Ok(text.to_string())].into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelEndpoint for Scripted {
        async fn invoke(&self, _prompt: &str) -> std::result::Result<String, TransportFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }

        fn max_attempts(&self) -> u32 {
            self.max_attempts
        }

        fn label(&self) -> &str {
            &self.label
        }
    }

    fn timeout() -> TransportFailure {
        TransportFailure::Timeout(Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let endpoint = Scripted::new("a", 3, vec![Ok("Probability: 40%".into())]);
        let pool = ForecasterPool::new(
            vec![ForecasterSlot::new(1, "one", endpoint.clone())],
            RetryPolicy::immediate(),
        )
        .unwrap();

        let responses = pool.dispatch_all("prompt").await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].text, "Probability: 40%");
        assert_eq!(responses[0].served_by.as_deref(), Some("a"));
        assert_eq!(endpoint.calls(), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let endpoint = Scripted::new(
            "flaky",
            3,
            vec![Err(timeout()), Err(timeout()), Ok("done".into())],
        );
        let pool = ForecasterPool::new(
            vec![ForecasterSlot::new(1, "one", endpoint.clone())],
            RetryPolicy::immediate(),
        )
        .unwrap();

        let responses = pool.dispatch_all("prompt").await;
        assert!(responses[0].is_success());
        assert_eq!(responses[0].text, "done");
        assert_eq!(endpoint.calls(), 3);
    }

    #[tokio::test]
    async fn test_attempt_ceiling_respected() {
        let endpoint = Scripted::new("down", 3, vec![Err(timeout())]);
        let pool = ForecasterPool::new(
            vec![ForecasterSlot::new(1, "one", endpoint.clone())],
            RetryPolicy::immediate(),
        )
        .unwrap();

        let responses = pool.dispatch_all("prompt").await;
        assert_eq!(endpoint.calls(), 3);
        assert!(!responses[0].is_success());
        assert_eq!(responses[0].text, "");
        let error = responses[0].error.as_ref().unwrap();
        assert!(error.primary.contains("timed out"));
        assert_eq!(error.fallback, None);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let endpoint = Scripted::new(
            "auth",
            7,
            vec![Err(TransportFailure::from_status(401, "bad key".into(), None))],
        );
        let pool = ForecasterPool::new(
            vec![ForecasterSlot::new(1, "one", endpoint.clone())],
            RetryPolicy::immediate(),
        )
        .unwrap();

        let responses = pool.dispatch_all("prompt").await;
        assert_eq!(endpoint.calls(), 1);
        assert!(!responses[0].is_success());
    }

    #[tokio::test]
    async fn test_fallback_replaces_failing_primary() {
        let primary = Scripted::new("proxy", 7, vec![Err(timeout())]);
        let fallback = Scripted::new("openrouter", 3, vec![Ok("Probability: 65%".into())]);
        let slot = ForecasterSlot::new(1, "claude", primary.clone()).with_fallback(fallback.clone());
        let pool = ForecasterPool::new(vec![slot], RetryPolicy::immediate()).unwrap();

        let responses = pool.dispatch_all("prompt").await;
        assert_eq!(primary.calls(), 7);
        assert_eq!(fallback.calls(), 1);
        assert!(responses[0].is_success());
        assert_eq!(responses[0].text, "Probability: 65%");
        assert_eq!(responses[0].served_by.as_deref(), Some("openrouter"));
    }

    #[tokio::test]
    async fn test_fallback_failure_records_both_errors() {
        let primary = Scripted::new("proxy", 2, vec![Err(timeout())]);
        let fallback = Scripted::new(
            "openrouter",
            2,
            vec![Err(TransportFailure::Connection("refused".into()))],
        );
        let slot = ForecasterSlot::new(1, "claude", primary).with_fallback(fallback.clone());
        let pool = ForecasterPool::new(vec![slot], RetryPolicy::immediate()).unwrap();

        let responses = pool.dispatch_all("prompt").await;
        assert_eq!(fallback.calls(), 2);
        let error = responses[0].error.as_ref().unwrap();
        assert!(error.fallback.as_deref().unwrap().contains("refused"));
        assert_eq!(responses[0].text, "");
    }

    #[tokio::test]
    async fn test_order_follows_slot_id_not_completion() {
        let slow = Scripted::delayed("slow", Duration::from_millis(80), "first slot");
        let medium = Scripted::delayed("medium", Duration::from_millis(40), "second slot");
        let fast = Scripted::delayed("fast", Duration::ZERO, "third slot");

        // Deliberately out of order: the pool sorts by id
        let pool = ForecasterPool::new(
            vec![
                ForecasterSlot::new(3, "c", fast),
                ForecasterSlot::new(1, "a", slow),
                ForecasterSlot::new(2, "b", medium),
            ],
            RetryPolicy::immediate(),
        )
        .unwrap();

        let responses = pool.dispatch_all("prompt").await;
        let ids: Vec<u32> = responses.iter().map(|r| r.slot_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(responses[0].text, "first slot");
        assert_eq!(responses[2].text, "third slot");
    }

    #[tokio::test]
    async fn test_calls_run_concurrently() {
        let slots = (1..=4)
            .map(|id| {
                ForecasterSlot::new(
                    id,
                    format!("slot-{id}"),
                    Scripted::delayed("sleepy", Duration::from_millis(100), "ok"),
                )
            })
            .collect();
        let pool = ForecasterPool::new(slots, RetryPolicy::immediate()).unwrap();

        let start = Instant::now();
        let responses = pool.dispatch_all("prompt").await;
        assert_eq!(responses.len(), 4);
        // Sequential execution would take at least 400ms
        assert!(start.elapsed() < Duration::from_millis(350));
    }

    #[test]
    fn test_pool_rejects_empty_and_duplicates() {
        assert!(ForecasterPool::new(vec![], RetryPolicy::immediate()).is_err());

        let endpoint = Scripted::new("a", 1, vec![Ok(String::new())]);
        let slots = vec![
            ForecasterSlot::new(1, "x", endpoint.clone()),
            ForecasterSlot::new(1, "y", endpoint),
        ];
        assert!(ForecasterPool::new(slots, RetryPolicy::immediate()).is_err());
    }

    #[tokio::test]
    async fn test_huge_retry_after_does_not_stall_dispatch() {
        let endpoint = Scripted::new(
            "throttled",
            2,
            vec![
                Err(TransportFailure::from_status(429, "slow down".into(), Some(1e20))),
                Ok("Probability: 55%".into()),
            ],
        );
        let retry = RetryPolicy::new(Duration::from_millis(1)).with_max_delay(Duration::from_millis(10));
        let pool = ForecasterPool::new(vec![ForecasterSlot::new(1, "one", endpoint.clone())], retry)
            .unwrap();

        let responses = tokio::time::timeout(Duration::from_secs(5), pool.dispatch_all("p"))
            .await
            .expect("dispatch stalled on retry-after");
        assert!(responses[0].is_success());
        assert_eq!(responses[0].text, "Probability: 55%");
        assert_eq!(endpoint.calls(), 2);
    }
}
