//! Warm-up retry controller.
//!
//! The hosted backend scales to zero; the first request after idle commonly
//! bounces off the gateway as 502/503/504 while a worker cold-starts.
//! Retrying is governed by an absolute deadline fixed when the operation
//! begins — never reset per attempt — with geometric backoff between
//! attempts. Any other HTTP status is returned immediately: only gateway
//! cold-start statuses and transport-level failures are worth waiting out.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::QernelError;
use crate::sinks::WarmupIndicator;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Backoff and per-attempt bounds for one class of operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay before the second attempt; doubles per retry.
    pub initial_backoff: Duration,
    /// Ceiling on the inter-attempt delay.
    pub max_backoff: Duration,
    /// Ceiling on how long a single connection attempt may hang.
    pub attempt_cap: Duration,
}

impl RetryPolicy {
    /// Policy for establishing the SSE stream. Generous per-attempt cap:
    /// a cold worker can take tens of seconds to accept.
    pub fn streaming() -> Self {
        Self {
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: Duration::from_secs(10),
            attempt_cap: Duration::from_secs(30),
        }
    }

    /// Policy for plain requests (connectivity probe, artifact downloads).
    pub fn download() -> Self {
        Self {
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: Duration::from_secs(8),
            attempt_cap: Duration::from_secs(20),
        }
    }
}

/// Whether an HTTP status indicates a cold-starting backend worth retrying.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 502 | 503 | 504)
}

/// Mutable retry state for one operation: the absolute deadline plus the
/// current backoff. One context may span several requests (e.g. a batch of
/// artifact downloads sharing a deadline).
#[derive(Debug)]
pub struct RetryContext {
    policy: RetryPolicy,
    budget: Duration,
    deadline: Instant,
    backoff: Duration,
    attempts: u32,
}

impl RetryContext {
    pub fn new(policy: RetryPolicy, budget: Duration) -> Self {
        Self {
            policy,
            budget,
            deadline: Instant::now() + budget,
            backoff: policy.initial_backoff,
            attempts: 0,
        }
    }

    /// Total budget this context was created with.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left until the deadline; zero once past it.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// How long the next single attempt may take: the per-attempt cap,
    /// clamped to the remaining budget.
    pub fn attempt_timeout(&self) -> Duration {
        self.policy.attempt_cap.min(self.remaining())
    }

    /// The delay to sleep before the next attempt, clamped to the remaining
    /// budget. Advances the backoff (doubling, capped).
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.backoff.min(self.remaining());
        self.backoff = (self.backoff * 2).min(self.policy.max_backoff);
        delay
    }

    fn note_attempt(&mut self) {
        self.attempts += 1;
    }
}

/// RAII wrapper around a [`WarmupIndicator`]: started on construction and
/// guaranteed to finalize exactly once. If neither [`connected`] nor
/// [`failed`] was called by the time the guard drops, the indicator is
/// finalized as failed — an error `?`-propagating out of the caller cannot
/// leave a spinner running.
///
/// [`connected`]: WarmupGuard::connected
/// [`failed`]: WarmupGuard::failed
pub struct WarmupGuard<'a> {
    indicator: &'a dyn WarmupIndicator,
    pending: bool,
}

impl<'a> WarmupGuard<'a> {
    pub fn start(indicator: &'a dyn WarmupIndicator, label: &str) -> Self {
        indicator.warmup_started(label);
        Self {
            indicator,
            pending: true,
        }
    }

    pub fn connected(&mut self) {
        if self.pending {
            self.pending = false;
            self.indicator.warmup_connected();
        }
    }

    pub fn failed(&mut self) {
        if self.pending {
            self.pending = false;
            self.indicator.warmup_failed();
        }
    }
}

impl Drop for WarmupGuard<'_> {
    fn drop(&mut self) {
        self.failed();
    }
}

/// Send a request, retrying cold-start statuses and transport failures
/// until the context's deadline.
///
/// `build` constructs a fresh `RequestBuilder` per attempt (a builder is
/// consumed by `send`). The per-attempt timeout is applied around `send()`
/// only — it must not cover body consumption, or it would cut a healthy
/// long-lived stream short. On the first successful (2xx) response the
/// warm-up guard is finalized as connected; all error returns leave the
/// guard pending so the caller's guard finalizes it as failed on drop.
pub async fn send_with_retry<F>(
    build: F,
    ctx: &mut RetryContext,
    warmup: &mut WarmupGuard<'_>,
    operation: &str,
) -> Result<reqwest::Response, QernelError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let budget_secs = ctx.budget().as_secs();
    let mut last_transport_error: Option<String> = None;

    loop {
        if ctx.is_expired() {
            return Err(match last_transport_error {
                Some(message) => QernelError::Transport {
                    message,
                    transcript: None,
                },
                None => QernelError::Timeout {
                    operation: operation.to_string(),
                    budget_secs,
                    transcript: None,
                },
            });
        }
        ctx.note_attempt();

        match tokio::time::timeout(ctx.attempt_timeout(), build().send()).await {
            Err(_elapsed) => {
                tracing::debug!(
                    operation,
                    attempt = ctx.attempts(),
                    "attempt timed out, retrying"
                );
            }
            Ok(Err(err)) => {
                tracing::debug!(
                    operation,
                    attempt = ctx.attempts(),
                    error = %err,
                    "transport error, retrying"
                );
                last_transport_error = Some(err.to_string());
            }
            Ok(Ok(response)) => {
                let status = response.status();
                if status.is_success() {
                    warmup.connected();
                    return Ok(response);
                }
                if is_retryable_status(status.as_u16()) {
                    tracing::debug!(
                        operation,
                        attempt = ctx.attempts(),
                        status = status.as_u16(),
                        "backend warming up, retrying"
                    );
                } else {
                    let body = response.text().await.unwrap_or_default();
                    return Err(QernelError::Status {
                        status: status.as_u16(),
                        body,
                        transcript: None,
                    });
                }
            }
        }

        tokio::time::sleep(ctx.next_delay()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingIndicator {
        started: AtomicU32,
        connected: AtomicU32,
        failed: AtomicU32,
    }

    impl WarmupIndicator for CountingIndicator {
        fn warmup_started(&self, _label: &str) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn warmup_connected(&self) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }
        fn warmup_failed(&self) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_retryable_status_set() {
        assert!(is_retryable_status(502));
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(504));
        assert!(!is_retryable_status(500));
        assert!(!is_retryable_status(403));
        assert!(!is_retryable_status(429));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut ctx = RetryContext::new(RetryPolicy::streaming(), Duration::from_secs(3600));
        assert_eq!(ctx.next_delay(), Duration::from_millis(500));
        assert_eq!(ctx.next_delay(), Duration::from_secs(1));
        assert_eq!(ctx.next_delay(), Duration::from_secs(2));
        assert_eq!(ctx.next_delay(), Duration::from_secs(4));
        assert_eq!(ctx.next_delay(), Duration::from_secs(8));
        assert_eq!(ctx.next_delay(), Duration::from_secs(10));
        assert_eq!(ctx.next_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_delay_clamped_to_remaining() {
        let mut ctx = RetryContext::new(RetryPolicy::streaming(), Duration::from_millis(100));
        assert!(ctx.next_delay() <= Duration::from_millis(100));
    }

    #[test]
    fn test_zero_budget_is_immediately_expired() {
        let ctx = RetryContext::new(RetryPolicy::download(), Duration::ZERO);
        assert!(ctx.is_expired());
        assert_eq!(ctx.attempt_timeout(), Duration::ZERO);
    }

    #[test]
    fn test_attempt_timeout_clamped_by_deadline() {
        let ctx = RetryContext::new(RetryPolicy::streaming(), Duration::from_secs(5));
        assert!(ctx.attempt_timeout() <= Duration::from_secs(5));

        let ctx = RetryContext::new(RetryPolicy::streaming(), Duration::from_secs(3600));
        assert_eq!(ctx.attempt_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_warmup_guard_connected_is_one_shot() {
        let indicator = CountingIndicator::default();
        {
            let mut guard = WarmupGuard::start(&indicator, "warm up");
            guard.connected();
            guard.connected();
            guard.failed();
        }
        assert_eq!(indicator.started.load(Ordering::SeqCst), 1);
        assert_eq!(indicator.connected.load(Ordering::SeqCst), 1);
        assert_eq!(indicator.failed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_warmup_guard_drop_finalizes_as_failed() {
        let indicator = CountingIndicator::default();
        {
            let _guard = WarmupGuard::start(&indicator, "warm up");
            // dropped without resolution
        }
        assert_eq!(indicator.started.load(Ordering::SeqCst), 1);
        assert_eq!(indicator.connected.load(Ordering::SeqCst), 0);
        assert_eq!(indicator.failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_not_reset_by_retries() {
        let mut ctx = RetryContext::new(RetryPolicy::download(), Duration::from_secs(10));
        // Burn the budget with simulated waits; the deadline is absolute.
        tokio::time::advance(Duration::from_secs(4)).await;
        let _ = ctx.next_delay();
        tokio::time::advance(Duration::from_secs(7)).await;
        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }
}
