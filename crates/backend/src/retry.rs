//! Timeout and exponential-backoff retry around backend calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::BackendError;

/// Backoff settings for retryable failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Factor applied to the delay after each failure.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Compute the next delay from the current one, clamped to `max_delay`.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next = current.mul_f64(self.multiplier.max(1.0));
        next.min(self.max_delay)
    }

    /// Delay slept after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_delay.min(self.max_delay);
        for _ in 1..attempt {
            delay = self.next_delay(delay);
        }
        delay
    }
}

/// Race `fut` against a timer.
///
/// # Errors
///
/// Returns `BackendError::Timeout` when the timer fires first, otherwise the
/// future's own error.
pub async fn with_timeout<T, F>(duration: Duration, fut: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| BackendError::Timeout(duration))?
}

/// Whether a request may be sent again after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replay {
    /// Repeating the request has no further effect (reads, `PATCH` of the
    /// same values, storage upserts). Any retryable failure is retried.
    Safe,
    /// The request may have been applied even though no response arrived.
    /// Only failures where it never reached the server are retried.
    Unsafe,
}

impl Replay {
    /// Whether `error` allows another attempt under this mode.
    #[must_use]
    pub fn allows(self, error: &BackendError) -> bool {
        match self {
            Self::Safe => error.is_retryable(),
            Self::Unsafe => error.is_unsent(),
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are exhausted.
///
/// # Errors
///
/// Returns the last error produced by `op`.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, op_name: &str, op: F) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    retry_with(policy, Replay::Safe, op_name, op).await
}

/// [`retry`], with `replay` deciding which failures are worth another
/// attempt.
///
/// # Errors
///
/// Returns the last error produced by `op`.
pub async fn retry_with<T, F, Fut>(
    policy: &RetryPolicy,
    replay: Replay,
    op_name: &str,
    mut op: F,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && replay.allows(&e) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    op = op_name,
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    kind = %e.kind(),
                    error = %e,
                    "Retryable backend failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_default_policy() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(300));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(600));
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(1200));
    }

    #[test]
    fn test_next_delay_clamped() {
        let p = RetryPolicy::default();
        assert_eq!(p.next_delay(Duration::from_secs(4)), Duration::from_secs(5));
        assert_eq!(p.delay_for_attempt(20), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_fires() {
        let result: Result<(), _> = with_timeout(Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(BackendError::Timeout(d)) if d == Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_passes_through() {
        let result = with_timeout(Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_retryable_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = retry(&RetryPolicy::default(), "test", move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BackendError::Timeout(Duration::from_secs(1)))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), _> = retry(&RetryPolicy::default(), "test", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(BackendError::from_response(503, "unavailable")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_surfaces_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), _> = retry(&RetryPolicy::default(), "test", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(BackendError::from_response(409, "duplicate key value")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsafe_replay_does_not_repeat_timed_out_writes() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), _> =
            retry_with(&RetryPolicy::default(), Replay::Unsafe, "insert", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(BackendError::Timeout(Duration::from_secs(1))) }
            })
            .await;
        assert!(matches!(result, Err(BackendError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replay_modes() {
        let timeout = BackendError::Timeout(Duration::from_secs(1));
        let unavailable = BackendError::from_response(503, "upstream connection reset");
        assert!(Replay::Safe.allows(&timeout));
        assert!(Replay::Safe.allows(&unavailable));
        assert!(!Replay::Unsafe.allows(&timeout));
        assert!(!Replay::Unsafe.allows(&unavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_elapses() {
        let start = tokio::time::Instant::now();
        let _: Result<(), _> = retry(&RetryPolicy::default(), "test", || async {
            Err(BackendError::Timeout(Duration::from_millis(1)))
        })
        .await;
        // 300ms + 600ms of sleeping between three attempts
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(900));
        assert!(elapsed < Duration::from_millis(1000));
    }
}
