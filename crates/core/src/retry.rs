//! Bounded retry with exponential backoff for calls to external collaborators.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SourceError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, at least one.
    pub attempts: u32,
    /// Delay before the first retry.
    pub backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
    /// Upper bound for a single attempt.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
            multiplier: 2.0,
            max_backoff: Duration::from_secs(60),
            timeout: Duration::from_secs(10),
        }
    }

    /// A single attempt, no retries.
    pub fn once(timeout: Duration) -> Self {
        Self::new(1, Duration::ZERO).with_timeout(timeout)
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Delay slept after the `retry`-th failed attempt (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry as i32);
        let millis = (self.backoff.as_millis() as f64 * factor)
            .min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Run `op` until it succeeds or the policy's attempts are used up.
///
/// Each attempt is bounded by `policy.timeout`; an elapsed attempt counts as a
/// [`SourceError::Timeout`] failure. The error of the last attempt is returned.
pub async fn retry<T, F, Fut>(
    name: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        let outcome = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(policy.timeout)),
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = name, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt >= attempts => {
                warn!(operation = name, attempts, error = %e, "all attempts failed");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt - 1);
                warn!(
                    operation = name,
                    attempt,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Like [`retry`], but falls back to `fallback(&last_error)` once attempts are
/// exhausted.
pub async fn with_retry<T, F, Fut, G>(name: &str, policy: &RetryPolicy, op: F, fallback: G) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
    G: FnOnce(&SourceError) -> T,
{
    match retry(name, policy, op).await {
        Ok(value) => value,
        Err(e) => fallback(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    type Attempt = std::pin::Pin<Box<dyn Future<Output = Result<usize, SourceError>> + Send>>;

    fn failing_until(calls: Arc<AtomicUsize>, succeed_on: usize) -> impl FnMut() -> Attempt {
        move || {
            let calls = Arc::clone(&calls);
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= succeed_on {
                    Ok(n)
                } else {
                    Err(SourceError::Unavailable(format!("call {n}")))
                }
            })
        }
    }

    #[test]
    fn delay_grows_and_is_capped() {
        let policy =
            RetryPolicy::new(5, Duration::from_secs(1)).with_max_backoff(Duration::from_secs(3));
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(3));
        assert_eq!(policy.delay_for(5), Duration::from_secs(3));
    }

    #[test]
    fn attempts_never_zero() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success_with_backoff() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let start = tokio::time::Instant::now();

        let result = retry("flaky", &policy, failing_until(Arc::clone(&calls), 3)).await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = RetryPolicy::new(2, Duration::from_millis(10));

        let result = retry("down", &policy, failing_until(Arc::clone(&calls), 100)).await;

        assert_eq!(result, Err(SourceError::Unavailable("call 2".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out() {
        let policy = RetryPolicy::once(Duration::from_secs(5));
        let result: Result<(), _> = retry("slow", &policy, || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(SourceError::Timeout(Duration::from_secs(5))));
    }

    #[tokio::test(start_paused = true)]
    async fn with_retry_uses_fallback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let value = with_retry("down", &policy, failing_until(Arc::clone(&calls), 100), |e| {
            assert!(matches!(e, SourceError::Unavailable(_)));
            0
        })
        .await;

        assert_eq!(value, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
