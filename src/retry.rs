//! Bounded-attempt retry wrapper with exponential backoff.
//!
//! Only [`FetchError::Transient`] outcomes are retried. A detected challenge,
//! a terminal error, or cancellation returns immediately: the hand-off for
//! challenges is already in motion by the time the error surfaces here, and
//! retrying would just hammer a site that has already flagged us.

use crate::cancel::CancelToken;
use crate::error::FetchError;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Retry policy: attempt bound plus backoff curve.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of times the operation is invoked.
    pub max_attempts: u32,
    /// Backoff unit; attempt `n` sleeps `base_delay * 2^n` before retrying.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_secs(1),
        }
    }

    /// Override the backoff unit (tests use milliseconds).
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before the retry following failed attempt `attempt` (0-based):
    /// `base_delay * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Invoke `op` up to `policy.max_attempts` times, sleeping
/// `base_delay * 2^attempt` between transient failures. The closure receives
/// the 0-based attempt number so callers can escalate per-attempt timeouts.
///
/// The backoff sleep is raced against `cancel` so a mid-backoff cancellation
/// unblocks promptly.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0u32;
    loop {
        cancel.ensure()?;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                if attempt + 1 >= policy.max_attempts {
                    return Err(FetchError::RetriesExhausted {
                        attempts: policy.max_attempts,
                        source: Box::new(err),
                    });
                }
                let delay = policy.backoff(attempt);
                debug!(
                    "attempt {} failed ({err}), retrying in {:.1}s",
                    attempt + 1,
                    delay.as_secs_f64()
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::challenge;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn counting_policy() -> (RetryPolicy, Arc<AtomicU32>) {
        (RetryPolicy::new(3), Arc::new(AtomicU32::new(0)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_retried_up_to_max_attempts() {
        let (policy, calls) = counting_policy();
        let cancel = CancelToken::new();
        let start = Instant::now();

        let result: Result<(), _> = with_retry(&policy, &cancel, |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::transient("status 500"))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Sleeps of 2^0 and 2^1 seconds between the three attempts.
        assert!(Instant::now() - start >= Duration::from_secs(3));
        match result {
            Err(FetchError::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(source.is_transient());
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let (policy, calls) = counting_policy();
        let cancel = CancelToken::new();

        let result = with_retry(&policy, &cancel, |attempt| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(FetchError::transient("timeout"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_challenge_invokes_op_exactly_once() {
        let (policy, calls) = counting_policy();
        let cancel = CancelToken::new();

        let result: Result<(), _> = with_retry(&policy, &cancel, |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::Challenge {
                    verdict: challenge::detect(403, ""),
                    url: "https://example.com".to_string(),
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(FetchError::Challenge { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_invokes_op_exactly_once() {
        let (policy, calls) = counting_policy();
        let cancel = CancelToken::new();

        let result: Result<(), _> = with_retry(&policy, &cancel, |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::terminal("malformed target"))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(FetchError::Terminal { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff_unblocks() {
        let policy = RetryPolicy::new(5);
        let cancel = CancelToken::new();
        let racer = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            racer.cancel();
        });

        let result: Result<(), _> = with_retry(&policy, &cancel, |_| async {
            Err(FetchError::transient("status 502"))
        })
        .await;

        assert!(matches!(result, Err(FetchError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_cancelled_token_skips_op() {
        let (policy, calls) = counting_policy();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result: Result<(), _> = with_retry(&policy, &cancel, |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }

    #[test]
    fn test_backoff_curve() {
        let policy = RetryPolicy::new(4);
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
    }
}
