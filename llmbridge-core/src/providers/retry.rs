//! Retry policy and executor for resilient provider operations
//!
//! This module implements the resilience engine wrapped around every
//! non-streaming provider call:
//! - Exponential backoff with uniform jitter, capped at [`MAX_BACKOFF`]
//! - Retry-After hints from rate-limit errors
//! - An overall deadline spanning every attempt and backoff wait
//! - Cancellation checked before each attempt and raced against each wait

use super::error::{ProviderError, ProviderResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Upper bound for any single backoff wait, including Retry-After hints
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_retries: u32,

    /// Initial delay before first retry (milliseconds)
    pub initial_delay_ms: u64,

    /// Maximum delay between retries (milliseconds), never above [`MAX_BACKOFF`]
    pub max_delay_ms: u64,

    /// Base for exponential backoff (e.g., 2.0 for doubling)
    pub exponential_base: f64,

    /// Jitter factor (0.0 to 1.0); the delay is perturbed uniformly by ± this share
    pub jitter_factor: f64,

    /// Whether to honor Retry-After hints carried by rate-limit errors
    pub respect_retry_after: bool,

    /// Default deadline for the whole call (milliseconds), used when the
    /// caller does not pass one
    pub timeout_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 60_000,
            exponential_base: 2.0,
            jitter_factor: 0.1,
            respect_retry_after: true,
            timeout_ms: Some(120_000),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with custom configuration
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Default call deadline, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Calculate the delay before retry number `attempt + 1`
    pub fn calculate_delay(&self, attempt: u32, error: &ProviderError) -> Duration {
        if self.respect_retry_after {
            if let Some(retry_after) = error.retry_after() {
                return retry_after.min(MAX_BACKOFF);
            }
        }

        let cap = (self.max_delay_ms as f64).min(MAX_BACKOFF.as_millis() as f64);
        let base_delay = self.initial_delay_ms as f64 * self.exponential_base.powi(attempt as i32);
        let capped_delay = base_delay.min(cap);

        let delay_with_jitter = if self.jitter_factor > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter_range = capped_delay * self.jitter_factor;
            let jitter = rng.gen_range(-jitter_range..=jitter_range);
            (capped_delay + jitter).max(0.0)
        } else {
            capped_delay
        };

        Duration::from_millis(delay_with_jitter as u64).min(MAX_BACKOFF)
    }

    /// Check if we should retry based on the error and attempt count
    pub fn should_retry(&self, error: &ProviderError, attempt: u32) -> bool {
        attempt < self.max_retries && error.is_retryable()
    }
}

/// Executor for retry operations
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create a new retry executor with the given policy
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails terminally, or the retry
    /// budget, deadline or cancellation token says stop.
    ///
    /// `operation` receives the zero-based attempt number. The deadline is
    /// `timeout`, or the policy default, measured from this call. Deadline
    /// expiry yields [`ProviderError::Timeout`]; cancellation yields
    /// [`ProviderError::Cancelled`], and both abort an in-flight attempt.
    pub async fn execute<F, Fut, T>(
        &self,
        provider: &str,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
        mut operation: F,
    ) -> ProviderResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let budget = timeout.or_else(|| self.policy.timeout());
        let deadline = budget.map(|budget| Instant::now() + budget);
        let deadline_error = || {
            ProviderError::timeout(
                provider,
                format!(
                    "call deadline of {}ms exceeded",
                    budget.map(|b| b.as_millis()).unwrap_or_default()
                ),
            )
        };

        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(ProviderError::cancelled(provider));
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::cancelled(provider)),
                _ = wait_for(deadline) => return Err(deadline_error()),
                outcome = operation(attempt) => outcome,
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !self.policy.should_retry(&error, attempt) {
                if !error.is_retryable() {
                    return Err(error);
                }
                tracing::warn!(
                    provider,
                    attempts = attempt + 1,
                    error = %error,
                    "retries exhausted"
                );
                return Err(ProviderError::RetriesExhausted {
                    provider: provider.to_string(),
                    attempts: attempt + 1,
                    last: Box::new(error),
                });
            }

            let delay = self.policy.calculate_delay(attempt, &error);
            tracing::warn!(
                provider,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after retryable error"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::cancelled(provider)),
                _ = wait_for(deadline) => return Err(deadline_error()),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

/// Resolves at `deadline`, or never when there is none
async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            exponential_base: 2.0,
            jitter_factor: 0.0,
            respect_retry_after: true,
            timeout_ms: None,
        }
    }

    fn timeout_error() -> ProviderError {
        ProviderError::timeout("test", "upstream timed out")
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.exponential_base, 2.0);
        assert_eq!(policy.jitter_factor, 0.1);
    }

    #[test]
    fn test_exponential_backoff_calculation() {
        let policy = RetryPolicy {
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            jitter_factor: 0.0,
            respect_retry_after: false,
            ..RetryPolicy::default()
        };
        let error = timeout_error();

        assert_eq!(policy.calculate_delay(0, &error).as_millis(), 100);
        assert_eq!(policy.calculate_delay(1, &error).as_millis(), 200);
        assert_eq!(policy.calculate_delay(2, &error).as_millis(), 400);
        assert_eq!(policy.calculate_delay(3, &error).as_millis(), 800);
        // 1600ms capped at max_delay_ms
        assert_eq!(policy.calculate_delay(4, &error).as_millis(), 1000);
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = RetryPolicy {
            initial_delay_ms: 1_000,
            jitter_factor: 0.1,
            respect_retry_after: false,
            ..RetryPolicy::default()
        };
        for _ in 0..200 {
            let delay = policy.calculate_delay(0, &timeout_error()).as_millis();
            assert!((900..=1100).contains(&delay), "delay {delay}ms out of range");
        }
    }

    #[test]
    fn test_delay_never_exceeds_sixty_seconds() {
        let policy = RetryPolicy {
            initial_delay_ms: 10_000,
            max_delay_ms: u64::MAX,
            ..RetryPolicy::default()
        };
        assert!(policy.calculate_delay(10, &timeout_error()) <= MAX_BACKOFF);

        let limited = ProviderError::RateLimit {
            provider: "test".into(),
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(600)),
        };
        assert_eq!(policy.calculate_delay(0, &limited), MAX_BACKOFF);
    }

    #[test]
    fn test_retry_after_respected() {
        let policy = RetryPolicy::default();
        let error = ProviderError::RateLimit {
            provider: "test".into(),
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(policy.calculate_delay(0, &error).as_secs(), 5);
    }

    #[test]
    fn test_should_retry_logic() {
        let policy = RetryPolicy::new(2);
        let timeout = timeout_error();
        assert!(policy.should_retry(&timeout, 0));
        assert!(policy.should_retry(&timeout, 1));
        assert!(!policy.should_retry(&timeout, 2));

        let auth = ProviderError::Authentication {
            provider: "test".into(),
            status: Some(401),
            message: "bad key".into(),
        };
        assert!(!policy.should_retry(&auth, 0));
    }

    #[tokio::test]
    async fn retryable_error_exhausts_after_max_retries_plus_one() {
        let executor = RetryExecutor::new(fast_policy(2));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: ProviderResult<()> = executor
            .execute("test", &CancellationToken::new(), None, |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(timeout_error())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            ProviderError::RetriesExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(last.kind(), ErrorKind::Timeout);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_retry_budget_makes_a_single_attempt() {
        let executor = RetryExecutor::new(RetryPolicy::new(0));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let err = executor
            .execute("test", &CancellationToken::new(), None, |attempt| {
                let counter = Arc::clone(&counter);
                async move {
                    assert_eq!(attempt, 0);
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(timeout_error())
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, ProviderError::RetriesExhausted { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn non_retryable_error_returns_after_one_attempt() {
        let executor = RetryExecutor::new(fast_policy(2));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let err = executor
            .execute("test", &CancellationToken::new(), None, |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ProviderError::Authentication {
                        provider: "test".into(),
                        status: Some(401),
                        message: "bad key".into(),
                    })
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn success_after_transient_failures() {
        let executor = RetryExecutor::new(fast_policy(3));
        let value = executor
            .execute("test", &CancellationToken::new(), None, |attempt| async move {
                if attempt < 2 {
                    Err(timeout_error())
                } else {
                    Ok(attempt)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn already_cancelled_token_skips_the_attempt() {
        let executor = RetryExecutor::new(fast_policy(2));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let err = executor
            .execute("test", &cancel, None, |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_during_backoff_wins_over_the_wait() {
        let executor = RetryExecutor::new(RetryPolicy {
            initial_delay_ms: 30_000,
            ..fast_policy(3)
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = executor
            .execute("test", &cancel, None, |_| async { Err::<(), _>(timeout_error()) })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn deadline_aborts_in_flight_attempt() {
        let executor = RetryExecutor::new(fast_policy(3));
        let err = executor
            .execute(
                "test",
                &CancellationToken::new(),
                Some(Duration::from_millis(30)),
                |_| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
