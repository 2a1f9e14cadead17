//! Exponential backoff around a fallible async operation.

use std::future::Future;
use std::time::Duration;

use carbo_core::{RemoteError, RetryConfig};

/// Per-invocation retry schedule.
///
/// Attempt `n` (1-based) that fails with a retryable error is followed by a
/// sleep of `base_delay * backoff_factor^(n-1)`, capped at `max_delay` when
/// set. Non-retryable errors return immediately; a retryable error on the
/// last attempt becomes `RemoteError::ExhaustedRetries`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            backoff_factor: config.backoff_factor,
            max_delay: config.max_delay(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff_factor,
            max_delay: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    /// Sleep after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.base_delay.as_nanos() as f64 * self.backoff_factor.powi(exponent);
        let delay = Duration::from_nanos(nanos.round() as u64);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Run `operation` until it succeeds, fails terminally, or the attempt
    /// budget is spent.
    pub async fn execute<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 1;
        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Err(error);
            }
            if attempt >= self.max_attempts {
                return Err(RemoteError::ExhaustedRetries {
                    operation: operation_name.to_string(),
                    attempts: attempt,
                    last_error: Box::new(error),
                });
            }

            let mut delay = self.delay_for(attempt);
            if let RemoteError::RateLimited { retry_after_ms, .. } = &error {
                delay = delay.max(Duration::from_millis(*retry_after_ms));
            }
            tracing::debug!(
                operation = operation_name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after failure"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn transient() -> RemoteError {
        RemoteError::transient("chebi", Some(503), "unavailable")
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));

        let capped = policy.with_max_delay(Duration::from_secs(5));
        assert_eq!(capped.delay_for(3), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fail_succeed() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2), 2.0);
        let attempts = AtomicU32::new(0);
        let seen = Mutex::new(Vec::new());
        let start = Instant::now();

        let result = policy
            .execute("fetch_children", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                seen.lock().unwrap().push(start.elapsed());
                async move {
                    if n < 3 {
                        Err(transient())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let seen = seen.into_inner().unwrap();
        let first_gap = seen[1] - seen[0];
        let second_gap = seen[2] - seen[1];
        assert!(first_gap >= Duration::from_secs(2) && first_gap < Duration::from_millis(2_010));
        assert!(second_gap >= Duration::from_secs(4) && second_gap < Duration::from_millis(4_010));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), 2.0);
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .execute("fetch_parents", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        match result {
            Err(RemoteError::ExhaustedRetries {
                operation,
                attempts,
                last_error,
            }) => {
                assert_eq!(operation, "fetch_parents");
                assert_eq!(attempts, 3);
                assert_eq!(*last_error, transient());
            }
            other => panic!("expected ExhaustedRetries, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_terminal_error_not_retried() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .execute("resolve", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::malformed("C(", "unbalanced")) }
            })
            .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RemoteError::MalformedInput { .. })));

        let result: Result<(), _> = policy
            .execute("resolve", || async { Err(RemoteError::not_found("pubchem", "cid")) })
            .await;
        assert!(matches!(result, Err(RemoteError::NotFound { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_honors_retry_after() {
        let policy = RetryPolicy::new(2, Duration::from_millis(100), 2.0);
        let attempts = AtomicU32::new(0);
        let start = Instant::now();
        let result = policy
            .execute("fetch_properties", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(RemoteError::RateLimited {
                            service: "pubchem".to_string(),
                            retry_after_ms: 1_500,
                        })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_millis(1_500));
    }

    #[tokio::test]
    async fn test_single_attempt_policy() {
        let policy = RetryPolicy::none();
        let result: Result<(), _> = policy.execute("op", || async { Err(transient()) }).await;
        assert!(matches!(
            result,
            Err(RemoteError::ExhaustedRetries { attempts: 1, .. })
        ));
    }
}
