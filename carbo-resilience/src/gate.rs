//! Single entry point for every network-bound call.
//!
//! Each attempt first sits out any active cooldown, then waits on the rate
//! limiter, then runs. The outcome is reported to the limiter and, for
//! server errors, to the error tracker. The whole sequence runs under the
//! retry policy.

use std::future::Future;
use std::sync::Arc;

use carbo_core::{CarboConfig, RemoteError};

use crate::error_tracker::ErrorTracker;
use crate::rate_limiter::{limiter_from_config, RateLimiter};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct RemoteGate {
    limiter: Arc<dyn RateLimiter>,
    retry: RetryPolicy,
    tracker: Arc<ErrorTracker>,
}

impl RemoteGate {
    pub fn new(limiter: Arc<dyn RateLimiter>, retry: RetryPolicy, tracker: Arc<ErrorTracker>) -> Self {
        Self {
            limiter,
            retry,
            tracker,
        }
    }

    /// Limiter and retry policy from `config`, sharing `tracker`.
    pub fn from_config(config: &CarboConfig, tracker: Arc<ErrorTracker>) -> Self {
        Self::new(
            limiter_from_config(&config.rate_limit),
            RetryPolicy::from(&config.retry),
            tracker,
        )
    }

    pub fn limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.limiter
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn tracker(&self) -> &Arc<ErrorTracker> {
        &self.tracker
    }

    /// Run `op` through cooldown, pacing and retry.
    pub async fn call<T, F, Fut>(&self, operation: &str, op: F) -> Result<T, RemoteError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let op = &op;
        let this = self;
        self.retry
            .execute(operation, move || async move {
                if this.tracker.should_cooldown() {
                    let waited = this.tracker.wait_for_cooldown().await;
                    tracing::info!(
                        operation,
                        waited_secs = waited.as_secs(),
                        "Resuming after cooldown"
                    );
                }
                this.limiter.acquire().await;
                match op().await {
                    Ok(value) => {
                        this.limiter.record_success();
                        Ok(value)
                    }
                    Err(e) => {
                        if e.is_server_error() {
                            this.limiter.record_failure();
                            this.tracker.record_server_error();
                        }
                        tracing::debug!(operation, error = %e, "Remote call failed");
                        Err(e)
                    }
                }
            })
            .await
    }
}
