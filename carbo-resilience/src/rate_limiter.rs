//! Request pacing.
//!
//! `acquire()` is the single serialization point for outbound requests.
//! Spacing is enforced by a `governor` quota of one request per delay with
//! a burst of one. Callers queue on a `tokio::sync::Mutex`, which admits
//! waiters in FIFO order, before consulting the quota.

use std::fmt::Debug;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use carbo_core::RateLimitConfig;
use governor::clock::{Clock, DefaultClock};
use governor::{Quota, RateLimiter as Governor};
use tokio::sync::Notify;

/// Paces outbound requests and reacts to success/failure signals.
#[async_trait]
pub trait RateLimiter: Send + Sync + Debug {
    /// Wait until the next request may be issued.
    async fn acquire(&self);

    /// A request completed successfully.
    fn record_success(&self);

    /// A request failed with a server-side error.
    fn record_failure(&self);

    /// Minimum spacing currently enforced between requests.
    fn current_delay(&self) -> Duration;

    /// Return to the initial delay.
    fn reset(&self) {}
}

/// Build the limiter described by `config`.
pub fn limiter_from_config(config: &RateLimitConfig) -> Arc<dyn RateLimiter> {
    if config.adaptive {
        Arc::new(AdaptiveRateLimiter::new(AdaptiveConfig::from(config)))
    } else {
        Arc::new(FixedRateLimiter::new(config.delay()))
    }
}

type DirectLimiter = Governor<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    DefaultClock,
>;

/// One governor quota. A zero delay means no pacing at all.
struct Pacer {
    limiter: Option<DirectLimiter>,
    clock: DefaultClock,
}

impl Pacer {
    fn new(delay: Duration) -> Self {
        let limiter = Quota::with_period(delay)
            .map(|quota| Governor::direct(quota.allow_burst(NonZeroU32::MIN)));
        Self {
            limiter,
            clock: DefaultClock::default(),
        }
    }

    /// A quota whose single cell is already spent, so the first request
    /// waits a full period from now.
    fn primed(delay: Duration) -> Self {
        let pacer = Self::new(delay);
        if let Some(limiter) = &pacer.limiter {
            let _ = limiter.check();
        }
        pacer
    }

    /// `None` when a request may go now, else how long to wait.
    fn wait_time(&self) -> Option<Duration> {
        let limiter = self.limiter.as_ref()?;
        match limiter.check() {
            Ok(()) => None,
            Err(not_until) => Some(not_until.wait_time_from(self.clock.now())),
        }
    }
}

impl Debug for Pacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pacer")
            .field("paced", &self.limiter.is_some())
            .finish()
    }
}

/// FIFO queue in front of a swappable quota. Swapping wakes the caller at
/// the head of the queue so it re-reads the new quota.
#[derive(Debug)]
struct Gate {
    turn: tokio::sync::Mutex<()>,
    pacer: Mutex<Arc<Pacer>>,
    swapped: Notify,
}

impl Gate {
    fn new(delay: Duration) -> Self {
        Self {
            turn: tokio::sync::Mutex::new(()),
            pacer: Mutex::new(Arc::new(Pacer::new(delay))),
            swapped: Notify::new(),
        }
    }

    fn current(&self) -> Arc<Pacer> {
        match self.pacer.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, pacer: Pacer) {
        let mut guard = match self.pacer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(pacer);
        drop(guard);
        self.swapped.notify_waiters();
    }

    async fn pass(&self) {
        let _turn = self.turn.lock().await;
        loop {
            let swapped = self.swapped.notified();
            let Some(wait) = self.current().wait_time() else {
                return;
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = swapped => {}
            }
        }
    }

    /// New spacing, measured from now.
    fn retune(&self, delay: Duration) {
        self.replace(Pacer::primed(delay));
    }

    /// Forget the last admission.
    fn clear(&self, delay: Duration) {
        self.replace(Pacer::new(delay));
        tracing::debug!(delay_ms = delay.as_millis() as u64, "Rate limiter reset");
    }
}

// ============================================================================
// FIXED
// ============================================================================

/// Constant minimum delay between requests.
#[derive(Debug)]
pub struct FixedRateLimiter {
    delay: Duration,
    gate: Gate,
}

impl FixedRateLimiter {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            gate: Gate::new(delay),
        }
    }
}

#[async_trait]
impl RateLimiter for FixedRateLimiter {
    async fn acquire(&self) {
        self.gate.pass().await;
    }

    fn record_success(&self) {}

    fn record_failure(&self) {}

    fn current_delay(&self) -> Duration {
        self.delay
    }

    fn reset(&self) {
        self.gate.clear(self.delay);
    }
}

// ============================================================================
// ADAPTIVE
// ============================================================================

/// Tuning for [`AdaptiveRateLimiter`].
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub relax_factor: f64,
    pub relax_after: u32,
}

impl From<&RateLimitConfig> for AdaptiveConfig {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            base_delay: config.delay(),
            max_delay: config.max_delay(),
            backoff_factor: config.backoff_factor,
            relax_factor: config.relax_factor,
            relax_after: config.relax_after,
        }
    }
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self::from(&RateLimitConfig::default())
    }
}

#[derive(Debug)]
struct AdaptiveState {
    delay: Duration,
    consecutive_successes: u32,
}

/// Delay that grows on server errors and relaxes after sustained success.
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    config: AdaptiveConfig,
    state: Mutex<AdaptiveState>,
    gate: Gate,
}

impl AdaptiveRateLimiter {
    pub fn new(config: AdaptiveConfig) -> Self {
        let delay = config.base_delay;
        Self {
            config,
            state: Mutex::new(AdaptiveState {
                delay,
                consecutive_successes: 0,
            }),
            gate: Gate::new(delay),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut AdaptiveState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

fn scale(delay: Duration, factor: f64) -> Duration {
    Duration::from_nanos((delay.as_nanos() as f64 * factor).round() as u64)
}

#[async_trait]
impl RateLimiter for AdaptiveRateLimiter {
    async fn acquire(&self) {
        self.gate.pass().await;
    }

    fn record_success(&self) {
        let (before, after) = self.with_state(|s| {
            s.consecutive_successes += 1;
            let before = s.delay;
            if s.consecutive_successes >= self.config.relax_after {
                s.consecutive_successes = 0;
                s.delay = scale(s.delay, self.config.relax_factor).max(self.config.base_delay);
            }
            (before, s.delay)
        });
        if after < before {
            self.gate.retune(after);
            tracing::debug!(
                from_ms = before.as_millis() as u64,
                to_ms = after.as_millis() as u64,
                "Rate limit delay relaxed"
            );
        }
    }

    fn record_failure(&self) {
        let (before, after) = self.with_state(|s| {
            s.consecutive_successes = 0;
            let before = s.delay;
            s.delay = scale(s.delay, self.config.backoff_factor).min(self.config.max_delay);
            (before, s.delay)
        });
        if after > before {
            self.gate.retune(after);
            tracing::info!(
                from_ms = before.as_millis() as u64,
                to_ms = after.as_millis() as u64,
                "Rate limit delay increased"
            );
        }
    }

    fn current_delay(&self) -> Duration {
        self.with_state(|s| s.delay)
    }

    fn reset(&self) {
        self.with_state(|s| {
            s.delay = self.config.base_delay;
            s.consecutive_successes = 0;
        });
        self.gate.clear(self.config.base_delay);
    }
}
