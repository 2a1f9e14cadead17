//! Server-error window, process-wide cooldown and failed-identifier memory.
//!
//! Every server error lands in a trailing window. When the window holds more
//! errors than the threshold a fixed cooldown begins; while it lasts no new
//! remote calls should be issued. Once it elapses the window is cleared.
//!
//! Identifiers that fail are remembered across runs so later batches can
//! skip them. Permanent reasons are skipped immediately; transient ones only
//! after the configured number of attempts.
//!
//! All methods taking the current time have an `*_at` variant so callers
//! and tests can supply the clock.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use carbo_core::{
    CacheError, ErrorTrackingConfig, ErrorWindowState, FailedIdentifierRecord, FailureReason,
    Timestamp,
};
use carbo_storage::{LmdbStore, FAILED_IDENTIFIERS_DB, TRACKER_STATE_DB};
use chrono::{TimeDelta, Utc};

const WINDOW_KEY: &str = "window";

#[derive(Debug, Default)]
struct TrackerState {
    errors: VecDeque<Timestamp>,
    cooldown_until: Option<Timestamp>,
    failed: BTreeMap<String, FailedIdentifierRecord>,
}

impl TrackerState {
    fn prune(&mut self, now: Timestamp, window: TimeDelta) {
        let cutoff = now - window;
        while self.errors.front().is_some_and(|t| *t <= cutoff) {
            self.errors.pop_front();
        }
    }

    fn checkpoint(&self) -> ErrorWindowState {
        ErrorWindowState {
            errors: self.errors.iter().copied().collect(),
            cooldown_until: self.cooldown_until,
        }
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Process-wide error tracker. Share as `Arc<ErrorTracker>`.
pub struct ErrorTracker {
    config: ErrorTrackingConfig,
    state: Mutex<TrackerState>,
    durable: Option<Arc<LmdbStore>>,
}

impl std::fmt::Debug for ErrorTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorTracker")
            .field("config", &self.config)
            .field("persistent", &self.durable.is_some())
            .finish()
    }
}

impl ErrorTracker {
    /// Memory-only tracker.
    pub fn new(config: ErrorTrackingConfig) -> Self {
        Self {
            config,
            state: Mutex::new(TrackerState::default()),
            durable: None,
        }
    }

    /// Tracker persisted in `store`, reloading earlier runs' state.
    pub fn open(config: ErrorTrackingConfig, store: Arc<LmdbStore>) -> Result<Self, CacheError> {
        let mut state = TrackerState::default();

        for (key, raw) in store.entries(FAILED_IDENTIFIERS_DB)? {
            match raw.decode::<FailedIdentifierRecord>() {
                Ok(record) => {
                    state.failed.insert(key, record);
                }
                Err(e) => {
                    tracing::warn!(identifier = %key, error = %e, "Dropping unreadable failed-identifier record");
                }
            }
        }

        match store.get::<ErrorWindowState>(TRACKER_STATE_DB, WINDOW_KEY) {
            Ok(Some((checkpoint, _))) => {
                state.errors = checkpoint.errors.into_iter().collect();
                state.cooldown_until = checkpoint.cooldown_until;
            }
            Ok(None) => {}
            Err(CacheError::Corrupted { reason, .. }) => {
                tracing::warn!(reason = %reason, "Corrupted error-window checkpoint, starting fresh");
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            failed = state.failed.len(),
            window_errors = state.errors.len(),
            "Error tracker loaded"
        );

        Ok(Self {
            config,
            state: Mutex::new(state),
            durable: Some(store),
        })
    }

    /// Persistent when `store` is given, memory-only otherwise.
    pub fn open_or_new(
        config: ErrorTrackingConfig,
        store: Option<Arc<LmdbStore>>,
    ) -> Result<Self, CacheError> {
        match store {
            Some(store) => Self::open(config, store),
            None => Ok(Self::new(config)),
        }
    }

    pub fn config(&self) -> &ErrorTrackingConfig {
        &self.config
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut TrackerState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn persist_window(&self, checkpoint: &ErrorWindowState) {
        if let Some(store) = &self.durable {
            if let Err(e) = store.put(TRACKER_STATE_DB, WINDOW_KEY, checkpoint, Utc::now()) {
                tracing::error!(error = %e, "Failed to persist error window");
            }
        }
    }

    // ========================================================================
    // SERVER-ERROR WINDOW
    // ========================================================================

    /// Record a server error. Returns true if this error started a cooldown.
    pub fn record_server_error(&self) -> bool {
        self.record_server_error_at(Utc::now())
    }

    pub fn record_server_error_at(&self, now: Timestamp) -> bool {
        let window = to_delta(self.config.window());
        let cooldown = to_delta(self.config.cooldown());
        let threshold = self.config.threshold;

        let (started, count, checkpoint) = self.with_state(|s| {
            s.prune(now, window);
            s.errors.push_back(now);
            let cooling = s.cooldown_until.is_some_and(|until| now < until);
            let started = !cooling && s.errors.len() > threshold;
            if started {
                s.cooldown_until = Some(now + cooldown);
            }
            (started, s.errors.len(), s.checkpoint())
        });

        if started {
            tracing::warn!(
                errors = count,
                window_secs = self.config.window_secs,
                cooldown_secs = self.config.cooldown_secs,
                "Server error threshold exceeded, cooling down"
            );
        }
        self.persist_window(&checkpoint);
        started
    }

    /// True while a cooldown is active. An elapsed cooldown is cleared
    /// together with the error window.
    pub fn should_cooldown(&self) -> bool {
        self.should_cooldown_at(Utc::now())
    }

    pub fn should_cooldown_at(&self, now: Timestamp) -> bool {
        let outcome = self.with_state(|s| match s.cooldown_until {
            Some(until) if now < until => (true, None),
            Some(_) => {
                s.cooldown_until = None;
                s.errors.clear();
                (false, Some(s.checkpoint()))
            }
            None => (false, None),
        });
        if let (_, Some(checkpoint)) = &outcome {
            tracing::info!("Cooldown elapsed, resuming remote calls");
            self.persist_window(checkpoint);
        }
        outcome.0
    }

    pub fn cooldown_remaining(&self) -> Option<Duration> {
        self.cooldown_remaining_at(Utc::now())
    }

    pub fn cooldown_remaining_at(&self, now: Timestamp) -> Option<Duration> {
        let until = self.with_state(|s| s.cooldown_until)?;
        (until - now).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Sleep out the active cooldown, if any, and clear it. Returns the time
    /// slept.
    pub async fn wait_for_cooldown(&self) -> Duration {
        let now = Utc::now();
        let Some(until) = self.with_state(|s| s.cooldown_until) else {
            return Duration::ZERO;
        };
        let remaining = (until - now).to_std().unwrap_or(Duration::ZERO);
        if !remaining.is_zero() {
            tracing::warn!(remaining_secs = remaining.as_secs(), "Waiting for cooldown");
            tokio::time::sleep(remaining).await;
        }
        self.finish_cooldown(until);
        remaining
    }

    /// Clear the cooldown that was due at `until`, unless a newer one has
    /// replaced it meanwhile.
    fn finish_cooldown(&self, until: Timestamp) {
        let checkpoint = self.with_state(|s| {
            if s.cooldown_until == Some(until) {
                s.cooldown_until = None;
                s.errors.clear();
                Some(s.checkpoint())
            } else {
                None
            }
        });
        if let Some(checkpoint) = checkpoint {
            tracing::info!("Cooldown elapsed, resuming remote calls");
            self.persist_window(&checkpoint);
        }
    }

    pub fn recent_error_count(&self) -> usize {
        self.recent_error_count_at(Utc::now())
    }

    pub fn recent_error_count_at(&self, now: Timestamp) -> usize {
        let window = to_delta(self.config.window());
        self.with_state(|s| {
            s.prune(now, window);
            s.errors.len()
        })
    }

    /// Clear the window and any active cooldown.
    pub fn reset_window(&self) {
        let checkpoint = self.with_state(|s| {
            s.errors.clear();
            s.cooldown_until = None;
            s.checkpoint()
        });
        self.persist_window(&checkpoint);
    }

    // ========================================================================
    // FAILED IDENTIFIERS
    // ========================================================================

    /// Remember a failure for `identifier`, incrementing its attempt count.
    /// Reasons that are not trackable (skips, cancellations) are ignored.
    pub fn record_failed_identifier(
        &self,
        identifier: &str,
        reason: FailureReason,
        message: &str,
    ) -> Option<FailedIdentifierRecord> {
        self.record_failed_identifier_at(identifier, reason, message, Utc::now())
    }

    pub fn record_failed_identifier_at(
        &self,
        identifier: &str,
        reason: FailureReason,
        message: &str,
        now: Timestamp,
    ) -> Option<FailedIdentifierRecord> {
        if !reason.is_trackable() {
            return None;
        }
        let record = self.with_state(|s| {
            let record = s
                .failed
                .entry(identifier.to_string())
                .and_modify(|r| {
                    r.attempts += 1;
                    r.reason = reason;
                    r.message = message.to_string();
                    r.last_attempt = now;
                })
                .or_insert_with(|| FailedIdentifierRecord {
                    identifier: identifier.to_string(),
                    reason,
                    message: message.to_string(),
                    attempts: 1,
                    last_attempt: now,
                });
            record.clone()
        });

        tracing::debug!(
            identifier,
            reason = %reason,
            attempts = record.attempts,
            "Recorded failed identifier"
        );
        if let Some(store) = &self.durable {
            if let Err(e) = store.put(FAILED_IDENTIFIERS_DB, identifier, &record, now) {
                tracing::error!(identifier, error = %e, "Failed to persist failed identifier");
            }
        }
        Some(record)
    }

    /// Whether later runs should skip `identifier`.
    pub fn is_known_failed(&self, identifier: &str) -> bool {
        let ceiling = self.config.failed_attempt_ceiling;
        self.with_state(|s| {
            s.failed
                .get(identifier)
                .is_some_and(|r| r.reason.is_permanent() || r.attempts >= ceiling)
        })
    }

    pub fn failed_record(&self, identifier: &str) -> Option<FailedIdentifierRecord> {
        self.with_state(|s| s.failed.get(identifier).cloned())
    }

    /// Forget `identifier`. Returns whether it was known.
    pub fn clear_failed(&self, identifier: &str) -> bool {
        let removed = self.with_state(|s| s.failed.remove(identifier).is_some());
        if removed {
            if let Some(store) = &self.durable {
                if let Err(e) = store.delete(FAILED_IDENTIFIERS_DB, identifier) {
                    tracing::error!(identifier, error = %e, "Failed to delete failed identifier");
                }
            }
        }
        removed
    }

    /// All remembered failures in identifier order.
    pub fn failed_identifiers(&self) -> Vec<FailedIdentifierRecord> {
        self.with_state(|s| s.failed.values().cloned().collect())
    }

    pub fn failed_count(&self) -> usize {
        self.with_state(|s| s.failed.len())
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// The window never reports errors older than its width.
        #[test]
        fn prop_window_only_counts_recent(offsets in proptest::collection::vec(0i64..600, 1..50)) {
            let tracker = ErrorTracker::new(ErrorTrackingConfig {
                threshold: usize::MAX,
                ..ErrorTrackingConfig::default()
            });
            let mut sorted = offsets.clone();
            sorted.sort();
            let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
            for offset in &sorted {
                tracker.record_server_error_at(base + TimeDelta::seconds(*offset));
            }
            let last = *sorted.last().unwrap();
            let now = base + TimeDelta::seconds(last);
            let expected = sorted.iter().filter(|o| last - **o < 60).count();
            prop_assert_eq!(tracker.recent_error_count_at(now), expected);
        }
    }
}
