//! CARBO Resilience - Remote Call Protection
//!
//! Pacing, retries and the process-wide cooldown that every remote call
//! passes through via [`RemoteGate`].

pub mod error_tracker;
pub mod gate;
pub mod rate_limiter;
pub mod retry;

pub use error_tracker::ErrorTracker;
pub use gate::RemoteGate;
pub use rate_limiter::{
    limiter_from_config, AdaptiveConfig, AdaptiveRateLimiter, FixedRateLimiter, RateLimiter,
};
pub use retry::RetryPolicy;
