//! Tracing subscriber setup.

use crate::{ConfigError, TelemetryConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable that overrides `TelemetryConfig::filter`.
pub const LOG_ENV_VAR: &str = "CARBO_LOG";

/// Install the global fmt subscriber.
///
/// Fails with [`ConfigError::Telemetry`] if a global subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), ConfigError> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    result.map_err(|e| ConfigError::Telemetry(e.to_string()))?;

    tracing::debug!(filter = %config.filter, json = config.json, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Only test in this crate that touches the global subscriber.
    #[test]
    fn test_second_init_reports_telemetry_error() {
        let config = TelemetryConfig::default();
        assert!(init_tracing(&config).is_ok());

        let err = init_tracing(&config).unwrap_err();
        assert!(matches!(err, ConfigError::Telemetry(_)));
        assert!(err.to_string().starts_with("Failed to initialise tracing"));
    }
}
