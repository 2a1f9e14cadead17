//! CARBO Core - Data Types
//!
//! Records, enums, errors, configuration and the remote service traits.
//! All other crates depend on this one; it holds no I/O of its own.

pub mod config;
pub mod constants;
mod entities;
mod enums;
mod error;
pub mod services;
pub mod telemetry;

pub use config::{
    AnchorNode, BatchConfig, CacheConfig, CarboConfig, ClassificationAnchors, ErrorTrackingConfig,
    OntologyConfig, PropertiesConfig, RateLimitConfig, RetryConfig, TelemetryConfig,
};
pub use entities::{
    CacheEntry, ClassificationResult, CompoundProperties, CompoundRecord, ErrorWindowState,
    FailedIdentifierRecord, OntologyEdge, OntologyNode, RecordError,
};
pub use enums::{
    AnchorRoot, CacheName, Category, CategoryParseError, ClassificationPath, FailureReason,
    IdentifierKind,
};
pub use error::{CacheError, CarboError, CarboResult, ConfigError, OntologyError, RemoteError};
pub use services::{OntologyService, PropertyService};
pub use telemetry::init_tracing;

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A chunk size of zero is always rejected, whatever else is set.
        #[test]
        fn prop_config_rejects_zero_chunk(workers in 1usize..64, capacity in 1usize..10_000) {
            let mut config = CarboConfig::default();
            config.batch.workers = workers;
            config.cache.capacity = capacity;
            config.properties.chunk_size = 0;
            let result = config.validate();
            if let Err(ConfigError::InvalidValue { field, .. }) = result {
                prop_assert_eq!(field, "properties.chunk_size");
            } else {
                prop_assert!(false, "Expected ConfigError::InvalidValue");
            }
        }

        /// Relax factors outside (0, 1] are rejected.
        #[test]
        fn prop_config_rejects_relax_factor_above_one(factor in 1.0001f64..100.0) {
            let mut config = CarboConfig::default();
            config.rate_limit.relax_factor = factor;
            prop_assert!(config.validate().is_err());
        }

        /// Category tags survive a db-string round trip.
        #[test]
        fn prop_category_tag_roundtrip(idx in 0usize..6) {
            let category = Category::ALL[idx];
            prop_assert_eq!(category.as_db_str().parse::<Category>().unwrap(), category);
        }
    }
}
