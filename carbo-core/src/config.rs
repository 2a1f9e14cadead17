//! Configuration loading for CARBO.
//!
//! Every section has defaults matching the public ChEBI and PubChem
//! services; a TOML file only needs the fields it overrides.

use crate::constants::*;
use crate::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CarboConfig {
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub error_tracking: ErrorTrackingConfig,
    pub ontology: OntologyConfig,
    pub properties: PropertiesConfig,
    pub anchors: ClassificationAnchors,
    pub batch: BatchConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// When false, caches are memory-only and nothing is persisted.
    pub enabled: bool,
    pub dir: PathBuf,
    /// In-memory entries per named cache.
    pub capacity: usize,
    pub map_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(DEFAULT_CACHE_DIR),
            capacity: DEFAULT_CACHE_CAPACITY,
            map_size: DEFAULT_LMDB_MAP_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    pub adaptive: bool,
    pub delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub relax_factor: f64,
    pub relax_after: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            adaptive: true,
            delay_ms: DEFAULT_RATE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_RATE_DELAY_MS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            relax_factor: DEFAULT_RELAX_FACTOR,
            relax_after: DEFAULT_RELAX_AFTER,
        }
    }
}

impl RateLimitConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            backoff_factor: DEFAULT_RETRY_BACKOFF_FACTOR,
            max_delay_ms: None,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ErrorTrackingConfig {
    pub window_secs: u64,
    pub threshold: usize,
    pub cooldown_secs: u64,
    pub failed_attempt_ceiling: u32,
}

impl Default for ErrorTrackingConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_ERROR_WINDOW_SECS,
            threshold: DEFAULT_ERROR_THRESHOLD,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            failed_attempt_ceiling: DEFAULT_FAILED_ATTEMPT_CEILING,
        }
    }
}

impl ErrorTrackingConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OntologyConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub relation: String,
    /// Stop ancestor expansion after this many levels. Unbounded when absent.
    pub max_ancestor_depth: Option<usize>,
}

impl Default for OntologyConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CHEBI_BASE_URL.to_string(),
            timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            relation: DEFAULT_RELATION.to_string(),
            max_ancestor_depth: None,
        }
    }
}

impl OntologyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PropertiesConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub chunk_size: usize,
}

impl Default for PropertiesConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PUBCHEM_BASE_URL.to_string(),
            timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl PropertiesConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// An ontology node used as a classification anchor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnchorNode {
    pub id: u64,
    pub label: String,
}

impl AnchorNode {
    pub fn new(id: u64, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassificationAnchors {
    pub top: AnchorNode,
    pub carbohydrate: AnchorNode,
    pub derivative: AnchorNode,
}

impl Default for ClassificationAnchors {
    fn default() -> Self {
        Self {
            top: AnchorNode::new(CHEBI_TOP_ROOT_ID, CHEBI_TOP_ROOT_LABEL),
            carbohydrate: AnchorNode::new(CHEBI_CARBOHYDRATE_ROOT_ID, CHEBI_CARBOHYDRATE_ROOT_LABEL),
            derivative: AnchorNode::new(CHEBI_DERIVATIVE_ROOT_ID, CHEBI_DERIVATIVE_ROOT_LABEL),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    pub workers: usize,
    /// Re-attempt identifiers that earlier runs gave up on.
    pub force_retry_failed: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            force_retry_failed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    /// EnvFilter directive used when `CARBO_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl CarboConfig {
    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::from_path(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: CarboConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.capacity == 0 {
            return Err(invalid("cache.capacity", "must be > 0"));
        }
        if self.cache.enabled && self.cache.dir.as_os_str().is_empty() {
            return Err(invalid("cache.dir", "must not be empty"));
        }
        if self.cache.map_size == 0 {
            return Err(invalid("cache.map_size", "must be > 0"));
        }
        if self.rate_limit.max_delay_ms < self.rate_limit.delay_ms {
            return Err(invalid("rate_limit.max_delay_ms", "must be >= delay_ms"));
        }
        if self.rate_limit.backoff_factor < 1.0 {
            return Err(invalid("rate_limit.backoff_factor", "must be >= 1.0"));
        }
        if !(self.rate_limit.relax_factor > 0.0 && self.rate_limit.relax_factor <= 1.0) {
            return Err(invalid("rate_limit.relax_factor", "must be in (0, 1]"));
        }
        if self.rate_limit.relax_after == 0 {
            return Err(invalid("rate_limit.relax_after", "must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be >= 1"));
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(invalid("retry.backoff_factor", "must be >= 1.0"));
        }
        if let Some(max) = self.retry.max_delay_ms {
            if max < self.retry.base_delay_ms {
                return Err(invalid("retry.max_delay_ms", "must be >= base_delay_ms"));
            }
        }
        if self.error_tracking.window_secs == 0 {
            return Err(invalid("error_tracking.window_secs", "must be > 0"));
        }
        if self.error_tracking.failed_attempt_ceiling == 0 {
            return Err(invalid("error_tracking.failed_attempt_ceiling", "must be >= 1"));
        }
        if self.ontology.base_url.trim().is_empty() {
            return Err(invalid("ontology.base_url", "must not be empty"));
        }
        if self.ontology.timeout_ms == 0 {
            return Err(invalid("ontology.timeout_ms", "must be > 0"));
        }
        if self.ontology.relation.trim().is_empty() {
            return Err(invalid("ontology.relation", "must not be empty"));
        }
        if self.properties.base_url.trim().is_empty() {
            return Err(invalid("properties.base_url", "must not be empty"));
        }
        if self.properties.timeout_ms == 0 {
            return Err(invalid("properties.timeout_ms", "must be > 0"));
        }
        if self.properties.chunk_size == 0 {
            return Err(invalid("properties.chunk_size", "must be > 0"));
        }
        let anchors = &self.anchors;
        if anchors.top.id == anchors.carbohydrate.id
            || anchors.top.id == anchors.derivative.id
            || anchors.carbohydrate.id == anchors.derivative.id
        {
            return Err(invalid("anchors", "anchor ids must be distinct"));
        }
        if self.batch.workers == 0 {
            return Err(invalid("batch.workers", "must be > 0"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}
