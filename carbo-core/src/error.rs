//! Error types for CARBO operations

use crate::FailureReason;
use thiserror::Error;

/// Errors raised by the remote ontology and property services.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("{service}: {resource} not found")]
    NotFound { service: String, resource: String },

    #[error("{service} transient failure (status {status:?}): {message}")]
    Transient {
        service: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Rate limited by {service}, retry after {retry_after_ms}ms")]
    RateLimited { service: String, retry_after_ms: u64 },

    #[error("Malformed identifier {identifier:?}: {reason}")]
    MalformedInput { identifier: String, reason: String },

    #[error("Invalid response from {service}: {reason}")]
    InvalidResponse { service: String, reason: String },

    #[error("{operation} gave up after {attempts} attempts: {last_error}")]
    ExhaustedRetries {
        operation: String,
        attempts: u32,
        last_error: Box<RemoteError>,
    },
}

impl RemoteError {
    /// Server-side or transient errors that a retry may cure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::RateLimited { .. })
    }

    /// Errors that count toward the server-error window and adaptive backoff.
    pub fn is_server_error(&self) -> bool {
        self.is_retryable()
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Reason tag recorded for an identifier that failed with this error.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::NotFound { .. } => FailureReason::NotFound,
            Self::MalformedInput { .. } => FailureReason::MalformedInput,
            Self::Transient { .. } | Self::RateLimited { .. } | Self::ExhaustedRetries { .. } => {
                FailureReason::ExhaustedRetries
            }
            Self::InvalidResponse { .. } => FailureReason::ClassificationFailed,
        }
    }

    pub fn transient(service: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transient {
            service: service.to_string(),
            status,
            message: message.into(),
        }
    }

    pub fn not_found(service: &str, resource: impl Into<String>) -> Self {
        Self::NotFound {
            service: service.to_string(),
            resource: resource.into(),
        }
    }

    pub fn invalid_response(service: &str, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            service: service.to_string(),
            reason: reason.into(),
        }
    }

    pub fn malformed(identifier: &str, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            identifier: identifier.to_string(),
            reason: reason.into(),
        }
    }
}

/// Ontology traversal errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OntologyError {
    #[error("Ontology node not found: {node_id}")]
    NodeNotFound { node_id: u64 },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl OntologyError {
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::NodeNotFound { .. } => FailureReason::NotFound,
            Self::Remote(e) => e.failure_reason(),
        }
    }
}

/// Cache layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    #[error("Failed to open database {name}: {reason}")]
    DbOpen { name: String, reason: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupted entry {key:?} in {cache}: {reason}")]
    Corrupted {
        cache: String,
        key: String,
        reason: String,
    },

    #[error("Unknown namespace: {0}")]
    UnknownNamespace(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(String),

    #[error("Failed to parse config TOML: {0}")]
    Parse(String),

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Failed to initialise tracing: {0}")]
    Telemetry(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

/// Master error type for all CARBO errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CarboError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Ontology error: {0}")]
    Ontology(#[from] OntologyError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl CarboError {
    /// Reason tag for a per-identifier failure.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::Remote(e) => e.failure_reason(),
            Self::Ontology(e) => e.failure_reason(),
            Self::Cancelled => FailureReason::Cancelled,
            Self::Cache(_) | Self::Config(_) => FailureReason::ClassificationFailed,
        }
    }
}

/// Result type alias for CARBO operations.
pub type CarboResult<T> = Result<T, CarboError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_retryability() {
        assert!(RemoteError::transient("pubchem", Some(503), "busy").is_retryable());
        assert!(RemoteError::RateLimited {
            service: "chebi".to_string(),
            retry_after_ms: 100
        }
        .is_retryable());
        assert!(!RemoteError::not_found("chebi", "node 1").is_retryable());
        assert!(!RemoteError::malformed("x", "bad").is_retryable());
        assert!(!RemoteError::invalid_response("pubchem", "eof").is_retryable());
    }

    #[test]
    fn test_exhausted_retries_display_includes_last_error() {
        let err = RemoteError::ExhaustedRetries {
            operation: "fetch_parents".to_string(),
            attempts: 3,
            last_error: Box::new(RemoteError::transient("chebi", Some(502), "bad gateway")),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("fetch_parents"));
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("bad gateway"));
        assert!(!err.is_retryable());
        assert_eq!(err.failure_reason(), FailureReason::ExhaustedRetries);
    }

    #[test]
    fn test_ontology_error_display_node_not_found() {
        let err = OntologyError::NodeNotFound { node_id: 16646 };
        assert!(format!("{}", err).contains("16646"));
        assert_eq!(err.failure_reason(), FailureReason::NotFound);
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "retry.max_attempts",
            reason: "must be >= 1".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("retry.max_attempts"));
        assert!(msg.contains("must be >= 1"));
    }

    #[test]
    fn test_carbo_error_from_variants() {
        let remote = CarboError::from(RemoteError::not_found("chebi", "x"));
        assert!(matches!(remote, CarboError::Remote(_)));

        let ontology = CarboError::from(OntologyError::NodeNotFound { node_id: 1 });
        assert!(matches!(ontology, CarboError::Ontology(_)));

        let cache = CarboError::from(CacheError::Transaction("boom".to_string()));
        assert!(matches!(cache, CarboError::Cache(_)));

        assert_eq!(CarboError::Cancelled.failure_reason(), FailureReason::Cancelled);
    }
}
