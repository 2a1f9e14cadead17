//! Constants for CARBO
//!
//! Defaults for every configuration section plus the ChEBI anchor nodes.

// ============================================================================
// ONTOLOGY ANCHORS
// ============================================================================

/// "carbohydrates and carbohydrate derivatives"
pub const CHEBI_TOP_ROOT_ID: u64 = 78616;
pub const CHEBI_TOP_ROOT_LABEL: &str = "carbohydrates and carbohydrate derivatives";

/// "carbohydrate"
pub const CHEBI_CARBOHYDRATE_ROOT_ID: u64 = 16646;
pub const CHEBI_CARBOHYDRATE_ROOT_LABEL: &str = "carbohydrate";

/// "carbohydrate derivative"
pub const CHEBI_DERIVATIVE_ROOT_ID: u64 = 63299;
pub const CHEBI_DERIVATIVE_ROOT_LABEL: &str = "carbohydrate derivative";

/// Relation followed when walking the ontology
pub const DEFAULT_RELATION: &str = "is a";

// ============================================================================
// REMOTE SERVICES
// ============================================================================

pub const DEFAULT_CHEBI_BASE_URL: &str = "https://www.ebi.ac.uk/chebi/backend/api/public";
pub const DEFAULT_PUBCHEM_BASE_URL: &str = "https://pubchem.ncbi.nlm.nih.gov/rest/pug";

/// Request timeout in milliseconds (30 s)
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Ids per batched property / synonym request
pub const DEFAULT_CHUNK_SIZE: usize = 512;

// ============================================================================
// CACHE
// ============================================================================

/// In-memory entries per named cache
pub const DEFAULT_CACHE_CAPACITY: usize = 200;

/// LMDB map size (1 GiB)
pub const DEFAULT_LMDB_MAP_SIZE: usize = 1024 * 1024 * 1024;

pub const DEFAULT_CACHE_DIR: &str = ".carbo-cache";

// ============================================================================
// RATE LIMITING
// ============================================================================

/// Minimum delay between requests in milliseconds
pub const DEFAULT_RATE_DELAY_MS: u64 = 200;

/// Adaptive ceiling in milliseconds
pub const DEFAULT_MAX_RATE_DELAY_MS: u64 = 2_000;

pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_RELAX_FACTOR: f64 = 0.9;

/// Consecutive successes before the adaptive delay relaxes
pub const DEFAULT_RELAX_AFTER: u32 = 10;

// ============================================================================
// RETRY
// ============================================================================

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 2_000;
pub const DEFAULT_RETRY_BACKOFF_FACTOR: f64 = 2.0;

// ============================================================================
// ERROR TRACKING
// ============================================================================

pub const DEFAULT_ERROR_WINDOW_SECS: u64 = 60;
pub const DEFAULT_ERROR_THRESHOLD: usize = 10;
pub const DEFAULT_COOLDOWN_SECS: u64 = 180;

/// Attempts after which a transient failure is skipped by later runs
pub const DEFAULT_FAILED_ATTEMPT_CEILING: u32 = 3;

// ============================================================================
// BATCH
// ============================================================================

pub const DEFAULT_WORKERS: usize = 4;
