//! CARBO Storage - Cache Layer
//!
//! Named caches with a bounded in-memory LRU tier and an optional durable
//! LMDB tier. The durable environment is also shared with the error tracker
//! for its own namespaces.

pub mod cache_store;
pub mod lmdb_backend;
pub mod lru;

pub use cache_store::{CacheStats, CacheStore};
pub use lmdb_backend::{
    default_namespaces, LmdbStore, RawEntry, FAILED_IDENTIFIERS_DB, TRACKER_STATE_DB,
};
pub use lru::LruMap;
