//! Two-tier named caches: bounded in-memory LRU over durable LMDB.
//!
//! `get` checks memory first, then the durable store, promoting durable hits
//! into memory. `put` writes memory and then synchronously writes the durable
//! store with the same value and timestamp. Eviction only drops memory.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use carbo_core::{CacheConfig, CacheEntry, CacheError, CacheName};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::lmdb_backend::LmdbStore;
use crate::lru::LruMap;

/// Statistics about one named cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from memory or durable storage.
    pub hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
    /// Entries currently held in memory.
    pub size: u64,
    /// Entries dropped from memory to stay within capacity.
    pub evictions: u64,
    /// Hits that were served from durable storage and promoted.
    pub durable_reads: u64,
}

impl CacheStats {
    /// Hit ratio in `[0.0, 1.0]`; 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct NamedCache {
    memory: LruMap<CacheEntry>,
    stats: CacheStats,
}

impl NamedCache {
    fn new(capacity: usize) -> Self {
        Self {
            memory: LruMap::new(capacity),
            stats: CacheStats::default(),
        }
    }

    fn store(&mut self, entry: CacheEntry) {
        if self.memory.insert(entry.key.clone(), entry).is_some() {
            self.stats.evictions += 1;
        }
        self.stats.size = self.memory.len() as u64;
    }
}

/// Process-wide cache registry.
///
/// Constructed once (`open` / `in_memory`), passed down as `Arc<CacheStore>`,
/// and flushed at teardown.
pub struct CacheStore {
    capacity: usize,
    caches: BTreeMap<CacheName, Mutex<NamedCache>>,
    durable: Option<Arc<LmdbStore>>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("capacity", &self.capacity)
            .field("durable", &self.durable)
            .finish()
    }
}

impl CacheStore {
    fn with_backend(capacity: usize, durable: Option<Arc<LmdbStore>>) -> Self {
        let caches = CacheName::ALL
            .iter()
            .map(|name| (*name, Mutex::new(NamedCache::new(capacity))))
            .collect();
        Self {
            capacity: capacity.max(1),
            caches,
            durable,
        }
    }

    /// Open the durable store described by `config`. A disabled cache
    /// yields a memory-only store.
    pub fn open(config: &CacheConfig) -> Result<Self, CacheError> {
        if !config.enabled {
            return Ok(Self::in_memory(config.capacity));
        }
        let store = LmdbStore::open_default(&config.dir, config.map_size)?;
        tracing::info!(
            dir = %config.dir.display(),
            capacity = config.capacity,
            "Cache store opened"
        );
        Ok(Self::with_backend(config.capacity, Some(Arc::new(store))))
    }

    /// Wrap an already-open durable store.
    pub fn with_durable(capacity: usize, store: Arc<LmdbStore>) -> Self {
        Self::with_backend(capacity, Some(store))
    }

    /// Memory-only store; nothing survives the process.
    pub fn in_memory(capacity: usize) -> Self {
        Self::with_backend(capacity, None)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_persistent(&self) -> bool {
        self.durable.is_some()
    }

    /// Shared handle to the durable store, if any.
    pub fn durable(&self) -> Option<Arc<LmdbStore>> {
        self.durable.clone()
    }

    fn slot(&self, cache: CacheName) -> &Mutex<NamedCache> {
        // every CacheName is inserted at construction
        &self.caches[&cache]
    }

    fn with_cache<R>(&self, cache: CacheName, f: impl FnOnce(&mut NamedCache) -> R) -> R {
        let mut guard = match self.slot(cache).lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Look up `key`. Corrupt or mistyped values count as misses.
    pub fn get<T: DeserializeOwned>(&self, cache: CacheName, key: &str) -> Option<T> {
        let in_memory = self.with_cache(cache, |c| c.memory.get(key).map(|e| e.value.clone()));
        if let Some(value) = in_memory {
            match serde_json::from_value::<T>(value) {
                Ok(decoded) => {
                    self.with_cache(cache, |c| c.stats.hits += 1);
                    tracing::debug!(cache = %cache, key, "Cache hit");
                    return Some(decoded);
                }
                Err(e) => {
                    tracing::warn!(cache = %cache, key, error = %e, "Cached value has unexpected shape");
                }
            }
        }

        if let Some((value, inserted_at)) = self.read_durable(cache, key) {
            if let Ok(decoded) = serde_json::from_value::<T>(value.clone()) {
                self.with_cache(cache, |c| {
                    c.store(CacheEntry {
                        key: key.to_string(),
                        value,
                        inserted_at,
                    });
                    c.stats.hits += 1;
                    c.stats.durable_reads += 1;
                });
                tracing::debug!(cache = %cache, key, "Cache hit (durable)");
                return Some(decoded);
            }
            tracing::warn!(cache = %cache, key, "Durable value has unexpected shape, treating as miss");
        }

        self.with_cache(cache, |c| c.stats.misses += 1);
        tracing::debug!(cache = %cache, key, "Cache miss");
        None
    }

    fn read_durable(&self, cache: CacheName, key: &str) -> Option<(serde_json::Value, DateTime<Utc>)> {
        let durable = self.durable.as_ref()?;
        match durable.get::<serde_json::Value>(cache.as_db_str(), key) {
            Ok(found) => found,
            Err(CacheError::Corrupted { reason, .. }) => {
                tracing::warn!(cache = %cache, key, reason = %reason, "Corrupted cache entry, treating as miss");
                None
            }
            Err(e) => {
                tracing::error!(cache = %cache, key, error = %e, "Durable cache read failed");
                None
            }
        }
    }

    /// Store `value` under `key`. Memory is always updated; a durable write
    /// failure is logged and leaves the entry memory-only.
    pub fn put<T: Serialize>(&self, cache: CacheName, key: &str, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(cache = %cache, key, error = %e, "Failed to serialize cache value");
                return;
            }
        };
        let inserted_at = Utc::now();

        if let Some(durable) = &self.durable {
            if let Err(e) = durable.put(cache.as_db_str(), key, &value, inserted_at) {
                tracing::error!(cache = %cache, key, error = %e, "Durable cache write failed");
            }
        }

        self.with_cache(cache, |c| {
            c.store(CacheEntry {
                key: key.to_string(),
                value,
                inserted_at,
            })
        });
    }

    /// Memory-resident entry, without touching recency or stats.
    pub fn peek_entry(&self, cache: CacheName, key: &str) -> Option<CacheEntry> {
        self.with_cache(cache, |c| c.memory.peek(key).cloned())
    }

    pub fn contains_in_memory(&self, cache: CacheName, key: &str) -> bool {
        self.with_cache(cache, |c| c.memory.contains_key(key))
    }

    pub fn stats(&self, cache: CacheName) -> CacheStats {
        self.with_cache(cache, |c| c.stats)
    }

    pub fn all_stats(&self) -> BTreeMap<CacheName, CacheStats> {
        CacheName::ALL
            .iter()
            .map(|name| (*name, self.stats(*name)))
            .collect()
    }

    pub fn memory_len(&self, cache: CacheName) -> usize {
        self.with_cache(cache, |c| c.memory.len())
    }

    /// Durable entry count; 0 for a memory-only store.
    pub fn durable_len(&self, cache: CacheName) -> Result<u64, CacheError> {
        match &self.durable {
            Some(durable) => durable.len(cache.as_db_str()),
            None => Ok(0),
        }
    }

    /// Drop every entry of `cache` from memory and durable storage.
    pub fn clear(&self, cache: CacheName) -> Result<(), CacheError> {
        self.with_cache(cache, |c| {
            c.memory.clear();
            c.stats.size = 0;
        });
        if let Some(durable) = &self.durable {
            durable.clear(cache.as_db_str())?;
        }
        tracing::info!(cache = %cache, "Cache cleared");
        Ok(())
    }

    /// Force durable state to disk.
    pub fn flush(&self) -> Result<(), CacheError> {
        if let Some(durable) = &self.durable {
            durable.force_sync()?;
        }
        Ok(())
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        /// Memory size never exceeds capacity and the latest value for each
        /// key resident in memory equals the last one written.
        #[test]
        fn prop_memory_bounded(
            capacity in 1usize..8,
            writes in proptest::collection::vec((0u8..16, any::<u32>()), 1..100),
        ) {
            let store = CacheStore::in_memory(capacity);
            let mut last = std::collections::HashMap::new();
            for (key, value) in &writes {
                let key = key.to_string();
                store.put(CacheName::Properties, &key, value);
                last.insert(key, *value);
                prop_assert!(store.memory_len(CacheName::Properties) <= capacity);
            }
            for (key, value) in &last {
                if let Some(entry) = store.peek_entry(CacheName::Properties, key) {
                    prop_assert_eq!(entry.value, serde_json::json!(value));
                }
            }
        }
    }
}
