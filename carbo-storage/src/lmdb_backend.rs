//! LMDB-backed durable store with one named database per namespace.
//!
//! Uses the heed crate (Rust bindings for LMDB). Each namespace is an
//! independent named database inside a single environment, so a corrupted
//! entry in one namespace never affects reads from another.
//!
//! # Entry format
//!
//! `[timestamp millis: 8 bytes LE][json value]`
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Read transactions serve `get`/`iter`;
//! write transactions serve `put`, `delete` and `clear`.

use std::collections::HashMap;
use std::path::Path;

use carbo_core::{CacheError, CacheName};
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use serde::{de::DeserializeOwned, Serialize};

/// Failed identifiers persisted by the error tracker.
pub const FAILED_IDENTIFIERS_DB: &str = "failed_identifiers";

/// Server-error window checkpoint.
pub const TRACKER_STATE_DB: &str = "tracker_state";

/// Every namespace opened by [`LmdbStore::open_default`].
pub fn default_namespaces() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = CacheName::ALL.iter().map(|c| c.as_db_str()).collect();
    names.push(FAILED_IDENTIFIERS_DB);
    names.push(TRACKER_STATE_DB);
    names
}

/// A raw durable entry: insertion time plus undecoded JSON bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub inserted_at: DateTime<Utc>,
    pub bytes: Vec<u8>,
}

impl RawEntry {
    /// Decode the JSON payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.bytes)
    }
}

fn encode_entry<T: Serialize>(value: &T, at: DateTime<Utc>) -> Result<Vec<u8>, CacheError> {
    let value_bytes =
        serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
    let mut full_bytes = Vec::with_capacity(8 + value_bytes.len());
    full_bytes.extend_from_slice(&at.timestamp_millis().to_le_bytes());
    full_bytes.extend_from_slice(&value_bytes);
    Ok(full_bytes)
}

fn decode_entry(namespace: &str, key: &str, bytes: &[u8]) -> Result<RawEntry, CacheError> {
    if bytes.len() < 8 {
        return Err(CacheError::Corrupted {
            cache: namespace.to_string(),
            key: key.to_string(),
            reason: format!("entry is {} bytes, shorter than its header", bytes.len()),
        });
    }
    let mut timestamp_bytes = [0u8; 8];
    timestamp_bytes.copy_from_slice(&bytes[0..8]);
    let timestamp_millis = i64::from_le_bytes(timestamp_bytes);
    let inserted_at = DateTime::from_timestamp_millis(timestamp_millis).unwrap_or_else(Utc::now);
    Ok(RawEntry {
        inserted_at,
        bytes: bytes[8..].to_vec(),
    })
}

fn txn_err(e: heed::Error) -> CacheError {
    CacheError::Transaction(e.to_string())
}

/// LMDB environment holding a fixed set of named databases.
pub struct LmdbStore {
    env: Env,
    dbs: HashMap<&'static str, Database<Bytes, Bytes>>,
}

impl std::fmt::Debug for LmdbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.dbs.keys().collect();
        names.sort();
        f.debug_struct("LmdbStore")
            .field("path", &self.env.path())
            .field("namespaces", &names)
            .finish()
    }
}

impl LmdbStore {
    /// Open (creating if needed) an environment under `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the environment
    /// cannot be opened, or a named database cannot be created.
    pub fn open<P: AsRef<Path>>(
        path: P,
        map_size: usize,
        namespaces: &[&'static str],
    ) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path per process;
        // CacheStore owns it and shares it through an Arc.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(namespaces.len() as u32)
                .open(path.as_ref())
        }
        .map_err(|e| CacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let mut dbs = HashMap::with_capacity(namespaces.len());
        for name in namespaces {
            let db: Database<Bytes, Bytes> = env
                .create_database(&mut wtxn, Some(name))
                .map_err(|e| CacheError::DbOpen {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
            dbs.insert(*name, db);
        }
        wtxn.commit().map_err(txn_err)?;

        tracing::debug!(path = %path.as_ref().display(), namespaces = namespaces.len(), "LMDB store opened");
        Ok(Self { env, dbs })
    }

    /// Open with every cache namespace plus the tracker namespaces.
    pub fn open_default<P: AsRef<Path>>(path: P, map_size: usize) -> Result<Self, CacheError> {
        Self::open(path, map_size, &default_namespaces())
    }

    fn db(&self, namespace: &str) -> Result<Database<Bytes, Bytes>, CacheError> {
        self.dbs
            .get(namespace)
            .copied()
            .ok_or_else(|| CacheError::UnknownNamespace(namespace.to_string()))
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.dbs.contains_key(namespace)
    }

    /// Read a raw entry. A truncated entry is `CacheError::Corrupted`.
    pub fn get_raw(&self, namespace: &str, key: &str) -> Result<Option<RawEntry>, CacheError> {
        let db = self.db(namespace)?;
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match db.get(&rtxn, key.as_bytes()).map_err(txn_err)? {
            Some(bytes) => decode_entry(namespace, key, bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Read and decode an entry. A payload that fails to decode is
    /// `CacheError::Corrupted`.
    pub fn get<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<(T, DateTime<Utc>)>, CacheError> {
        let Some(raw) = self.get_raw(namespace, key)? else {
            return Ok(None);
        };
        let value = raw.decode().map_err(|e| CacheError::Corrupted {
            cache: namespace.to_string(),
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some((value, raw.inserted_at)))
    }

    pub fn put<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        inserted_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let db = self.db(namespace)?;
        let full_bytes = encode_entry(value, inserted_at)?;
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        db.put(&mut wtxn, key.as_bytes(), &full_bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)
    }

    /// Returns whether the key existed.
    pub fn delete(&self, namespace: &str, key: &str) -> Result<bool, CacheError> {
        let db = self.db(namespace)?;
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let deleted = db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    pub fn clear(&self, namespace: &str) -> Result<(), CacheError> {
        let db = self.db(namespace)?;
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        db.clear(&mut wtxn).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)
    }

    pub fn len(&self, namespace: &str) -> Result<u64, CacheError> {
        let db = self.db(namespace)?;
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        db.len(&rtxn).map_err(txn_err)
    }

    /// All entries of a namespace in key order. Entries with an unreadable
    /// header or non-UTF-8 key are skipped.
    pub fn entries(&self, namespace: &str) -> Result<Vec<(String, RawEntry)>, CacheError> {
        let db = self.db(namespace)?;
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let iter = db.iter(&rtxn).map_err(txn_err)?;

        let mut out = Vec::new();
        for result in iter {
            let (key, bytes) = match result {
                Ok(pair) => pair,
                Err(_) => continue,
            };
            let Ok(key) = std::str::from_utf8(key) else {
                continue;
            };
            match decode_entry(namespace, key, bytes) {
                Ok(entry) => out.push((key.to_string(), entry)),
                Err(e) => tracing::warn!(namespace, key, error = %e, "Skipping corrupted entry"),
            }
        }
        Ok(out)
    }

    /// Write a raw byte payload without the entry header. Test-only hook for
    /// corruption scenarios.
    #[cfg(test)]
    pub(crate) fn put_bytes(&self, namespace: &str, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let db = self.db(namespace)?;
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        db.put(&mut wtxn, key.as_bytes(), bytes).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)
    }

    /// Force the environment to disk.
    pub fn force_sync(&self) -> Result<(), CacheError> {
        self.env.force_sync().map_err(txn_err)
    }
}
