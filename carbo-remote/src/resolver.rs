//! Identifier resolution and batched property retrieval.

use carbo_core::{
    CacheName, CompoundProperties, FailureReason, IdentifierKind, PropertyService, RecordError,
    RemoteError,
};
use carbo_resilience::RemoteGate;
use carbo_storage::CacheStore;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

static INCHIKEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{14}-[A-Z]{10}-[A-Z]$").expect("Invalid InChIKey regex"));

static CHEBI_SYNONYM_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^CHEBI[:\s]+(\d+)$").expect("Invalid ChEBI synonym regex"));

/// Pick the lookup endpoint for an identifier from its shape.
pub fn detect_kind(identifier: &str) -> IdentifierKind {
    if INCHIKEY_PATTERN.is_match(identifier.trim()) {
        IdentifierKind::InchiKey
    } else {
        IdentifierKind::Smiles
    }
}

/// Ontology id named by the first `CHEBI:<n>` synonym.
pub fn extract_ontology_term_id(properties: &CompoundProperties) -> Option<u64> {
    properties.synonyms.iter().find_map(|synonym| {
        CHEBI_SYNONYM_PATTERN
            .captures(synonym.trim())
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    })
}

/// Result of a batched property fetch. Every requested id lands in exactly
/// one of the two maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyBatch {
    pub properties: BTreeMap<u64, CompoundProperties>,
    pub failures: BTreeMap<u64, RecordError>,
}

impl PropertyBatch {
    pub fn get(&self, id: u64) -> Option<&CompoundProperties> {
        self.properties.get(&id)
    }

    pub fn failure(&self, id: u64) -> Option<&RecordError> {
        self.failures.get(&id)
    }

    pub fn len(&self) -> usize {
        self.properties.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves structural identifiers to compound ids and fetches their
/// properties, going through the cache and `RemoteGate`.
pub struct CompoundResolver {
    service: Arc<dyn PropertyService>,
    cache: Arc<CacheStore>,
    gate: RemoteGate,
    chunk_size: usize,
}

impl CompoundResolver {
    pub fn new(
        service: Arc<dyn PropertyService>,
        cache: Arc<CacheStore>,
        gate: RemoteGate,
        chunk_size: usize,
    ) -> Self {
        Self {
            service,
            cache,
            gate,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Compound id for `identifier`, or `None` if the service has no match.
    ///
    /// Empty identifiers and explicit kinds that contradict the identifier's
    /// shape are `MalformedInput` and never reach the network.
    pub async fn resolve_to_id(
        &self,
        identifier: &str,
        kind: IdentifierKind,
    ) -> Result<Option<u64>, RemoteError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(RemoteError::malformed(identifier, "empty identifier"));
        }
        let kind = effective_kind(identifier, kind)?;

        let key = format!("{}:{}", kind.as_db_str(), identifier);
        if let Some(id) = self.cache.get::<u64>(CacheName::Identifiers, &key) {
            tracing::debug!(identifier, compound_id = id, "Identifier cache hit");
            return Ok(Some(id));
        }

        let service = &self.service;
        match self
            .gate
            .call("properties.resolve", || service.resolve_identifier(identifier, kind))
            .await
        {
            Ok(id) => {
                self.cache.put(CacheName::Identifiers, &key, &id);
                Ok(Some(id))
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(identifier, "Identifier not found");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Properties with synonyms for every id in `ids`.
    ///
    /// Cached ids are served locally; the rest go out in chunks of
    /// `chunk_size`, one property call and one synonym call per chunk. A
    /// failed chunk marks only its own ids failed.
    pub async fn fetch_properties_batch(&self, ids: &[u64]) -> PropertyBatch {
        self.fetch_properties_batch_while(ids, || true).await
    }

    /// Like `fetch_properties_batch`, but `keep_going` is checked before
    /// each chunk is sent. Once it returns false the remaining ids are
    /// reported as `cancelled` without a remote call.
    pub async fn fetch_properties_batch_while<F>(&self, ids: &[u64], keep_going: F) -> PropertyBatch
    where
        F: Fn() -> bool,
    {
        let mut batch = PropertyBatch::default();
        let mut seen = BTreeSet::new();
        let mut missing = Vec::new();

        for &id in ids {
            if !seen.insert(id) {
                continue;
            }
            match self
                .cache
                .get::<CompoundProperties>(CacheName::Properties, &id.to_string())
            {
                Some(properties) => {
                    batch.properties.insert(id, properties);
                }
                None => missing.push(id),
            }
        }

        let chunk_count = missing.len().div_ceil(self.chunk_size);
        for (index, chunk) in missing.chunks(self.chunk_size).enumerate() {
            if !keep_going() {
                let skipped = &missing[index * self.chunk_size..];
                tracing::info!(
                    chunk = index + 1,
                    chunks = chunk_count,
                    skipped = skipped.len(),
                    "Stopping property fetch before remaining chunks"
                );
                for &id in skipped {
                    batch.failures.insert(
                        id,
                        RecordError::new(
                            FailureReason::Cancelled,
                            "batch cancelled before properties were fetched",
                        ),
                    );
                }
                break;
            }
            tracing::info!(chunk = index + 1, chunks = chunk_count, size = chunk.len(), "Fetching properties");
            self.fetch_chunk(chunk, &mut batch).await;
        }
        batch
    }

    async fn fetch_chunk(&self, chunk: &[u64], batch: &mut PropertyBatch) {
        let service = &self.service;
        let rows = match self
            .gate
            .call("properties.fetch", || service.fetch_properties(chunk))
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(size = chunk.len(), error = %e, "Property chunk failed");
                for &id in chunk {
                    batch
                        .failures
                        .insert(id, RecordError::new(e.failure_reason(), e.to_string()));
                }
                return;
            }
        };

        let (mut synonyms, synonyms_complete) = self.synonyms_for(chunk).await;
        let mut rows: BTreeMap<u64, CompoundProperties> =
            rows.into_iter().map(|row| (row.compound_id, row)).collect();

        for &id in chunk {
            match rows.remove(&id) {
                Some(mut properties) => {
                    properties.synonyms = synonyms.remove(&id).unwrap_or_default();
                    if synonyms_complete {
                        self.cache
                            .put(CacheName::Properties, &id.to_string(), &properties);
                    }
                    batch.properties.insert(id, properties);
                }
                None => {
                    batch.failures.insert(
                        id,
                        RecordError::new(
                            FailureReason::PropertiesNotFound,
                            format!("no properties returned for CID {}", id),
                        ),
                    );
                }
            }
        }
    }

    /// Synonyms for a chunk, cached per id. The flag is false when the remote
    /// call failed and the map is therefore partial.
    async fn synonyms_for(&self, chunk: &[u64]) -> (BTreeMap<u64, Vec<String>>, bool) {
        let mut synonyms = BTreeMap::new();
        let mut missing = Vec::new();
        for &id in chunk {
            match self
                .cache
                .get::<Vec<String>>(CacheName::Synonyms, &id.to_string())
            {
                Some(cached) => {
                    synonyms.insert(id, cached);
                }
                None => missing.push(id),
            }
        }
        if missing.is_empty() {
            return (synonyms, true);
        }

        let service = &self.service;
        match self
            .gate
            .call("properties.synonyms", || service.fetch_synonyms(&missing))
            .await
        {
            Ok(mut fetched) => {
                for id in missing {
                    let list = fetched.remove(&id).unwrap_or_default();
                    self.cache.put(CacheName::Synonyms, &id.to_string(), &list);
                    synonyms.insert(id, list);
                }
                (synonyms, true)
            }
            Err(e) => {
                tracing::warn!(size = missing.len(), error = %e, "Synonym lookup failed");
                (synonyms, false)
            }
        }
    }

    /// Ontology-sourced classification terms for the fallback path.
    pub async fn fetch_classification_terms(&self, id: u64) -> Result<Vec<String>, RemoteError> {
        let key = id.to_string();
        if let Some(terms) = self.cache.get::<Vec<String>>(CacheName::Classifications, &key) {
            tracing::debug!(compound_id = id, "Classification cache hit");
            return Ok(terms);
        }

        let service = &self.service;
        let terms = match self
            .gate
            .call("properties.classification", || service.fetch_classification(id))
            .await
        {
            Ok(terms) => terms,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };
        self.cache.put(CacheName::Classifications, &key, &terms);
        Ok(terms)
    }
}

fn effective_kind(identifier: &str, kind: IdentifierKind) -> Result<IdentifierKind, RemoteError> {
    let detected = detect_kind(identifier);
    match (kind, detected) {
        (IdentifierKind::Auto, detected) => Ok(detected),
        (IdentifierKind::InchiKey, IdentifierKind::InchiKey) => Ok(IdentifierKind::InchiKey),
        (IdentifierKind::InchiKey, _) => Err(RemoteError::malformed(
            identifier,
            "not shaped like an InChIKey",
        )),
        (IdentifierKind::Smiles, IdentifierKind::InchiKey) => Err(RemoteError::malformed(
            identifier,
            "InChIKey given where SMILES was expected",
        )),
        (IdentifierKind::Smiles, _) => Ok(IdentifierKind::Smiles),
    }
}

impl std::fmt::Debug for CompoundResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompoundResolver")
            .field("service", &self.service.name())
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbo_core::ErrorTrackingConfig;
    use carbo_resilience::{ErrorTracker, FixedRateLimiter, RetryPolicy};
    use carbo_test_utils::assertions::assert_malformed;
    use carbo_test_utils::fixtures::*;
    use carbo_test_utils::FakePropertyService;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn gate() -> RemoteGate {
        RemoteGate::new(
            Arc::new(FixedRateLimiter::new(Duration::ZERO)),
            RetryPolicy::new(3, Duration::from_millis(10), 2.0),
            Arc::new(ErrorTracker::new(ErrorTrackingConfig::default())),
        )
    }

    fn resolver(service: Arc<FakePropertyService>, chunk_size: usize) -> CompoundResolver {
        CompoundResolver::new(service, Arc::new(CacheStore::in_memory(4_096)), gate(), chunk_size)
    }

    #[test]
    fn test_detect_kind() {
        assert_eq!(detect_kind(GLUCOSE_INCHIKEY), IdentifierKind::InchiKey);
        assert_eq!(detect_kind(" WQZGKKKJIJFFOK-GASJEMHNSA-N "), IdentifierKind::InchiKey);
        assert_eq!(detect_kind(GLUCOSAMINE_SMILES), IdentifierKind::Smiles);
        assert_eq!(detect_kind("wqzgkkkjijffok-gasjemhnsa-n"), IdentifierKind::Smiles);
        assert_eq!(detect_kind("WQZGKKKJIJFFOK-GASJEMHNSA"), IdentifierKind::Smiles);
    }

    #[test]
    fn test_extract_ontology_term_id() {
        let mut properties = CompoundProperties {
            synonyms: vec!["D-Glucose".into(), "CHEBI:4167".into(), "CHEBI:17634".into()],
            ..CompoundProperties::default()
        };
        assert_eq!(extract_ontology_term_id(&properties), Some(4167));

        properties.synonyms = vec!["chebi 5417".into()];
        assert_eq!(extract_ontology_term_id(&properties), Some(5417));

        properties.synonyms = vec!["CHEBI:abc".into(), "not CHEBI:1".into()];
        assert_eq!(extract_ontology_term_id(&properties), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_caches_positive_results() {
        let service = Arc::new(pubchem_compounds());
        let resolver = resolver(service.clone(), 512);

        let id = resolver
            .resolve_to_id(GLUCOSE_INCHIKEY, IdentifierKind::Auto)
            .await
            .unwrap();
        assert_eq!(id, Some(GLUCOSE_CID));
        let again = resolver
            .resolve_to_id(GLUCOSE_INCHIKEY, IdentifierKind::InchiKey)
            .await
            .unwrap();
        assert_eq!(again, Some(GLUCOSE_CID));
        assert_eq!(service.resolve_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_not_found_is_none() {
        let service = Arc::new(pubchem_compounds());
        let resolver = resolver(service.clone(), 512);
        let id = resolver
            .resolve_to_id(MISSING_INCHIKEY, IdentifierKind::Auto)
            .await
            .unwrap();
        assert_eq!(id, None);
        assert_eq!(service.resolve_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_input_never_retried() {
        let service = Arc::new(pubchem_compounds());
        let resolver = resolver(service.clone(), 512);

        assert_malformed(&resolver.resolve_to_id("  ", IdentifierKind::Auto).await);
        assert_malformed(&resolver.resolve_to_id(GLUCOSAMINE_SMILES, IdentifierKind::InchiKey).await);
        assert_malformed(&resolver.resolve_to_id(GLUCOSE_INCHIKEY, IdentifierKind::Smiles).await);
        assert_eq!(service.resolve_calls(), 0);

        assert_malformed(&resolver.resolve_to_id(BAD_SMILES, IdentifierKind::Auto).await);
        assert_eq!(service.resolve_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_of_1000_uses_two_chunks() {
        let (service, keys) = FakePropertyService::new().bulk(1_000, 100_000);
        let service = Arc::new(service);
        let resolver = resolver(service.clone(), 512);
        let mut ids = Vec::new();
        for key in &keys {
            ids.push(resolver.resolve_to_id(key, IdentifierKind::Auto).await.unwrap().unwrap());
        }

        let batch = resolver.fetch_properties_batch(&ids).await;
        assert_eq!(batch.properties.len(), 1_000);
        assert!(batch.failures.is_empty());
        assert_eq!(service.property_batches(), vec![512, 488]);
        assert_eq!(service.synonym_batches(), vec![512, 488]);

        let again = resolver.fetch_properties_batch(&ids).await;
        assert_eq!(again, batch);
        assert_eq!(service.property_batches().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_batch_sends_no_further_chunks() {
        let (service, keys) = FakePropertyService::new().bulk(1_000, 200_000);
        let service = Arc::new(service);
        let resolver = resolver(service.clone(), 512);
        let mut ids = Vec::new();
        for key in &keys {
            ids.push(resolver.resolve_to_id(key, IdentifierKind::Auto).await.unwrap().unwrap());
        }

        let checks = AtomicU32::new(0);
        let batch = resolver
            .fetch_properties_batch_while(&ids, || checks.fetch_add(1, Ordering::SeqCst) == 0)
            .await;

        assert_eq!(service.property_batches(), vec![512]);
        assert_eq!(service.synonym_batches(), vec![512]);
        assert_eq!(batch.properties.len(), 512);
        assert_eq!(batch.failures.len(), 488);
        assert!(batch
            .failures
            .values()
            .all(|e| e.reason == FailureReason::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_row_reported_per_id() {
        let service = Arc::new(pubchem_compounds().bare_identifier("C", 424242));
        let resolver = resolver(service, 512);
        let batch = resolver
            .fetch_properties_batch(&[GLUCOSE_CID, 424242, GLUCOSE_CID])
            .await;
        assert_eq!(batch.len(), 2);
        let glucose = batch.get(GLUCOSE_CID).unwrap();
        assert_eq!(extract_ontology_term_id(glucose), Some(4167));
        assert_eq!(
            batch.failure(424242).map(|e| e.reason),
            Some(FailureReason::PropertiesNotFound)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_chunk_marks_only_its_ids() {
        // Three failures exhaust the first chunk's retries; the second
        // chunk succeeds.
        let service = Arc::new(pubchem_compounds().fail_properties_transient(3));
        let resolver = resolver(service, 2);
        let batch = resolver
            .fetch_properties_batch(&[GLUCOSE_CID, SUCROSE_CID, WATER_CID])
            .await;
        assert_eq!(
            batch.failure(GLUCOSE_CID).map(|e| e.reason),
            Some(FailureReason::ExhaustedRetries)
        );
        assert!(batch.failure(SUCROSE_CID).is_some());
        assert!(batch.get(WATER_CID).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_classification_terms_cached() {
        let service = Arc::new(pubchem_compounds());
        let resolver = resolver(service.clone(), 512);
        let terms = resolver.fetch_classification_terms(SUCROSE_CID).await.unwrap();
        assert_eq!(terms[2], "Oligosaccharide");
        resolver.fetch_classification_terms(SUCROSE_CID).await.unwrap();
        assert_eq!(service.classification_calls(), 1);

        let unknown = resolver.fetch_classification_terms(1).await.unwrap();
        assert!(unknown.is_empty());
    }
}
