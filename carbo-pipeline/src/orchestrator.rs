//! Batch orchestration: skip, resolve, fetch, classify, report.

use crate::report::{BatchReport, BatchSummary};
use carbo_classify::{Classification, Classifier};
use carbo_core::{
    BatchConfig, CarboConfig, CarboError, CompoundRecord, FailureReason, IdentifierKind,
    OntologyService, PropertyService, RecordError, RemoteError,
};
use carbo_remote::{
    extract_ontology_term_id, ChebiClient, CompoundResolver, OntologyGraphClient, PubChemClient,
};
use carbo_resilience::{ErrorTracker, RemoteGate};
use carbo_storage::CacheStore;
use futures_util::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::Instrument;
use uuid::Uuid;

type Classified = Result<Classification, CarboError>;

/// Runs batches of identifiers through resolution and classification.
pub struct BatchOrchestrator {
    resolver: Arc<CompoundResolver>,
    classifier: Arc<Classifier>,
    tracker: Arc<ErrorTracker>,
    cache: Arc<CacheStore>,
    config: BatchConfig,
}

impl BatchOrchestrator {
    pub fn new(
        resolver: Arc<CompoundResolver>,
        classifier: Arc<Classifier>,
        tracker: Arc<ErrorTracker>,
        cache: Arc<CacheStore>,
        config: BatchConfig,
    ) -> Self {
        Self {
            resolver,
            classifier,
            tracker,
            cache,
            config,
        }
    }

    /// Wire up the public ChEBI and PubChem services from `config`.
    pub fn from_config(config: &CarboConfig) -> Result<Self, CarboError> {
        Self::with_services(
            config,
            Arc::new(ChebiClient::new(&config.ontology)),
            Arc::new(PubChemClient::new(&config.properties)),
        )
    }

    /// Wire up the given services. The cache and the error tracker share one
    /// durable store when caching is enabled.
    pub fn with_services(
        config: &CarboConfig,
        ontology: Arc<dyn OntologyService>,
        properties: Arc<dyn PropertyService>,
    ) -> Result<Self, CarboError> {
        config.validate()?;
        let cache = Arc::new(CacheStore::open(&config.cache)?);
        let tracker = Arc::new(ErrorTracker::open_or_new(
            config.error_tracking.clone(),
            cache.durable(),
        )?);
        let gate = RemoteGate::from_config(config, tracker.clone());

        let graph = Arc::new(OntologyGraphClient::new(
            ontology,
            cache.clone(),
            gate.clone(),
            &config.ontology,
        ));
        let resolver = Arc::new(CompoundResolver::new(
            properties,
            cache.clone(),
            gate,
            config.properties.chunk_size,
        ));
        let classifier = Arc::new(Classifier::new(
            graph,
            resolver.clone(),
            config.anchors.clone(),
        ));
        Ok(Self::new(resolver, classifier, tracker, cache, config.batch.clone()))
    }

    pub fn tracker(&self) -> &Arc<ErrorTracker> {
        &self.tracker
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Process `identifiers` and return one record per input, in order.
    ///
    /// Sending `true` on the `cancel` channel lets in-flight lookups finish
    /// but starts no new ones; every record not finished by then is marked
    /// `cancelled`.
    pub async fn run<S: AsRef<str>>(
        &self,
        identifiers: &[S],
        kind: IdentifierKind,
        cancel: watch::Receiver<bool>,
    ) -> BatchReport {
        let run_id = Uuid::now_v7();
        let span = tracing::info_span!("batch", run_id = %run_id);
        self.run_inner(run_id, identifiers, kind, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner<S: AsRef<str>>(
        &self,
        run_id: Uuid,
        identifiers: &[S],
        kind: IdentifierKind,
        cancel: watch::Receiver<bool>,
    ) -> BatchReport {
        let mut seen = HashSet::new();
        let unique: Vec<String> = identifiers
            .iter()
            .map(|id| id.as_ref().to_string())
            .filter(|id| seen.insert(id.clone()))
            .collect();
        tracing::info!(total = identifiers.len(), unique = unique.len(), "Batch started");

        let mut records: HashMap<String, CompoundRecord> = HashMap::with_capacity(unique.len());

        // Stage 1: skip identifiers earlier runs gave up on.
        let mut pending = Vec::with_capacity(unique.len());
        for identifier in unique.iter() {
            if !self.config.force_retry_failed && self.tracker.is_known_failed(identifier) {
                let message = self
                    .tracker
                    .failed_record(identifier)
                    .map(|r| format!("skipped after earlier failure: {}", r.message))
                    .unwrap_or_else(|| "skipped after earlier failure".to_string());
                records.insert(
                    identifier.clone(),
                    CompoundRecord::failed(
                        identifier.as_str(),
                        RecordError::new(FailureReason::KnownFailed, message),
                    ),
                );
            } else {
                pending.push(identifier.clone());
            }
        }
        if pending.len() < unique.len() {
            tracing::info!(skipped = unique.len() - pending.len(), "Skipping known failures");
        }

        // Stage 2: resolve identifiers to compound ids.
        self.pause_for_cooldown("resolve").await;
        let resolved = self.resolve_all(pending, kind, &cancel).await;
        let mut compounds: BTreeMap<u64, Vec<String>> = BTreeMap::new();
        for (identifier, outcome) in resolved {
            let record = match outcome {
                None => cancelled(&identifier),
                Some(Ok(Some(compound_id))) => {
                    compounds
                        .entry(compound_id)
                        .or_default()
                        .push(identifier.clone());
                    CompoundRecord {
                        compound_id: Some(compound_id),
                        ..CompoundRecord::pending(identifier.as_str())
                    }
                }
                Some(Ok(None)) => CompoundRecord::failed(
                    identifier.as_str(),
                    RecordError::new(FailureReason::NotFound, "no compound matches identifier"),
                ),
                Some(Err(e)) => CompoundRecord::failed(
                    identifier.as_str(),
                    RecordError::new(e.failure_reason(), e.to_string()),
                ),
            };
            records.insert(identifier, record);
        }
        tracing::info!(compounds = compounds.len(), "Resolution finished");

        if is_cancelled(&cancel) {
            self.cancel_unfinished(&mut records);
        } else {
            // Stage 3: properties and synonyms in chunks.
            self.pause_for_cooldown("properties").await;
            let ids: Vec<u64> = compounds.keys().copied().collect();
            let batch = self
                .resolver
                .fetch_properties_batch_while(&ids, || !is_cancelled(&cancel))
                .await;
            let mut classifiable = Vec::with_capacity(ids.len());
            for (compound_id, aliases) in &compounds {
                for identifier in aliases {
                    let Some(record) = records.get_mut(identifier) else {
                        continue;
                    };
                    if let Some(properties) = batch.get(*compound_id) {
                        record.ontology_id = extract_ontology_term_id(properties);
                        record.properties = Some(properties.clone());
                    } else if let Some(error) = batch.failure(*compound_id) {
                        record.error = Some(error.clone());
                    }
                }
                if let Some(properties) = batch.get(*compound_id) {
                    classifiable.push((*compound_id, extract_ontology_term_id(properties)));
                }
            }
            tracing::info!(
                fetched = batch.properties.len(),
                failed = batch.failures.len(),
                "Properties fetched"
            );

            // Stage 4: classify each distinct compound.
            self.pause_for_cooldown("classify").await;
            let outcomes = self.classify_all(classifiable, &cancel).await;
            for (compound_id, outcome) in outcomes {
                for identifier in compounds.get(&compound_id).into_iter().flatten() {
                    let Some(record) = records.get_mut(identifier) else {
                        continue;
                    };
                    match &outcome {
                        None => record.error = Some(cancelled_error()),
                        Some(Ok(classification)) => {
                            record.classification = Some(classification.result.clone());
                            record.path = Some(classification.path);
                            record.classification_terms = classification.terms.clone();
                        }
                        Some(Err(e)) => {
                            record.error = Some(RecordError::new(
                                FailureReason::ClassificationFailed,
                                e.to_string(),
                            ));
                        }
                    }
                }
            }
            if is_cancelled(&cancel) {
                self.cancel_unfinished(&mut records);
            }
        }

        // Stage 5: report failures, assemble in input order.
        self.update_tracker(&records);
        let ordered: Vec<CompoundRecord> = identifiers
            .iter()
            .map(|id| {
                records
                    .get(id.as_ref())
                    .cloned()
                    .unwrap_or_else(|| cancelled(id.as_ref()))
            })
            .collect();
        let summary = BatchSummary::from_records(&ordered, unique.len());
        let was_cancelled = is_cancelled(&cancel);
        tracing::info!(
            resolved = summary.resolved,
            classified = summary.classified,
            carbohydrates = summary.carbohydrates,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled = was_cancelled,
            "Batch finished"
        );
        BatchReport {
            run_id,
            records: ordered,
            summary,
            cancelled: was_cancelled,
        }
    }

    /// `None` marks an identifier never started because of cancellation.
    async fn resolve_all(
        &self,
        pending: Vec<String>,
        kind: IdentifierKind,
        cancel: &watch::Receiver<bool>,
    ) -> Vec<(String, Option<Result<Option<u64>, RemoteError>>)> {
        stream::iter(pending)
            .map(|identifier| async move {
                if is_cancelled(&cancel) {
                    return (identifier, None);
                }
                self.pause_for_cooldown("resolve").await;
                let outcome = self.resolver.resolve_to_id(&identifier, kind).await;
                (identifier, Some(outcome))
            })
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await
    }

    async fn classify_all(
        &self,
        compounds: Vec<(u64, Option<u64>)>,
        cancel: &watch::Receiver<bool>,
    ) -> Vec<(u64, Option<Classified>)> {
        stream::iter(compounds)
            .map(|(compound_id, ontology_id)| async move {
                if is_cancelled(&cancel) {
                    return (compound_id, None);
                }
                self.pause_for_cooldown("classify").await;
                let outcome = self.classifier.classify(ontology_id, compound_id).await;
                (compound_id, Some(outcome))
            })
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await
    }

    async fn pause_for_cooldown(&self, stage: &str) {
        if let Some(remaining) = self.tracker.cooldown_remaining() {
            tracing::info!(stage, remaining_secs = remaining.as_secs(), "Pausing batch for cooldown");
            self.tracker.wait_for_cooldown().await;
        }
    }

    fn cancel_unfinished(&self, records: &mut HashMap<String, CompoundRecord>) {
        for record in records.values_mut() {
            if record.error.is_none() && record.classification.is_none() {
                record.error = Some(cancelled_error());
            }
        }
    }

    fn update_tracker(&self, records: &HashMap<String, CompoundRecord>) {
        for record in records.values() {
            match &record.error {
                Some(error) => {
                    self.tracker
                        .record_failed_identifier(&record.identifier, error.reason, &error.message);
                }
                None if record.is_classified() => {
                    if self.tracker.clear_failed(&record.identifier) {
                        tracing::debug!(identifier = %record.identifier, "Cleared earlier failure");
                    }
                }
                None => {}
            }
        }
    }
}

fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

fn cancelled_error() -> RecordError {
    RecordError::new(FailureReason::Cancelled, "batch cancelled before completion")
}

fn cancelled(identifier: &str) -> CompoundRecord {
    CompoundRecord::failed(identifier, cancelled_error())
}

impl std::fmt::Debug for BatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("resolver", &self.resolver)
            .field("classifier", &self.classifier)
            .field("config", &self.config)
            .finish()
    }
}
