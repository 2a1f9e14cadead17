//! CARBO Test Utilities
//!
//! Shared test infrastructure for the CARBO workspace:
//! - In-memory fakes for the ontology and property services
//! - A small ChEBI-shaped fixture graph and matching compounds
//! - Proptest generators for identifiers and records
//! - Assertions for CARBO error variants

pub use carbo_core::{
    Category, CompoundProperties, IdentifierKind, OntologyEdge, OntologyService,
    PropertyService, RemoteError,
};

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const IS_A: &str = "is a";

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Decrement a per-key failure budget; true if this call should fail.
fn take_failure<K: std::hash::Hash + Eq>(budget: &Mutex<HashMap<K, u32>>, key: &K) -> bool {
    let mut budget = lock(budget);
    match budget.get_mut(key) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

// ============================================================================
// FAKE ONTOLOGY SERVICE
// ============================================================================

/// In-memory ontology. Nodes that were never mentioned are `NotFound`.
#[derive(Debug, Default)]
pub struct FakeOntologyService {
    edges: Vec<OntologyEdge>,
    labels: BTreeMap<u64, String>,
    transient_failures: Mutex<HashMap<u64, u32>>,
    always_failing: HashSet<u64>,
    children_calls: Mutex<HashMap<u64, u32>>,
    parents_calls: Mutex<HashMap<u64, u32>>,
}

impl FakeOntologyService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a node and its label.
    pub fn node(mut self, id: u64, label: impl Into<String>) -> Self {
        self.labels.insert(id, label.into());
        self
    }

    /// `child` *is a* `parent`.
    pub fn is_a(self, child: u64, parent: u64) -> Self {
        self.relation(child, IS_A, parent)
    }

    pub fn relation(mut self, source: u64, relation: &str, target: u64) -> Self {
        self.labels.entry(source).or_insert_with(|| format!("node {}", source));
        self.labels.entry(target).or_insert_with(|| format!("node {}", target));
        self.edges.push(OntologyEdge::new(source, relation, target));
        self
    }

    /// Fail the next `times` calls touching `node` with a 503.
    pub fn fail_transient(self, node: u64, times: u32) -> Self {
        lock(&self.transient_failures).insert(node, times);
        self
    }

    /// Every call touching `node` fails with a 503.
    pub fn fail_always(mut self, node: u64) -> Self {
        self.always_failing.insert(node);
        self
    }

    pub fn label(&self, id: u64) -> Option<&str> {
        self.labels.get(&id).map(String::as_str)
    }

    pub fn children_calls(&self, node: u64) -> u32 {
        lock(&self.children_calls).get(&node).copied().unwrap_or(0)
    }

    pub fn parents_calls(&self, node: u64) -> u32 {
        lock(&self.parents_calls).get(&node).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        lock(&self.children_calls).values().sum::<u32>()
            + lock(&self.parents_calls).values().sum::<u32>()
    }

    fn labelled(&self, edge: &OntologyEdge) -> OntologyEdge {
        let mut edge = edge.clone();
        edge.source_label = self.labels.get(&edge.source_id).cloned();
        edge.target_label = self.labels.get(&edge.target_id).cloned();
        edge
    }

    fn check(&self, node: u64) -> Result<(), RemoteError> {
        if self.always_failing.contains(&node) || take_failure(&self.transient_failures, &node) {
            return Err(RemoteError::transient("fake-ontology", Some(503), "injected failure"));
        }
        if !self.labels.contains_key(&node) {
            return Err(RemoteError::not_found("fake-ontology", format!("CHEBI:{}", node)));
        }
        Ok(())
    }
}

#[async_trait]
impl OntologyService for FakeOntologyService {
    async fn fetch_children(&self, node_id: u64) -> Result<Vec<OntologyEdge>, RemoteError> {
        *lock(&self.children_calls).entry(node_id).or_insert(0) += 1;
        self.check(node_id)?;
        Ok(self
            .edges
            .iter()
            .filter(|e| e.target_id == node_id)
            .map(|e| self.labelled(e))
            .collect())
    }

    async fn fetch_parents(&self, node_id: u64) -> Result<Vec<OntologyEdge>, RemoteError> {
        *lock(&self.parents_calls).entry(node_id).or_insert(0) += 1;
        self.check(node_id)?;
        Ok(self
            .edges
            .iter()
            .filter(|e| e.source_id == node_id)
            .map(|e| self.labelled(e))
            .collect())
    }

    fn name(&self) -> &'static str {
        "fake-ontology"
    }
}

// ============================================================================
// FAKE PROPERTY SERVICE
// ============================================================================

type ResolveHook = Box<dyn Fn(u32) + Send + Sync>;

/// In-memory compound database.
#[derive(Default)]
pub struct FakePropertyService {
    identifiers: HashMap<String, u64>,
    compounds: BTreeMap<u64, CompoundProperties>,
    synonyms: BTreeMap<u64, Vec<String>>,
    classifications: BTreeMap<u64, Vec<String>>,
    malformed: HashSet<String>,
    always_failing: HashSet<String>,
    resolve_failures: Mutex<HashMap<String, u32>>,
    property_failures: AtomicU32,
    classification_failing: HashSet<u64>,
    latency: Option<Duration>,
    resolve_hook: Option<ResolveHook>,
    resolve_calls: AtomicU32,
    property_batches: Mutex<Vec<usize>>,
    synonym_batches: Mutex<Vec<usize>>,
    classification_calls: AtomicU32,
}

impl FakePropertyService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compound reachable through `identifier`.
    pub fn compound(
        mut self,
        identifier: impl Into<String>,
        properties: CompoundProperties,
        synonyms: &[&str],
    ) -> Self {
        let id = properties.compound_id;
        self.identifiers.insert(identifier.into(), id);
        self.synonyms
            .insert(id, synonyms.iter().map(|s| s.to_string()).collect());
        self.compounds.insert(id, properties);
        self
    }

    /// An identifier that resolves but has no property row.
    pub fn bare_identifier(mut self, identifier: impl Into<String>, id: u64) -> Self {
        self.identifiers.insert(identifier.into(), id);
        self
    }

    pub fn classification(mut self, id: u64, terms: &[&str]) -> Self {
        self.classifications
            .insert(id, terms.iter().map(|s| s.to_string()).collect());
        self
    }

    /// The service rejects `identifier` as unparseable (HTTP 400).
    pub fn malformed(mut self, identifier: impl Into<String>) -> Self {
        self.malformed.insert(identifier.into());
        self
    }

    /// Resolving `identifier` fails with a 503 on every attempt.
    pub fn fail_resolve_always(mut self, identifier: impl Into<String>) -> Self {
        self.always_failing.insert(identifier.into());
        self
    }

    /// Resolving `identifier` fails with a 503 the next `times` attempts.
    pub fn fail_resolve_transient(self, identifier: impl Into<String>, times: u32) -> Self {
        lock(&self.resolve_failures).insert(identifier.into(), times);
        self
    }

    /// The next `times` property batches fail with a 503.
    pub fn fail_properties_transient(self, times: u32) -> Self {
        self.property_failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn fail_classification(mut self, id: u64) -> Self {
        self.classification_failing.insert(id);
        self
    }

    /// Sleep this long inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Called with the running resolve count at the start of each resolve.
    pub fn on_resolve(mut self, hook: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.resolve_hook = Some(Box::new(hook));
        self
    }

    /// Add `count` plain compounds keyed by synthetic InChIKeys, with ids
    /// starting at `first_id`. Returns the identifiers in id order.
    pub fn bulk(mut self, count: u32, first_id: u64) -> (Self, Vec<String>) {
        let mut keys = Vec::with_capacity(count as usize);
        for i in 0..count {
            let key = synthetic_inchikey(i);
            let id = first_id + u64::from(i);
            self.identifiers.insert(key.clone(), id);
            self.compounds.insert(id, fixtures::properties(id, "C6H12O6"));
            self.synonyms.insert(id, vec![format!("compound {}", id)]);
            keys.push(key);
        }
        (self, keys)
    }

    pub fn resolve_calls(&self) -> u32 {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    /// Sizes of the property batches requested so far.
    pub fn property_batches(&self) -> Vec<usize> {
        lock(&self.property_batches).clone()
    }

    pub fn synonym_batches(&self) -> Vec<usize> {
        lock(&self.synonym_batches).clone()
    }

    pub fn classification_calls(&self) -> u32 {
        self.classification_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl std::fmt::Debug for FakePropertyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakePropertyService")
            .field("identifiers", &self.identifiers.len())
            .field("compounds", &self.compounds.len())
            .field("latency", &self.latency)
            .finish()
    }
}

#[async_trait]
impl PropertyService for FakePropertyService {
    async fn resolve_identifier(
        &self,
        identifier: &str,
        _kind: IdentifierKind,
    ) -> Result<u64, RemoteError> {
        let count = self.resolve_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = &self.resolve_hook {
            hook(count);
        }
        self.pause().await;
        if self.malformed.contains(identifier) {
            return Err(RemoteError::malformed(identifier, "unparseable structure"));
        }
        if self.always_failing.contains(identifier)
            || take_failure(&self.resolve_failures, &identifier.to_string())
        {
            return Err(RemoteError::transient("fake-properties", Some(503), "injected failure"));
        }
        self.identifiers
            .get(identifier)
            .copied()
            .ok_or_else(|| RemoteError::not_found("fake-properties", identifier))
    }

    async fn fetch_properties(&self, ids: &[u64]) -> Result<Vec<CompoundProperties>, RemoteError> {
        lock(&self.property_batches).push(ids.len());
        self.pause().await;
        let failing = self
            .property_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RemoteError::transient("fake-properties", Some(503), "injected failure"));
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.compounds.get(id).cloned())
            .collect())
    }

    async fn fetch_synonyms(&self, ids: &[u64]) -> Result<BTreeMap<u64, Vec<String>>, RemoteError> {
        lock(&self.synonym_batches).push(ids.len());
        self.pause().await;
        Ok(ids
            .iter()
            .filter_map(|id| self.synonyms.get(id).map(|s| (*id, s.clone())))
            .collect())
    }

    async fn fetch_classification(&self, id: u64) -> Result<Vec<String>, RemoteError> {
        self.classification_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.classification_failing.contains(&id) {
            return Err(RemoteError::transient("fake-properties", Some(500), "injected failure"));
        }
        if !self.compounds.contains_key(&id) {
            return Err(RemoteError::not_found("fake-properties", format!("CID {}", id)));
        }
        Ok(self.classifications.get(&id).cloned().unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "fake-properties"
    }
}

/// A well-formed InChIKey derived from `n`. Distinct inputs give distinct keys.
pub fn synthetic_inchikey(n: u32) -> String {
    let mut block = String::with_capacity(14);
    let mut rest = n;
    for _ in 0..14 {
        block.push(char::from(b'A' + (rest % 26) as u8));
        rest /= 26;
    }
    format!("{}-SYNTHETICA-N", block)
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for CARBO inputs.

    use super::*;
    use proptest::prelude::*;

    /// Strings with the InChIKey shape.
    pub fn arb_inchikey() -> impl Strategy<Value = String> {
        "[A-Z]{14}-[A-Z]{10}-[A-Z]"
    }

    /// SMILES-like strings that can never be mistaken for an InChIKey.
    pub fn arb_smiles() -> impl Strategy<Value = String> {
        "[CNOcno()=#1-6]{1,40}"
    }

    pub fn arb_identifier() -> impl Strategy<Value = String> {
        prop_oneof![arb_inchikey(), arb_smiles()]
    }

    pub fn arb_category() -> impl Strategy<Value = Category> {
        (0usize..Category::ALL.len()).prop_map(|i| Category::ALL[i])
    }

    pub fn arb_properties() -> impl Strategy<Value = CompoundProperties> {
        (
            1u64..10_000_000,
            proptest::option::of("[A-Z][a-z]?[0-9]{0,2}"),
            proptest::option::of(1.0f64..2_000.0),
            proptest::collection::vec("[a-zA-Z0-9 :-]{1,20}", 0..5),
        )
            .prop_map(|(compound_id, formula, weight, synonyms)| CompoundProperties {
                compound_id,
                molecular_formula: formula,
                molecular_weight: weight,
                synonyms,
                ..CompoundProperties::default()
            })
    }

    /// Parent lists for nodes `1..=n`; each node's parents are drawn from
    /// all nodes, so cycles and diamonds both occur.
    pub fn arb_graph(max_nodes: u64) -> impl Strategy<Value = Vec<(u64, Vec<u64>)>> {
        (2..=max_nodes).prop_flat_map(|n| {
            proptest::collection::vec(proptest::collection::vec(1..=n, 0..3), n as usize).prop_map(
                |parents| {
                    parents
                        .into_iter()
                        .enumerate()
                        .map(|(i, p)| (i as u64 + 1, p))
                        .collect()
                },
            )
        })
    }

    /// Fake ontology built from an `arb_graph` value.
    pub fn ontology_from_graph(graph: &[(u64, Vec<u64>)]) -> FakeOntologyService {
        let mut service = FakeOntologyService::new();
        for (id, _) in graph {
            service = service.node(*id, format!("node {}", id));
        }
        for (id, parents) in graph {
            for parent in parents {
                service = service.is_a(*id, *parent);
            }
        }
        service
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! A ChEBI-shaped slice of the carbohydrate ontology and a few compounds
    //! that land in every category.

    use super::*;

    pub const TOP: u64 = 78616;
    pub const CARBOHYDRATE: u64 = 16646;
    pub const DERIVATIVE: u64 = 63299;

    pub const MONOSACCHARIDE: u64 = 35381;
    pub const HEXOSE: u64 = 18133;
    pub const ALDOSE: u64 = 15693;
    pub const KETOSE: u64 = 24978;
    pub const GLUCOPYRANOSE: u64 = 4167;
    pub const OLIGOSACCHARIDE: u64 = 50699;
    pub const DISACCHARIDE: u64 = 36233;
    pub const SUCROSE: u64 = 17992;
    pub const AMINO_SUGAR: u64 = 28963;
    pub const GLUCOSAMINE: u64 = 5417;
    pub const CARBOHYDRATE_ACID: u64 = 33720;
    pub const GLUCURONIC_ACID: u64 = 18085;
    pub const ALDONIC_ACID: u64 = 33791;
    pub const HEXOSE_PHOSPHATE: u64 = 90001;
    pub const GLYCAN: u64 = 167559;
    pub const N_GLYCAN: u64 = 167560;
    pub const MAIN_GROUP_ENTITY: u64 = 33579;
    pub const WATER: u64 = 15377;
    pub const METABOLITE: u64 = 25212;

    pub const GLUCOSE_INCHIKEY: &str = "WQZGKKKJIJFFOK-GASJEMHNSA-N";
    pub const GLUCOSAMINE_SMILES: &str = "C(C1C(C(C(C(O1)O)N)O)O)O";
    pub const SUCROSE_INCHIKEY: &str = "CZMRCDWAGMRECN-UGDNZRGBSA-N";
    pub const WATER_INCHIKEY: &str = "XLYOFNOQVPJJNP-UHFFFAOYSA-N";
    pub const MISSING_INCHIKEY: &str = "AAAAAAAAAAAAAA-BBBBBBBBBB-C";
    pub const BAD_SMILES: &str = "C1CC(";

    pub const GLUCOSE_CID: u64 = 5793;
    pub const GLUCOSAMINE_CID: u64 = 439213;
    pub const SUCROSE_CID: u64 = 5988;
    pub const WATER_CID: u64 = 962;

    /// The fixture ontology:
    ///
    /// ```text
    /// TOP ── carbohydrate ── monosaccharide ── hexose ─┬─ D-glucopyranose
    ///  │          │               ├─ aldose ───────────┘
    ///  │          │               └─ ketose
    ///  │          └─ oligosaccharide ── disaccharide ── sucrose
    ///  ├─ carbohydrate derivative ── amino sugar ── glucosamine
    ///  │          └─ carbohydrate acid ── glucuronic acid, aldonic acid
    ///  └─ glycan ── N-glycan
    /// main group molecular entity ── water
    /// ```
    ///
    /// `hexose phosphate` sits under both hexose and carbohydrate acid.
    pub fn chebi_ontology() -> FakeOntologyService {
        FakeOntologyService::new()
            .node(TOP, "carbohydrates and carbohydrate derivatives")
            .node(CARBOHYDRATE, "carbohydrate")
            .node(DERIVATIVE, "carbohydrate derivative")
            .node(MONOSACCHARIDE, "monosaccharide")
            .node(HEXOSE, "hexose")
            .node(ALDOSE, "aldose")
            .node(KETOSE, "ketose")
            .node(GLUCOPYRANOSE, "D-glucopyranose")
            .node(OLIGOSACCHARIDE, "oligosaccharide")
            .node(DISACCHARIDE, "disaccharide")
            .node(SUCROSE, "sucrose")
            .node(AMINO_SUGAR, "amino sugar")
            .node(GLUCOSAMINE, "glucosamine")
            .node(CARBOHYDRATE_ACID, "carbohydrate acid")
            .node(GLUCURONIC_ACID, "glucuronic acid")
            .node(ALDONIC_ACID, "aldonic acid")
            .node(HEXOSE_PHOSPHATE, "hexose phosphate")
            .node(GLYCAN, "glycan")
            .node(N_GLYCAN, "N-glycan")
            .node(MAIN_GROUP_ENTITY, "main group molecular entity")
            .node(WATER, "water")
            .node(METABOLITE, "metabolite")
            .is_a(CARBOHYDRATE, TOP)
            .is_a(DERIVATIVE, TOP)
            .is_a(GLYCAN, TOP)
            .is_a(MONOSACCHARIDE, CARBOHYDRATE)
            .is_a(OLIGOSACCHARIDE, CARBOHYDRATE)
            .is_a(HEXOSE, MONOSACCHARIDE)
            .is_a(ALDOSE, MONOSACCHARIDE)
            .is_a(KETOSE, MONOSACCHARIDE)
            .is_a(GLUCOPYRANOSE, HEXOSE)
            .is_a(GLUCOPYRANOSE, ALDOSE)
            .relation(GLUCOPYRANOSE, "has role", METABOLITE)
            .is_a(DISACCHARIDE, OLIGOSACCHARIDE)
            .is_a(SUCROSE, DISACCHARIDE)
            .is_a(AMINO_SUGAR, DERIVATIVE)
            .is_a(CARBOHYDRATE_ACID, DERIVATIVE)
            .is_a(GLUCOSAMINE, AMINO_SUGAR)
            .is_a(GLUCURONIC_ACID, CARBOHYDRATE_ACID)
            .is_a(ALDONIC_ACID, CARBOHYDRATE_ACID)
            .is_a(HEXOSE_PHOSPHATE, HEXOSE)
            .is_a(HEXOSE_PHOSPHATE, CARBOHYDRATE_ACID)
            .is_a(N_GLYCAN, GLYCAN)
            .is_a(WATER, MAIN_GROUP_ENTITY)
    }

    /// Three nodes in an `is a` loop, the last of which also sits under TOP.
    pub fn cyclic_ontology() -> FakeOntologyService {
        FakeOntologyService::new()
            .node(TOP, "carbohydrates and carbohydrate derivatives")
            .node(1, "alpha")
            .node(2, "beta")
            .node(3, "gamma")
            .is_a(1, 2)
            .is_a(2, 3)
            .is_a(3, 1)
            .is_a(3, TOP)
    }

    pub fn properties(id: u64, formula: &str) -> CompoundProperties {
        CompoundProperties {
            compound_id: id,
            molecular_formula: Some(formula.to_string()),
            ..CompoundProperties::default()
        }
    }

    /// Compounds that line up with `chebi_ontology`:
    ///
    /// - glucose carries `CHEBI:4167` (fast path, main carbohydrate group)
    /// - glucosamine carries `chebi 5417` (fast path, other derivative)
    /// - sucrose has no ChEBI synonym; its classification terms name
    ///   "Oligosaccharide" (fallback, other carbohydrate)
    /// - water carries `CHEBI:15377` (not a carbohydrate)
    pub fn pubchem_compounds() -> FakePropertyService {
        FakePropertyService::new()
            .compound(
                GLUCOSE_INCHIKEY,
                CompoundProperties {
                    iupac_name: Some("(3R,4S,5S,6R)-6-(hydroxymethyl)oxane-2,3,4,5-tetrol".into()),
                    molecular_weight: Some(180.16),
                    inchikey: Some(GLUCOSE_INCHIKEY.into()),
                    ..properties(GLUCOSE_CID, "C6H12O6")
                },
                &["D-Glucose", "CHEBI:4167", "Dextrose"],
            )
            .compound(
                GLUCOSAMINE_SMILES,
                CompoundProperties {
                    smiles: Some(GLUCOSAMINE_SMILES.into()),
                    ..properties(GLUCOSAMINE_CID, "C6H13NO5")
                },
                &["glucosamine", "chebi 5417"],
            )
            .compound(
                SUCROSE_INCHIKEY,
                properties(SUCROSE_CID, "C12H22O11"),
                &["sucrose", "Saccharose"],
            )
            .classification(
                SUCROSE_CID,
                &[
                    "carbohydrates and carbohydrate derivatives",
                    "Carbohydrate",
                    "Oligosaccharide",
                    "disaccharide",
                ],
            )
            .compound(
                WATER_INCHIKEY,
                properties(WATER_CID, "H2O"),
                &["water", "CHEBI:15377"],
            )
            .classification(WATER_CID, &["inorganic molecular entity"])
            .malformed(BAD_SMILES)
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for CARBO error variants.

    use super::*;

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &Result<T, RemoteError>) {
        match result {
            Err(RemoteError::NotFound { .. }) => {}
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_malformed<T: std::fmt::Debug>(result: &Result<T, RemoteError>) {
        match result {
            Err(RemoteError::MalformedInput { .. }) => {}
            other => panic!("Expected MalformedInput, got: {:?}", other),
        }
    }

    /// Assert an `ExhaustedRetries` error after exactly `attempts` tries.
    #[track_caller]
    pub fn assert_exhausted<T: std::fmt::Debug>(result: &Result<T, RemoteError>, attempts: u32) {
        match result {
            Err(RemoteError::ExhaustedRetries { attempts: a, .. }) => {
                assert_eq!(*a, attempts, "Wrong attempt count in ExhaustedRetries");
            }
            other => panic!("Expected ExhaustedRetries, got: {:?}", other),
        }
    }
}
