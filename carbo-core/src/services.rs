//! Remote service traits.
//!
//! Pure interfaces for the ontology and property databases. The reqwest
//! adapters live in carbo-remote; in-memory fakes live in carbo-test-utils.

use crate::{CompoundProperties, IdentifierKind, OntologyEdge, RemoteError};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Ontology database (ChEBI).
///
/// Edges carry their relation label; callers filter on it. A node the
/// service does not know is `RemoteError::NotFound`, distinct from a node
/// with no edges (`Ok(vec![])`).
#[async_trait]
pub trait OntologyService: Send + Sync {
    /// Edges whose target is `node_id` (the sources are its children).
    async fn fetch_children(&self, node_id: u64) -> Result<Vec<OntologyEdge>, RemoteError>;

    /// Edges whose source is `node_id` (the targets are its parents).
    async fn fetch_parents(&self, node_id: u64) -> Result<Vec<OntologyEdge>, RemoteError>;

    /// Service name used in logs and errors.
    fn name(&self) -> &'static str {
        "ontology"
    }
}

/// Compound property database (PubChem).
#[async_trait]
pub trait PropertyService: Send + Sync {
    /// Resolve a structural identifier to its compound id. `kind` is never
    /// `Auto` here; the resolver decides before calling.
    async fn resolve_identifier(
        &self,
        identifier: &str,
        kind: IdentifierKind,
    ) -> Result<u64, RemoteError>;

    /// Batched property lookup. Ids missing from the response are simply
    /// absent from the returned list.
    async fn fetch_properties(&self, ids: &[u64]) -> Result<Vec<CompoundProperties>, RemoteError>;

    /// Batched synonym lookup.
    async fn fetch_synonyms(&self, ids: &[u64]) -> Result<BTreeMap<u64, Vec<String>>, RemoteError>;

    /// Ontology-sourced terms of the compound's classification hierarchy.
    async fn fetch_classification(&self, id: u64) -> Result<Vec<String>, RemoteError>;

    fn name(&self) -> &'static str {
        "properties"
    }
}
