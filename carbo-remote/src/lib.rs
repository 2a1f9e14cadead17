//! CARBO Remote - Ontology and compound lookups
//!
//! `OntologyGraphClient` walks the ChEBI `is a` hierarchy and
//! `CompoundResolver` turns InChIKeys and SMILES into PubChem records. Both
//! cache through `CacheStore` and send every request through `RemoteGate`.
//! The reqwest adapters for the two public services live in `providers`.

pub mod ontology;
pub mod providers;
pub mod resolver;

pub use ontology::OntologyGraphClient;
pub use providers::{ChebiClient, PubChemClient};
pub use resolver::{detect_kind, extract_ontology_term_id, CompoundResolver, PropertyBatch};
