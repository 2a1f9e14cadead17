//! Record and graph types produced by the pipeline

use crate::{Category, ClassificationPath, FailureReason};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ============================================================================
// CACHE
// ============================================================================

/// A cached value with its insertion time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub inserted_at: DateTime<Utc>,
}

// ============================================================================
// ONTOLOGY
// ============================================================================

/// Directed relation between two ontology nodes, e.g. `glucose` *is a*
/// `aldohexose`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OntologyEdge {
    pub source_id: u64,
    pub source_label: Option<String>,
    pub relation: String,
    pub target_id: u64,
    pub target_label: Option<String>,
}

impl OntologyEdge {
    pub fn new(source_id: u64, relation: impl Into<String>, target_id: u64) -> Self {
        Self {
            source_id,
            source_label: None,
            relation: relation.into(),
            target_id,
            target_label: None,
        }
    }

    pub fn with_labels(
        mut self,
        source_label: impl Into<String>,
        target_label: impl Into<String>,
    ) -> Self {
        self.source_label = Some(source_label.into());
        self.target_label = Some(target_label.into());
        self
    }

    /// Relation comparison ignores case and surrounding whitespace.
    pub fn has_relation(&self, relation: &str) -> bool {
        self.relation.trim().eq_ignore_ascii_case(relation.trim())
    }
}

/// A node assembled from its cached parent and child edges.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OntologyNode {
    pub id: u64,
    pub label: Option<String>,
    pub parents: BTreeSet<u64>,
    pub children: BTreeSet<u64>,
}

impl OntologyNode {
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Category plus the branch (subclass) label that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Category,
    pub subclass: Option<String>,
}

impl ClassificationResult {
    pub fn new(category: Category, subclass: Option<String>) -> Self {
        Self { category, subclass }
    }

    /// Not a carbohydrate.
    pub fn none() -> Self {
        Self::new(Category::None, None)
    }

    pub fn is_carbohydrate(&self) -> bool {
        self.category.is_carbohydrate()
    }
}

// ============================================================================
// COMPOUNDS
// ============================================================================

/// Properties of a resolved compound.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompoundProperties {
    pub compound_id: u64,
    pub iupac_name: Option<String>,
    pub molecular_formula: Option<String>,
    pub molecular_weight: Option<f64>,
    pub inchi: Option<String>,
    pub inchikey: Option<String>,
    pub smiles: Option<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

/// Per-record failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub reason: FailureReason,
    pub message: String,
}

impl RecordError {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

/// One output row per input identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundRecord {
    pub identifier: String,
    pub compound_id: Option<u64>,
    pub properties: Option<CompoundProperties>,
    pub ontology_id: Option<u64>,
    pub classification: Option<ClassificationResult>,
    pub path: Option<ClassificationPath>,
    /// Remote classification terms the fallback path matched against.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classification_terms: Vec<String>,
    pub error: Option<RecordError>,
}

impl CompoundRecord {
    pub fn pending(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            compound_id: None,
            properties: None,
            ontology_id: None,
            classification: None,
            path: None,
            classification_terms: Vec::new(),
            error: None,
        }
    }

    pub fn failed(identifier: impl Into<String>, error: RecordError) -> Self {
        Self {
            error: Some(error),
            ..Self::pending(identifier)
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.compound_id.is_some()
    }

    pub fn is_classified(&self) -> bool {
        self.classification.is_some()
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn category(&self) -> Option<Category> {
        self.classification.as_ref().map(|c| c.category)
    }
}

// ============================================================================
// ERROR TRACKING
// ============================================================================

/// Persisted record of an identifier that failed in a previous run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedIdentifierRecord {
    pub identifier: String,
    pub reason: FailureReason,
    pub message: String,
    pub attempts: u32,
    pub last_attempt: DateTime<Utc>,
}

/// Checkpoint of the server-error window.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorWindowState {
    pub errors: Vec<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_relation_match_is_case_insensitive() {
        let edge = OntologyEdge::new(17634, "Is A ", 4167);
        assert!(edge.has_relation("is a"));
        assert!(!edge.has_relation("has part"));
    }

    #[test]
    fn test_failed_record_is_unresolved() {
        let record = CompoundRecord::failed(
            "XXXX",
            RecordError::new(FailureReason::MalformedInput, "empty"),
        );
        assert!(!record.is_resolved());
        assert!(record.is_failed());
        assert_eq!(record.category(), None);
    }

    #[test]
    fn test_compound_properties_synonyms_default() {
        let json = r#"{"compound_id":5793,"iupac_name":null,"molecular_formula":"C6H12O6",
            "molecular_weight":180.16,"inchi":null,"inchikey":null,"smiles":null}"#;
        let props: CompoundProperties = serde_json::from_str(json).unwrap();
        assert_eq!(props.compound_id, 5793);
        assert!(props.synonyms.is_empty());
    }

    #[test]
    fn test_record_terms_survive_serde_and_default_when_absent() {
        let record = CompoundRecord {
            compound_id: Some(1005),
            classification_terms: vec!["Oligosaccharide".to_string()],
            ..CompoundRecord::pending("sucrose")
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: CompoundRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);

        let bare = serde_json::to_string(&CompoundRecord::pending("water")).unwrap();
        assert!(!bare.contains("classification_terms"));
        let back: CompoundRecord = serde_json::from_str(&bare).unwrap();
        assert!(back.classification_terms.is_empty());
    }
}
