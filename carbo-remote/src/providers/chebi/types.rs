//! ChEBI backend API response types

use carbo_core::OntologyEdge;
use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Deserialize)]
pub struct OntologyResponse {
    #[serde(default)]
    pub ontology_relations: OntologyRelations,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OntologyRelations {
    #[serde(default)]
    pub incoming_relations: Vec<Relation>,
    #[serde(default)]
    pub outgoing_relations: Vec<Relation>,
}

/// `init` *relation_type* `final`, e.g. glucose *is a* aldohexose.
#[derive(Debug, Clone, Deserialize)]
pub struct Relation {
    #[serde(deserialize_with = "chebi_id")]
    pub init_id: u64,
    #[serde(default)]
    pub init_name: Option<String>,
    pub relation_type: String,
    #[serde(deserialize_with = "chebi_id")]
    pub final_id: u64,
    #[serde(default)]
    pub final_name: Option<String>,
}

impl From<Relation> for OntologyEdge {
    fn from(rel: Relation) -> Self {
        OntologyEdge {
            source_id: rel.init_id,
            source_label: rel.init_name,
            relation: rel.relation_type,
            target_id: rel.final_id,
            target_label: rel.final_name,
        }
    }
}

/// Accepts `16646`, `"16646"` and `"CHEBI:16646"`.
fn chebi_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(n) => Ok(n),
        RawId::Text(s) => {
            let trimmed = s.trim();
            let digits = trimmed
                .strip_prefix("CHEBI:")
                .or_else(|| trimmed.strip_prefix("chebi:"))
                .unwrap_or(trimmed);
            digits
                .parse()
                .map_err(|_| serde::de::Error::custom(format!("invalid ChEBI id: {}", s)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_children_payload() {
        let json = r#"{
            "ontology_relations": {
                "incoming_relations": [
                    {"init_id": 28729, "init_name": "monosaccharide", "relation_type": "is a",
                     "final_id": 16646, "final_name": "carbohydrate"},
                    {"init_id": "CHEBI:18133", "init_name": "hexose", "relation_type": "has part",
                     "final_id": "16646", "final_name": "carbohydrate"}
                ]
            }
        }"#;
        let response: OntologyResponse = serde_json::from_str(json).unwrap();
        let edges: Vec<OntologyEdge> = response
            .ontology_relations
            .incoming_relations
            .into_iter()
            .map(OntologyEdge::from)
            .collect();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].source_id, 28729);
        assert_eq!(edges[0].target_label.as_deref(), Some("carbohydrate"));
        assert_eq!(edges[1].source_id, 18133);
        assert!(!edges[1].has_relation("is a"));
    }

    #[test]
    fn test_missing_relations_block_is_empty() {
        let response: OntologyResponse = serde_json::from_str("{}").unwrap();
        assert!(response.ontology_relations.incoming_relations.is_empty());
        assert!(response.ontology_relations.outgoing_relations.is_empty());
    }

    #[test]
    fn test_rejects_garbage_id() {
        let json = r#"{"init_id": "glucose", "relation_type": "is a", "final_id": 1}"#;
        assert!(serde_json::from_str::<Relation>(json).is_err());
    }
}
