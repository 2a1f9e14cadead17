//! PubChem PUG REST response types

use carbo_core::CompoundProperties;
use serde::{Deserialize, Deserializer};

// ============================================================================
// IDENTIFIER LOOKUP
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct IdentifierListResponse {
    #[serde(rename = "IdentifierList")]
    pub identifier_list: IdentifierList,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentifierList {
    #[serde(rename = "CID", default)]
    pub cids: Vec<u64>,
}

impl IdentifierListResponse {
    /// First non-zero CID. PubChem answers unknown structures with `[0]`.
    pub fn first_cid(&self) -> Option<u64> {
        self.identifier_list.cids.iter().copied().find(|cid| *cid != 0)
    }
}

// ============================================================================
// PROPERTIES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PropertyTableResponse {
    #[serde(rename = "PropertyTable")]
    pub property_table: PropertyTable,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PropertyTable {
    #[serde(rename = "Properties", default)]
    pub properties: Vec<PropertyRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertyRow {
    #[serde(rename = "CID")]
    pub cid: u64,
    #[serde(rename = "MolecularFormula", default)]
    pub molecular_formula: Option<String>,
    #[serde(rename = "MolecularWeight", default, deserialize_with = "lenient_f64")]
    pub molecular_weight: Option<f64>,
    #[serde(rename = "InChI", default)]
    pub inchi: Option<String>,
    #[serde(rename = "InChIKey", default)]
    pub inchikey: Option<String>,
    #[serde(rename = "SMILES", alias = "CanonicalSMILES", alias = "IsomericSMILES", default)]
    pub smiles: Option<String>,
    #[serde(rename = "IUPACName", default)]
    pub iupac_name: Option<String>,
}

impl From<PropertyRow> for CompoundProperties {
    fn from(row: PropertyRow) -> Self {
        CompoundProperties {
            compound_id: row.cid,
            iupac_name: row.iupac_name,
            molecular_formula: row.molecular_formula,
            molecular_weight: row.molecular_weight,
            inchi: row.inchi,
            inchikey: row.inchikey,
            smiles: row.smiles,
            synonyms: Vec::new(),
        }
    }
}

/// PubChem reports molecular weight as a string in current responses and as
/// a number in older ones.
fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawNumber {
        Number(f64),
        Text(String),
    }

    Ok(match Option::<RawNumber>::deserialize(deserializer)? {
        Some(RawNumber::Number(n)) => Some(n),
        Some(RawNumber::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

// ============================================================================
// SYNONYMS
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct InformationListResponse {
    #[serde(rename = "InformationList")]
    pub information_list: InformationList,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InformationList {
    #[serde(rename = "Information", default)]
    pub information: Vec<InformationRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InformationRow {
    #[serde(rename = "CID")]
    pub cid: u64,
    #[serde(rename = "Synonym", default)]
    pub synonyms: Vec<String>,
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ClassificationResponse {
    #[serde(rename = "Hierarchies")]
    pub hierarchies: Hierarchies,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Hierarchies {
    #[serde(rename = "Hierarchy", default)]
    pub hierarchy: Vec<Hierarchy>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hierarchy {
    #[serde(rename = "SourceName", default)]
    pub source_name: Option<String>,
    #[serde(rename = "Node", default)]
    pub node: Option<OneOrMany<Node>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(Box<T>),
}

impl<T> OneOrMany<T> {
    fn as_slice(&self) -> &[T] {
        match self {
            Self::Many(items) => items,
            Self::One(item) => std::slice::from_ref(item.as_ref()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Node {
    #[serde(rename = "Information", default)]
    pub information: Option<NodeInformation>,
    #[serde(rename = "Children", default)]
    pub children: Option<NodeChildren>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeInformation {
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeChildren {
    #[serde(rename = "Node", default)]
    pub node: Option<OneOrMany<Node>>,
}

impl ClassificationResponse {
    /// Names of every node in ChEBI-sourced hierarchies, depth first,
    /// without duplicates.
    pub fn chebi_terms(&self) -> Vec<String> {
        let mut terms = Vec::new();
        for hierarchy in &self.hierarchies.hierarchy {
            let from_chebi = hierarchy
                .source_name
                .as_deref()
                .is_some_and(|s| s.to_ascii_lowercase().contains("chebi"));
            if !from_chebi {
                continue;
            }
            if let Some(nodes) = &hierarchy.node {
                let mut stack: Vec<&Node> = nodes.as_slice().iter().rev().collect();
                while let Some(node) = stack.pop() {
                    if let Some(name) = node.information.as_ref().and_then(|i| i.name.as_ref()) {
                        if !terms.contains(name) {
                            terms.push(name.clone());
                        }
                    }
                    if let Some(children) = node.children.as_ref().and_then(|c| c.node.as_ref()) {
                        stack.extend(children.as_slice().iter().rev());
                    }
                }
            }
        }
        terms
    }
}
