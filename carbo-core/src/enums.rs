//! Enum types for CARBO records and caches

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Carbohydrate category assigned to a compound.
///
/// Variants are ordered from most to least specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// Branch under the carbohydrate root with more than one child
    MainCarbohydrateGroup,
    /// Branch under the carbohydrate root with at most one child
    OtherCarbohydrate,
    /// Branch under the derivative root with more than one child
    MainCarbohydrateDerivativeGroup,
    /// Branch under the derivative root with at most one child
    OtherCarbohydrateDerivative,
    /// Under the top root but not under a recognised branch
    Other,
    /// Not a carbohydrate
    None,
}

impl Category {
    /// All categories in specificity order.
    pub const ALL: [Category; 6] = [
        Category::MainCarbohydrateGroup,
        Category::OtherCarbohydrate,
        Category::MainCarbohydrateDerivativeGroup,
        Category::OtherCarbohydrateDerivative,
        Category::Other,
        Category::None,
    ];

    /// Stable tag used in persisted records.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::MainCarbohydrateGroup => "main-carbohydrate-group",
            Self::OtherCarbohydrate => "other-carbohydrate",
            Self::MainCarbohydrateDerivativeGroup => "main-carbohydrate-derivative-group",
            Self::OtherCarbohydrateDerivative => "other-carbohydrate-derivative",
            Self::Other => "other",
            Self::None => "none",
        }
    }

    /// Parse a persisted tag.
    pub fn from_db_str(s: &str) -> Result<Self, CategoryParseError> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_db_str() == s)
            .ok_or_else(|| CategoryParseError(s.to_string()))
    }

    /// Human-readable label ("main carbohydrate group").
    pub fn label(&self) -> &'static str {
        match self {
            Self::MainCarbohydrateGroup => "main carbohydrate group",
            Self::OtherCarbohydrate => "other carbohydrate",
            Self::MainCarbohydrateDerivativeGroup => "main carbohydrate derivative group",
            Self::OtherCarbohydrateDerivative => "other carbohydrate derivative",
            Self::Other => "other",
            Self::None => "none",
        }
    }

    pub fn is_carbohydrate(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Category for a branch found under one of the two anchor roots.
    pub fn for_branch(root: AnchorRoot, child_count: usize) -> Self {
        match (root, child_count > 1) {
            (AnchorRoot::Carbohydrate, true) => Self::MainCarbohydrateGroup,
            (AnchorRoot::Carbohydrate, false) => Self::OtherCarbohydrate,
            (AnchorRoot::Derivative, true) => Self::MainCarbohydrateDerivativeGroup,
            (AnchorRoot::Derivative, false) => Self::OtherCarbohydrateDerivative,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl FromStr for Category {
    type Err = CategoryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error parsing Category from string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryParseError(pub String);

impl fmt::Display for CategoryParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid category: {}", self.0)
    }
}

impl std::error::Error for CategoryParseError {}

/// The two anchor roots directly under the top root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnchorRoot {
    Carbohydrate,
    Derivative,
}

/// Which algorithm produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClassificationPath {
    /// Ontology ancestry walk
    Ancestry,
    /// Term matching over the full remote classification payload
    FullTerms,
}

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Kind of chemical identifier submitted for resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    /// 27-character structural hash (InChIKey)
    InchiKey,
    /// Free-form structure notation (SMILES)
    Smiles,
    /// Decide from the identifier's shape
    #[default]
    Auto,
}

impl IdentifierKind {
    /// Path segment / form field used by the property service.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::InchiKey => "inchikey",
            Self::Smiles => "smiles",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

// ============================================================================
// FAILURES
// ============================================================================

/// Reason tag attached to failed records and persisted failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// Identifier or node does not exist remotely
    NotFound,
    /// Identifier does not match the requested type
    MalformedInput,
    /// Transient failure persisted past the retry ceiling
    ExhaustedRetries,
    /// Compound id resolved but the property service returned nothing for it
    PropertiesNotFound,
    /// Both classification paths failed
    ClassificationFailed,
    /// Skipped because a prior run already gave up on it
    KnownFailed,
    /// Batch was cancelled before this record was processed
    Cancelled,
}

impl FailureReason {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not-found",
            Self::MalformedInput => "malformed-input",
            Self::ExhaustedRetries => "exhausted-retries",
            Self::PropertiesNotFound => "properties-not-found",
            Self::ClassificationFailed => "classification-failed",
            Self::KnownFailed => "known-failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Permanent failures are never re-attempted by later runs.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::NotFound | Self::MalformedInput)
    }

    /// Whether this reason should be written to the failed-identifier store.
    pub fn is_trackable(&self) -> bool {
        !matches!(self, Self::KnownFailed | Self::Cancelled)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

// ============================================================================
// CACHE NAMESPACES
// ============================================================================

/// Named cache namespaces. Each has an independent key space and its own
/// durable database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheName {
    /// Ontology node -> child edges
    Children,
    /// Ontology node -> parent edges
    Parents,
    /// Ontology node -> full ancestor set
    Ancestors,
    /// Compound id -> properties and synonyms
    Properties,
    /// `<kind>:<identifier>` -> compound id
    Identifiers,
    /// Compound id -> synonym list
    Synonyms,
    /// Compound id -> fallback classification terms
    Classifications,
}

impl CacheName {
    pub const ALL: [CacheName; 7] = [
        CacheName::Children,
        CacheName::Parents,
        CacheName::Ancestors,
        CacheName::Properties,
        CacheName::Identifiers,
        CacheName::Synonyms,
        CacheName::Classifications,
    ];

    /// Database name inside the LMDB environment.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Children => "children",
            Self::Parents => "parents",
            Self::Ancestors => "ancestors",
            Self::Properties => "properties",
            Self::Identifiers => "identifiers",
            Self::Synonyms => "synonyms",
            Self::Classifications => "classifications",
        }
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_db_str_roundtrip() {
        for category in Category::ALL {
            let parsed = Category::from_db_str(category.as_db_str()).unwrap();
            assert_eq!(parsed, category);
        }
        assert!(Category::from_db_str("sugar").is_err());
    }

    #[test]
    fn test_category_serde_uses_kebab_tags() {
        let json = serde_json::to_string(&Category::MainCarbohydrateDerivativeGroup).unwrap();
        assert_eq!(json, "\"main-carbohydrate-derivative-group\"");
    }

    #[test]
    fn test_category_for_branch_threshold() {
        assert_eq!(
            Category::for_branch(AnchorRoot::Carbohydrate, 2),
            Category::MainCarbohydrateGroup
        );
        assert_eq!(
            Category::for_branch(AnchorRoot::Carbohydrate, 1),
            Category::OtherCarbohydrate
        );
        assert_eq!(
            Category::for_branch(AnchorRoot::Derivative, 0),
            Category::OtherCarbohydrateDerivative
        );
        assert_eq!(
            Category::for_branch(AnchorRoot::Derivative, 5),
            Category::MainCarbohydrateDerivativeGroup
        );
    }

    #[test]
    fn test_only_none_is_not_carbohydrate() {
        for category in Category::ALL {
            assert_eq!(category.is_carbohydrate(), category != Category::None);
        }
    }

    #[test]
    fn test_failure_reason_permanence() {
        assert!(FailureReason::NotFound.is_permanent());
        assert!(FailureReason::MalformedInput.is_permanent());
        assert!(!FailureReason::ExhaustedRetries.is_permanent());
        assert!(!FailureReason::Cancelled.is_trackable());
    }
}
