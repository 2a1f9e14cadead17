//! Carbohydrate classification against the anchor roots.

use carbo_core::{
    AnchorNode, AnchorRoot, CarboError, Category, ClassificationAnchors, ClassificationPath,
    ClassificationResult, OntologyEdge, OntologyError,
};
use carbo_remote::{CompoundResolver, OntologyGraphClient};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Outcome of [`Classifier::classify`].
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub result: ClassificationResult,
    pub path: ClassificationPath,
    /// Remote classification terms; empty on the ancestry path.
    pub terms: Vec<String>,
}

/// Places compounds into one of the carbohydrate categories.
///
/// The fast path walks the ontology ancestry of a known ontology id. The
/// fallback matches the labels of a remote classification payload against
/// the same anchors and branches.
pub struct Classifier {
    ontology: Arc<OntologyGraphClient>,
    resolver: Arc<CompoundResolver>,
    anchors: ClassificationAnchors,
}

impl Classifier {
    pub fn new(
        ontology: Arc<OntologyGraphClient>,
        resolver: Arc<CompoundResolver>,
        anchors: ClassificationAnchors,
    ) -> Self {
        Self {
            ontology,
            resolver,
            anchors,
        }
    }

    pub fn anchors(&self) -> &ClassificationAnchors {
        &self.anchors
    }

    /// Classify `compound_id`, using the ancestry of `ontology_id` when one
    /// is known and falling back to the full term list otherwise.
    pub async fn classify(
        &self,
        ontology_id: Option<u64>,
        compound_id: u64,
    ) -> Result<Classification, CarboError> {
        if let Some(node_id) = ontology_id {
            match self.classify_by_ancestry(node_id).await {
                Ok(result) => {
                    return Ok(Classification {
                        result,
                        path: ClassificationPath::Ancestry,
                        terms: Vec::new(),
                    })
                }
                Err(e) => {
                    tracing::warn!(
                        compound_id,
                        node_id,
                        error = %e,
                        "Ancestry classification failed, falling back to full terms"
                    );
                }
            }
        }

        let terms = self.resolver.fetch_classification_terms(compound_id).await?;
        let result = self.classify_by_full_terms(&terms).await?;
        Ok(Classification {
            result,
            path: ClassificationPath::FullTerms,
            terms,
        })
    }

    /// Classify an ontology node by the anchors and branches among its
    /// ancestors.
    pub async fn classify_by_ancestry(
        &self,
        node_id: u64,
    ) -> Result<ClassificationResult, OntologyError> {
        let ancestors = self.ontology.get_all_ancestors(node_id).await?;
        if !ancestors.contains(&self.anchors.top.id) {
            return Ok(ClassificationResult::none());
        }

        let root = if ancestors.contains(&self.anchors.carbohydrate.id) {
            Some(AnchorRoot::Carbohydrate)
        } else if ancestors.contains(&self.anchors.derivative.id) {
            Some(AnchorRoot::Derivative)
        } else {
            None
        };

        match root {
            Some(root) => {
                let anchor = self.anchor(root);
                let branches = self
                    .ontology
                    .get_children(anchor.id)
                    .await?
                    .into_iter()
                    .filter(|edge| ancestors.contains(&edge.source_id))
                    .collect();
                self.pick_branch(root, branches).await
            }
            None => {
                let on_path = self.top_child(|edge| ancestors.contains(&edge.source_id)).await?;
                Ok(self.other(on_path))
            }
        }
    }

    /// Classify from a list of ontology term labels (case-insensitive).
    pub async fn classify_by_full_terms(
        &self,
        terms: &[String],
    ) -> Result<ClassificationResult, OntologyError> {
        let terms: HashSet<String> = terms.iter().map(|t| normalize(t)).collect();
        let named = |label: &str| terms.contains(&normalize(label));

        if !named(&self.anchors.top.label) {
            return Ok(ClassificationResult::none());
        }

        let root = if named(&self.anchors.carbohydrate.label) {
            Some(AnchorRoot::Carbohydrate)
        } else if named(&self.anchors.derivative.label) {
            Some(AnchorRoot::Derivative)
        } else {
            None
        };

        match root {
            Some(root) => {
                let anchor = self.anchor(root);
                let branches = self
                    .ontology
                    .get_children(anchor.id)
                    .await?
                    .into_iter()
                    .filter(|edge| edge.source_label.as_deref().is_some_and(named))
                    .collect();
                self.pick_branch(root, branches).await
            }
            None => {
                let named_child = self
                    .top_child(|edge| edge.source_label.as_deref().is_some_and(named))
                    .await?;
                Ok(self.other(named_child))
            }
        }
    }

    fn anchor(&self, root: AnchorRoot) -> &AnchorNode {
        match root {
            AnchorRoot::Carbohydrate => &self.anchors.carbohydrate,
            AnchorRoot::Derivative => &self.anchors.derivative,
        }
    }

    /// First main group among `branches`, else the first branch. No branch
    /// at all is `other` with the root's own label.
    async fn pick_branch(
        &self,
        root: AnchorRoot,
        branches: Vec<OntologyEdge>,
    ) -> Result<ClassificationResult, OntologyError> {
        let mut first: Option<(OntologyEdge, usize)> = None;
        for branch in branches {
            let child_count = self.ontology.get_children(branch.source_id).await?.len();
            if child_count > 1 {
                return Ok(branch_result(root, &branch, child_count));
            }
            if first.is_none() {
                first = Some((branch, child_count));
            }
        }
        Ok(match first {
            Some((branch, child_count)) => branch_result(root, &branch, child_count),
            None => ClassificationResult::new(
                Category::Other,
                Some(self.anchor(root).label.clone()),
            ),
        })
    }

    /// First child of the top root, other than the two anchor roots, that
    /// satisfies `matches`.
    async fn top_child<F>(&self, matches: F) -> Result<Option<OntologyEdge>, OntologyError>
    where
        F: Fn(&OntologyEdge) -> bool,
    {
        let anchor_ids: BTreeSet<u64> =
            BTreeSet::from([self.anchors.carbohydrate.id, self.anchors.derivative.id]);
        Ok(self
            .ontology
            .get_children(self.anchors.top.id)
            .await?
            .into_iter()
            .find(|edge| !anchor_ids.contains(&edge.source_id) && matches(edge)))
    }

    fn other(&self, top_child: Option<OntologyEdge>) -> ClassificationResult {
        let label = top_child
            .and_then(|edge| edge.source_label)
            .unwrap_or_else(|| self.anchors.top.label.clone());
        ClassificationResult::new(Category::Other, Some(label))
    }
}

fn branch_result(root: AnchorRoot, branch: &OntologyEdge, child_count: usize) -> ClassificationResult {
    let subclass = branch
        .source_label
        .clone()
        .unwrap_or_else(|| format!("CHEBI:{}", branch.source_id));
    ClassificationResult::new(Category::for_branch(root, child_count), Some(subclass))
}

fn normalize(term: &str) -> String {
    term.trim().to_lowercase()
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("anchors", &self.anchors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbo_core::{ErrorTrackingConfig, OntologyConfig};
    use carbo_resilience::{ErrorTracker, FixedRateLimiter, RemoteGate, RetryPolicy};
    use carbo_storage::CacheStore;
    use carbo_test_utils::fixtures::*;
    use carbo_test_utils::{FakeOntologyService, FakePropertyService};
    use std::time::Duration;

    fn classifier_with(ontology: FakeOntologyService, properties: FakePropertyService) -> Classifier {
        let cache = Arc::new(CacheStore::in_memory(256));
        let gate = RemoteGate::new(
            Arc::new(FixedRateLimiter::new(Duration::ZERO)),
            RetryPolicy::new(2, Duration::from_millis(10), 2.0),
            Arc::new(ErrorTracker::new(ErrorTrackingConfig::default())),
        );
        let graph = OntologyGraphClient::new(
            Arc::new(ontology),
            cache.clone(),
            gate.clone(),
            &OntologyConfig::default(),
        );
        let resolver = CompoundResolver::new(Arc::new(properties), cache, gate, 512);
        Classifier::new(
            Arc::new(graph),
            Arc::new(resolver),
            ClassificationAnchors::default(),
        )
    }

    fn classifier() -> Classifier {
        classifier_with(chebi_ontology(), pubchem_compounds())
    }

    fn result(category: Category, subclass: &str) -> ClassificationResult {
        ClassificationResult::new(category, Some(subclass.to_string()))
    }

    fn terms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ancestry_main_carbohydrate_group() {
        let c = classifier();
        assert_eq!(
            c.classify_by_ancestry(GLUCOPYRANOSE).await.unwrap(),
            result(Category::MainCarbohydrateGroup, "monosaccharide")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ancestry_other_carbohydrate_and_derivative() {
        let c = classifier();
        assert_eq!(
            c.classify_by_ancestry(SUCROSE).await.unwrap(),
            result(Category::OtherCarbohydrate, "oligosaccharide")
        );
        assert_eq!(
            c.classify_by_ancestry(GLUCOSAMINE).await.unwrap(),
            result(Category::OtherCarbohydrateDerivative, "amino sugar")
        );
        assert_eq!(
            c.classify_by_ancestry(GLUCURONIC_ACID).await.unwrap(),
            result(Category::MainCarbohydrateDerivativeGroup, "carbohydrate acid")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ancestry_carbohydrate_root_wins_over_derivative() {
        let c = classifier();
        assert_eq!(
            c.classify_by_ancestry(HEXOSE_PHOSPHATE).await.unwrap(),
            result(Category::MainCarbohydrateGroup, "monosaccharide")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ancestry_other_and_none() {
        let c = classifier();
        assert_eq!(
            c.classify_by_ancestry(N_GLYCAN).await.unwrap(),
            result(Category::Other, "glycan")
        );
        assert_eq!(
            c.classify_by_ancestry(CARBOHYDRATE).await.unwrap(),
            result(Category::Other, "carbohydrate")
        );
        assert_eq!(
            c.classify_by_ancestry(TOP).await.unwrap(),
            result(Category::Other, "carbohydrates and carbohydrate derivatives")
        );
        assert_eq!(
            c.classify_by_ancestry(WATER).await.unwrap(),
            ClassificationResult::none()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ancestry_unknown_node() {
        let c = classifier();
        assert_eq!(
            c.classify_by_ancestry(31337).await.unwrap_err(),
            OntologyError::NodeNotFound { node_id: 31337 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_terms_keep_ontology_capitalization() {
        let c = classifier();
        let found = c
            .classify_by_full_terms(&terms(&[
                "Carbohydrates and Carbohydrate Derivatives",
                "Carbohydrate",
                "Oligosaccharide",
            ]))
            .await
            .unwrap();
        assert_eq!(found, result(Category::OtherCarbohydrate, "oligosaccharide"));

        let derivative = c
            .classify_by_full_terms(&terms(&[
                "carbohydrates and carbohydrate derivatives",
                "carbohydrate derivative",
                " Carbohydrate Acid ",
            ]))
            .await
            .unwrap();
        assert_eq!(
            derivative,
            result(Category::MainCarbohydrateDerivativeGroup, "carbohydrate acid")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_terms_amino_sugar_is_other_derivative() {
        let c = classifier();
        let found = c
            .classify_by_full_terms(&terms(&[
                "carbohydrates and carbohydrate derivatives",
                "carbohydrate derivative",
                "amino sugar",
            ]))
            .await
            .unwrap();
        assert_eq!(found, result(Category::OtherCarbohydrateDerivative, "amino sugar"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_amino_sugar_without_ontology_id() {
        const GALACTOSAMINE_CID: u64 = 24_154;
        let properties = pubchem_compounds()
            .compound(
                "MSWZFWKMSRAUBD-UHFFFAOYSA-N",
                properties(GALACTOSAMINE_CID, "C6H13NO5"),
                &["galactosamine", "Chondrosamine"],
            )
            .classification(
                GALACTOSAMINE_CID,
                &[
                    "carbohydrates and carbohydrate derivatives",
                    "Carbohydrate derivative",
                    "Amino sugar",
                ],
            );
        let c = classifier_with(chebi_ontology(), properties);
        let Classification { result: found, path, terms: used } =
            c.classify(None, GALACTOSAMINE_CID).await.unwrap();
        assert_eq!(path, ClassificationPath::FullTerms);
        assert_eq!(found, result(Category::OtherCarbohydrateDerivative, "amino sugar"));
        assert_eq!(used.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_terms_without_top_or_branch() {
        let c = classifier();
        assert_eq!(
            c.classify_by_full_terms(&terms(&["carbohydrate", "monosaccharide"]))
                .await
                .unwrap(),
            ClassificationResult::none()
        );
        assert_eq!(
            c.classify_by_full_terms(&[]).await.unwrap(),
            ClassificationResult::none()
        );
        assert_eq!(
            c.classify_by_full_terms(&terms(&[
                "carbohydrates and carbohydrate derivatives",
                "carbohydrate derivative",
            ]))
            .await
            .unwrap(),
            result(Category::Other, "carbohydrate derivative")
        );
        assert_eq!(
            c.classify_by_full_terms(&terms(&["carbohydrates and carbohydrate derivatives", "GLYCAN"]))
                .await
                .unwrap(),
            result(Category::Other, "glycan")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_prefers_ancestry() {
        let c = classifier();
        let Classification { result: found, path, terms: used } =
            c.classify(Some(GLUCOPYRANOSE), GLUCOSE_CID).await.unwrap();
        assert_eq!(path, ClassificationPath::Ancestry);
        assert!(found.is_carbohydrate());
        assert!(used.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_falls_back_without_ontology_id() {
        let c = classifier();
        let Classification { result: found, path, terms: used } =
            c.classify(None, SUCROSE_CID).await.unwrap();
        assert_eq!(path, ClassificationPath::FullTerms);
        assert_eq!(found, result(Category::OtherCarbohydrate, "oligosaccharide"));
        assert_eq!(used[2], "Oligosaccharide");
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_falls_back_on_remote_failure() {
        let properties = pubchem_compounds().classification(
            GLUCOSE_CID,
            &["carbohydrates and carbohydrate derivatives", "carbohydrate", "monosaccharide"],
        );
        let c = classifier_with(chebi_ontology().fail_always(GLUCOPYRANOSE), properties);
        let Classification { result: found, path, terms: used } =
            c.classify(Some(GLUCOPYRANOSE), GLUCOSE_CID).await.unwrap();
        assert_eq!(path, ClassificationPath::FullTerms);
        assert_eq!(found, result(Category::MainCarbohydrateGroup, "monosaccharide"));
        assert_eq!(used.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_propagates_fallback_failure() {
        let properties = pubchem_compounds().fail_classification(SUCROSE_CID);
        let c = classifier_with(chebi_ontology(), properties);
        let err = c.classify(None, SUCROSE_CID).await.unwrap_err();
        assert!(matches!(err, CarboError::Remote(_)));
    }
}
