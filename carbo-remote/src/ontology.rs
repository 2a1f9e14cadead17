//! Cached, gated traversal of the ontology graph.

use carbo_core::{
    CacheName, OntologyConfig, OntologyEdge, OntologyError, OntologyNode, OntologyService,
    RemoteError,
};
use carbo_resilience::RemoteGate;
use carbo_storage::CacheStore;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

/// Ontology client over an `OntologyService`.
///
/// Edge lists are cached per node under `children` and `parents`, already
/// filtered to the configured relation. Ancestor sets are cached under
/// `ancestors`.
pub struct OntologyGraphClient {
    service: Arc<dyn OntologyService>,
    cache: Arc<CacheStore>,
    gate: RemoteGate,
    relation: String,
    max_depth: Option<usize>,
}

impl OntologyGraphClient {
    pub fn new(
        service: Arc<dyn OntologyService>,
        cache: Arc<CacheStore>,
        gate: RemoteGate,
        config: &OntologyConfig,
    ) -> Self {
        Self {
            service,
            cache,
            gate,
            relation: config.relation.clone(),
            max_depth: config.max_ancestor_depth,
        }
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Edges into `node_id` with the configured relation; their sources are
    /// the node's children, in the order the service returned them.
    pub async fn get_children(&self, node_id: u64) -> Result<Vec<OntologyEdge>, OntologyError> {
        let key = node_id.to_string();
        if let Some(edges) = self.cache.get::<Vec<OntologyEdge>>(CacheName::Children, &key) {
            tracing::debug!(node_id, "Children cache hit");
            return Ok(edges);
        }
        tracing::debug!(node_id, "Children cache miss");

        let service = &self.service;
        let edges = self
            .gate
            .call("ontology.children", || service.fetch_children(node_id))
            .await
            .map_err(|e| node_error(node_id, e))?;
        let edges: Vec<OntologyEdge> = edges
            .into_iter()
            .filter(|e| e.target_id == node_id && e.has_relation(&self.relation))
            .collect();
        self.cache.put(CacheName::Children, &key, &edges);
        Ok(edges)
    }

    /// Edges out of `node_id` with the configured relation.
    pub async fn get_parent_edges(&self, node_id: u64) -> Result<Vec<OntologyEdge>, OntologyError> {
        let key = node_id.to_string();
        if let Some(edges) = self.cache.get::<Vec<OntologyEdge>>(CacheName::Parents, &key) {
            tracing::debug!(node_id, "Parents cache hit");
            return Ok(edges);
        }
        tracing::debug!(node_id, "Parents cache miss");

        let service = &self.service;
        let edges = self
            .gate
            .call("ontology.parents", || service.fetch_parents(node_id))
            .await
            .map_err(|e| node_error(node_id, e))?;
        let edges: Vec<OntologyEdge> = edges
            .into_iter()
            .filter(|e| e.source_id == node_id && e.has_relation(&self.relation))
            .collect();
        self.cache.put(CacheName::Parents, &key, &edges);
        Ok(edges)
    }

    pub async fn get_parents(&self, node_id: u64) -> Result<BTreeSet<u64>, OntologyError> {
        Ok(self
            .get_parent_edges(node_id)
            .await?
            .into_iter()
            .map(|e| e.target_id)
            .collect())
    }

    /// Node view assembled from its parent and child edges. The label comes
    /// from whichever edge carries it.
    pub async fn get_node(&self, node_id: u64) -> Result<OntologyNode, OntologyError> {
        let parent_edges = self.get_parent_edges(node_id).await?;
        let child_edges = self.get_children(node_id).await?;
        let label = parent_edges
            .iter()
            .find_map(|e| e.source_label.clone())
            .or_else(|| child_edges.iter().find_map(|e| e.target_label.clone()));
        Ok(OntologyNode {
            id: node_id,
            label,
            parents: parent_edges.iter().map(|e| e.target_id).collect(),
            children: child_edges.iter().map(|e| e.source_id).collect(),
        })
    }

    /// Every node reachable upward from `node_id`, including `node_id`.
    ///
    /// Breadth first with a visited set, so diamonds and cycles both
    /// terminate. Expansion stops at `max_ancestor_depth` levels when set.
    pub async fn get_all_ancestors(&self, node_id: u64) -> Result<BTreeSet<u64>, OntologyError> {
        let key = match self.max_depth {
            Some(depth) => format!("{}@{}", node_id, depth),
            None => node_id.to_string(),
        };
        if let Some(ancestors) = self.cache.get::<BTreeSet<u64>>(CacheName::Ancestors, &key) {
            tracing::debug!(node_id, "Ancestors cache hit");
            return Ok(ancestors);
        }

        let mut visited = BTreeSet::from([node_id]);
        // First node that reached each visited node, for cycle detection.
        let mut reached_from: HashMap<u64, u64> = HashMap::new();
        let mut queue = VecDeque::from([(node_id, 0usize)]);

        while let Some((current, depth)) = queue.pop_front() {
            if self.max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            for parent in self.get_parents(current).await? {
                if visited.insert(parent) {
                    reached_from.insert(parent, current);
                    queue.push_back((parent, depth + 1));
                } else if is_on_path(&reached_from, current, parent) {
                    tracing::warn!(node_id, from = current, to = parent, "Cycle in ontology graph");
                }
            }
        }

        self.cache.put(CacheName::Ancestors, &key, &visited);
        Ok(visited)
    }

    /// Children of `node_id` which themselves have more than one child.
    pub async fn get_main_groups(&self, node_id: u64) -> Result<Vec<OntologyEdge>, OntologyError> {
        let mut groups = Vec::new();
        for edge in self.get_children(node_id).await? {
            if self.get_children(edge.source_id).await?.len() > 1 {
                groups.push(edge);
            }
        }
        Ok(groups)
    }
}

fn node_error(node_id: u64, e: RemoteError) -> OntologyError {
    if e.is_not_found() {
        OntologyError::NodeNotFound { node_id }
    } else {
        OntologyError::Remote(e)
    }
}

/// True if `target` lies on the discovery path that led to `from`.
fn is_on_path(reached_from: &HashMap<u64, u64>, from: u64, target: u64) -> bool {
    let mut cursor = Some(from);
    while let Some(node) = cursor {
        if node == target {
            return true;
        }
        cursor = reached_from.get(&node).copied();
    }
    false
}

impl std::fmt::Debug for OntologyGraphClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OntologyGraphClient")
            .field("service", &self.service.name())
            .field("relation", &self.relation)
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbo_core::ErrorTrackingConfig;
    use carbo_resilience::{ErrorTracker, FixedRateLimiter, RetryPolicy};
    use carbo_test_utils::fixtures::*;
    use carbo_test_utils::FakeOntologyService;
    use std::time::Duration;

    fn gate() -> RemoteGate {
        RemoteGate::new(
            Arc::new(FixedRateLimiter::new(Duration::ZERO)),
            RetryPolicy::new(3, Duration::from_millis(10), 2.0),
            Arc::new(ErrorTracker::new(ErrorTrackingConfig::default())),
        )
    }

    fn client_with(
        service: Arc<FakeOntologyService>,
        config: OntologyConfig,
    ) -> OntologyGraphClient {
        OntologyGraphClient::new(service, Arc::new(CacheStore::in_memory(64)), gate(), &config)
    }

    fn client(service: Arc<FakeOntologyService>) -> OntologyGraphClient {
        client_with(service, OntologyConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_children_filtered_and_cached() {
        let service = Arc::new(chebi_ontology());
        let graph = client(service.clone());

        let children = graph.get_children(MONOSACCHARIDE).await.unwrap();
        let ids: Vec<u64> = children.iter().map(|e| e.source_id).collect();
        assert_eq!(ids, vec![HEXOSE, ALDOSE, KETOSE]);

        graph.get_children(MONOSACCHARIDE).await.unwrap();
        assert_eq!(service.children_calls(MONOSACCHARIDE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parents_skip_other_relations() {
        let graph = client(Arc::new(chebi_ontology()));
        let parents = graph.get_parents(GLUCOPYRANOSE).await.unwrap();
        assert_eq!(parents, BTreeSet::from([HEXOSE, ALDOSE]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_edge_list_is_cached() {
        let service = Arc::new(chebi_ontology());
        let graph = client(service.clone());
        assert!(graph.get_children(GLUCOPYRANOSE).await.unwrap().is_empty());
        assert!(graph.get_children(GLUCOPYRANOSE).await.unwrap().is_empty());
        assert_eq!(service.children_calls(GLUCOPYRANOSE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_node_is_node_not_found() {
        let graph = client(Arc::new(chebi_ontology()));
        let err = graph.get_parents(999_999).await.unwrap_err();
        assert_eq!(err, OntologyError::NodeNotFound { node_id: 999_999 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let service = Arc::new(chebi_ontology().fail_transient(HEXOSE, 2));
        let graph = client(service.clone());
        let parents = graph.get_parents(HEXOSE).await.unwrap();
        assert_eq!(parents, BTreeSet::from([MONOSACCHARIDE]));
        assert_eq!(service.parents_calls(HEXOSE), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_surfaces_as_remote_error() {
        let graph = client(Arc::new(chebi_ontology().fail_always(HEXOSE)));
        let err = graph.get_parents(HEXOSE).await.unwrap_err();
        assert!(matches!(
            err,
            OntologyError::Remote(RemoteError::ExhaustedRetries { attempts: 3, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ancestors_through_diamond() {
        let service = Arc::new(chebi_ontology());
        let graph = client(service.clone());
        let ancestors = graph.get_all_ancestors(GLUCOPYRANOSE).await.unwrap();
        assert_eq!(
            ancestors,
            BTreeSet::from([GLUCOPYRANOSE, HEXOSE, ALDOSE, MONOSACCHARIDE, CARBOHYDRATE, TOP])
        );
        // monosaccharide is reached twice but expanded once
        assert_eq!(service.parents_calls(MONOSACCHARIDE), 1);

        let before = service.total_calls();
        graph.get_all_ancestors(GLUCOPYRANOSE).await.unwrap();
        assert_eq!(service.total_calls(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ancestors_terminate_on_cycle() {
        let graph = client(Arc::new(cyclic_ontology()));
        let ancestors = graph.get_all_ancestors(1).await.unwrap();
        assert_eq!(ancestors, BTreeSet::from([1, 2, 3, TOP]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ancestor_depth_limit() {
        let config = OntologyConfig {
            max_ancestor_depth: Some(1),
            ..OntologyConfig::default()
        };
        let graph = client_with(Arc::new(chebi_ontology()), config);
        let ancestors = graph.get_all_ancestors(GLUCOPYRANOSE).await.unwrap();
        assert_eq!(ancestors, BTreeSet::from([GLUCOPYRANOSE, HEXOSE, ALDOSE]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_node_and_main_groups() {
        let graph = client(Arc::new(chebi_ontology()));
        let node = graph.get_node(MONOSACCHARIDE).await.unwrap();
        assert_eq!(node.label.as_deref(), Some("monosaccharide"));
        assert_eq!(node.parents, BTreeSet::from([CARBOHYDRATE]));
        assert_eq!(node.children.len(), 3);
        assert!(!node.is_root());

        let top = graph.get_node(TOP).await.unwrap();
        assert!(top.is_root());

        let groups: Vec<u64> = graph
            .get_main_groups(CARBOHYDRATE)
            .await
            .unwrap()
            .iter()
            .map(|e| e.source_id)
            .collect();
        assert_eq!(groups, vec![MONOSACCHARIDE]);
    }

    #[test]
    fn test_is_on_path() {
        let reached_from = HashMap::from([(2, 1), (3, 2)]);
        assert!(is_on_path(&reached_from, 3, 1));
        assert!(!is_on_path(&reached_from, 3, 4));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use carbo_core::ErrorTrackingConfig;
    use carbo_resilience::{ErrorTracker, FixedRateLimiter, RetryPolicy};
    use carbo_test_utils::generators::{arb_graph, ontology_from_graph};
    use proptest::prelude::*;
    use std::time::Duration;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        /// Ancestor expansion terminates on any graph and contains the start
        /// node plus every direct parent.
        #[test]
        fn prop_ancestors_terminate(graph in arb_graph(12)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let service = Arc::new(ontology_from_graph(&graph));
            let client = OntologyGraphClient::new(
                service,
                Arc::new(CacheStore::in_memory(64)),
                RemoteGate::new(
                    Arc::new(FixedRateLimiter::new(Duration::ZERO)),
                    RetryPolicy::none(),
                    Arc::new(ErrorTracker::new(ErrorTrackingConfig::default())),
                ),
                &OntologyConfig::default(),
            );
            let (start, parents) = &graph[0];
            let ancestors = runtime.block_on(client.get_all_ancestors(*start)).unwrap();
            prop_assert!(ancestors.contains(start));
            for parent in parents {
                prop_assert!(ancestors.contains(parent));
            }
            prop_assert!(ancestors.len() <= graph.len());
        }
    }
}
