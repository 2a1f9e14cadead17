//! ChEBI ontology HTTP client

use super::types::OntologyResponse;
use crate::providers::{build_http_client, error_for_transport, read_json};
use async_trait::async_trait;
use carbo_core::{OntologyConfig, OntologyEdge, OntologyService, RemoteError};
use reqwest::Client;

const SERVICE: &str = "chebi";

/// ChEBI backend API client.
///
/// Pacing and retries are applied above this layer by `RemoteGate`.
pub struct ChebiClient {
    client: Client,
    base_url: String,
}

impl ChebiClient {
    pub fn new(config: &OntologyConfig) -> Self {
        Self {
            client: build_http_client(SERVICE, config.timeout()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_relations(&self, direction: &str, node_id: u64) -> Result<OntologyResponse, RemoteError> {
        let url = format!("{}/ontology/{}/{}/", self.base_url, direction, node_id);
        let response = self
            .client
            .get(&url)
            .header("accept", "*/*")
            .send()
            .await
            .map_err(|e| error_for_transport(SERVICE, e))?;
        read_json(SERVICE, &format!("CHEBI:{}", node_id), response).await
    }
}

#[async_trait]
impl OntologyService for ChebiClient {
    async fn fetch_children(&self, node_id: u64) -> Result<Vec<OntologyEdge>, RemoteError> {
        let response = self.fetch_relations("children", node_id).await?;
        Ok(response
            .ontology_relations
            .incoming_relations
            .into_iter()
            .map(OntologyEdge::from)
            .collect())
    }

    async fn fetch_parents(&self, node_id: u64) -> Result<Vec<OntologyEdge>, RemoteError> {
        let response = self.fetch_relations("parents", node_id).await?;
        Ok(response
            .ontology_relations
            .outgoing_relations
            .into_iter()
            .map(OntologyEdge::from)
            .collect())
    }

    fn name(&self) -> &'static str {
        SERVICE
    }
}

impl std::fmt::Debug for ChebiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChebiClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}
