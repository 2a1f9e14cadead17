//! PubChem PUG REST HTTP client

use super::types::{
    ClassificationResponse, IdentifierListResponse, InformationListResponse, PropertyTableResponse,
};
use crate::providers::{build_http_client, error_for_transport, read_json};
use async_trait::async_trait;
use carbo_core::{CompoundProperties, IdentifierKind, PropertiesConfig, PropertyService, RemoteError};
use reqwest::Client;
use std::collections::BTreeMap;

const SERVICE: &str = "pubchem";

const PROPERTY_LIST: &str = "MolecularFormula,MolecularWeight,InChI,InChIKey,SMILES,IUPACName";

/// PubChem PUG REST client.
///
/// Batched endpoints take the compound ids as a comma-separated form field.
pub struct PubChemClient {
    client: Client,
    base_url: String,
}

impl PubChemClient {
    pub fn new(config: &PropertiesConfig) -> Self {
        Self {
            client: build_http_client(SERVICE, config.timeout()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        field: &str,
        value: &str,
        resource: &str,
    ) -> Result<T, RemoteError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .form(&[(field, value)])
            .send()
            .await
            .map_err(|e| error_for_transport(SERVICE, e))?;
        read_json(SERVICE, resource, response).await
    }
}

fn join_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// A batch where none of the ids exist comes back as 404; that is an empty
/// result, not a failure.
fn empty_on_not_found<T: Default>(result: Result<T, RemoteError>) -> Result<T, RemoteError> {
    match result {
        Err(e) if e.is_not_found() => Ok(T::default()),
        other => other,
    }
}

#[async_trait]
impl PropertyService for PubChemClient {
    async fn resolve_identifier(
        &self,
        identifier: &str,
        kind: IdentifierKind,
    ) -> Result<u64, RemoteError> {
        let field = match kind {
            IdentifierKind::InchiKey | IdentifierKind::Smiles => kind.as_db_str(),
            IdentifierKind::Auto => {
                return Err(RemoteError::malformed(identifier, "identifier kind must be resolved before lookup"))
            }
        };
        let path = format!("compound/{}/cids/JSON", field);
        let response: IdentifierListResponse =
            self.post_form(&path, field, identifier, identifier).await?;
        response
            .first_cid()
            .ok_or_else(|| RemoteError::not_found(SERVICE, identifier))
    }

    async fn fetch_properties(&self, ids: &[u64]) -> Result<Vec<CompoundProperties>, RemoteError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let path = format!("compound/cid/property/{}/JSON", PROPERTY_LIST);
        let cid_list = join_ids(ids);
        let response: Option<PropertyTableResponse> = empty_on_not_found(
            self.post_form(&path, "cid", &cid_list, "properties").await.map(Some),
        )?;
        Ok(response
            .map(|r| {
                r.property_table
                    .properties
                    .into_iter()
                    .map(CompoundProperties::from)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_synonyms(&self, ids: &[u64]) -> Result<BTreeMap<u64, Vec<String>>, RemoteError> {
        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let cid_list = join_ids(ids);
        let response: Option<InformationListResponse> = empty_on_not_found(
            self.post_form("compound/cid/synonyms/JSON", "cid", &cid_list, "synonyms")
                .await
                .map(Some),
        )?;
        Ok(response
            .map(|r| {
                r.information_list
                    .information
                    .into_iter()
                    .map(|row| (row.cid, row.synonyms))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_classification(&self, id: u64) -> Result<Vec<String>, RemoteError> {
        let url = format!("{}/compound/cid/{}/classification/JSON", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| error_for_transport(SERVICE, e))?;
        let resource = format!("classification of CID {}", id);
        let parsed: ClassificationResponse = read_json(SERVICE, &resource, response).await?;
        Ok(parsed.chebi_terms())
    }

    fn name(&self) -> &'static str {
        SERVICE
    }
}

impl std::fmt::Debug for PubChemClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubChemClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}
