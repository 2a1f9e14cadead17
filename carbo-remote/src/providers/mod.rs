//! HTTP adapters for the public ChEBI and PubChem REST services.
//!
//! Each adapter implements one of the service traits from
//! `carbo_core::services`. Status codes map onto `RemoteError` the same way
//! for both services.

pub mod chebi;
pub mod pubchem;

pub use chebi::ChebiClient;
pub use pubchem::PubChemClient;

use carbo_core::RemoteError;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Client with a request timeout. Falls back to reqwest defaults if the
/// builder cannot be configured.
pub(crate) fn build_http_client(service: &'static str, timeout: Duration) -> Client {
    match Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(service, error = %e, "Falling back to default HTTP client");
            Client::new()
        }
    }
}

pub(crate) fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|seconds| *seconds >= 0.0)
        .map(|seconds| (seconds * 1000.0) as u64)
}

/// Map a non-success status onto the error taxonomy.
pub(crate) fn error_for_status(
    service: &'static str,
    resource: &str,
    status: StatusCode,
    retry_after_ms: Option<u64>,
    body: &str,
) -> RemoteError {
    let message = if body.trim().is_empty() {
        status.to_string()
    } else {
        body.chars().take(200).collect()
    };
    match status {
        StatusCode::NOT_FOUND => RemoteError::not_found(service, resource),
        StatusCode::BAD_REQUEST => RemoteError::malformed(resource, message),
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited {
            service: service.to_string(),
            retry_after_ms: retry_after_ms.unwrap_or(0),
        },
        StatusCode::REQUEST_TIMEOUT => {
            RemoteError::transient(service, Some(status.as_u16()), message)
        }
        s if s.is_server_error() => RemoteError::transient(service, Some(s.as_u16()), message),
        s => RemoteError::invalid_response(service, format!("unexpected status {}: {}", s, message)),
    }
}

/// Transport failures (timeouts, refused connections) are transient.
pub(crate) fn error_for_transport(service: &'static str, e: reqwest::Error) -> RemoteError {
    if e.is_decode() {
        RemoteError::invalid_response(service, e.to_string())
    } else {
        RemoteError::transient(service, e.status().map(|s| s.as_u16()), e.to_string())
    }
}

/// Check the status, then decode the JSON body.
pub(crate) async fn read_json<T: DeserializeOwned>(
    service: &'static str,
    resource: &str,
    response: Response,
) -> Result<T, RemoteError> {
    let status = response.status();
    if !status.is_success() {
        let retry_after_ms = parse_retry_after_ms(response.headers());
        let body = response.text().await.unwrap_or_default();
        return Err(error_for_status(service, resource, status, retry_after_ms, &body));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| error_for_transport(service, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| RemoteError::invalid_response(service, format!("Failed to parse response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            error_for_status("chebi", "node 1", StatusCode::NOT_FOUND, None, ""),
            RemoteError::NotFound { .. }
        ));
        assert!(matches!(
            error_for_status("pubchem", "C(", StatusCode::BAD_REQUEST, None, "bad smiles"),
            RemoteError::MalformedInput { .. }
        ));
        assert_eq!(
            error_for_status("pubchem", "x", StatusCode::TOO_MANY_REQUESTS, Some(2_000), ""),
            RemoteError::RateLimited {
                service: "pubchem".to_string(),
                retry_after_ms: 2_000
            }
        );
        let busy = error_for_status("pubchem", "x", StatusCode::SERVICE_UNAVAILABLE, None, "busy");
        assert!(busy.is_retryable());
        let forbidden = error_for_status("pubchem", "x", StatusCode::FORBIDDEN, None, "");
        assert!(matches!(forbidden, RemoteError::InvalidResponse { .. }));
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after_ms(&headers), None);
        headers.insert("retry-after", HeaderValue::from_static("1.5"));
        assert_eq!(parse_retry_after_ms(&headers), Some(1_500));
        headers.insert("retry-after", HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after_ms(&headers), None);
    }
}
