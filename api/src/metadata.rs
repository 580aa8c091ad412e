//! Client for the remote Glyphkit metadata service.
//!
//! The settings UI issues query-language documents (kit listings, available
//! icon versions) against the hosted metadata API; this service only relays
//! them. No caching, no query inspection.

use serde_json::json;

const DEFAULT_METADATA_URL: &str = "https://api.glyphkit.dev/metadata";

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// The service answered with a client-error status.
    #[error("metadata service rejected the query ({status}): {body}")]
    Rejected { status: u16, body: String },
    /// Transport failure, server error, or an undecodable response.
    #[error("metadata service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Clone)]
pub struct MetadataClient {
    http: reqwest::Client,
    endpoint: String,
}

impl MetadataClient {
    /// Build a client against `GLYPHKIT_METADATA_URL`, falling back to the
    /// hosted service.
    pub fn from_env() -> Self {
        let endpoint = std::env::var("GLYPHKIT_METADATA_URL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_METADATA_URL.to_string());

        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }

    /// Forward a raw query document and relay the upstream JSON verbatim.
    pub async fn query(&self, document: &str) -> Result<serde_json::Value, MetadataError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "query": document }))
            .send()
            .await
            .map_err(|e| MetadataError::Unavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(MetadataError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            return Err(MetadataError::Unavailable(format!(
                "metadata service returned {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| MetadataError::Unavailable(format!("undecodable response: {e}")))
    }
}
