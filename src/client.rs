//! Control-Plane Client
//!
//! HTTP client for the non-streaming node operations: name lists,
//! manifests, registration, and streamed uploads. Byte downloads with
//! resume semantics live in [`crate::transfer`].

use std::path::Path;
use std::time::Duration;

use tokio_util::io::ReaderStream;

use crate::error::{Error, Result};
use crate::store::ManifestEntry;

/// Build a node URL for a path made of literal segments plus one
/// caller-supplied segment that needs percent-encoding (a file name or a
/// replica address).
pub(crate) fn node_url(address: &str, literal: &str, segment: Option<&str>) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(&format!("http://{}", address))
        .map_err(|e| Error::Protocol(format!("invalid node address {}: {}", address, e)))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| Error::Protocol(format!("address {} cannot carry a path", address)))?;
        segments.push(literal);
        if let Some(segment) = segment {
            segments.push(segment);
        }
    }
    Ok(url)
}

/// Client for a node's control-plane surface
#[derive(Debug, Clone)]
pub struct ControlClient {
    http: reqwest::Client,
}

impl ControlClient {
    /// Create a client with the given overall request timeout
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// Fetch a node's file name list
    pub async fn list_files(&self, address: &str) -> Result<Vec<String>> {
        let url = node_url(address, "files", None)?;
        let response = self.check(address, self.http.get(url).send().await)?;
        Ok(response.json().await?)
    }

    /// Fetch a node's manifest (name + size pairs)
    pub async fn manifest(&self, address: &str) -> Result<Vec<ManifestEntry>> {
        let url = node_url(address, "manifest", None)?;
        let response = self.check(address, self.http.get(url).send().await)?;
        Ok(response.json().await?)
    }

    /// Register a replica address with the primary
    pub async fn register(&self, primary: &str, replica_address: &str) -> Result<()> {
        let url = node_url(primary, "replicas", None)?;
        let body = serde_json::json!({ "address": replica_address });
        self.check(primary, self.http.post(url).json(&body).send().await)?;
        Ok(())
    }

    /// Unregister a replica address from the primary. Idempotent.
    pub async fn unregister(&self, primary: &str, replica_address: &str) -> Result<()> {
        let url = node_url(primary, "replicas", Some(replica_address))?;
        self.check(primary, self.http.delete(url).send().await)?;
        Ok(())
    }

    /// Fetch the primary's registered replica addresses
    pub async fn replicas(&self, primary: &str) -> Result<Vec<String>> {
        let url = node_url(primary, "replicas", None)?;
        let response = self.check(primary, self.http.get(url).send().await)?;
        Ok(response.json().await?)
    }

    /// Stream a local file to a replica's write surface
    pub async fn upload_file(&self, address: &str, name: &str, source: &Path) -> Result<u64> {
        let file = tokio::fs::File::open(source).await?;
        let size = file.metadata().await?.len();
        let url = node_url(address, "files", Some(name))?;

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        self.check(address, self.http.put(url).body(body).send().await)?;
        Ok(size)
    }

    /// Map connectivity errors and non-success statuses into the error
    /// taxonomy
    fn check(
        &self,
        address: &str,
        result: std::result::Result<reqwest::Response, reqwest::Error>,
    ) -> Result<reqwest::Response> {
        let response = result.map_err(|e| classify_request_error(address, e))?;
        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus {
                address: address.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

/// Distinguish unreachable/timeout peers from protocol-level failures
pub(crate) fn classify_request_error(address: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::ConnectTimeout(address.to_string())
    } else if e.is_connect() {
        Error::Connectivity {
            address: address.to_string(),
            reason: e.to_string(),
        }
    } else {
        Error::Http(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_url_encodes_file_names() {
        let url = node_url("127.0.0.1:8000", "files", Some("my report.pdf")).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8000/files/my%20report.pdf");
    }

    #[test]
    fn test_node_url_plain() {
        let url = node_url("127.0.0.1:8000", "manifest", None).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8000/manifest");
    }

    #[tokio::test]
    async fn test_unreachable_is_connectivity_error() {
        let client = ControlClient::new(Duration::from_millis(300)).unwrap();
        // Port 9 (discard) is a safe dead endpoint on loopback
        let err = client.list_files("127.0.0.1:9").await.unwrap_err();
        assert!(err.is_transfer_failure(), "got: {:?}", err);
    }
}
