//! Share link resolution
//!
//! A [`LinkResolver`] turns one share link into the files behind it. The HTTP
//! implementation issues exactly one request per call; retrying is up to the caller.

use crate::config::ResolverConfig;
use crate::error::{Error, ResolutionError, Result};
use crate::types::FileDescriptor;
use crate::utils::parse_size;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

/// Resolves a share link into file descriptors
#[async_trait]
pub trait LinkResolver: Send + Sync {
    /// Resolve a share link
    ///
    /// Every returned descriptor carries at least one candidate URL.
    ///
    /// # Errors
    /// [`ResolutionError::Unavailable`] when the service cannot be reached, answers
    /// with an error status or decodes to an empty or unsuccessful payload.
    /// [`ResolutionError::Malformed`] when the body cannot be decoded at all.
    async fn resolve(
        &self,
        share_link: &str,
    ) -> std::result::Result<Vec<FileDescriptor>, ResolutionError>;
}

/// [`LinkResolver`] backed by the upstream resolution service
///
/// Queries `GET <endpoint>?url=<share link>` and expects
/// `{ success, files: [{ file_name, size | size_bytes, download_url, proxified_download_url? }] }`.
pub struct HttpLinkResolver {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpLinkResolver {
    /// Create a resolver from configuration
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(config: &ResolverConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("sharelink-dl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    fn request_url(&self, share_link: &str) -> std::result::Result<url::Url, ResolutionError> {
        url::Url::parse_with_params(&self.endpoint, [("url", share_link)]).map_err(|e| {
            ResolutionError::Unavailable(format!("invalid resolver endpoint '{}': {}", self.endpoint, e))
        })
    }
}

#[async_trait]
impl LinkResolver for HttpLinkResolver {
    async fn resolve(
        &self,
        share_link: &str,
    ) -> std::result::Result<Vec<FileDescriptor>, ResolutionError> {
        let url = self.request_url(share_link)?;
        debug!(share_link, "Requesting file list from resolution service");

        let response = self.client.get(url).send().await.map_err(|e| {
            let msg = if e.is_timeout() {
                format!("request timed out: {}", e)
            } else if e.is_connect() {
                format!("connection failed: {}", e)
            } else {
                format!("request failed: {}", e)
            };
            ResolutionError::Unavailable(msg)
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(share_link, status = status.as_u16(), "Resolution service returned an error status");
            return Err(ResolutionError::Unavailable(format!("HTTP status {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ResolutionError::Unavailable(format!("failed to read response body: {}", e)))?;

        let descriptors = parse_payload(&body)?;
        debug!(share_link, files = descriptors.len(), "Share link resolved");
        Ok(descriptors)
    }
}

#[derive(Debug, Deserialize)]
struct ResolvePayload {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    files: Vec<PayloadFile>,
}

#[derive(Debug, Deserialize)]
struct PayloadFile {
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    size: Option<PayloadSize>,
    #[serde(default)]
    size_bytes: Option<PayloadSize>,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    proxified_download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PayloadSize {
    Bytes(u64),
    Fractional(f64),
    Text(String),
}

impl PayloadSize {
    fn bytes(&self) -> Option<u64> {
        match self {
            PayloadSize::Bytes(n) => Some(*n),
            PayloadSize::Fractional(f) if f.is_finite() && *f >= 0.0 => Some(f.round() as u64),
            PayloadSize::Fractional(_) => None,
            PayloadSize::Text(s) => parse_size(s),
        }
    }
}

impl PayloadFile {
    fn into_descriptor(self) -> Option<FileDescriptor> {
        let name = self.file_name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())?;

        // Proxied link first, direct link second
        let candidate_urls: Vec<String> = [self.proxified_download_url, self.download_url]
            .into_iter()
            .flatten()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if candidate_urls.is_empty() {
            debug!(file = %name, "Dropping resolved entry without a download URL");
            return None;
        }

        let expected_size_bytes = self
            .size_bytes
            .as_ref()
            .and_then(PayloadSize::bytes)
            .or_else(|| self.size.as_ref().and_then(PayloadSize::bytes))
            .unwrap_or(0);

        Some(FileDescriptor {
            name,
            expected_size_bytes,
            candidate_urls,
        })
    }
}

/// Decode a resolution service body into descriptors
pub(crate) fn parse_payload(
    body: &[u8],
) -> std::result::Result<Vec<FileDescriptor>, ResolutionError> {
    let payload: ResolvePayload = serde_json::from_slice(body)
        .map_err(|e| ResolutionError::Malformed(e.to_string()))?;

    if payload.success != Some(true) {
        return Err(ResolutionError::Unavailable(
            "resolution service reported failure".to_string(),
        ));
    }

    let descriptors: Vec<FileDescriptor> = payload
        .files
        .into_iter()
        .filter_map(PayloadFile::into_descriptor)
        .collect();

    if descriptors.is_empty() {
        return Err(ResolutionError::Unavailable(
            "no downloadable files in response".to_string(),
        ));
    }

    Ok(descriptors)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver_for(server: &MockServer) -> HttpLinkResolver {
        HttpLinkResolver::new(&ResolverConfig {
            endpoint: format!("{}/api", server.uri()),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn proxified_url_is_tried_first() {
        let body = json!({
            "success": true,
            "files": [{
                "file_name": "clip.mp4",
                "size_bytes": 1024,
                "download_url": "https://d.example/clip",
                "proxified_download_url": "https://p.example/clip"
            }]
        });

        let files = parse_payload(body.to_string().as_bytes()).unwrap();

        assert_eq!(
            files,
            vec![FileDescriptor {
                name: "clip.mp4".into(),
                expected_size_bytes: 1024,
                candidate_urls: vec![
                    "https://p.example/clip".into(),
                    "https://d.example/clip".into()
                ],
            }]
        );
    }

    #[test]
    fn entries_without_urls_are_dropped() {
        let body = json!({
            "success": true,
            "files": [
                { "file_name": "gone.mp4", "size": 10 },
                { "file_name": "blank.mp4", "download_url": "  " },
                { "file_name": "kept.mkv", "size": "1.5 MB", "download_url": "https://d.example/k" }
            ]
        });

        let files = parse_payload(body.to_string().as_bytes()).unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "kept.mkv");
        assert_eq!(files[0].expected_size_bytes, 1_572_864);
        assert_eq!(files[0].candidate_urls, vec!["https://d.example/k"]);
    }

    #[test]
    fn size_bytes_wins_over_size() {
        let body = json!({
            "success": true,
            "files": [{ "file_name": "a.mp4", "size": "9 GB", "size_bytes": 77, "download_url": "u" }]
        });

        let files = parse_payload(body.to_string().as_bytes()).unwrap();
        assert_eq!(files[0].expected_size_bytes, 77);
    }

    #[test]
    fn unparseable_size_is_unknown() {
        let body = json!({
            "success": true,
            "files": [{ "file_name": "a.mp4", "size": "lots", "download_url": "u" }]
        });

        let files = parse_payload(body.to_string().as_bytes()).unwrap();
        assert_eq!(files[0].declared_size(), None);
    }

    #[test]
    fn missing_success_flag_is_unavailable() {
        let body = json!({ "files": [{ "file_name": "a.mp4", "download_url": "u" }] });

        let err = parse_payload(body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, ResolutionError::Unavailable(_)));
    }

    #[test]
    fn empty_file_list_is_unavailable() {
        let body = json!({ "success": true, "files": [] });

        let err = parse_payload(body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, ResolutionError::Unavailable(_)));
    }

    #[test]
    fn undecodable_body_is_malformed() {
        let err = parse_payload(b"<html>rate limited</html>").unwrap_err();
        assert!(matches!(err, ResolutionError::Malformed(_)));
    }

    #[tokio::test]
    async fn resolve_passes_share_link_as_query_parameter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api"))
            .and(query_param("url", "https://terabox.com/s/1abc?x=1&y=2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "files": [{ "file_name": "clip.mp4", "size_bytes": 5, "download_url": "https://d/1" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let files = resolver_for(&server)
            .resolve("https://terabox.com/s/1abc?x=1&y=2")
            .await
            .unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "clip.mp4");
    }

    #[tokio::test]
    async fn resolve_does_not_retry_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api"))
            .respond_with(ResponseTemplate::new(502))
            .expect(1)
            .mount(&server)
            .await;

        let err = resolver_for(&server)
            .resolve("https://terabox.com/s/1abc")
            .await
            .unwrap_err();

        assert!(matches!(err, ResolutionError::Unavailable(ref m) if m.contains("502")));
    }

    #[tokio::test]
    async fn resolve_reports_unreachable_service() {
        let resolver = HttpLinkResolver::new(&ResolverConfig {
            endpoint: "http://127.0.0.1:1/api".into(),
            timeout: Duration::from_secs(2),
        })
        .unwrap();

        let err = resolver.resolve("https://terabox.com/s/x").await.unwrap_err();
        assert!(matches!(err, ResolutionError::Unavailable(_)));
    }
}
