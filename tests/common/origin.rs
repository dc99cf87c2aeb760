//! Mock resolver and origin servers built on wiremock

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Serves `body` honoring `Range: bytes=start-[end]` like a real file server
pub struct RangeBody(pub Vec<u8>);

impl Respond for RangeBody {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let total = self.0.len() as u64;
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|spec| {
                let (start, end) = spec.split_once('-')?;
                let start: u64 = start.parse().ok()?;
                let end = if end.is_empty() {
                    total.saturating_sub(1)
                } else {
                    end.parse::<u64>().ok()?.min(total.saturating_sub(1))
                };
                Some((start, end))
            });

        match range {
            None => ResponseTemplate::new(200).set_body_bytes(self.0.clone()),
            Some((start, _)) if start >= total => ResponseTemplate::new(416)
                .insert_header("content-range", format!("bytes */{}", total)),
            Some((start, end)) => ResponseTemplate::new(206)
                .insert_header(
                    "content-range",
                    format!("bytes {}-{}/{}", start, end, total),
                )
                .set_body_bytes(self.0[start as usize..=end as usize].to_vec()),
        }
    }
}

/// Deterministic test payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// One resolver `files` entry
pub fn resolved_file(
    name: &str,
    size_bytes: u64,
    proxified: Option<String>,
    direct: Option<String>,
) -> serde_json::Value {
    json!({
        "file_name": name,
        "size_bytes": size_bytes,
        "proxified_download_url": proxified,
        "download_url": direct,
    })
}

/// Answer every resolution of `share_link` with `files`
pub async fn mount_resolution(server: &MockServer, share_link: &str, files: Vec<serde_json::Value>) {
    Mock::given(method("GET"))
        .and(path("/api/resolve"))
        .and(query_param("url", share_link))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "files": files,
        })))
        .mount(server)
        .await;
}

/// Answer only the first resolution of `share_link` with `files`
pub async fn mount_resolution_once(
    server: &MockServer,
    share_link: &str,
    files: Vec<serde_json::Value>,
) {
    Mock::given(method("GET"))
        .and(path("/api/resolve"))
        .and(query_param("url", share_link))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "files": files,
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(server)
        .await;
}

/// Serve `body` with range support at `route`
pub async fn mount_file(server: &MockServer, route: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(RangeBody(body))
        .mount(server)
        .await;
}

/// Fail every request to `route` with `status`
pub async fn mount_failing(server: &MockServer, route: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}
