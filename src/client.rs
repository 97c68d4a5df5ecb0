//! HTTP client for the search daemon.
//!
//! Every call returns an [`Outcome`] instead of an error so callers (the MCP
//! adapter, the CLI) can tell "the daemon is not running" apart from "the
//! daemon answered with a failure" without inspecting error strings.

use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::daemon::{ErrorBody, SearchRequest, SearchResponse, StatsResponse};

/// Result of one daemon call.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    /// No connection could be made (refused, DNS, connect timeout).
    Unreachable(String),
    /// The daemon was reached but the call did not succeed.
    Failed(String),
}

#[derive(Clone)]
pub struct DaemonClient {
    base_url: String,
    client: reqwest::Client,
}

impl DaemonClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn search(
        &self,
        query: &str,
        n_results: usize,
        timeout: Duration,
    ) -> Outcome<SearchResponse> {
        let body = SearchRequest {
            query: query.to_string(),
            n_results: Some(n_results as i64),
        };
        let request = self
            .client
            .post(format!("{}/search", self.base_url))
            .timeout(timeout)
            .json(&body);
        send(request).await
    }

    pub async fn stats(&self, timeout: Duration) -> Outcome<StatsResponse> {
        let request = self
            .client
            .get(format!("{}/stats", self.base_url))
            .timeout(timeout);
        send(request).await
    }
}

async fn send<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Outcome<T> {
    let response = match request.send().await {
        Ok(resp) => resp,
        Err(e) if e.is_connect() => return Outcome::Unreachable(e.to_string()),
        Err(e) if e.is_timeout() => return Outcome::Failed(format!("request timed out: {}", e)),
        Err(e) => return Outcome::Failed(e.to_string()),
    };

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Outcome::Failed(error_message(status, &text));
    }

    match response.json::<T>().await {
        Ok(value) => Outcome::Success(value),
        Err(e) if e.is_timeout() => Outcome::Failed(format!("request timed out: {}", e)),
        Err(e) => Outcome::Failed(format!("invalid response from daemon: {}", e)),
    }
}

/// Prefer the daemon's own `{"error":{"message"}}` over the raw body.
fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) => format!("{} ({})", err.error.message, status),
        Err(_) if body.trim().is_empty() => format!("daemon returned {}", status),
        Err(_) => format!("daemon returned {}: {}", status, body.trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_uses_daemon_message() {
        let body = r#"{"error":{"code":"service_unavailable","message":"search service not initialized"}}"#;
        let msg = error_message(reqwest::StatusCode::SERVICE_UNAVAILABLE, body);
        assert!(msg.starts_with("search service not initialized"));
        assert!(msg.contains("503"));
    }

    #[test]
    fn test_error_message_falls_back_to_body() {
        let msg = error_message(reqwest::StatusCode::BAD_GATEWAY, "upstream gone");
        assert!(msg.contains("502"));
        assert!(msg.contains("upstream gone"));
        assert!(error_message(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "").contains("500"));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = DaemonClient::new("http://127.0.0.1:8766/");
        assert_eq!(client.base_url(), "http://127.0.0.1:8766");
    }

    #[tokio::test]
    async fn test_unreachable_daemon() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = DaemonClient::new(&format!("http://{}", addr));
        match client.stats(Duration::from_secs(2)).await {
            Outcome::Unreachable(_) => {}
            other => panic!("expected Unreachable, got {:?}", other),
        }
    }
}
