//! Shared `reqwest` client construction for the OpenAI-compatible and
//! PostgREST backends.

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;

/// Builds a client that sends `Authorization: Bearer <key>` on every request.
///
/// `timeout` bounds the whole exchange. Streaming callers pass `None` and
/// enforce their own first-byte and idle limits.
pub fn bearer_client(api_key: &str, timeout: Option<Duration>) -> Result<Client> {
    let mut headers = HeaderMap::new();
    let auth = format!("Bearer {}", api_key.trim());
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&auth).context("invalid API key")?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let mut builder = Client::builder()
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(10));
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().context("failed to build HTTP client")
}

/// Joins a base URL and a path without doubling slashes.
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Reads an error response body for logging, never failing.
pub async fn error_body(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string())
}
