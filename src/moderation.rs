//! Content moderation gate.
//!
//! Every query is moderated before it is embedded or searched. The verdict is
//! never cached: two identical queries make two moderation calls.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::Config;
use crate::http;

/// Outcome of a moderation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModerationVerdict {
    pub flagged: bool,
    /// Category name → whether it triggered.
    #[serde(default)]
    pub categories: Map<String, Value>,
}

#[async_trait]
pub trait Moderator: Send + Sync {
    async fn moderate(&self, text: &str) -> Result<ModerationVerdict>;
}

/// Moderator backed by `POST {base}/moderations`.
pub struct OpenAIModerator {
    client: reqwest::Client,
    endpoint: String,
}

impl OpenAIModerator {
    pub fn new(config: &Config, api_key: &str) -> Result<Self> {
        Ok(Self {
            client: http::bearer_client(api_key, Some(config.request_timeout()))?,
            endpoint: http::endpoint(&config.openai.base_url, "moderations"),
        })
    }
}

#[derive(Serialize)]
struct ModerationRequest<'a> {
    input: &'a str,
}

#[derive(Deserialize)]
struct ModerationResponse {
    results: Vec<ModerationVerdict>,
}

#[async_trait]
impl Moderator for OpenAIModerator {
    async fn moderate(&self, text: &str) -> Result<ModerationVerdict> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ModerationRequest { input: text })
            .send()
            .await
            .context("failed to call OpenAI moderations")?;

        let status = response.status();
        if !status.is_success() {
            let body = http::error_body(response).await;
            bail!("OpenAI moderation request failed ({}): {}", status, body);
        }

        let parsed: ModerationResponse = response
            .json()
            .await
            .context("failed to parse OpenAI moderation response")?;
        first_verdict(parsed)
    }
}

fn first_verdict(parsed: ModerationResponse) -> Result<ModerationVerdict> {
    parsed
        .results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("OpenAI moderation response had no results"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_first_result() {
        let parsed: ModerationResponse = serde_json::from_value(json!({
            "id": "modr-1",
            "model": "text-moderation-007",
            "results": [{
                "flagged": true,
                "categories": { "hate": true, "violence": false },
                "category_scores": { "hate": 0.91, "violence": 0.01 }
            }]
        }))
        .unwrap();
        let verdict = first_verdict(parsed).unwrap();
        assert!(verdict.flagged);
        assert_eq!(verdict.categories["hate"], true);
    }

    #[test]
    fn empty_results_is_an_error() {
        let parsed: ModerationResponse = serde_json::from_value(json!({ "results": [] })).unwrap();
        assert!(first_verdict(parsed).is_err());
    }
}
