//! Embedding provider abstraction and the OpenAI implementation.
//!
//! Defines the [`EmbeddingProvider`] trait used by both the query pipeline
//! (one text per request) and the backfill job (batches of records), plus
//! vector utilities for the SQLite backend:
//! - [`cosine_similarity`]: similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Failure policy
//!
//! Calls are never retried. A non-success status fails immediately with the
//! upstream status and body in the error, so the caller can log the detail.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::http;
use crate::models::EmbeddingInfo;

/// Vectors for a batch of inputs, in input order, with the provider's
/// response metadata.
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub model: String,
    pub usage: Value,
    pub object: String,
}

impl EmbeddingBatch {
    pub fn info(&self) -> EmbeddingInfo {
        EmbeddingInfo {
            model: self.model.clone(),
            usage: self.usage.clone(),
            object: self.object.clone(),
        }
    }
}

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-ada-002"`).
    ///
    /// Recorded with stored embeddings when a response does not name its
    /// model.
    fn model_name(&self) -> &str;

    /// Embeds a batch of texts. The result holds one vector per input.
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch>;
}

/// Embeds a single query text.
///
/// Newlines are collapsed to spaces before the call; the query pipeline
/// relies on this so that retrieval always sees the same normalisation.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let input = collapse_newlines(text);
    let batch = provider.embed(&[input]).await?;
    batch
        .vectors
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Empty embedding response"))
}

pub fn collapse_newlines(text: &str) -> String {
    text.replace('\n', " ")
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API (`POST {base}/embeddings`).
pub struct OpenAIProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OpenAIProvider {
    pub fn new(config: &Config, api_key: &str) -> Result<Self> {
        let client = http::bearer_client(api_key, Some(config.request_timeout()))?;
        Ok(Self {
            client,
            endpoint: http::endpoint(&config.openai.base_url, "embeddings"),
            model: config.openai.embedding_model.clone(),
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        if texts.is_empty() {
            return Ok(EmbeddingBatch {
                vectors: Vec::new(),
                model: self.model.clone(),
                usage: Value::Null,
                object: "list".to_string(),
            });
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .context("failed to call OpenAI embeddings")?;

        let status = response.status();
        if !status.is_success() {
            let body = http::error_body(response).await;
            bail!("OpenAI embeddings request failed ({}): {}", status, body);
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("failed to parse OpenAI embedding response")?;
        parse_openai_response(parsed, texts.len())
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Value,
    #[serde(default)]
    object: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

fn parse_openai_response(mut parsed: EmbeddingResponse, expected: usize) -> Result<EmbeddingBatch> {
    // Sort by index to ensure order matches input
    parsed.data.sort_by_key(|entry| entry.index);
    if parsed.data.len() != expected {
        bail!(
            "OpenAI returned {} embeddings for {} inputs",
            parsed.data.len(),
            expected
        );
    }

    Ok(EmbeddingBatch {
        vectors: parsed.data.into_iter().map(|d| d.embedding).collect(),
        model: parsed.model,
        usage: parsed.usage,
        object: parsed.object,
    })
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use song_search::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
