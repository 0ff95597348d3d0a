//! Streamed chat completions.
//!
//! [`ChatModel::stream`] returns a [`TokenStream`]: text fragments in arrival
//! order. Dropping the stream drops the underlying HTTP response, which
//! closes the connection and abandons the generation upstream.
//!
//! The OpenAI implementation decodes the server-sent-event body as it
//! arrives. Network chunks do not respect line boundaries, so [`SseDecoder`]
//! buffers partial lines between reads.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::config::Config;
use crate::http;

/// Ordered text fragments of a model answer.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Parameters of one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Constrain the answer to a single JSON object.
    pub json_object: bool,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn stream(&self, request: CompletionRequest) -> Result<TokenStream>;
}

// ============ OpenAI chat model ============

pub struct OpenAIChat {
    client: reqwest::Client,
    endpoint: String,
    first_byte_timeout: Duration,
}

impl OpenAIChat {
    pub fn new(config: &Config, api_key: &str) -> Result<Self> {
        Ok(Self {
            // No overall timeout: the body is consumed for as long as tokens flow.
            client: http::bearer_client(api_key, None)?,
            endpoint: http::endpoint(&config.openai.base_url, "chat/completions"),
            first_byte_timeout: Duration::from_secs(config.generation.first_byte_timeout_secs),
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[async_trait]
impl ChatModel for OpenAIChat {
    async fn stream(&self, request: CompletionRequest) -> Result<TokenStream> {
        let body = ChatRequest {
            model: &request.model,
            messages: [ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: request.json_object.then_some(ResponseFormat {
                kind: "json_object",
            }),
            stream: true,
        };

        let send = self.client.post(&self.endpoint).json(&body).send();
        let response = tokio::time::timeout(self.first_byte_timeout, send)
            .await
            .map_err(|_| anyhow!("OpenAI chat completion timed out before responding"))?
            .context("failed to call OpenAI chat completions")?;

        let status = response.status();
        if !status.is_success() {
            let body = http::error_body(response).await;
            bail!("OpenAI chat completion failed ({}): {}", status, body);
        }

        let mut bytes = response.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut decoder = SseDecoder::default();
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.context("completion stream interrupted")?;
                for frame in decoder.push(&chunk) {
                    match frame {
                        SseFrame::Done => break 'read,
                        SseFrame::Data(payload) => {
                            if let Some(text) = delta_content(&payload)? {
                                yield text;
                            }
                        }
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

/// Extracts `choices[0].delta.content` from one streamed event.
fn delta_content(payload: &str) -> Result<Option<String>> {
    let event: Value =
        serde_json::from_str(payload).context("malformed completion stream event")?;

    if let Some(err) = event.get("error") {
        bail!("completion stream reported an error: {}", err);
    }

    Ok(event
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

// ============ Server-sent events ============

#[derive(Debug, PartialEq)]
pub enum SseFrame {
    Data(String),
    Done,
}

/// Incremental `text/event-stream` line decoder.
///
/// Only `data:` fields matter for completions; comments, `event:` and `id:`
/// lines are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(bytes);

        let mut frames = Vec::new();
        // '\n' never occurs inside a multi-byte UTF-8 sequence, so splitting
        // on it before decoding is safe.
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);

            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim_start();
                if data == "[DONE]" {
                    frames.push(SseFrame::Done);
                } else if !data.is_empty() {
                    frames.push(SseFrame::Data(data.to_string()));
                }
            }
        }
        frames
    }
}
