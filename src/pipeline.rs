//! The retrieval-augmented query pipeline.
//!
//! [`QueryPipeline::handle`] runs one request through a fixed sequence of
//! fail-fast steps:
//!
//! 1. credentials present
//! 2. request body carries a non-blank `prompt`
//! 3. moderation (never skipped, never cached)
//! 4. query embedding (newlines collapsed)
//! 5. similarity search with [`MATCH_THRESHOLD`], [`MATCH_COUNT`],
//!    [`MIN_CONTENT_LENGTH`]
//! 6. context assembly and prompt
//! 7. streamed generation
//!
//! A failure in steps 1 to 6 ends the request before the model is called.
//! Once generation has started, chunks are forwarded through a bounded
//! channel as they arrive. If the receiving side goes away the forwarder
//! drops the upstream stream, which aborts the HTTP call to the model.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::completion::{ChatModel, CompletionRequest, OpenAIChat, TokenStream};
use crate::config::Config;
use crate::context::{
    build_prompt, ContextBuilder, MATCH_COUNT, MATCH_THRESHOLD, MIN_CONTENT_LENGTH,
};
use crate::embedding::{embed_query, EmbeddingProvider, OpenAIProvider};
use crate::error::PipelineError;
use crate::moderation::{Moderator, OpenAIModerator};
use crate::store::{create_store, MatchQuery, SongStore};

/// Chunks of the model answer, in arrival order.
pub type AnswerStream = ReceiverStream<String>;

const CHANNEL_CAPACITY: usize = 64;

/// External services the pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub moderator: Arc<dyn Moderator>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub store: Arc<dyn SongStore>,
    pub chat: Arc<dyn ChatModel>,
}

pub struct QueryPipeline {
    config: Config,
    moderator: Arc<dyn Moderator>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn SongStore>,
    chat: Arc<dyn ChatModel>,
}

impl QueryPipeline {
    pub fn new(config: Config, parts: Collaborators) -> Self {
        Self {
            config,
            moderator: parts.moderator,
            embedder: parts.embedder,
            store: parts.store,
            chat: parts.chat,
        }
    }

    /// Wires the OpenAI services and the configured store.
    ///
    /// Fails when a required credential is missing, so a misconfigured
    /// server never starts.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let api_key = config.require_credentials()?.openai_api_key.to_string();

        let parts = Collaborators {
            moderator: Arc::new(OpenAIModerator::new(&config, &api_key)?),
            embedder: Arc::new(OpenAIProvider::new(&config, &api_key)?),
            store: create_store(&config).await?,
            chat: Arc::new(OpenAIChat::new(&config, &api_key)?),
        };
        Ok(Self::new(config, parts))
    }

    /// Runs one query. `body` is the decoded request body, if any.
    pub async fn handle(&self, body: Option<Value>) -> Result<AnswerStream, PipelineError> {
        let span = info_span!("query", request_id = %Uuid::new_v4());
        self.run(body).instrument(span).await
    }

    async fn run(&self, body: Option<Value>) -> Result<AnswerStream, PipelineError> {
        self.config.require_credentials()?;
        let query = extract_query(body)?;
        info!(chars = query.chars().count(), "query received");

        let verdict = self
            .bounded("moderation", self.moderator.moderate(&query))
            .await
            .map_err(|e| PipelineError::upstream("Failed to moderate query", &e))?;
        if verdict.flagged {
            return Err(PipelineError::user_with_data(
                "Flagged content",
                json!({ "flagged": true, "categories": verdict.categories }),
            ));
        }

        let embedding = self
            .bounded("embedding", embed_query(self.embedder.as_ref(), &query))
            .await
            .map_err(|e| PipelineError::upstream("Failed to create embedding for subject", &e))?;

        let match_query = MatchQuery {
            embedding,
            match_threshold: MATCH_THRESHOLD,
            match_count: MATCH_COUNT,
            min_content_length: MIN_CONTENT_LENGTH,
        };
        let matches = self
            .bounded("retrieval", self.store.match_songs(&match_query))
            .await
            .map_err(|e| PipelineError::upstream("Failed to match songs", &e))?;
        debug!(candidates = matches.len(), "songs matched");

        let context =
            ContextBuilder::new(self.config.generation.context_char_budget).assemble(&matches);
        let prompt = build_prompt(&context.text, &query);

        let generation = &self.config.generation;
        let tokens = self
            .chat
            .stream(CompletionRequest {
                model: generation.model.clone(),
                prompt,
                max_tokens: generation.max_tokens,
                temperature: generation.temperature,
                json_object: true,
            })
            .await
            .map_err(|e| PipelineError::upstream("Failed to generate completion", &e))?;

        info!(candidates = context.included, "streaming answer");
        Ok(self.forward(tokens))
    }

    /// Applies the per-call timeout to one dependency call.
    async fn bounded<T>(
        &self,
        step: &str,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        let limit = self.config.request_timeout();
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!("{} timed out after {}s", step, limit.as_secs()),
        }
    }

    fn forward(&self, tokens: TokenStream) -> AnswerStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let idle = Duration::from_secs(self.config.generation.idle_timeout_secs);
        tokio::spawn(forward_tokens(tokens, tx, idle).instrument(Span::current()));
        ReceiverStream::new(rx)
    }
}

/// Pumps model output into the channel until it ends, fails, stalls or the
/// receiver is dropped. Returning drops `tokens`.
async fn forward_tokens(mut tokens: TokenStream, tx: mpsc::Sender<String>, idle: Duration) {
    let mut forwarded = 0usize;
    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                info!(forwarded, "client went away, abandoning generation");
                return;
            }
            next = tokio::time::timeout(idle, tokens.next()) => next,
        };

        match next {
            Ok(Some(Ok(chunk))) => {
                forwarded += chunk.len();
                if tx.send(chunk).await.is_err() {
                    info!(forwarded, "client went away, abandoning generation");
                    return;
                }
            }
            Ok(Some(Err(err))) => {
                error!("generation stream failed after {} bytes: {:#}", forwarded, err);
                return;
            }
            Ok(None) => {
                debug!(forwarded, "generation finished");
                return;
            }
            Err(_) => {
                warn!(forwarded, idle_secs = idle.as_secs(), "generation stalled, closing stream");
                return;
            }
        }
    }
}

/// Pulls the trimmed `prompt` out of the request body.
fn extract_query(body: Option<Value>) -> Result<String, PipelineError> {
    let Some(Value::Object(data)) = body else {
        return Err(PipelineError::user("Missing request data"));
    };

    match data.get("prompt").and_then(Value::as_str).map(str::trim) {
        Some(query) if !query.is_empty() => Ok(query.to_string()),
        _ => Err(PipelineError::user("Missing query in request data")),
    }
}
