//! Recording fakes of the pipeline's external services.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value};
use song_search::completion::{ChatModel, CompletionRequest, TokenStream};
use song_search::config::{Config, Credentials};
use song_search::embedding::{EmbeddingBatch, EmbeddingProvider};
use song_search::models::{EmbeddingInfo, MatchedSong, SongInfo, SongRecord};
use song_search::moderation::{ModerationVerdict, Moderator};
use song_search::pipeline::{Collaborators, QueryPipeline};
use song_search::store::{MatchQuery, SongStore};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

pub const QUERY_VECTOR: [f32; 3] = [0.1, 0.2, 0.3];

// ─── Moderator ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeModerator {
    pub flag: bool,
    pub fail: bool,
    pub hang: bool,
    pub inputs: Mutex<Vec<String>>,
}

#[async_trait]
impl Moderator for FakeModerator {
    async fn moderate(&self, text: &str) -> Result<ModerationVerdict> {
        self.inputs.lock().unwrap().push(text.to_string());
        if self.hang {
            futures::future::pending::<()>().await;
        }
        if self.fail {
            bail!("OpenAI moderation request failed (503): moderation backend down");
        }
        let mut categories = Map::new();
        categories.insert("hate".into(), Value::Bool(self.flag));
        categories.insert("violence".into(), Value::Bool(false));
        Ok(ModerationVerdict {
            flagged: self.flag,
            categories,
        })
    }
}

// ─── Embedder ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeEmbedder {
    pub fail: bool,
    pub hang: bool,
    pub inputs: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake-embedding"
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        self.inputs.lock().unwrap().push(texts.to_vec());
        if self.hang {
            futures::future::pending::<()>().await;
        }
        if self.fail {
            bail!(
                "OpenAI embeddings request failed (500 Internal Server Error): {{\"error\":\"upstream secret detail\"}}"
            );
        }
        Ok(EmbeddingBatch {
            vectors: texts.iter().map(|_| QUERY_VECTOR.to_vec()).collect(),
            model: "fake-embedding".into(),
            usage: Value::Null,
            object: "list".into(),
        })
    }
}

// ─── Store ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeStore {
    pub fail: bool,
    pub hang: bool,
    pub matches: Vec<MatchedSong>,
    pub queries: Mutex<Vec<MatchQuery>>,
}

#[async_trait]
impl SongStore for FakeStore {
    async fn match_songs(&self, query: &MatchQuery) -> Result<Vec<MatchedSong>> {
        self.queries.lock().unwrap().push(query.clone());
        if self.hang {
            futures::future::pending::<()>().await;
        }
        if self.fail {
            bail!("match_songs failed (500): relation \"song\" does not exist");
        }
        Ok(self.matches.clone())
    }

    async fn upsert_songs(&self, songs: &[SongRecord]) -> Result<usize> {
        Ok(songs.len())
    }

    async fn songs_without_embedding(&self) -> Result<Vec<SongRecord>> {
        Ok(Vec::new())
    }

    async fn set_embedding(&self, _id: &str, _embedding: &[f32], _info: &EmbeddingInfo) -> Result<()> {
        Ok(())
    }
}

// ─── Chat model ─────────────────────────────────────────────────────

/// Streams `chunks` and then, if `hang` is set, never finishes.
#[derive(Default)]
pub struct FakeChat {
    pub chunks: Vec<String>,
    pub fail: bool,
    pub hang: bool,
    pub requests: Mutex<Vec<CompletionRequest>>,
    /// Set once the stream handed out has been dropped.
    pub dropped: Arc<AtomicBool>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatModel for FakeChat {
    async fn stream(&self, request: CompletionRequest) -> Result<TokenStream> {
        self.requests.lock().unwrap().push(request);
        if self.fail {
            bail!("OpenAI chat completion failed (429): quota exceeded");
        }

        let guard = DropFlag(self.dropped.clone());
        let chunks = futures::stream::iter(self.chunks.clone().into_iter().map(Ok));
        let tail = if self.hang {
            futures::stream::pending().boxed()
        } else {
            futures::stream::empty().boxed()
        };
        Ok(chunks
            .chain(tail)
            .map(move |item| {
                let _held = &guard;
                item
            })
            .boxed())
    }
}

// ─── Wiring ─────────────────────────────────────────────────────────

pub struct Harness {
    pub moderator: Arc<FakeModerator>,
    pub embedder: Arc<FakeEmbedder>,
    pub store: Arc<FakeStore>,
    pub chat: Arc<FakeChat>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            moderator: Arc::new(FakeModerator::default()),
            embedder: Arc::new(FakeEmbedder::default()),
            store: Arc::new(FakeStore::default()),
            chat: Arc::new(FakeChat {
                chunks: answer_chunks(),
                ..Default::default()
            }),
        }
    }

    pub fn pipeline(&self) -> QueryPipeline {
        self.pipeline_with(configured())
    }

    pub fn pipeline_with(&self, config: Config) -> QueryPipeline {
        QueryPipeline::new(
            config,
            Collaborators {
                moderator: self.moderator.clone(),
                embedder: self.embedder.clone(),
                store: self.store.clone(),
                chat: self.chat.clone(),
            },
        )
    }

    pub fn moderation_calls(&self) -> usize {
        self.moderator.inputs.lock().unwrap().len()
    }

    pub fn embedding_calls(&self) -> usize {
        self.embedder.inputs.lock().unwrap().len()
    }

    pub fn retrieval_calls(&self) -> usize {
        self.store.queries.lock().unwrap().len()
    }

    pub fn generation_calls(&self) -> usize {
        self.chat.requests.lock().unwrap().len()
    }
}

/// Defaults plus a full set of credentials and a one-second call timeout.
pub fn impatient() -> Config {
    let mut config = configured();
    config.openai.timeout_secs = 1;
    config.generation.first_byte_timeout_secs = 1;
    config
}

/// A server that accepts connections and never answers.
pub async fn silent_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

// ─── Log capture ────────────────────────────────────────────────────

/// In-memory sink for a `tracing` fmt subscriber.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs `f` with every event on this thread written to the returned buffer.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, buffer.contents())
}

/// Defaults plus a full set of credentials.
pub fn configured() -> Config {
    let mut config = Config::default();
    config.credentials = Credentials {
        openai_api_key: Some("sk-test".into()),
        store_url: Some("https://project.supabase.co".into()),
        store_key: Some("service-role".into()),
    };
    config
}

pub const ANSWER: &str = r#"{"results":[{"id":"cc-1","number":"12","title":"Song A","reason":"matches theme"}]}"#;

/// The model answer split into small uneven fragments.
pub fn answer_chunks() -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = ANSWER;
    let mut size = 3;
    while !rest.is_empty() {
        let cut = size.min(rest.len());
        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
        size = size % 7 + 2;
    }
    chunks
}

pub fn matched(id: &str, content: &str) -> MatchedSong {
    MatchedSong {
        id: id.to_string(),
        title: format!("Title {}", id),
        content: content.to_string(),
        categories: vec!["Laudă".into()],
        info: SongInfo {
            number: "7".into(),
            meta: Map::new(),
        },
        similarity: 0.8,
    }
}
