//! Storage abstraction for song records and their embeddings.
//!
//! The [`SongStore`] trait is everything the loader, the backfill job and the
//! query pipeline need from the vector-capable datastore. Two backends ship:
//!
//! | Provider | Type | Notes |
//! |----------|------|-------|
//! | `supabase` | [`SupabaseStore`] | PostgREST table + `match_songs` RPC |
//! | `sqlite` | [`SqliteStore`] | local file, exact similarity scan |

pub mod sqlite;
pub mod supabase;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::config::{Config, STORE_KEY_VAR, STORE_URL_VAR};
use crate::models::{EmbeddingInfo, MatchedSong, SongRecord};

pub use sqlite::SqliteStore;
pub use supabase::SupabaseStore;

/// Arguments of the similarity-search call, serialised as the RPC body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchQuery {
    pub embedding: Vec<f32>,
    pub match_threshold: f64,
    pub match_count: usize,
    pub min_content_length: usize,
}

/// Abstract vector-capable storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`match_songs`](SongStore::match_songs) | Similarity search, most similar first |
/// | [`upsert_songs`](SongStore::upsert_songs) | Insert or update records by id |
/// | [`songs_without_embedding`](SongStore::songs_without_embedding) | Records the backfill must process |
/// | [`set_embedding`](SongStore::set_embedding) | Attach a vector to one record |
#[async_trait]
pub trait SongStore: Send + Sync {
    /// Returns at most `query.match_count` songs whose similarity to
    /// `query.embedding` exceeds `query.match_threshold`, ordered by
    /// descending similarity.
    async fn match_songs(&self, query: &MatchQuery) -> Result<Vec<MatchedSong>>;

    /// Inserts or updates records keyed by `id`. Returns the number written.
    async fn upsert_songs(&self, songs: &[SongRecord]) -> Result<usize>;

    /// Records whose embedding is still null.
    async fn songs_without_embedding(&self) -> Result<Vec<SongRecord>>;

    /// Stores the embedding and its metadata for one record.
    async fn set_embedding(&self, id: &str, embedding: &[f32], info: &EmbeddingInfo)
        -> Result<()>;
}

/// Creates the backend selected by `store.provider`.
pub async fn create_store(config: &Config) -> Result<Arc<dyn SongStore>> {
    match config.store.provider.as_str() {
        "supabase" => {
            let creds = &config.credentials;
            let (Some(url), Some(key)) = (creds.store_url.as_deref(), creds.store_key.as_deref())
            else {
                bail!(
                    "Missing environment variable {} or {}",
                    STORE_URL_VAR,
                    STORE_KEY_VAR
                );
            };
            Ok(Arc::new(SupabaseStore::new(config, url, key)?))
        }
        "sqlite" => Ok(Arc::new(SqliteStore::open(config).await?)),
        other => bail!("Unknown store provider: {}", other),
    }
}
