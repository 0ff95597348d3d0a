//! SQLite-backed [`SongStore`] for local development.
//!
//! Embeddings are stored as little-endian f32 BLOBs. [`match_songs`] honours
//! the same contract as the hosted RPC by scanning every embedded row and
//! scoring it with cosine similarity; there is no index.
//!
//! [`match_songs`]: SongStore::match_songs

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{MatchQuery, SongStore};
use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::migrate;
use crate::models::{EmbeddingInfo, MatchedSong, SongInfo, SongRecord};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connects to `store.path` and makes sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::create_schema(&pool).await?;
        Ok(Self::new(pool))
    }
}

fn record_from_row(row: &SqliteRow) -> Result<SongRecord> {
    let id: String = row.get("id");
    let categories_json: String = row.get("categories_json");
    let info_json: String = row.get("info_json");
    let categories: Vec<String> = serde_json::from_str(&categories_json)
        .with_context(|| format!("corrupt categories for {}", id))?;
    let info: SongInfo =
        serde_json::from_str(&info_json).with_context(|| format!("corrupt info for {}", id))?;

    Ok(SongRecord {
        id,
        title: row.get("title"),
        content: row.get("content"),
        categories,
        info,
    })
}

#[async_trait]
impl SongStore for SqliteStore {
    async fn match_songs(&self, query: &MatchQuery) -> Result<Vec<MatchedSong>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, content, categories_json, info_json, embedding
            FROM songs
            WHERE embedding IS NOT NULL AND length(content) >= ?
            "#,
        )
        .bind(query.min_content_length as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut matches = Vec::new();
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let similarity =
                cosine_similarity(&query.embedding, &blob_to_vec(&blob)) as f64;
            if similarity > query.match_threshold {
                matches.push(MatchedSong::from_record(record_from_row(row)?, similarity));
            }
        }

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(query.match_count);

        Ok(matches)
    }

    async fn upsert_songs(&self, songs: &[SongRecord]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        for song in songs {
            sqlx::query(
                r#"
                INSERT INTO songs (id, title, content, categories_json, info_json)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    content = excluded.content,
                    categories_json = excluded.categories_json,
                    info_json = excluded.info_json
                "#,
            )
            .bind(&song.id)
            .bind(&song.title)
            .bind(&song.content)
            .bind(serde_json::to_string(&song.categories)?)
            .bind(serde_json::to_string(&song.info)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(songs.len())
    }

    async fn songs_without_embedding(&self) -> Result<Vec<SongRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, content, categories_json, info_json
            FROM songs
            WHERE embedding IS NULL
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn set_embedding(
        &self,
        id: &str,
        embedding: &[f32],
        info: &EmbeddingInfo,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE songs
            SET embedding = ?, embedding_info_json = ?, embedded_at = ?
            WHERE id = ?
            "#,
        )
        .bind(vec_to_blob(embedding))
        .bind(serde_json::to_string(info)?)
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("song not found: {}", id);
        }
        Ok(())
    }
}
