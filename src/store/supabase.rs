//! PostgREST (Supabase) backend.
//!
//! The table and the similarity function live in Postgres with pgvector;
//! this client only speaks the REST surface:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | match | `POST /rest/v1/rpc/{match_function}` |
//! | upsert | `POST /rest/v1/{table}?on_conflict=id` with `Prefer: resolution=merge-duplicates` |
//! | pending | `GET /rest/v1/{table}?embedding=is.null`, paged |
//! | update | `PATCH /rest/v1/{table}?id=eq.{id}` |

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::Serialize;

use super::{MatchQuery, SongStore};
use crate::config::Config;
use crate::http;
use crate::models::{EmbeddingInfo, MatchedSong, SongRecord};

const PAGE_SIZE: usize = 1000;
const UPSERT_BATCH: usize = 500;
const RECORD_COLUMNS: &str = "id,title,content,categories,info";

pub struct SupabaseStore {
    client: reqwest::Client,
    service_key: String,
    rest_url: String,
    table: String,
    match_function: String,
}

impl SupabaseStore {
    pub fn new(config: &Config, url: &str, service_key: &str) -> Result<Self> {
        Ok(Self {
            client: http::bearer_client(service_key, Some(config.request_timeout()))?,
            service_key: service_key.trim().to_string(),
            rest_url: http::endpoint(url, "rest/v1"),
            table: config.store.table.clone(),
            match_function: config.store.match_function.clone(),
        })
    }

    /// PostgREST wants the key twice: as bearer token and as `apikey`.
    fn request(&self, method: Method, url: String) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.service_key)
    }

    fn table_url(&self) -> String {
        http::endpoint(&self.rest_url, &self.table)
    }
}

#[derive(Serialize)]
struct EmbeddingUpdate<'a> {
    embedding: &'a [f32],
    embedding_info: &'a EmbeddingInfo,
}

async fn ensure_success(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = http::error_body(response).await;
    bail!("{} failed ({}): {}", what, status, body);
}

#[async_trait]
impl SongStore for SupabaseStore {
    async fn match_songs(&self, query: &MatchQuery) -> Result<Vec<MatchedSong>> {
        let url = http::endpoint(&self.rest_url, &format!("rpc/{}", self.match_function));
        let response = self
            .request(Method::POST, url)
            .json(query)
            .send()
            .await
            .with_context(|| format!("failed to call {}", self.match_function))?;
        let response = ensure_success(response, &self.match_function).await?;
        response
            .json()
            .await
            .with_context(|| format!("failed to parse {} response", self.match_function))
    }

    async fn upsert_songs(&self, songs: &[SongRecord]) -> Result<usize> {
        for batch in songs.chunks(UPSERT_BATCH) {
            let response = self
                .request(Method::POST, self.table_url())
                .query(&[("on_conflict", "id")])
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(batch)
                .send()
                .await
                .context("failed to upsert songs")?;
            ensure_success(response, "song upsert").await?;
        }
        Ok(songs.len())
    }

    async fn songs_without_embedding(&self) -> Result<Vec<SongRecord>> {
        let mut songs = Vec::new();
        loop {
            let offset = songs.len().to_string();
            let limit = PAGE_SIZE.to_string();
            let response = self
                .request(Method::GET, self.table_url())
                .query(&[
                    ("select", RECORD_COLUMNS),
                    ("embedding", "is.null"),
                    ("order", "id"),
                    ("limit", limit.as_str()),
                    ("offset", offset.as_str()),
                ])
                .send()
                .await
                .context("failed to list songs without embedding")?;
            let response = ensure_success(response, "pending song query").await?;
            let page: Vec<SongRecord> = response
                .json()
                .await
                .context("failed to parse pending songs")?;
            let done = page.len() < PAGE_SIZE;
            songs.extend(page);
            if done {
                return Ok(songs);
            }
        }
    }

    async fn set_embedding(
        &self,
        id: &str,
        embedding: &[f32],
        info: &EmbeddingInfo,
    ) -> Result<()> {
        let filter = format!("eq.{}", id);
        let response = self
            .request(Method::PATCH, self.table_url())
            .query(&[("id", filter.as_str())])
            .header("Prefer", "return=minimal")
            .json(&EmbeddingUpdate {
                embedding,
                embedding_info: info,
            })
            .send()
            .await
            .with_context(|| format!("failed to update embedding for {}", id))?;
        ensure_success(response, "embedding update").await?;
        Ok(())
    }
}
