use anyhow::{bail, Result};

use crate::config::Config;
use crate::embedding::{EmbeddingProvider, OpenAIProvider};
use crate::models::SongRecord;
use crate::store::{self, SongStore};

/// Counts reported by a backfill run.
#[derive(Debug, Default, PartialEq)]
pub struct BackfillReport {
    pub pending: usize,
    pub embedded: usize,
}

/// Embed every song whose embedding is still null.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    let api_key = config.require_credentials()?.openai_api_key.to_string();
    let provider = OpenAIProvider::new(config, &api_key)?;
    let store = store::create_store(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.backfill.batch_size);
    if batch_size == 0 {
        bail!("batch size must be > 0");
    }

    if dry_run {
        let pending = store.songs_without_embedding().await?;
        let pending = limit.map_or(pending.len(), |l| pending.len().min(l));
        println!("embed pending (dry-run)");
        println!("  songs needing embeddings: {}", pending);
        return Ok(());
    }

    let report = backfill(store.as_ref(), &provider, batch_size, limit).await?;

    println!("embed pending");
    if report.pending == 0 {
        println!("  all songs up to date");
    } else {
        println!("  total pending: {}", report.pending);
        println!("  embedded: {}", report.embedded);
    }
    Ok(())
}

/// Embeds pending songs in sequential batches.
///
/// The first failing call aborts the run; songs written before it keep
/// their embeddings and the next run picks up the rest.
pub async fn backfill(
    store: &dyn SongStore,
    provider: &dyn EmbeddingProvider,
    batch_size: usize,
    limit: Option<usize>,
) -> Result<BackfillReport> {
    let mut pending = store.songs_without_embedding().await?;
    if let Some(limit) = limit {
        pending.truncate(limit);
    }
    tracing::info!(count = pending.len(), "songs to process");

    let mut report = BackfillReport {
        pending: pending.len(),
        embedded: 0,
    };

    for batch in pending.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(embedding_input).collect();
        let response = provider.embed(&texts).await?;
        if response.vectors.len() != batch.len() {
            bail!(
                "embedding count mismatch: sent {}, received {}",
                batch.len(),
                response.vectors.len()
            );
        }

        let mut info = response.info();
        if info.model.is_empty() {
            info.model = provider.model_name().to_string();
        }
        for (song, vector) in batch.iter().zip(&response.vectors) {
            store.set_embedding(&song.id, vector, &info).await?;
        }
        report.embedded += batch.len();
        tracing::info!("inserted {} docs", batch.len());
    }

    Ok(report)
}

/// The text embedded for a stored song. Newlines are removed, not replaced.
pub fn embedding_input(song: &SongRecord) -> String {
    format!(
        "title={},categories={},content={}",
        song.title,
        song.categories.join(","),
        song.content
    )
    .replace('\n', "")
}
