use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates the `songs` table. Idempotent.
///
/// `embedding` stays NULL until the backfill job writes it; that is the
/// marker `songs_without_embedding` filters on.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS songs (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL DEFAULT '',
            categories_json TEXT NOT NULL DEFAULT '[]',
            info_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB,
            embedding_info_json TEXT,
            embedded_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_songs_pending ON songs(id) WHERE embedding IS NULL",
    )
    .execute(pool)
    .await?;

    Ok(())
}
