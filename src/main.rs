//! # Song Search CLI (`songsearch`)
//!
//! ## Usage
//!
//! ```bash
//! songsearch --config ./config/songsearch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `songsearch init` | Create the SQLite schema (local store only) |
//! | `songsearch load` | Fetch the song corpus and upsert it |
//! | `songsearch embed pending` | Embed songs that have no vector yet |
//! | `songsearch ask "<query>"` | Run a query and print ranked songs |
//! | `songsearch serve` | Start the HTTP server |
//!
//! Credentials come from `OPENAI_API_KEY`, `SUPABASE_URL` and
//! `SUPABASE_SERVICE_ROLE_KEY`. Log verbosity follows `RUST_LOG`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use song_search::{ask, config, embed_cmd, loader, migrate, server};

/// Semantic song search: embeddings, vector retrieval, and streamed
/// re-ranking by a chat model.
#[derive(Parser)]
#[command(
    name = "songsearch",
    about = "Semantic song search with streamed LLM re-ranking",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// A missing file means all defaults.
    #[arg(long, global = true, default_value = "./config/songsearch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the SQLite schema.
    ///
    /// Only meaningful with `store.provider = "sqlite"`. Idempotent.
    Init,

    /// Fetch the song corpus and upsert it into the store.
    Load {
        /// Fetch and count without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Run one query and print ranked songs as they arrive.
    Ask {
        /// The search subject.
        query: String,

        /// Print the raw streamed answer instead of formatted results.
        #[arg(long)]
        raw: bool,
    },

    /// Start the HTTP server.
    Serve,
}

/// Embedding management subcommands.
#[derive(Subcommand)]
enum EmbedAction {
    /// Embed songs whose embedding is still null.
    Pending {
        /// Maximum number of songs to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config (number of texts per API call).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("song_search=info,tower_http=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            if cfg.uses_remote_store() {
                anyhow::bail!(
                    "init only applies to the sqlite store; the remote schema is managed in Postgres"
                );
            }
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Load { dry_run } => {
            loader::run_load(&cfg, dry_run).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
        },
        Commands::Ask { query, raw } => {
            ask::run_ask(&cfg, &query, raw).await?;
        }
        Commands::Serve => {
            server::run_server(cfg).await?;
        }
    }

    Ok(())
}
