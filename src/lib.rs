//! # Song Search
//!
//! Semantic search over a corpus of song texts. Songs are embedded and stored
//! in a vector-capable datastore; a query is moderated, embedded, matched
//! against the corpus, and the best candidates are handed to a chat model
//! that re-ranks them and explains each match. The answer is streamed back
//! as a JSON document that clients render while it is still arriving.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────────┐
//! │  Loader  │──▶│ Song store │◀──│   Backfill   │
//! └──────────┘   └─────┬──────┘   └──────────────┘
//!                      │ match_songs
//!  query ──▶ moderate ─▶ embed ─▶ retrieve ─▶ prompt ─▶ chat (stream)
//!                                                          │
//!                                  ResultTracker ◀── chunks┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! songsearch init                    # create the local SQLite schema
//! songsearch load                    # fetch and store the corpus
//! songsearch embed pending           # embed songs without a vector
//! songsearch ask "cântări de seară"  # query from the terminal
//! songsearch serve                   # start the HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment credentials |
//! | [`error`] | Pipeline error kinds and their HTTP mapping |
//! | [`models`] | Core data types |
//! | [`moderation`] | Moderation gate |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`completion`] | Streamed chat completions |
//! | [`store`] | Song store trait, PostgREST and SQLite backends |
//! | [`context`] | Retrieval constants, context assembly, prompt |
//! | [`pipeline`] | The query pipeline |
//! | [`partial_json`] | Tolerant parser for incomplete JSON |
//! | [`results`] | Progressive result extraction |
//! | [`server`] | HTTP server |
//! | [`loader`] | Corpus loader |
//! | [`embed_cmd`] | Embedding backfill |
//! | [`ask`] | Terminal query command |
//! | [`http`] | Shared HTTP client setup |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | SQLite schema |

pub mod ask;
pub mod completion;
pub mod config;
pub mod context;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod error;
pub mod http;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod moderation;
pub mod partial_json;
pub mod pipeline;
pub mod results;
pub mod server;
pub mod store;
