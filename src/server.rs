//! HTTP front end for the query pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/vector-search` | Run a query, stream the model answer |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Response Contract
//!
//! A successful search answers `200` with a `text/plain` body streamed chunk
//! by chunk; the concatenation is the model's JSON document
//! `{"results":[{"id","number","title","reason"}, ...]}`.
//!
//! Failures answer with a JSON body:
//!
//! ```json
//! { "error": "Flagged content", "data": { "flagged": true, "categories": { } } }
//! ```
//!
//! `400` for caller errors. Every other failure answers `500` with a fixed
//! generic message; the detail is only logged.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::pipeline::QueryPipeline;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<QueryPipeline>,
}

impl AppState {
    pub fn new(pipeline: QueryPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

/// Builds the router with all routes and the CORS layer.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/vector-search", post(handle_vector_search))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind`.
///
/// Credentials are checked before binding; a misconfigured server exits
/// instead of answering every request with an error.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pipeline = QueryPipeline::from_config(config).await?;
    let app = build_router(AppState::new(pipeline));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("song search listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ POST /api/vector-search ============

/// Handler for `POST /api/vector-search`.
///
/// The body is taken as raw bytes so that an absent or unparseable body
/// reaches the pipeline as "no request data" rather than an extractor
/// rejection.
async fn handle_vector_search(State(state): State<AppState>, body: Bytes) -> Response {
    let data: Option<Value> = serde_json::from_slice(&body).ok();

    match state.pipeline.handle(data).await {
        Ok(answer) => (
            [(CONTENT_TYPE, "text/plain; charset=utf-8")],
            Body::from_stream(answer.map(Ok::<_, Infallible>)),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

// ============ GET /health ============

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    /// The crate version from `Cargo.toml`.
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
