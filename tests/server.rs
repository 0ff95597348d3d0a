//! HTTP contract of `/api/vector-search`, exercised in-process.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::*;
use http_body_util::BodyExt;
use serde_json::Value;
use song_search::error::GENERIC_ERROR_MESSAGE;
use song_search::server::{build_router, AppState};
use std::sync::Arc;
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    build_router(AppState::new(h.pipeline()))
}

fn search(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/vector-search")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

#[tokio::test]
async fn successful_search_streams_the_answer() {
    let h = Harness::new();
    let response = app(&h).oneshot(search(r#"{"prompt":"iubire"}"#)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
    assert_eq!(body_text(response).await, ANSWER);
}

#[tokio::test]
async fn empty_prompt_is_bad_request() {
    let h = Harness::new();
    let response = app(&h).oneshot(search(r#"{"prompt":"  "}"#)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Missing query in request data");
    assert!(body.get("data").is_none());
    assert_eq!(h.moderation_calls(), 0);
}

#[tokio::test]
async fn missing_or_invalid_body_is_bad_request() {
    let h = Harness::new();
    for raw in ["", "not json", "[1,2]", "null"] {
        let response = app(&h).oneshot(search(raw)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {:?}", raw);
        assert_eq!(body_json(response).await["error"], "Missing request data");
    }
}

#[tokio::test]
async fn flagged_query_returns_categories() {
    let mut h = Harness::new();
    h.moderator = Arc::new(FakeModerator {
        flag: true,
        ..Default::default()
    });

    let response = app(&h).oneshot(search(r#"{"prompt":"x"}"#)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Flagged content");
    assert_eq!(body["data"]["flagged"], true);
    assert_eq!(body["data"]["categories"]["hate"], true);
}

#[tokio::test]
async fn embedding_failure_returns_only_the_generic_message() {
    let mut h = Harness::new();
    h.embedder = Arc::new(FakeEmbedder {
        fail: true,
        ..Default::default()
    });

    let response = app(&h).oneshot(search(r#"{"prompt":"iubire"}"#)).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let text = body_text(response).await;
    assert!(!text.contains("upstream secret detail"));
    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body, serde_json::json!({ "error": GENERIC_ERROR_MESSAGE }));
}

#[tokio::test]
async fn store_failure_returns_only_the_generic_message() {
    let mut h = Harness::new();
    h.store = Arc::new(FakeStore {
        fail: true,
        ..Default::default()
    });

    let response = app(&h).oneshot(search(r#"{"prompt":"iubire"}"#)).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body, serde_json::json!({ "error": GENERIC_ERROR_MESSAGE }));
}

#[tokio::test]
async fn health_reports_version() {
    let h = Harness::new();
    let response = app(&h)
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn cors_preflight_is_permitted() {
    let h = Harness::new();
    let response = app(&h)
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/vector-search")
                .header(header::ORIGIN, "https://example.com")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
}
