//! Webhook listener integration tests

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use axum::body::Body;
use berth_web::{PushSink, WebhookState, create_app};
use http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

/// Records every tag handed off by the router.
#[derive(Default)]
struct RecordingSink {
    tags: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn tags(&self) -> Vec<String> {
        self.tags.lock().unwrap().clone()
    }
}

impl PushSink for RecordingSink {
    fn push(&self, tag: &str) {
        self.tags.lock().unwrap().push(tag.to_string());
    }
}

fn app() -> (axum::Router, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let state = WebhookState::new("lgd", "alice", sink.clone());
    (create_app(state), sink)
}

fn post(body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/")
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

fn push(repository: &str, tag: &str, pusher: &str) -> String {
    json!({
        "callback_url": "https://registry.hub.docker.com/u/alice/lgd/hook/1/",
        "push_data": { "pushed_at": 1_700_000_000, "pusher": pusher, "tag": tag },
        "repository": { "name": repository, "namespace": "alice", "repo_name": "alice/lgd" }
    })
    .to_string()
}

#[tokio::test]
async fn test_trusted_push_returns_200_and_dispatches_tag() {
    let (app, sink) = app();

    let response = app.oneshot(post(push("lgd", "latest-dev", "alice"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(sink.tags(), vec!["latest-dev".to_string()]);
}

#[tokio::test]
async fn test_wrong_repository_returns_404_without_dispatch() {
    let (app, sink) = app();

    let response = app.oneshot(post(push("wrong", "latest-dev", "alice"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(sink.tags().is_empty());

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let problem: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(problem["status"], 404);
}

#[tokio::test]
async fn test_untrusted_pusher_returns_500_without_dispatch() {
    let (app, sink) = app();

    let response = app.oneshot(post(push("lgd", "release", "mallory"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(sink.tags().is_empty());
}

#[tokio::test]
async fn test_malformed_body_returns_400_without_dispatch() {
    let (app, sink) = app();

    let response = app.oneshot(post("{not json")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(sink.tags().is_empty());
}

#[tokio::test]
async fn test_health_check_returns_ok() {
    let (app, _) = app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "ok");
    assert!(health["version"].is_string());
}
