// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use clap::Parser;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const TOKEN: &str = "test-token";

fn test_router() -> (TempDir, axum::Router) {
    let dir = TempDir::new().unwrap();
    let cfg = AgentConfig::try_parse_from([
        "cubbyd",
        "--workspace-path",
        &dir.path().to_string_lossy(),
        "--token",
        TOKEN,
    ])
    .unwrap();
    let state = build_state(cfg, TOKEN.to_string());
    (dir, router(state))
}

fn authed(method: &str, path: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(path)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"));
    match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn envelope_of(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 10 * 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_needs_no_auth() {
    let (_dir, app) = test_router();
    let response =
        app.oneshot(Request::get("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = envelope_of(response).await;
    assert_eq!(body["status"], 0);
    assert!(body["uptimeSecs"].is_u64());
}

#[tokio::test]
async fn api_requires_bearer_token() {
    let (_dir, app) = test_router();

    let response = app
        .clone()
        .oneshot(Request::get("/api/v1/process/list").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = envelope_of(response).await;
    assert_eq!(body["status"], 1401);

    let response = app
        .clone()
        .oneshot(
            Request::get("/api/v1/process/list")
                .header(header::AUTHORIZATION, "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = envelope_of(response).await;
    assert_eq!(body["status"], 1401);
    assert!(body["message"].as_str().unwrap().contains("invalid_token"));

    let response =
        app.oneshot(authed("GET", "/api/v1/process/list", None)).await.unwrap();
    let body = envelope_of(response).await;
    assert_eq!(body["status"], 0);
}

#[tokio::test]
async fn unknown_route_is_enveloped_1404() {
    let (_dir, app) = test_router();
    let response = app.oneshot(authed("GET", "/api/v1/nope", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = envelope_of(response).await;
    assert_eq!(body["status"], 1404);
}

#[tokio::test]
async fn method_mismatch_is_enveloped_405() {
    let (_dir, app) = test_router();
    let response = app.oneshot(authed("GET", "/api/v1/files/write", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = envelope_of(response).await;
    assert_eq!(body["status"], 405);
}

#[tokio::test]
async fn malformed_json_is_enveloped_1422() {
    let (_dir, app) = test_router();
    let request = Request::post("/api/v1/files/write")
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let body = envelope_of(app.oneshot(request).await.unwrap()).await;
    assert_eq!(body["status"], 1422);
}

#[tokio::test]
async fn write_then_read_round_trip() {
    let (_dir, app) = test_router();

    let write = authed(
        "POST",
        "/api/v1/files/write",
        Some(json!({"path": "hello.txt", "content": "aGkK"})),
    );
    let body = envelope_of(app.clone().oneshot(write).await.unwrap()).await;
    assert_eq!(body["status"], 0);
    assert_eq!(body["size"], 3);

    let read = authed("POST", "/api/v1/files/read", Some(json!({"path": "hello.txt"})));
    let body = envelope_of(app.oneshot(read).await.unwrap()).await;
    assert_eq!(body["status"], 0);
    assert_eq!(body["content"], "aGkK");
}

#[tokio::test]
async fn traversal_write_is_rejected_with_1400() {
    let (dir, app) = test_router();
    let write = authed(
        "POST",
        "/api/v1/files/write",
        Some(json!({"path": "../etc/passwd", "content": "eA=="})),
    );
    let body = envelope_of(app.oneshot(write).await.unwrap()).await;
    assert_eq!(body["status"], 1400);
    assert!(body["message"].as_str().unwrap().contains("invalid_path"));
    assert!(!dir.path().parent().unwrap().join("etc/passwd").exists());
}

#[tokio::test]
async fn exec_sync_over_http() {
    let (_dir, app) = test_router();
    let request = authed(
        "POST",
        "/api/v1/process/exec-sync",
        Some(json!({"command": "echo", "args": ["world"]})),
    );
    let body = envelope_of(app.oneshot(request).await.unwrap()).await;
    assert_eq!(body["status"], 0);
    assert_eq!(body["exitCode"], 0);
    assert_eq!(body["stdout"], "world\n");
    assert_eq!(body["stderr"], "");
}

#[tokio::test]
async fn ports_endpoint_returns_snapshot() {
    let (_dir, app) = test_router();
    let body = envelope_of(app.oneshot(authed("GET", "/api/v1/ports", None)).await.unwrap()).await;
    assert_eq!(body["status"], 0);
    assert!(body["ports"].is_array());
}

#[tokio::test]
async fn responses_carry_trace_id() {
    let (_dir, app) = test_router();

    let response =
        app.clone().oneshot(Request::get("/health").body(Body::empty()).unwrap()).await.unwrap();
    let generated = response.headers().get("x-trace-id").unwrap().to_str().unwrap().to_string();
    assert!(generated.starts_with("trc-"));

    let request = Request::get("/health")
        .header("x-trace-id", "trc-mine")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.headers().get("x-trace-id").unwrap(), "trc-mine");
}
