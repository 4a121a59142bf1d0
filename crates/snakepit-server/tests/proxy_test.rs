// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the per-instance reverse proxy.
//!
//! A small axum app on a loopback port stands in for the battlesnake, and the
//! mock runtime reports `127.0.0.1` as every container's address.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{any, post};
use http_body_util::BodyExt;
use snakepit_core::cache::LastUsed;
use snakepit_core::deploy::MockToolchain;
use snakepit_core::runtime::FleetRuntime;
use snakepit_core::runtime_client::{MockRuntime, RuntimeOp};
use snakepit_server::{AppState, router};
use tokio::sync::Notify;
use tower::ServiceExt;

const CONTAINER: &str = "bs-alice";

async fn snake_root(method: Method) -> impl IntoResponse {
    let snake = header::HeaderName::from_static("x-snake");
    (
        [(header::CONTENT_TYPE, "application/json"), (snake, "alice")],
        format!(r#"{{"apiversion":"1","method":"{method}"}}"#),
    )
}

async fn snake_move(headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    (
        StatusCode::ACCEPTED,
        format!("{content_type}|{}", String::from_utf8_lossy(&body)),
    )
}

/// Serve the fake battlesnake and return the port it listens on.
async fn spawn_snake() -> u16 {
    spawn_gated_snake(Arc::new(Notify::new())).await
}

/// Like [`spawn_snake`], but `/start/` only answers once `gate` is notified.
async fn spawn_gated_snake(gate: Arc<Notify>) -> u16 {
    let start = post(move || {
        let gate = gate.clone();
        async move {
            gate.notified().await;
            "started"
        }
    });
    let app = Router::new()
        .route("/", any(snake_root))
        .route("/move/", post(snake_move))
        .route("/start/", start);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

struct Harness {
    app: Router,
    runtime: FleetRuntime,
    mock: Arc<MockRuntime>,
}

async fn harness(instance_port: u16) -> Harness {
    let mock = Arc::new(MockRuntime::new());
    let toolchain = Arc::new(MockToolchain::new(mock.clone()));
    let runtime = FleetRuntime::builder()
        .runtime(mock.clone())
        .toolchain(toolchain)
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    // Let the startup pass run on an empty cache, so the scheduler is asleep
    // before any instance is seeded
    while runtime.scheduler().next_pass().await.is_none() {
        tokio::task::yield_now().await;
    }
    runtime.cache().register(CONTAINER).await;

    let state = AppState::from_runtime(&runtime, instance_port).unwrap();
    Harness {
        app: router(state),
        runtime,
        mock,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// ============================================================================
// Forwarding Tests
// ============================================================================

#[tokio::test]
async fn test_root_forwarded_with_headers() {
    let port = spawn_snake().await;
    let h = harness(port).await;
    h.mock.insert(CONTAINER, true, false, "127.0.0.1").await;

    for uri in ["/bs/alice", "/bs/alice/"] {
        let (status, headers, body) = send(&h.app, get(uri)).await;
        assert_eq!(status, StatusCode::OK, "uri {uri}");
        assert_eq!(body, r#"{"apiversion":"1","method":"GET"}"#);
        assert_eq!(headers.get("x-snake").unwrap(), "alice");
        let content_type = headers.get(header::CONTENT_TYPE).unwrap();
        assert_eq!(content_type, "application/json");
    }

    h.runtime.shutdown().await;
}

#[tokio::test]
async fn test_action_forwards_method_body_and_status() {
    let port = spawn_snake().await;
    let h = harness(port).await;
    h.mock.insert(CONTAINER, true, false, "127.0.0.1").await;

    let request = Request::builder()
        .method("POST")
        .uri("/bs/alice/move")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"turn":3}"#))
        .unwrap();
    let (status, _, body) = send(&h.app, request).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, r#"application/json|{"turn":3}"#);
}

#[tokio::test]
async fn test_upstream_status_passed_through() {
    let port = spawn_snake().await;
    let h = harness(port).await;
    h.mock.insert(CONTAINER, true, false, "127.0.0.1").await;

    // The fake snake only accepts POST on /move/
    let (status, _, _) = send(&h.app, get("/bs/alice/move/")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_forwarding_records_usage() {
    let port = spawn_snake().await;
    let h = harness(port).await;
    h.mock.insert(CONTAINER, true, false, "127.0.0.1").await;
    assert_eq!(
        h.runtime.cache().get(CONTAINER).await.unwrap().last_used,
        LastUsed::Never
    );

    let (status, _, _) = send(&h.app, get("/bs/alice")).await;
    assert_eq!(status, StatusCode::OK);

    assert!(matches!(
        h.runtime.cache().get(CONTAINER).await.unwrap().last_used,
        LastUsed::At(_)
    ));
}

// ============================================================================
// Activation Tests
// ============================================================================

#[tokio::test]
async fn test_paused_instance_unpaused_before_forwarding() {
    let port = spawn_snake().await;
    let h = harness(port).await;
    h.mock.insert(CONTAINER, true, true, "127.0.0.1").await;

    let (status, _, _) = send(&h.app, get("/bs/alice")).await;
    assert_eq!(status, StatusCode::OK);

    let ops = h.mock.ops_for(CONTAINER).await;
    assert!(ops.contains(&RuntimeOp::Unpause));
    assert!(!h.mock.container(CONTAINER).await.unwrap().paused);
}

#[tokio::test]
async fn test_stopped_instance_started_before_forwarding() {
    let port = spawn_snake().await;
    let h = harness(port).await;
    h.mock.insert(CONTAINER, false, false, "127.0.0.1").await;

    let (status, _, _) = send(&h.app, get("/bs/alice/")).await;
    assert_eq!(status, StatusCode::OK);

    assert!(h.mock.ops_for(CONTAINER).await.contains(&RuntimeOp::Start));
    assert!(h.mock.container(CONTAINER).await.unwrap().running);
}

#[tokio::test]
async fn test_in_flight_instance_not_paused_by_other_traffic() {
    let gate = Arc::new(Notify::new());
    let port = spawn_gated_snake(gate.clone()).await;
    let h = harness(port).await;
    let bob = "bs-bob";
    h.runtime.cache().register(bob).await;
    h.mock.insert(CONTAINER, true, false, "127.0.0.1").await;
    h.mock.insert(bob, true, false, "127.0.0.1").await;

    // Alice's request hangs upstream until the gate opens
    let app = h.app.clone();
    let slow = tokio::spawn(async move {
        let request = Request::builder()
            .method("POST")
            .uri("/bs/alice/start")
            .body(Body::empty())
            .unwrap();
        send(&app, request).await
    });
    while !h.runtime.cache().get(CONTAINER).await.unwrap().is_busy() {
        tokio::task::yield_now().await;
    }

    // Bob's completed request wakes the scheduler, which passes over alice
    let (status, _, _) = send(&h.app, get("/bs/bob")).await;
    assert_eq!(status, StatusCode::OK);
    let soon = tokio::time::Instant::now() + Duration::from_secs(120);
    loop {
        match h.runtime.scheduler().next_pass().await {
            Some(next_pass) if next_pass < soon => break,
            _ => tokio::task::yield_now().await,
        }
    }

    assert!(!h.mock.ops_for(CONTAINER).await.contains(&RuntimeOp::Pause));
    assert!(!h.mock.container(CONTAINER).await.unwrap().paused);

    gate.notify_one();
    let (status, _, body) = slow.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "started");

    let alice = h.runtime.cache().get(CONTAINER).await.unwrap();
    assert!(alice.is_serving() && !alice.is_busy());
    assert!(matches!(alice.last_used, LastUsed::At(_)));
}

// ============================================================================
// Failure Tests
// ============================================================================

#[tokio::test]
async fn test_unregistered_instance_not_found() {
    let h = harness(1).await;

    let (status, _, body) = send(&h.app, get("/bs/mallory/move")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "404 Battle-Snake Not Found");
    assert!(h.mock.calls().await.is_empty());
}

#[tokio::test]
async fn test_unknown_action_not_found() {
    let h = harness(1).await;
    h.mock.insert(CONTAINER, true, false, "127.0.0.1").await;

    let (status, _, body) = send(&h.app, get("/bs/alice/info")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "404 Battle-Snake Not Found");
    assert!(h.mock.calls().await.is_empty());
}

#[tokio::test]
async fn test_runtime_failure_is_internal_error() {
    let h = harness(1).await;
    h.mock.insert(CONTAINER, false, false, "127.0.0.1").await;
    h.mock.fail(CONTAINER, RuntimeOp::Start).await;

    let (status, _, body) = send(&h.app, get("/bs/alice")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "500 Internal Server Error");
}

#[tokio::test]
async fn test_missing_container_is_internal_error() {
    // Registered, but the engine has never heard of it
    let h = harness(1).await;

    let (status, _, body) = send(&h.app, get("/bs/alice")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "500 Internal Server Error");
}

#[tokio::test]
async fn test_unreachable_instance_is_internal_error() {
    // Nothing listens on port 1
    let h = harness(1).await;
    h.mock.insert(CONTAINER, true, false, "127.0.0.1").await;

    let (status, _, body) = send(&h.app, get("/bs/alice")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "500 Internal Server Error");
    assert_eq!(
        h.runtime.cache().get(CONTAINER).await.unwrap().last_used,
        LastUsed::Never
    );
}
