// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the GitHub deploy webhook.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::json;
use snakepit_core::deploy::{BuildPhase, MockToolchain};
use snakepit_core::runtime::FleetRuntime;
use snakepit_core::runtime_client::MockRuntime;
use snakepit_core::signature::{SignatureAlgorithm, sign};
use snakepit_server::{AppState, router};
use tower::ServiceExt;

const REPO: &str = "alice/snake";
const SECRET: &[u8] = b"s3cret";

struct Harness {
    app: Router,
    runtime: FleetRuntime,
    toolchain: Arc<MockToolchain>,
}

async fn harness() -> Harness {
    let mock = Arc::new(MockRuntime::new());
    let toolchain = Arc::new(MockToolchain::new(mock.clone()));
    let runtime = FleetRuntime::builder()
        .runtime(mock)
        .toolchain(toolchain.clone())
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();
    runtime.coordinator().register_secret(REPO, SECRET).await;

    let state = AppState::from_runtime(&runtime, 80).unwrap();
    Harness {
        app: router(state),
        runtime,
        toolchain,
    }
}

fn push_body(git_ref: &str, private: bool) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "ref": git_ref,
        "repository": {
            "full_name": REPO,
            "default_branch": "main",
            "private": private
        }
    }))
    .unwrap()
}

fn signed(event: &str, body: Vec<u8>) -> Request<Body> {
    let signature = sign(&body, SECRET, SignatureAlgorithm::Sha256).unwrap();
    Request::builder()
        .method("POST")
        .uri("/deploy/")
        .header("user-agent", "GitHub-Hookshot/abc123")
        .header("content-type", "application/json")
        .header("x-github-event", event)
        .header("x-hub-signature-256", signature)
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

// ============================================================================
// Request Validation Tests
// ============================================================================

#[tokio::test]
async fn test_rejects_non_github_agent() {
    let h = harness().await;
    let mut request = signed("push", push_body("refs/heads/main", false));
    request
        .headers_mut()
        .insert("user-agent", "curl/8.0".parse().unwrap());

    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, "Access Denied");
}

#[tokio::test]
async fn test_rejects_non_json_content_type() {
    let h = harness().await;
    let mut request = signed("push", push_body("refs/heads/main", false));
    request.headers_mut().insert(
        "content-type",
        "application/x-www-form-urlencoded".parse().unwrap(),
    );

    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Invalid Content-Type. Only json Supported");
}

#[tokio::test]
async fn test_rejects_unparseable_body() {
    let h = harness().await;
    let (status, body) = send(&h.app, signed("push", b"{not json".to_vec())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Invalid Request");
}

#[tokio::test]
async fn test_rejects_unregistered_repository() {
    let h = harness().await;
    let body = serde_json::to_vec(&json!({
        "ref": "refs/heads/main",
        "repository": {"full_name": "mallory/worm", "default_branch": "main"}
    }))
    .unwrap();

    let (status, text) = send(&h.app, signed("push", body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(text, "Access Denied: Not registered");
}

// ============================================================================
// Signature Tests
// ============================================================================

#[tokio::test]
async fn test_bad_signature_rejected_before_event_inspection() {
    let h = harness().await;
    let body = push_body("refs/heads/main", false);
    let forged = sign(&body, b"wrong", SignatureAlgorithm::Sha256).unwrap();
    let mut request = signed("ping", body);
    request
        .headers_mut()
        .insert("x-hub-signature-256", forged.parse().unwrap());

    let (status, text) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(text.starts_with("Access Denied: "));
    assert_eq!(h.toolchain.builds_started(), 0);
}

#[tokio::test]
async fn test_missing_signature_rejected() {
    let h = harness().await;
    let mut request = signed("push", push_body("refs/heads/main", false));
    request.headers_mut().remove("x-hub-signature-256");

    let (status, _) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sha1_signature_accepted_as_fallback() {
    let h = harness().await;
    let body = push_body("refs/heads/main", false);
    let sha1 = sign(&body, SECRET, SignatureAlgorithm::Sha1).unwrap();
    let mut request = signed("ping", body);
    request.headers_mut().remove("x-hub-signature-256");
    request
        .headers_mut()
        .insert("x-hub-signature", sha1.parse().unwrap());

    let (status, text) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "pong");
}

#[tokio::test]
async fn test_unsupported_algorithm_rejected() {
    let h = harness().await;
    let mut request = signed("push", push_body("refs/heads/main", false));
    request
        .headers_mut()
        .insert("x-hub-signature-256", "md5=abcd".parse().unwrap());

    let (status, text) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(text.contains("unsupported signature algorithm"));
}

// ============================================================================
// Event Tests
// ============================================================================

#[tokio::test]
async fn test_ping_does_not_build() {
    let h = harness().await;
    let (status, text) = send(&h.app, signed("ping", push_body("", false))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "pong");
    assert_eq!(
        h.runtime.coordinator().phase(REPO).await.unwrap(),
        BuildPhase::Idle
    );
}

#[tokio::test]
async fn test_non_push_event_forbidden() {
    let h = harness().await;
    let request = signed("issues", push_body("refs/heads/main", false));
    let (status, text) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(text, "Action Forbidden");
}

#[tokio::test]
async fn test_private_repository_refused() {
    let h = harness().await;
    let request = signed("push", push_body("refs/heads/main", true));
    let (status, text) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(text, "Cannot Access Private Repos");
}

#[tokio::test]
async fn test_ignored_refs_do_not_build() {
    let h = harness().await;
    let cases = [
        ("refs/heads/dev", "Ignoring push to branch dev\nOnly deploying from branch main"),
        ("refs/tags/v1.2", "Ignoring push to tag v1.2\nOnly deploying from branch main"),
        ("refs/pull/7", "Ignoring push to refs/pull/7\nOnly deploying from branch main"),
        (
            "refs/heads/feature/x",
            "Ignoring push to refs/heads/feature/x\nOnly deploying from branch main",
        ),
    ];

    for (git_ref, expected) in cases {
        let (status, text) = send(&h.app, signed("push", push_body(git_ref, false))).await;
        assert_eq!(status, StatusCode::OK, "ref {git_ref}");
        assert_eq!(text, expected);
    }

    h.runtime.coordinator().shutdown().await;
    assert_eq!(h.toolchain.builds_started(), 0);
}

#[tokio::test]
async fn test_missing_default_branch_does_not_deploy() {
    let h = harness().await;
    let body = serde_json::to_vec(&json!({
        "ref": "refs/heads/",
        "repository": {"full_name": REPO}
    }))
    .unwrap();

    let (status, text) = send(&h.app, signed("push", body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        text,
        "Ignoring push to refs/heads/\nOnly deploying from branch "
    );

    h.runtime.coordinator().shutdown().await;
    assert_eq!(h.toolchain.builds_started(), 0);
}

// ============================================================================
// Deploy Tests
// ============================================================================

#[tokio::test]
async fn test_push_to_default_branch_deploys() {
    let h = harness().await;
    let (status, text) = send(&h.app, signed("push", push_body("refs/heads/main", false))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(text, "Deploying alice/snake...");

    h.runtime.shutdown().await;
    assert_eq!(h.toolchain.builds_started(), 1);
}

#[tokio::test]
async fn test_push_during_build_is_queued() {
    let h = harness().await;
    h.toolchain.hold_builds();

    let (_, first) = send(&h.app, signed("push", push_body("refs/heads/main", false))).await;
    assert_eq!(first, "Deploying alice/snake...");
    h.toolchain.wait_for_builds_started(1).await;

    let (status, second) = send(&h.app, signed("push", push_body("refs/heads/main", false))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        second,
        "There is already a job deploying\nAdding the build job to the queue"
    );

    h.toolchain.release_builds(2);
    h.runtime.shutdown().await;
    assert_eq!(h.toolchain.builds_started(), 2);
}
