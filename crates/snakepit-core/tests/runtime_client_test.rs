// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the runtime client (cache write-through, registration checks, mock runtime).

use std::sync::Arc;

use snakepit_core::Error;
use snakepit_core::cache::InstanceCache;
use snakepit_core::runtime_client::{ContainerRuntime, MockRuntime, RuntimeClient, RuntimeOp};

const ALICE: &str = "bs-alice-snake";

async fn setup() -> (Arc<MockRuntime>, RuntimeClient) {
    let runtime = Arc::new(MockRuntime::new());
    let cache = Arc::new(InstanceCache::new());
    cache.register(ALICE).await;
    let client = RuntimeClient::new(runtime.clone(), cache);
    (runtime, client)
}

// ============================================================================
// MockRuntime Tests
// ============================================================================

#[tokio::test]
async fn test_mock_runtime_type() {
    let runtime = MockRuntime::new();
    assert_eq!(runtime.runtime_type(), "mock");
}

#[tokio::test]
async fn test_mock_inspect_hides_address_when_stopped() {
    let runtime = MockRuntime::new();
    runtime.insert("x", false, false, "172.17.0.5").await;

    let snapshot = runtime.inspect("x").await.unwrap();
    assert!(!snapshot.running);
    assert!(snapshot.address.is_empty());
}

#[tokio::test]
async fn test_mock_missing_container_is_not_exist() {
    let runtime = MockRuntime::new();
    assert!(runtime.start("nope").await.unwrap_err().is_not_exist());
    assert!(runtime.inspect("nope").await.unwrap_err().is_not_exist());
}

// ============================================================================
// Registration Tests
// ============================================================================

#[tokio::test]
async fn test_unregistered_id_never_reaches_runtime() {
    let (runtime, client) = setup().await;
    let ghost = "bs-ghost";
    runtime.insert(ghost, true, false, "172.17.0.3").await;

    let result = client.inspect(ghost).await;
    assert!(matches!(result, Err(Error::NotRegistered(_))));
    assert!(client.start(ghost).await.unwrap_err().is_not_registered());
    assert!(client.stop(ghost).await.unwrap_err().is_not_registered());
    assert!(client.pause(ghost).await.unwrap_err().is_not_registered());
    assert!(client.unpause(ghost).await.unwrap_err().is_not_registered());

    assert!(runtime.calls().await.is_empty());
}

// ============================================================================
// Cache Write-Through Tests
// ============================================================================

#[tokio::test]
async fn test_inspect_updates_cache() {
    let (runtime, client) = setup().await;
    runtime.insert(ALICE, true, true, "172.17.0.2").await;

    let snapshot = client.inspect(ALICE).await.unwrap();
    assert!(snapshot.running && snapshot.paused);

    let state = client.cache().get(ALICE).await.unwrap();
    assert!(state.running && state.paused);
    assert_eq!(state.address, "172.17.0.2");
    assert!(state.last_refresh.is_some());
}

#[tokio::test]
async fn test_start_reinspects_for_address() {
    let (runtime, client) = setup().await;
    runtime.insert(ALICE, false, false, "172.17.0.7").await;

    client.start(ALICE).await.unwrap();

    let state = client.cache().get(ALICE).await.unwrap();
    assert!(state.is_serving());
    assert_eq!(state.address, "172.17.0.7");
    assert_eq!(
        runtime.ops_for(ALICE).await,
        vec![RuntimeOp::Start, RuntimeOp::Inspect]
    );
}

#[tokio::test]
async fn test_stop_pause_unpause_update_flags() {
    let (runtime, client) = setup().await;
    runtime.insert(ALICE, true, false, "172.17.0.2").await;
    client.inspect(ALICE).await.unwrap();

    client.pause(ALICE).await.unwrap();
    let state = client.cache().get(ALICE).await.unwrap();
    assert!(state.running && state.paused);

    client.unpause(ALICE).await.unwrap();
    assert!(client.cache().get(ALICE).await.unwrap().is_serving());

    client.pause(ALICE).await.unwrap();
    client.stop(ALICE).await.unwrap();
    let state = client.cache().get(ALICE).await.unwrap();
    assert!(!state.running);
    assert!(!state.paused);
}

#[tokio::test]
async fn test_not_exist_leaves_cache_untouched() {
    let (_runtime, client) = setup().await;

    let err = client.inspect(ALICE).await.unwrap_err();
    assert!(err.is_not_exist());

    let state = client.cache().get(ALICE).await.unwrap();
    assert!(state.last_refresh.is_none());
}

#[tokio::test]
async fn test_runtime_failure_propagates() {
    let (runtime, client) = setup().await;
    runtime.insert(ALICE, true, false, "172.17.0.2").await;
    runtime.fail(ALICE, RuntimeOp::Pause).await;

    let err = client.pause(ALICE).await.unwrap_err();
    assert!(matches!(err, Error::Runtime { operation: "pause", .. }));

    let state = client.cache().get(ALICE).await.unwrap();
    assert!(!state.paused);
}
