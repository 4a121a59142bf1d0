// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Snakepit Server - HTTP edge
//!
//! Two surfaces share one router:
//!
//! | Route | Handler | Description |
//! |-------|---------|-------------|
//! | `/bs/{id}`, `/bs/{id}/` | [`proxy`] | Forward to the instance root |
//! | `/bs/{id}/{start,move,end}[/]` | [`proxy`] | Forward to the instance action |
//! | `/deploy/` | [`webhook`] | GitHub push webhook |
//!
//! `{id}` is the container name without the configured prefix.

#![deny(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{any, post};
use snakepit_core::activation::Activator;
use snakepit_core::deploy::DeployCoordinator;
use snakepit_core::runtime::FleetRuntime;
use tower_http::trace::TraceLayer;

/// Per-instance reverse proxy.
pub mod proxy;

/// GitHub deploy webhook.
pub mod webhook;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Activation entry point
    pub activator: Arc<Activator>,
    /// Build coordination
    pub coordinator: Arc<DeployCoordinator>,
    /// Client used to forward proxied requests
    pub http: reqwest::Client,
    /// Prefix that turns a route id into a container name
    pub container_prefix: String,
    /// Port instances listen on
    pub instance_port: u16,
}

impl AppState {
    /// Create handler state.
    ///
    /// The container prefix is taken from the coordinator's pipeline so the
    /// proxy and the deploy pipeline always agree on container names.
    pub fn new(
        activator: Arc<Activator>,
        coordinator: Arc<DeployCoordinator>,
        instance_port: u16,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        let container_prefix = coordinator.pipeline().config().container_prefix.clone();
        Ok(Self {
            activator,
            coordinator,
            http,
            container_prefix,
            instance_port,
        })
    }

    /// Create handler state over a running [`FleetRuntime`].
    pub fn from_runtime(
        runtime: &FleetRuntime,
        instance_port: u16,
    ) -> Result<Self, reqwest::Error> {
        Self::new(
            runtime.activator().clone(),
            runtime.coordinator().clone(),
            instance_port,
        )
    }
}

/// Build the HTTP router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/bs/{id}", any(proxy::proxy_root))
        .route("/bs/{id}/", any(proxy::proxy_root))
        .route("/bs/{id}/{action}", any(proxy::proxy_action))
        .route("/bs/{id}/{action}/", any(proxy::proxy_action))
        .route("/deploy/", post(webhook::deploy_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
