// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Snakepit Server - battlesnake fleet manager
//!
//! An HTTP server responsible for:
//! - Proxying battlesnake API calls to per-repository containers, waking them on demand
//! - Pausing and stopping containers that sit idle
//! - Rebuilding and redeploying a container when its repository's default branch is pushed

use std::sync::Arc;

use tracing::{info, warn};

use snakepit_core::config::{Config, load_repository_settings};
use snakepit_core::deploy::DockerCli;
use snakepit_core::runtime::FleetRuntime;
use snakepit_core::runtime_client::{DockerRuntime, wait_for_socket};
use snakepit_server::{AppState, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "snakepit_server=info,snakepit_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        bind_addr = %config.bind_addr,
        docker_socket = %config.docker_socket.display(),
        repositories_file = %config.repositories_file.display(),
        "Starting snakepit"
    );

    // Nothing works without the engine, so block until its socket answers
    wait_for_socket(&config.docker_socket, config.socket_wait_timeout).await?;

    let runtime = FleetRuntime::builder()
        .runtime(Arc::new(DockerRuntime::new(config.docker_socket.clone())))
        .toolchain(Arc::new(DockerCli::new()))
        .with_config(&config)
        .build()?
        .start()
        .await?;

    for setting in load_repository_settings(&config.repositories_file) {
        runtime
            .coordinator()
            .register_secret(&setting.name, setting.secret)
            .await;
    }

    let state = AppState::from_runtime(&runtime, config.instance_port)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "HTTP server ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await?;

    // Graceful shutdown
    runtime.shutdown().await;

    info!("Snakepit shut down");

    Ok(())
}
