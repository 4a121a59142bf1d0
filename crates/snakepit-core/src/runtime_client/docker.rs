// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker Engine runtime.
//!
//! Talks to the Docker Engine API over its local unix socket. Containers are
//! addressed by name.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode, Uri, body::Bytes};
use hyper_util::client::legacy::Client;
use hyperlocal::{UnixClientExt, UnixConnector, Uri as HyperlocalUri};
use serde::Deserialize;
use tokio::net::UnixStream;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::traits::*;
use crate::error::{Error, Result};

const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(500);
const SOCKET_LOG_INTERVAL: Duration = Duration::from_secs(5);
const SOCKET_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Subset of `GET /containers/{name}/json` used by snakepit.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectResponse {
    #[serde(default)]
    state: InspectState,
    #[serde(default)]
    network_settings: InspectNetworkSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    running: bool,
    #[serde(default)]
    paused: bool,
}

#[derive(Debug, Default, Deserialize)]
struct InspectNetworkSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
    // BTreeMap keeps the fallback scan order stable (sorted by network name).
    #[serde(rename = "Networks", default)]
    networks: Option<BTreeMap<String, InspectEndpoint>>,
}

#[derive(Debug, Default, Deserialize)]
struct InspectEndpoint {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

impl InspectResponse {
    fn into_snapshot(self) -> ContainerSnapshot {
        let mut address = self.network_settings.ip_address;
        if address.is_empty()
            && let Some(networks) = self.network_settings.networks
        {
            address = networks
                .into_values()
                .map(|endpoint| endpoint.ip_address)
                .find(|ip| !ip.is_empty())
                .unwrap_or_default();
        }

        ContainerSnapshot {
            running: self.state.running,
            paused: self.state.paused,
            address,
        }
    }
}

/// Error body returned by the Docker Engine API.
#[derive(Debug, Deserialize)]
struct EngineErrorBody {
    message: String,
}

fn engine_message(status: StatusCode, body: &Bytes) -> String {
    match serde_json::from_slice::<EngineErrorBody>(body) {
        Ok(parsed) => format!("status {}: {}", status.as_u16(), parsed.message),
        Err(_) => format!("status {}", status.as_u16()),
    }
}

/// Container runtime backed by the Docker Engine API.
pub struct DockerRuntime {
    socket_path: PathBuf,
    client: Client<UnixConnector, Full<Bytes>>,
}

impl DockerRuntime {
    /// Create a runtime talking to the socket at `socket_path`.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            client: Client::unix(),
        }
    }

    /// Socket this runtime talks to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        operation: RuntimeOp,
        target: &str,
    ) -> Result<(StatusCode, Bytes)> {
        let op = operation.as_str();
        let uri: Uri = HyperlocalUri::new(&self.socket_path, path).into();
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .map_err(|e| Error::runtime(op, target, e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| Error::runtime(op, target, e.to_string()))?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::runtime(op, target, e.to_string()))?
            .to_bytes();

        debug!(
            operation = op,
            container = %target,
            status = status.as_u16(),
            "Docker API response"
        );

        Ok((status, body))
    }

    async fn action(&self, name: &str, operation: RuntimeOp) -> Result<()> {
        let path = format!("/containers/{}/{}", name, operation.as_str());
        let (status, body) = self.request(Method::POST, &path, operation, name).await?;

        match status {
            // 304: the container is already in the requested state
            StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED => Ok(()),
            StatusCode::NOT_FOUND => Err(Error::NotExist(name.to_string())),
            other => Err(Error::runtime(
                operation.as_str(),
                name,
                engine_message(other, &body),
            )),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn runtime_type(&self) -> &'static str {
        "docker"
    }

    async fn inspect(&self, name: &str) -> Result<ContainerSnapshot> {
        let path = format!("/containers/{}/json", name);
        let (status, body) = self
            .request(Method::GET, &path, RuntimeOp::Inspect, name)
            .await?;

        match status {
            StatusCode::OK => {
                let parsed: InspectResponse = serde_json::from_slice(&body).map_err(|e| {
                    Error::runtime(RuntimeOp::Inspect.as_str(), name, e.to_string())
                })?;
                Ok(parsed.into_snapshot())
            }
            StatusCode::NOT_FOUND => Err(Error::NotExist(name.to_string())),
            other => Err(Error::runtime(
                RuntimeOp::Inspect.as_str(),
                name,
                engine_message(other, &body),
            )),
        }
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.action(name, RuntimeOp::Start).await
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.action(name, RuntimeOp::Stop).await
    }

    async fn pause(&self, name: &str) -> Result<()> {
        self.action(name, RuntimeOp::Pause).await
    }

    async fn unpause(&self, name: &str) -> Result<()> {
        self.action(name, RuntimeOp::Unpause).await
    }
}

/// Block until the runtime socket accepts a connection.
///
/// Polls every 500ms and logs every 5s while waiting. With a `deadline`, gives
/// up with a runtime error once it has elapsed; without one, waits forever.
pub async fn wait_for_socket(socket_path: &Path, deadline: Option<Duration>) -> Result<()> {
    let started = Instant::now();
    let mut last_log = started;

    loop {
        if let Ok(Ok(_stream)) =
            tokio::time::timeout(SOCKET_CONNECT_TIMEOUT, UnixStream::connect(socket_path)).await
        {
            info!(
                socket = %socket_path.display(),
                waited_ms = started.elapsed().as_millis() as u64,
                "Container runtime socket available"
            );
            return Ok(());
        }

        if last_log.elapsed() >= SOCKET_LOG_INTERVAL {
            warn!(
                socket = %socket_path.display(),
                waited_secs = started.elapsed().as_secs(),
                "Container runtime socket not available yet"
            );
            last_log = Instant::now();
        }

        if let Some(limit) = deadline
            && started.elapsed() >= limit
        {
            return Err(Error::runtime(
                "connect",
                &socket_path.display().to_string(),
                format!("socket not available after {}s", limit.as_secs()),
            ));
        }

        tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
    }
}
