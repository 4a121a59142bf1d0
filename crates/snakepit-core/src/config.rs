// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for snakepit.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

/// Default location of the Docker Engine control socket.
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP edge listens on
    pub bind_addr: SocketAddr,
    /// Docker Engine unix socket
    pub docker_socket: PathBuf,
    /// JSON file listing repositories to register at startup
    pub repositories_file: PathBuf,
    /// Prefix prepended to every managed container name
    pub container_prefix: String,
    /// Port proxied requests are forwarded to on the instance address
    pub instance_port: u16,
    /// Base URL repositories are cloned from
    pub clone_base_url: String,
    /// Idle time after which a running instance is paused
    pub pause_after: Duration,
    /// Idle time after which a paused instance is stopped
    pub stop_after: Duration,
    /// Give up waiting for the Docker socket after this long (None waits forever)
    pub socket_wait_timeout: Option<Duration>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = std::env::var("SNAKEPIT_BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:80".to_string());
        let bind_addr = bind_addr
            .parse()
            .map_err(|_| ConfigError::InvalidAddr(bind_addr))?;

        let docker_socket = PathBuf::from(
            std::env::var("SNAKEPIT_DOCKER_SOCKET")
                .unwrap_or_else(|_| DEFAULT_DOCKER_SOCKET.to_string()),
        );

        let repositories_file = PathBuf::from(
            std::env::var("SNAKEPIT_REPOSITORIES_FILE")
                .unwrap_or_else(|_| "/data/battlesnakes.json".to_string()),
        );

        let container_prefix =
            std::env::var("SNAKEPIT_CONTAINER_PREFIX").unwrap_or_else(|_| "bs-".to_string());

        let instance_port = parse_env_number("SNAKEPIT_INSTANCE_PORT")?.unwrap_or(80);

        let clone_base_url = std::env::var("SNAKEPIT_CLONE_BASE_URL")
            .unwrap_or_else(|_| "https://github.com".to_string())
            .trim_end_matches('/')
            .to_string();

        let pause_after = parse_env_number("SNAKEPIT_PAUSE_AFTER_SECS")?.unwrap_or(60);
        let stop_after = parse_env_number("SNAKEPIT_STOP_AFTER_SECS")?.unwrap_or(3600);
        let socket_wait_timeout = parse_env_number("SNAKEPIT_SOCKET_WAIT_TIMEOUT_SECS")?;

        Ok(Self {
            bind_addr,
            docker_socket,
            repositories_file,
            container_prefix,
            instance_port,
            clone_base_url,
            pause_after: Duration::from_secs(pause_after),
            stop_after: Duration::from_secs(stop_after),
            socket_wait_timeout: socket_wait_timeout.map(Duration::from_secs),
        })
    }
}

fn parse_env_number<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber(var)),
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The bind address could not be parsed.
    #[error("Invalid bind address: {0}")]
    InvalidAddr(String),
    /// A numeric environment variable could not be parsed.
    #[error("Invalid number in environment variable {0}")]
    InvalidNumber(&'static str),
}

/// One deployable repository from the startup repository file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepositorySetting {
    /// Repository full name (`owner/repo`)
    pub name: String,
    /// Webhook signing secret
    pub secret: String,
}

/// Load the startup repository list.
///
/// A missing or malformed file is not fatal: the condition is logged and the
/// daemon continues with no pre-registered repositories.
pub fn load_repository_settings(path: &Path) -> Vec<RepositorySetting> {
    let body = match std::fs::read(path) {
        Ok(body) => body,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Could not load repository settings, continuing without configuration"
            );
            return Vec::new();
        }
    };

    match serde_json::from_slice::<Vec<RepositorySetting>>(&body) {
        Ok(settings) => {
            info!(
                path = %path.display(),
                count = settings.len(),
                "Loaded repository settings"
            );
            settings
        }
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Could not parse repository settings, continuing without configuration"
            );
            Vec::new()
        }
    }
}
