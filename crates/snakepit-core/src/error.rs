// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for snakepit-core.

use thiserror::Error;

/// Lifecycle errors shared by the cache, the runtime client, and activation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The identifier was never registered with the instance cache or build map.
    #[error("Instance not registered: {0}")]
    NotRegistered(String),

    /// The container runtime has no container with this name.
    #[error("Container does not exist: {0}")]
    NotExist(String),

    /// Transport failure or unexpected status from the container runtime.
    #[error("Runtime error during {operation} on {target}: {message}")]
    Runtime {
        /// Runtime operation that failed (`inspect`, `start`, ...).
        operation: &'static str,
        /// Container name the operation targeted.
        target: String,
        /// Failure detail from the transport or the runtime response.
        message: String,
    },

    /// A webhook signature did not verify.
    #[error("Signature rejected: {0}")]
    Signature(#[from] crate::signature::SignatureError),

    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a runtime error for an operation on a container.
    pub fn runtime(operation: &'static str, target: &str, message: impl Into<String>) -> Self {
        Error::Runtime {
            operation,
            target: target.to_string(),
            message: message.into(),
        }
    }

    /// Whether this error means the identifier is unknown to the cache.
    pub fn is_not_registered(&self) -> bool {
        matches!(self, Error::NotRegistered(_))
    }

    /// Whether this error means the runtime has no such container.
    pub fn is_not_exist(&self) -> bool {
        matches!(self, Error::NotExist(_))
    }
}

/// Result type using the lifecycle Error.
pub type Result<T> = std::result::Result<T, Error>;
