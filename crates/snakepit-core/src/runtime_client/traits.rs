// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container runtime trait definitions.
//!
//! Defines the abstract interface to the local container engine.

use async_trait::async_trait;

use crate::error::Result;

/// State of a container as reported by an inspect call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerSnapshot {
    /// Container is running (possibly paused).
    pub running: bool,
    /// Container is paused.
    pub paused: bool,
    /// First non-empty network address, or empty if none is assigned.
    pub address: String,
}

/// Runtime operations, used for call recording and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    /// Read container state.
    Inspect,
    /// Start a stopped container.
    Start,
    /// Stop a running container.
    Stop,
    /// Freeze a running container.
    Pause,
    /// Thaw a paused container.
    Unpause,
}

impl RuntimeOp {
    /// Operation name as used in the control API path.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeOp::Inspect => "inspect",
            RuntimeOp::Start => "start",
            RuntimeOp::Stop => "stop",
            RuntimeOp::Pause => "pause",
            RuntimeOp::Unpause => "unpause",
        }
    }
}

/// Trait for container runtimes.
///
/// Runtimes are PURE transport - they do NOT know about registration or the
/// instance cache. [`RuntimeClient`](super::RuntimeClient) layers both on top.
///
/// Implementations map "no such container" to
/// [`Error::NotExist`](crate::Error::NotExist) and every other failure to
/// [`Error::Runtime`](crate::Error::Runtime).
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Runtime type identifier (e.g., "docker", "mock")
    fn runtime_type(&self) -> &'static str;

    /// Inspect a container by name.
    async fn inspect(&self, name: &str) -> Result<ContainerSnapshot>;

    /// Start a container. Starting a running container succeeds.
    async fn start(&self, name: &str) -> Result<()>;

    /// Stop a container. Stopping a stopped container succeeds.
    async fn stop(&self, name: &str) -> Result<()>;

    /// Pause a running container.
    async fn pause(&self, name: &str) -> Result<()>;

    /// Unpause a paused container.
    async fn unpause(&self, name: &str) -> Result<()>;
}
