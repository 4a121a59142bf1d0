// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registration-aware runtime client.
//!
//! Wraps a [`ContainerRuntime`] and keeps the [`InstanceCache`] in step with
//! every successful call. Identifiers missing from the cache are rejected with
//! [`Error::NotRegistered`] before the runtime is contacted.

use std::sync::Arc;

use tracing::info;

use super::traits::*;
use crate::cache::InstanceCache;
use crate::error::{Error, Result};

/// Runtime client that writes every answer into the instance cache.
pub struct RuntimeClient {
    runtime: Arc<dyn ContainerRuntime>,
    cache: Arc<InstanceCache>,
}

impl RuntimeClient {
    /// Create a client over a runtime and a shared cache.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, cache: Arc<InstanceCache>) -> Self {
        Self { runtime, cache }
    }

    /// The cache this client keeps up to date.
    pub fn cache(&self) -> &Arc<InstanceCache> {
        &self.cache
    }

    /// The underlying runtime.
    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    async fn ensure_registered(&self, id: &str) -> Result<()> {
        if self.cache.is_registered(id).await {
            Ok(())
        } else {
            Err(Error::NotRegistered(id.to_string()))
        }
    }

    /// Inspect a container and store the result in the cache.
    pub async fn inspect(&self, id: &str) -> Result<ContainerSnapshot> {
        self.ensure_registered(id).await?;
        let snapshot = self.runtime.inspect(id).await?;
        self.cache
            .update_full(
                id,
                snapshot.running,
                snapshot.paused,
                snapshot.address.clone(),
            )
            .await?;
        Ok(snapshot)
    }

    /// Start a container, then re-inspect it since its address may change.
    pub async fn start(&self, id: &str) -> Result<()> {
        self.ensure_registered(id).await?;
        info!(instance_id = %id, "Starting container");
        self.runtime.start(id).await?;
        self.inspect(id).await?;
        Ok(())
    }

    /// Stop a container.
    pub async fn stop(&self, id: &str) -> Result<()> {
        self.ensure_registered(id).await?;
        info!(instance_id = %id, "Stopping container");
        self.runtime.stop(id).await?;
        self.cache.update_running(id, false, false).await
    }

    /// Pause a container.
    pub async fn pause(&self, id: &str) -> Result<()> {
        self.ensure_registered(id).await?;
        info!(instance_id = %id, "Pausing container");
        self.runtime.pause(id).await?;
        self.cache.update_paused(id, true).await
    }

    /// Unpause a container.
    pub async fn unpause(&self, id: &str) -> Result<()> {
        self.ensure_registered(id).await?;
        info!(instance_id = %id, "Unpausing container");
        self.runtime.unpause(id).await?;
        self.cache.update_paused(id, false).await
    }
}
