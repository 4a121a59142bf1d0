// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! On-demand activation of instances before a request is forwarded.
//!
//! [`Activator::ensure_serving`] brings a stopped or paused instance back to
//! serving state with the smallest runtime operation that gets it there.
//! Activation is not usage: callers record usage with
//! [`Activator::note_used`] only after a request was forwarded, so idleness
//! is measured from real traffic.
//!
//! The proxy goes through [`Activator::begin_request`] instead. The returned
//! [`RequestLease`] marks the instance busy from before activation until the
//! forward is over, so the lifecycle scheduler cannot suspend it in between.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::InstanceCache;
use crate::error::Result;
use crate::lifecycle_scheduler::SchedulerWake;
use crate::runtime_client::RuntimeClient;

/// Activation entry point used by the proxy.
pub struct Activator {
    client: Arc<RuntimeClient>,
    scheduler_wake: Option<Arc<SchedulerWake>>,
}

impl Activator {
    /// Create an activator over a runtime client.
    pub fn new(client: Arc<RuntimeClient>) -> Self {
        Self {
            client,
            scheduler_wake: None,
        }
    }

    /// Report usage to the lifecycle scheduler, so it re-plans when a freshly
    /// used instance becomes due before its next pass.
    pub fn with_scheduler_wake(mut self, wake: Arc<SchedulerWake>) -> Self {
        self.scheduler_wake = Some(wake);
        self
    }

    /// Make sure the instance is running and unpaused, returning its address.
    ///
    /// Stale cache entries are refreshed first. Runtime failures are returned
    /// immediately; nothing here retries.
    pub async fn ensure_serving(&self, id: &str) -> Result<String> {
        let cache = self.client.cache();

        if cache.is_stale(id).await {
            debug!(instance_id = %id, "Cache entry stale, refreshing");
            self.client.inspect(id).await?;
        }

        let state = cache.get(id).await?;
        if state.running && state.paused {
            self.client.unpause(id).await?;
        } else if !state.running {
            self.client.start(id).await?;
        }

        Ok(cache.get(id).await?.address)
    }

    /// Mark a request in flight, then activate the instance.
    ///
    /// On failure the mark is cleared before the error is returned.
    pub async fn begin_request(&self, id: &str) -> Result<RequestLease> {
        let cache = self.client.cache();
        cache.begin_request(id).await?;

        let mut lease = RequestLease {
            cache: cache.clone(),
            scheduler_wake: self.scheduler_wake.clone(),
            id: id.to_string(),
            address: String::new(),
            open: true,
        };
        match self.ensure_serving(id).await {
            Ok(address) => {
                lease.address = address;
                Ok(lease)
            }
            Err(e) => {
                lease.release().await;
                Err(e)
            }
        }
    }

    /// Record that a request was forwarded to the instance.
    pub async fn note_used(&self, id: &str) -> Result<()> {
        let used_at = self.client.cache().note_used(id).await?;
        if let Some(wake) = &self.scheduler_wake {
            wake.usage_recorded(used_at).await;
        }
        Ok(())
    }
}

/// A request in flight to an activated instance.
///
/// While the lease is open the lifecycle scheduler keeps the instance as it
/// is. Close it with [`complete`](Self::complete) once the response has been
/// read, or with [`release`](Self::release) when forwarding failed. A lease
/// dropped while still open is released from a spawned task.
#[must_use = "an open lease keeps the instance from being suspended"]
pub struct RequestLease {
    cache: Arc<InstanceCache>,
    scheduler_wake: Option<Arc<SchedulerWake>>,
    id: String,
    address: String,
    open: bool,
}

impl RequestLease {
    /// Instance the request goes to.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Address the instance serves on.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The request was served: record usage and clear the in-flight mark.
    pub async fn complete(mut self) -> Result<()> {
        self.open = false;
        let used_at = self.cache.note_used(&self.id).await;
        let ended = self.cache.end_request(&self.id).await;
        let used_at = used_at?;
        ended?;

        if let Some(wake) = &self.scheduler_wake {
            wake.usage_recorded(used_at).await;
        }
        Ok(())
    }

    /// The request was not served: clear the in-flight mark only.
    pub async fn release(mut self) {
        self.open = false;
        if let Err(e) = self.cache.end_request(&self.id).await {
            warn!(instance_id = %self.id, error = %e, "Failed to clear in-flight mark");
        }
    }
}

impl Drop for RequestLease {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        let cache = self.cache.clone();
        let id = std::mem::take(&mut self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = cache.end_request(&id).await {
                        warn!(instance_id = %id, error = %e, "Failed to clear in-flight mark");
                    }
                });
            }
            Err(_) => warn!(instance_id = %id, "Request lease dropped outside a runtime"),
        }
    }
}
