// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance state cache.
//!
//! Holds the last state the container runtime reported for every registered
//! instance, plus the time the instance last served a proxied request.
//! Entries are created by [`InstanceCache::register`] and live for the whole
//! process; operations on identifiers that were never registered fail with
//! [`Error::NotRegistered`].
//!
//! Writes take the exclusive lock for the whole read-modify-write, reads take
//! the shared lock. No method awaits anything but the lock itself, so the lock
//! is never held across runtime I/O.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Default freshness window: entries not refreshed for longer are stale.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(60);

/// When an instance last served a proxied request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LastUsed {
    /// No request has been forwarded since registration.
    #[default]
    Never,
    /// A request was forwarded at this instant.
    At(Instant),
}

impl LastUsed {
    /// Idle time at `now`, or `None` when the instance was never used
    /// (infinitely idle).
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        match self {
            LastUsed::Never => None,
            LastUsed::At(at) => Some(now.saturating_duration_since(*at)),
        }
    }
}

/// Last observed state of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstanceState {
    /// Container is running (possibly paused).
    pub running: bool,
    /// Container is paused. Only meaningful while `running`.
    pub paused: bool,
    /// Reachable address; empty until the first successful inspect.
    pub address: String,
    /// Last time a request was forwarded to the instance.
    pub last_used: LastUsed,
    /// Last time this entry was written from a runtime result.
    pub last_refresh: Option<Instant>,
    /// Requests currently being forwarded to the instance.
    pub in_flight: usize,
}

impl InstanceState {
    /// Whether the instance is ready to accept forwarded requests.
    pub fn is_serving(&self) -> bool {
        self.running && !self.paused
    }

    /// Whether a request to the instance is in flight.
    pub fn is_busy(&self) -> bool {
        self.in_flight > 0
    }

    /// Whether the entry is stale at `now` given a freshness window.
    ///
    /// Never-refreshed entries are stale; refreshed entries become stale
    /// strictly after `window` has elapsed.
    pub fn is_stale_at(&self, now: Instant, window: Duration) -> bool {
        match self.last_refresh {
            None => true,
            Some(refreshed) => now.saturating_duration_since(refreshed) > window,
        }
    }
}

/// Concurrency-safe map from instance identifier to [`InstanceState`].
#[derive(Debug)]
pub struct InstanceCache {
    entries: RwLock<HashMap<String, InstanceState>>,
    freshness_window: Duration,
}

impl Default for InstanceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceCache {
    /// Create an empty cache with the default 60 second freshness window.
    pub fn new() -> Self {
        Self::with_freshness_window(DEFAULT_FRESHNESS_WINDOW)
    }

    /// Create an empty cache with a custom freshness window.
    pub fn with_freshness_window(freshness_window: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            freshness_window,
        }
    }

    /// Freshness window used by [`is_stale`](Self::is_stale).
    pub fn freshness_window(&self) -> Duration {
        self.freshness_window
    }

    /// Register an instance. Existing entries are left untouched.
    pub async fn register(&self, id: &str) {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(id) {
            entries.insert(id.to_string(), InstanceState::default());
            tracing::debug!(instance_id = %id, "Registered instance");
        }
    }

    /// Whether the identifier has been registered.
    pub async fn is_registered(&self, id: &str) -> bool {
        self.entries.read().await.contains_key(id)
    }

    /// Get a copy of the instance's state.
    pub async fn get(&self, id: &str) -> Result<InstanceState> {
        self.entries
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotRegistered(id.to_string()))
    }

    /// Whether the entry needs a fresh inspect.
    ///
    /// Unregistered identifiers are reported as stale.
    pub async fn is_stale(&self, id: &str) -> bool {
        let now = Instant::now();
        match self.entries.read().await.get(id) {
            Some(state) => state.is_stale_at(now, self.freshness_window),
            None => true,
        }
    }

    /// Replace flags and address from a full inspect.
    pub async fn update_full(
        &self,
        id: &str,
        running: bool,
        paused: bool,
        address: impl Into<String>,
    ) -> Result<()> {
        let address = address.into();
        self.modify(id, |state| {
            state.running = running;
            state.paused = paused;
            state.address = address;
        })
        .await
    }

    /// Replace the running and paused flags.
    pub async fn update_running(&self, id: &str, running: bool, paused: bool) -> Result<()> {
        self.modify(id, |state| {
            state.running = running;
            state.paused = paused;
        })
        .await
    }

    /// Replace the paused flag.
    pub async fn update_paused(&self, id: &str, paused: bool) -> Result<()> {
        self.modify(id, |state| state.paused = paused).await
    }

    /// Record that a request was just forwarded to the instance.
    ///
    /// Returns the stamp. Does not touch the refresh time.
    pub async fn note_used(&self, id: &str) -> Result<Instant> {
        let now = Instant::now();
        self.with_entry(id, |state| state.last_used = LastUsed::At(now))
            .await?;
        Ok(now)
    }

    /// Mark one more request as in flight to the instance.
    pub async fn begin_request(&self, id: &str) -> Result<()> {
        self.with_entry(id, |state| state.in_flight += 1).await
    }

    /// Clear one in-flight mark set by [`begin_request`](Self::begin_request).
    pub async fn end_request(&self, id: &str) -> Result<()> {
        self.with_entry(id, |state| {
            state.in_flight = state.in_flight.saturating_sub(1)
        })
        .await
    }

    /// Visit every entry under the shared lock.
    ///
    /// The visitor returns [`ControlFlow::Break`] to stop early. It must not
    /// block: the lock is held for the whole iteration.
    pub async fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&str, &InstanceState) -> ControlFlow<()>,
    {
        let entries = self.entries.read().await;
        for (id, state) in entries.iter() {
            if visitor(id, state).is_break() {
                return;
            }
        }
    }

    /// Copy of every entry.
    pub async fn snapshot(&self) -> Vec<(String, InstanceState)> {
        let mut out = Vec::new();
        self.for_each(|id, state| {
            out.push((id.to_string(), state.clone()));
            ControlFlow::Continue(())
        })
        .await;
        out
    }

    /// Apply a mutation and stamp the refresh time.
    async fn modify<F>(&self, id: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut InstanceState),
    {
        let now = Instant::now();
        self.with_entry(id, |state| {
            apply(state);
            state.last_refresh = Some(now);
        })
        .await
    }

    /// Apply a mutation under the exclusive lock.
    async fn with_entry<F>(&self, id: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut InstanceState),
    {
        let mut entries = self.entries.write().await;
        let state = entries
            .get_mut(id)
            .ok_or_else(|| Error::NotRegistered(id.to_string()))?;
        apply(state);
        Ok(())
    }
}
