// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock runtime for testing.
//!
//! An in-memory container engine that records every call and can be told to
//! fail specific operations.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::traits::*;
use crate::error::{Error, Result};

/// Mock container state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockContainer {
    /// Container is running.
    pub running: bool,
    /// Container is paused.
    pub paused: bool,
    /// Address reported while running.
    pub address: String,
}

/// One recorded runtime call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCall {
    /// Operation that was invoked.
    pub op: RuntimeOp,
    /// Container name it targeted.
    pub name: String,
}

/// Mock runtime for testing.
#[derive(Default)]
pub struct MockRuntime {
    containers: Mutex<HashMap<String, MockContainer>>,
    calls: Mutex<Vec<RuntimeCall>>,
    failures: Mutex<HashSet<(String, RuntimeOp)>>,
}

impl MockRuntime {
    /// Create an empty mock runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a container.
    pub async fn insert(&self, name: &str, running: bool, paused: bool, address: &str) {
        self.containers.lock().await.insert(
            name.to_string(),
            MockContainer {
                running,
                paused,
                address: address.to_string(),
            },
        );
    }

    /// Remove a container. Returns whether it existed.
    pub async fn remove(&self, name: &str) -> bool {
        self.containers.lock().await.remove(name).is_some()
    }

    /// Current state of a container.
    pub async fn container(&self, name: &str) -> Option<MockContainer> {
        self.containers.lock().await.get(name).cloned()
    }

    /// Make every future `op` on `name` fail with a runtime error.
    pub async fn fail(&self, name: &str, op: RuntimeOp) {
        self.failures.lock().await.insert((name.to_string(), op));
    }

    /// All calls recorded so far, in order.
    pub async fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().await.clone()
    }

    /// Operations recorded for one container, in order.
    pub async fn ops_for(&self, name: &str) -> Vec<RuntimeOp> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| call.name == name)
            .map(|call| call.op)
            .collect()
    }

    /// Forget recorded calls.
    pub async fn clear_calls(&self) {
        self.calls.lock().await.clear();
    }

    async fn record(&self, name: &str, op: RuntimeOp) -> Result<()> {
        self.calls.lock().await.push(RuntimeCall {
            op,
            name: name.to_string(),
        });
        if self
            .failures
            .lock()
            .await
            .contains(&(name.to_string(), op))
        {
            return Err(Error::runtime(op.as_str(), name, "mock failure"));
        }
        Ok(())
    }

    async fn mutate<F>(&self, name: &str, op: RuntimeOp, apply: F) -> Result<()>
    where
        F: FnOnce(&mut MockContainer) -> Result<()>,
    {
        self.record(name, op).await?;
        let mut containers = self.containers.lock().await;
        let container = containers
            .get_mut(name)
            .ok_or_else(|| Error::NotExist(name.to_string()))?;
        apply(container)
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn runtime_type(&self) -> &'static str {
        "mock"
    }

    async fn inspect(&self, name: &str) -> Result<ContainerSnapshot> {
        self.record(name, RuntimeOp::Inspect).await?;
        let containers = self.containers.lock().await;
        let container = containers
            .get(name)
            .ok_or_else(|| Error::NotExist(name.to_string()))?;
        Ok(ContainerSnapshot {
            running: container.running,
            paused: container.paused,
            address: if container.running {
                container.address.clone()
            } else {
                String::new()
            },
        })
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.mutate(name, RuntimeOp::Start, |c| {
            c.running = true;
            c.paused = false;
            Ok(())
        })
        .await
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.mutate(name, RuntimeOp::Stop, |c| {
            c.running = false;
            c.paused = false;
            Ok(())
        })
        .await
    }

    async fn pause(&self, name: &str) -> Result<()> {
        self.mutate(name, RuntimeOp::Pause, |c| {
            if !c.running {
                return Err(Error::runtime(
                    "pause",
                    name,
                    "status 409: container is not running",
                ));
            }
            c.paused = true;
            Ok(())
        })
        .await
    }

    async fn unpause(&self, name: &str) -> Result<()> {
        self.mutate(name, RuntimeOp::Unpause, |c| {
            if !c.paused {
                return Err(Error::runtime(
                    "unpause",
                    name,
                    "status 409: container is not paused",
                ));
            }
            c.paused = false;
            Ok(())
        })
        .await
    }
}
