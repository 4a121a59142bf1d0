// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock toolchain for testing.
//!
//! Images live in memory, clones write a `Dockerfile` into the destination,
//! and containers are created and removed on a linked [`MockRuntime`] so the
//! runtime client sees the effects of a deploy. Builds can be held at a gate
//! to observe the coordinator while a build is in flight.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore, watch};

use super::toolchain::{Result, Toolchain, ToolchainError};
use crate::runtime_client::MockRuntime;

/// One image known to the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockImage {
    /// Image id.
    pub id: String,
    /// Repository part of the tag.
    pub repository: String,
}

#[derive(Default)]
struct MockToolchainState {
    images: Vec<MockImage>,
    clone_dests: Vec<PathBuf>,
    clone_urls: Vec<String>,
    removed_images: Vec<String>,
    forced_ids: Vec<String>,
    next_id: u64,
    next_address: u8,
    fail_clone: bool,
    fail_build: bool,
    in_flight: HashMap<String, usize>,
    max_in_flight: HashMap<String, usize>,
    in_flight_total: usize,
    max_in_flight_total: usize,
}

/// Mock toolchain for testing.
pub struct MockToolchain {
    runtime: Arc<MockRuntime>,
    state: Mutex<MockToolchainState>,
    gated: AtomicBool,
    gate: Semaphore,
    builds_started: watch::Sender<usize>,
}

impl MockToolchain {
    /// Create a mock whose containers live on `runtime`.
    pub fn new(runtime: Arc<MockRuntime>) -> Self {
        let (builds_started, _) = watch::channel(0);
        Self {
            runtime,
            state: Mutex::new(MockToolchainState {
                next_address: 2,
                ..Default::default()
            }),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
            builds_started,
        }
    }

    /// Seed an existing image. The same id may be added under several tags.
    pub async fn add_image(&self, repository: &str, id: &str) {
        self.state.lock().await.images.push(MockImage {
            id: id.to_string(),
            repository: repository.to_string(),
        });
    }

    /// Images currently present.
    pub async fn images(&self) -> Vec<MockImage> {
        self.state.lock().await.images.clone()
    }

    /// Image ids passed to `remove_image`, in order.
    pub async fn removed_images(&self) -> Vec<String> {
        self.state.lock().await.removed_images.clone()
    }

    /// Destinations of every clone, in order.
    pub async fn clone_dests(&self) -> Vec<PathBuf> {
        self.state.lock().await.clone_dests.clone()
    }

    /// URLs of every clone, in order.
    pub async fn clone_urls(&self) -> Vec<String> {
        self.state.lock().await.clone_urls.clone()
    }

    /// Make every clone fail.
    pub async fn fail_clone(&self, fail: bool) {
        self.state.lock().await.fail_clone = fail;
    }

    /// Make every build fail.
    pub async fn fail_build(&self, fail: bool) {
        self.state.lock().await.fail_build = fail;
    }

    /// Id the next successful build will produce.
    pub async fn build_yields(&self, id: &str) {
        self.state.lock().await.forced_ids.push(id.to_string());
    }

    /// Hold every build until [`release_builds`](Self::release_builds).
    pub fn hold_builds(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    /// Let `n` held builds proceed.
    pub fn release_builds(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Number of builds that have started.
    pub fn builds_started(&self) -> usize {
        *self.builds_started.borrow()
    }

    /// Wait until at least `n` builds have started.
    pub async fn wait_for_builds_started(&self, n: usize) {
        let mut rx = self.builds_started.subscribe();
        // The sender lives as long as self, so this only returns once reached.
        let _ = rx.wait_for(|started| *started >= n).await;
    }

    /// Highest number of simultaneous builds seen for one repository.
    pub async fn max_concurrent_builds(&self, repository: &str) -> usize {
        self.state
            .lock()
            .await
            .max_in_flight
            .get(repository)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of simultaneous builds seen across repositories.
    pub async fn max_concurrent_builds_total(&self) -> usize {
        self.state.lock().await.max_in_flight_total
    }

    async fn enter_build(&self, repository: &str) {
        let mut state = self.state.lock().await;
        let count = state.in_flight.entry(repository.to_string()).or_insert(0);
        *count += 1;
        let count = *count;
        let max = state
            .max_in_flight
            .entry(repository.to_string())
            .or_insert(0);
        *max = (*max).max(count);
        state.in_flight_total += 1;
        state.max_in_flight_total = state.max_in_flight_total.max(state.in_flight_total);
    }

    async fn leave_build(&self, repository: &str) {
        let mut state = self.state.lock().await;
        if let Some(count) = state.in_flight.get_mut(repository) {
            *count = count.saturating_sub(1);
        }
        state.in_flight_total = state.in_flight_total.saturating_sub(1);
    }
}

fn failed(command: String, stderr: &str) -> ToolchainError {
    ToolchainError::CommandFailed {
        command,
        status: "exit status: 1".to_string(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl Toolchain for MockToolchain {
    fn toolchain_type(&self) -> &'static str {
        "mock"
    }

    async fn list_images(&self, repository: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .await
            .images
            .iter()
            .filter(|image| image.repository == repository)
            .map(|image| image.id.clone())
            .collect())
    }

    async fn clone_repository(&self, url: &str, dest: &Path) -> Result<()> {
        let mut state = self.state.lock().await;
        state.clone_dests.push(dest.to_path_buf());
        state.clone_urls.push(url.to_string());
        if state.fail_clone {
            return Err(failed(
                format!("git clone {url}"),
                "fatal: repository not found",
            ));
        }
        drop(state);

        tokio::fs::write(dest.join("Dockerfile"), "FROM scratch\n")
            .await
            .map_err(|source| ToolchainError::Spawn {
                program: "git".to_string(),
                source,
            })
    }

    async fn build_image(&self, tag: &str, context: &Path) -> Result<String> {
        let repository = tag.split(':').next().unwrap_or(tag).to_string();
        self.enter_build(&repository).await;
        self.builds_started.send_modify(|started| *started += 1);

        if self.gated.load(Ordering::SeqCst) {
            match self.gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => {
                    self.leave_build(&repository).await;
                    return Err(failed(format!("docker build -t {tag}"), "gate closed"));
                }
            }
        }

        let result = async {
            if !tokio::fs::try_exists(context.join("Dockerfile"))
                .await
                .unwrap_or(false)
            {
                return Err(failed(
                    format!("docker build -t {tag}"),
                    "unable to prepare context: Dockerfile not found",
                ));
            }

            let mut state = self.state.lock().await;
            if state.fail_build {
                return Err(failed(
                    format!("docker build -t {tag}"),
                    "The command '/bin/sh -c make' returned a non-zero code: 2",
                ));
            }
            let id = if state.forced_ids.is_empty() {
                state.next_id += 1;
                format!("sha256:{:064x}", state.next_id)
            } else {
                state.forced_ids.remove(0)
            };
            state.images.push(MockImage {
                id: id.clone(),
                repository: repository.clone(),
            });
            Ok(id)
        }
        .await;

        self.leave_build(&repository).await;
        result
    }

    async fn run_container(&self, name: &str, tag: &str) -> Result<()> {
        if self.runtime.container(name).await.is_some() {
            return Err(failed(
                format!("docker run -d --name {name} {tag}"),
                "Conflict. The container name is already in use",
            ));
        }
        let address = {
            let mut state = self.state.lock().await;
            let address = format!("172.17.0.{}", state.next_address);
            state.next_address = state.next_address.wrapping_add(1);
            address
        };
        self.runtime.insert(name, true, false, &address).await;
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let command = format!("docker rm {name}");
        let running = "You cannot remove a running container. \
            Stop the container before attempting removal";
        match self.runtime.container(name).await {
            None => Err(failed(command, "No such container")),
            Some(container) if container.running => Err(failed(command, running)),
            Some(_) => {
                self.runtime.remove(name).await;
                Ok(())
            }
        }
    }

    async fn remove_image(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.removed_images.push(id.to_string());
        let before = state.images.len();
        state.images.retain(|image| image.id != id);
        if state.images.len() == before {
            return Err(failed(format!("docker rmi {id}"), "No such image"));
        }
        Ok(())
    }
}
