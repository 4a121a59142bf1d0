// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-repository build coordination.
//!
//! Each registered repository owns a secret and a [`BuildSlot`]. At most one
//! deploy per repository runs at a time; requests that arrive while one is
//! running collapse into a single follow-up run. Different repositories build
//! in parallel. Build tasks are spawned on a [`TaskTracker`] so shutdown can
//! wait for them.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use super::pipeline::DeployPipeline;
use super::state::{BuildCompletion, BuildPhase, BuildRequestOutcome, BuildSlot};
use crate::error::{Error, Result};
use crate::signature;

struct RepositoryBuild {
    secret: RwLock<Vec<u8>>,
    slot: BuildSlot,
}

/// Owns build state for every deployable repository.
pub struct DeployCoordinator {
    repositories: RwLock<HashMap<String, Arc<RepositoryBuild>>>,
    pipeline: Arc<DeployPipeline>,
    tracker: TaskTracker,
}

impl DeployCoordinator {
    /// Create a coordinator over a deploy pipeline.
    pub fn new(pipeline: Arc<DeployPipeline>) -> Self {
        Self {
            repositories: RwLock::new(HashMap::new()),
            pipeline,
            tracker: TaskTracker::new(),
        }
    }

    /// The pipeline builds run through.
    pub fn pipeline(&self) -> &Arc<DeployPipeline> {
        &self.pipeline
    }

    /// Register a repository, or replace its secret if already registered.
    ///
    /// The repository's container is registered with the instance cache too,
    /// so it can be proxied to and deployed.
    pub async fn register_secret(&self, repository: &str, secret: impl Into<Vec<u8>>) {
        let secret = secret.into();
        {
            let mut repositories = self.repositories.write().await;
            let existing = repositories.get(repository).cloned();
            match existing {
                Some(existing) => *existing.secret.write().await = secret,
                None => {
                    repositories.insert(
                        repository.to_string(),
                        Arc::new(RepositoryBuild {
                            secret: RwLock::new(secret),
                            slot: BuildSlot::new(),
                        }),
                    );
                }
            }
        }

        let container = self.pipeline.container_name(repository);
        self.pipeline.client().cache().register(&container).await;
        info!(repository = %repository, container = %container, "Registered repository");
    }

    /// Whether the repository has been registered.
    pub async fn is_registered(&self, repository: &str) -> bool {
        self.repositories.read().await.contains_key(repository)
    }

    /// Names of every registered repository.
    pub async fn repositories(&self) -> Vec<String> {
        let mut names: Vec<String> = self.repositories.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check a `<alg>=<hex>` signature header against the repository secret.
    pub async fn verify_signature(
        &self,
        repository: &str,
        payload: &[u8],
        header: &str,
    ) -> Result<()> {
        let entry = self.entry(repository).await?;
        let secret = entry.secret.read().await;
        signature::verify_signature(payload, &secret, header)?;
        Ok(())
    }

    /// Current build phase of a repository.
    pub async fn phase(&self, repository: &str) -> Result<BuildPhase> {
        Ok(self.entry(repository).await?.slot.phase().await)
    }

    /// Request a deploy.
    ///
    /// Returns [`BuildRequestOutcome::Started`] when this call started a
    /// build task, or [`BuildRequestOutcome::Queued`] when a build was already
    /// running and one more run has been scheduled after it.
    pub async fn request_build(&self, repository: &str) -> Result<BuildRequestOutcome> {
        let entry = self.entry(repository).await?;

        let outcome = entry.slot.request().await;
        match outcome {
            BuildRequestOutcome::Queued => {
                info!(repository = %repository, "Build in progress, queued another run");
            }
            BuildRequestOutcome::Started => {
                let pipeline = self.pipeline.clone();
                let repository = repository.to_string();
                self.tracker.spawn(async move {
                    run_builds(pipeline, entry, repository).await;
                });
            }
        }
        Ok(outcome)
    }

    /// Wait for every in-flight build, including queued re-runs, to finish.
    pub async fn shutdown(&self) {
        self.tracker.close();
        debug!(in_flight = self.tracker.len(), "Waiting for builds to drain");
        self.tracker.wait().await;
        info!("Deploy coordinator drained");
    }

    async fn entry(&self, repository: &str) -> Result<Arc<RepositoryBuild>> {
        self.repositories
            .read()
            .await
            .get(repository)
            .cloned()
            .ok_or_else(|| Error::NotRegistered(repository.to_string()))
    }
}

/// Build until no request is queued, then release the slot.
async fn run_builds(
    pipeline: Arc<DeployPipeline>,
    entry: Arc<RepositoryBuild>,
    repository: String,
) {
    loop {
        match pipeline.deploy(&repository).await {
            Ok(report) => {
                info!(
                    repository = %repository,
                    image_id = %report.image_id,
                    "Deployed repository"
                );
            }
            // The pipeline already logged the failing step
            Err(e) => {
                debug!(repository = %repository, step = %e.step(), "Deploy run ended in failure");
            }
        }

        match entry.slot.finish().await {
            BuildCompletion::Released => break,
            BuildCompletion::RunAgain => {
                info!(repository = %repository, "Running queued deploy");
            }
        }
    }
}
