// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The rebuild procedure for one repository.
//!
//! A deploy clones the default branch into a scratch directory, builds a new
//! image, swaps the running container for one started from that image, and
//! prunes the images the old container was built from. Nothing touches the
//! running container until the new image exists, so a failed clone or build
//! leaves the instance exactly as it was.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use super::toolchain::{Toolchain, ToolchainError};
use crate::runtime_client::RuntimeClient;

/// Container name for a repository: `<prefix><owner>-<repo>`.
pub fn container_name(prefix: &str, repository: &str) -> String {
    format!("{}{}", prefix, repository.replace('/', "-"))
}

/// Image name for a repository. Image references must be lower case.
pub fn image_name(repository: &str) -> String {
    repository.to_lowercase()
}

/// Tag every deploy builds and runs.
pub fn image_tag(repository: &str) -> String {
    format!("{}:local", image_name(repository))
}

/// Deploy pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Prefix for container names
    pub container_prefix: String,
    /// Base URL repositories are cloned from
    pub clone_base_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            container_prefix: "bs-".to_string(),
            clone_base_url: "https://github.com".to_string(),
        }
    }
}

/// Pipeline step, used to tag failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStep {
    /// Checking whether the container exists.
    Inspect,
    /// Creating the scratch directory.
    Scratch,
    /// Cloning the repository.
    Clone,
    /// Building the image.
    Build,
    /// Stopping the old container.
    Stop,
    /// Removing the old container.
    Remove,
    /// Running the new container.
    Run,
    /// Checking the new container exists.
    Verify,
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeployStep::Inspect => "inspect",
            DeployStep::Scratch => "scratch",
            DeployStep::Clone => "clone",
            DeployStep::Build => "build",
            DeployStep::Stop => "stop",
            DeployStep::Remove => "remove",
            DeployStep::Run => "run",
            DeployStep::Verify => "verify",
        };
        f.write_str(name)
    }
}

/// Deploy failure. Each variant carries the step that failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DeployError {
    /// A toolchain command failed.
    #[error("{step} failed for {repository}: {source}")]
    Toolchain {
        /// Repository being deployed.
        repository: String,
        /// Failing step.
        step: DeployStep,
        /// Command failure.
        #[source]
        source: ToolchainError,
    },

    /// A runtime call failed.
    #[error("{step} failed for {repository}: {source}")]
    Runtime {
        /// Repository being deployed.
        repository: String,
        /// Failing step.
        step: DeployStep,
        /// Runtime failure.
        #[source]
        source: crate::Error,
    },

    /// The scratch directory could not be created.
    #[error("scratch failed for {repository}: {source}")]
    Scratch {
        /// Repository being deployed.
        repository: String,
        /// I/O failure.
        #[source]
        source: std::io::Error,
    },
}

impl DeployError {
    /// Step that failed.
    pub fn step(&self) -> DeployStep {
        match self {
            DeployError::Toolchain { step, .. } | DeployError::Runtime { step, .. } => *step,
            DeployError::Scratch { .. } => DeployStep::Scratch,
        }
    }
}

/// What a successful deploy did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    /// Repository full name.
    pub repository: String,
    /// Container that now serves the repository.
    pub container: String,
    /// Id of the freshly built image.
    pub image_id: String,
    /// Whether an existing container was replaced.
    pub replaced: bool,
    /// Old image ids that were removed.
    pub pruned: Vec<String>,
}

/// Runs the rebuild procedure.
pub struct DeployPipeline {
    client: Arc<RuntimeClient>,
    toolchain: Arc<dyn Toolchain>,
    config: PipelineConfig,
}

impl DeployPipeline {
    /// Create a pipeline.
    pub fn new(
        client: Arc<RuntimeClient>,
        toolchain: Arc<dyn Toolchain>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            client,
            toolchain,
            config,
        }
    }

    /// Runtime client used for the container swap.
    pub fn client(&self) -> &Arc<RuntimeClient> {
        &self.client
    }

    /// Pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Container name for `repository` under this pipeline's prefix.
    pub fn container_name(&self, repository: &str) -> String {
        container_name(&self.config.container_prefix, repository)
    }

    /// Clone URL for `repository`.
    pub fn clone_url(&self, repository: &str) -> String {
        format!("{}/{}.git", self.config.clone_base_url, repository)
    }

    /// Rebuild and redeploy `repository`.
    ///
    /// Callers must hold the repository's build slot.
    pub async fn deploy(&self, repository: &str) -> Result<DeployReport, DeployError> {
        let container = self.container_name(repository);
        info!(repository = %repository, container = %container, "Deploy started");

        let existed = match self.client.inspect(&container).await {
            Ok(_) => true,
            Err(e) if e.is_not_exist() => false,
            Err(source) => {
                return Err(self.log_failure(DeployError::Runtime {
                    repository: repository.to_string(),
                    step: DeployStep::Inspect,
                    source,
                }));
            }
        };

        let image = image_name(repository);
        let old_images = match self.toolchain.list_images(&image).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(
                    repository = %repository,
                    error = %e,
                    "Could not list old images, skipping prune"
                );
                Vec::new()
            }
        };

        let scratch = tempfile::Builder::new()
            .prefix(&format!("{container}-"))
            .tempdir()
            .map_err(|source| {
                self.log_failure(DeployError::Scratch {
                    repository: repository.to_string(),
                    source,
                })
            })?;

        let result = self
            .swap(repository, &container, existed, scratch.path())
            .await;

        let scratch_path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            warn!(path = %scratch_path.display(), error = %e, "Failed to remove scratch directory");
        }

        let image_id = result?;
        let pruned = self.prune(repository, old_images, &image_id).await;

        info!(
            repository = %repository,
            container = %container,
            image_id = %image_id,
            replaced = existed,
            pruned = pruned.len(),
            "Deploy finished"
        );

        Ok(DeployReport {
            repository: repository.to_string(),
            container,
            image_id,
            replaced: existed,
            pruned,
        })
    }

    /// Clone, build, and replace the container. Returns the new image id.
    async fn swap(
        &self,
        repository: &str,
        container: &str,
        existed: bool,
        scratch: &Path,
    ) -> Result<String, DeployError> {
        let toolchain_err = |step, source| {
            self.log_failure(DeployError::Toolchain {
                repository: repository.to_string(),
                step,
                source,
            })
        };
        let runtime_err = |step, source| {
            self.log_failure(DeployError::Runtime {
                repository: repository.to_string(),
                step,
                source,
            })
        };

        let url = self.clone_url(repository);
        self.toolchain
            .clone_repository(&url, scratch)
            .await
            .map_err(|e| toolchain_err(DeployStep::Clone, e))?;
        info!(repository = %repository, url = %url, "Cloned repository");

        let tag = image_tag(repository);
        let image_id = self
            .toolchain
            .build_image(&tag, scratch)
            .await
            .map_err(|e| toolchain_err(DeployStep::Build, e))?;
        info!(repository = %repository, tag = %tag, image_id = %image_id, "Built image");

        if existed {
            self.client
                .stop(container)
                .await
                .map_err(|e| runtime_err(DeployStep::Stop, e))?;
            self.toolchain
                .remove_container(container)
                .await
                .map_err(|e| toolchain_err(DeployStep::Remove, e))?;
            info!(repository = %repository, container = %container, "Removed old container");
        }

        self.toolchain
            .run_container(container, &tag)
            .await
            .map_err(|e| toolchain_err(DeployStep::Run, e))?;

        self.client
            .inspect(container)
            .await
            .map_err(|e| runtime_err(DeployStep::Verify, e))?;
        info!(repository = %repository, container = %container, "Started new container");

        Ok(image_id)
    }

    /// Remove superseded images. Failures are logged and skipped.
    async fn prune(&self, repository: &str, old_images: Vec<String>, keep: &str) -> Vec<String> {
        let mut seen = Vec::new();
        for id in old_images {
            if id != keep && !seen.contains(&id) {
                seen.push(id);
            }
        }

        let mut pruned = Vec::new();
        for id in seen {
            match self.toolchain.remove_image(&id).await {
                Ok(()) => pruned.push(id),
                Err(e) => warn!(
                    repository = %repository,
                    image_id = %id,
                    error = %e,
                    "Failed to remove old image"
                ),
            }
        }
        pruned
    }

    fn log_failure(&self, err: DeployError) -> DeployError {
        error!(step = %err.step(), error = %err, "Deploy step failed");
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name() {
        assert_eq!(container_name("bs-", "alice/snake"), "bs-alice-snake");
        assert_eq!(container_name("", "Org/Big-Snake"), "Org-Big-Snake");
    }

    #[test]
    fn test_image_tag_is_lowercase() {
        assert_eq!(image_name("Org/Big-Snake"), "org/big-snake");
        assert_eq!(image_tag("Org/Big-Snake"), "org/big-snake:local");
    }

    #[test]
    fn test_step_display() {
        assert_eq!(DeployStep::Build.to_string(), "build");
        assert_eq!(DeployStep::Verify.to_string(), "verify");
    }
}
