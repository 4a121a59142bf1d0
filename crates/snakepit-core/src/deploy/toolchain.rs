// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Build toolchain: the external commands a deploy runs.
//!
//! [`DockerCli`] shells out to `git` and `docker`. Each call waits for the
//! child to exit; nothing here imposes a timeout.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors from toolchain commands.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ToolchainError {
    /// The command could not be spawned.
    #[error("Failed to run {program}: {source}")]
    Spawn {
        /// Program that failed to spawn.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The command exited unsuccessfully.
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        /// Full command line.
        command: String,
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The command succeeded but its output was not understood.
    #[error("Unexpected output from `{command}`: {message}")]
    Parse {
        /// Full command line.
        command: String,
        /// What was wrong with the output.
        message: String,
    },
}

/// Result type for toolchain operations.
pub type Result<T> = std::result::Result<T, ToolchainError>;

/// Trait for the build toolchain.
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Toolchain type identifier (e.g., "docker-cli", "mock")
    fn toolchain_type(&self) -> &'static str;

    /// Full ids of every image of `repository`, one entry per tag (so the same
    /// id can appear more than once).
    async fn list_images(&self, repository: &str) -> Result<Vec<String>>;

    /// Clone the default branch of `url` into `dest`.
    async fn clone_repository(&self, url: &str, dest: &Path) -> Result<()>;

    /// Build `context` into an image tagged `tag`, returning the new image id.
    async fn build_image(&self, tag: &str, context: &Path) -> Result<String>;

    /// Run a detached container named `name` from image `tag`.
    async fn run_container(&self, name: &str, tag: &str) -> Result<()>;

    /// Remove a stopped container.
    async fn remove_container(&self, name: &str) -> Result<()>;

    /// Remove an image by id.
    async fn remove_image(&self, id: &str) -> Result<()>;
}

/// Toolchain driving the `git` and `docker` command line tools.
#[derive(Debug, Clone)]
pub struct DockerCli {
    docker: PathBuf,
    git: PathBuf,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            docker: PathBuf::from("docker"),
            git: PathBuf::from("git"),
        }
    }
}

impl DockerCli {
    /// Create a toolchain using `docker` and `git` from `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use specific binaries.
    pub fn with_binaries(docker: impl Into<PathBuf>, git: impl Into<PathBuf>) -> Self {
        Self {
            docker: docker.into(),
            git: git.into(),
        }
    }

    /// Run a command to completion, returning its stdout.
    async fn run(&self, program: &Path, args: &[&str]) -> Result<String> {
        let command = format!("{} {}", program.display(), args.join(" "));
        debug!(command = %command, "Running toolchain command");

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|source| ToolchainError::Spawn {
                program: program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(ToolchainError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Toolchain for DockerCli {
    fn toolchain_type(&self) -> &'static str {
        "docker-cli"
    }

    async fn list_images(&self, repository: &str) -> Result<Vec<String>> {
        let stdout = self
            .run(
                &self.docker,
                &["images", "--no-trunc", "--format", "{{.ID}}", repository],
            )
            .await?;
        Ok(parse_id_lines(&stdout))
    }

    async fn clone_repository(&self, url: &str, dest: &Path) -> Result<()> {
        let dest = dest.to_string_lossy();
        self.run(&self.git, &["clone", "--depth", "1", url, &dest])
            .await?;
        Ok(())
    }

    async fn build_image(&self, tag: &str, context: &Path) -> Result<String> {
        let context = context.to_string_lossy();
        let args = ["build", "-t", tag, &*context];
        self.run(&self.docker, &args).await?;

        let stdout = self
            .run(
                &self.docker,
                &["image", "inspect", "--format", "{{.Id}}", tag],
            )
            .await?;
        parse_id_lines(&stdout)
            .into_iter()
            .next()
            .ok_or_else(|| ToolchainError::Parse {
                command: format!("{} image inspect {}", self.docker.display(), tag),
                message: "no image id printed".to_string(),
            })
    }

    async fn run_container(&self, name: &str, tag: &str) -> Result<()> {
        self.run(&self.docker, &["run", "-d", "--name", name, tag])
            .await?;
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        self.run(&self.docker, &["rm", name]).await?;
        Ok(())
    }

    async fn remove_image(&self, id: &str) -> Result<()> {
        self.run(&self.docker, &["rmi", id]).await?;
        Ok(())
    }
}

fn parse_id_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
