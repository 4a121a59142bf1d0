// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for snakepit.
//!
//! [`FleetRuntime`] wires the instance cache, runtime client, activation,
//! deploy coordinator, and lifecycle scheduler together and owns the
//! scheduler's background task.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use snakepit_core::deploy::DockerCli;
//! use snakepit_core::runtime::FleetRuntime;
//! use snakepit_core::runtime_client::DockerRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = FleetRuntime::builder()
//!         .runtime(Arc::new(DockerRuntime::new("/var/run/docker.sock")))
//!         .toolchain(Arc::new(DockerCli::new()))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     runtime.coordinator().register_secret("alice/snake", "s3cret").await;
//!     let address = runtime.activator().ensure_serving("bs-alice-snake").await?;
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::activation::Activator;
use crate::cache::{DEFAULT_FRESHNESS_WINDOW, InstanceCache};
use crate::config::Config;
use crate::deploy::{DeployCoordinator, DeployPipeline, PipelineConfig, Toolchain};
use crate::lifecycle_scheduler::{LifecycleScheduler, LifecycleSchedulerConfig, SchedulerWake};
use crate::runtime_client::{ContainerRuntime, RuntimeClient};

/// Builder for creating a [`FleetRuntime`].
pub struct FleetRuntimeBuilder {
    runtime: Option<Arc<dyn ContainerRuntime>>,
    toolchain: Option<Arc<dyn Toolchain>>,
    scheduler_config: LifecycleSchedulerConfig,
    pipeline_config: PipelineConfig,
    freshness_window: Duration,
}

impl Default for FleetRuntimeBuilder {
    fn default() -> Self {
        Self {
            runtime: None,
            toolchain: None,
            scheduler_config: LifecycleSchedulerConfig::default(),
            pipeline_config: PipelineConfig::default(),
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
        }
    }
}

impl FleetRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the container runtime (required).
    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Set the build toolchain (required).
    pub fn toolchain(mut self, toolchain: Arc<dyn Toolchain>) -> Self {
        self.toolchain = Some(toolchain);
        self
    }

    /// Set the lifecycle scheduler thresholds.
    ///
    /// Default: pause after 1 minute, stop after 1 hour
    pub fn scheduler_config(mut self, config: LifecycleSchedulerConfig) -> Self {
        self.scheduler_config = config;
        self
    }

    /// Set container naming and clone source.
    ///
    /// Default: prefix `bs-`, clone from `https://github.com`
    pub fn pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.pipeline_config = config;
        self
    }

    /// Set how long a cache entry stays fresh.
    ///
    /// Default: 60 seconds
    pub fn freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window = window;
        self
    }

    /// Take thresholds, naming, and clone source from process configuration.
    pub fn with_config(mut self, config: &Config) -> Self {
        self.scheduler_config.pause_after = config.pause_after;
        self.scheduler_config.stop_after = config.stop_after;
        self.pipeline_config = PipelineConfig {
            container_prefix: config.container_prefix.clone(),
            clone_base_url: config.clone_base_url.clone(),
        };
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<FleetRuntimeConfig> {
        let runtime = self
            .runtime
            .ok_or_else(|| anyhow::anyhow!("runtime is required"))?;
        let toolchain = self
            .toolchain
            .ok_or_else(|| anyhow::anyhow!("toolchain is required"))?;

        let thresholds = &self.scheduler_config;
        if thresholds.pause_after.is_zero() || thresholds.stop_after.is_zero() {
            anyhow::bail!("pause and stop thresholds must be greater than zero");
        }

        Ok(FleetRuntimeConfig {
            runtime,
            toolchain,
            scheduler_config: self.scheduler_config,
            pipeline_config: self.pipeline_config,
            freshness_window: self.freshness_window,
        })
    }
}

/// Configuration for a [`FleetRuntime`].
pub struct FleetRuntimeConfig {
    runtime: Arc<dyn ContainerRuntime>,
    toolchain: Arc<dyn Toolchain>,
    scheduler_config: LifecycleSchedulerConfig,
    pipeline_config: PipelineConfig,
    freshness_window: Duration,
}

impl FleetRuntimeConfig {
    /// Start the runtime, spawning the lifecycle scheduler task.
    pub async fn start(self) -> Result<FleetRuntime> {
        let cache = Arc::new(InstanceCache::with_freshness_window(self.freshness_window));
        let client = Arc::new(RuntimeClient::new(self.runtime.clone(), cache.clone()));

        let pipeline = Arc::new(DeployPipeline::new(
            client.clone(),
            self.toolchain.clone(),
            self.pipeline_config,
        ));
        let coordinator = Arc::new(DeployCoordinator::new(pipeline));

        let scheduler = LifecycleScheduler::new(client.clone(), self.scheduler_config);
        let scheduler_shutdown = scheduler.shutdown_handle();
        let scheduler_wake = scheduler.wake_handle();

        let activator = Activator::new(client.clone());
        let activator = Arc::new(activator.with_scheduler_wake(scheduler_wake.clone()));

        let scheduler_handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        info!(
            runtime = self.runtime.runtime_type(),
            toolchain = self.toolchain.toolchain_type(),
            "FleetRuntime started"
        );

        Ok(FleetRuntime {
            scheduler_handle,
            scheduler_shutdown,
            scheduler_wake,
            cache,
            client,
            activator,
            coordinator,
        })
    }
}

/// A running snakepit instance manager.
///
/// The runtime manages:
/// - Lifecycle scheduler that pauses and stops idle instances
/// - Deploy coordinator and its in-flight builds
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct FleetRuntime {
    scheduler_handle: JoinHandle<()>,
    scheduler_shutdown: Arc<Notify>,
    scheduler_wake: Arc<SchedulerWake>,
    cache: Arc<InstanceCache>,
    client: Arc<RuntimeClient>,
    activator: Arc<Activator>,
    coordinator: Arc<DeployCoordinator>,
}

impl FleetRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> FleetRuntimeBuilder {
        FleetRuntimeBuilder::new()
    }

    /// Shared instance cache.
    pub fn cache(&self) -> &Arc<InstanceCache> {
        &self.cache
    }

    /// Shared runtime client.
    pub fn client(&self) -> &Arc<RuntimeClient> {
        &self.client
    }

    /// Wake handle of the lifecycle scheduler.
    pub fn scheduler(&self) -> &Arc<SchedulerWake> {
        &self.scheduler_wake
    }

    /// Activation entry point for the proxy.
    pub fn activator(&self) -> &Arc<Activator> {
        &self.activator
    }

    /// Deploy coordinator for the webhook.
    pub fn coordinator(&self) -> &Arc<DeployCoordinator> {
        &self.coordinator
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops the lifecycle scheduler, then waits for in-flight builds and
    /// their queued re-runs to finish.
    pub async fn shutdown(self) {
        info!("FleetRuntime shutting down...");

        self.scheduler_shutdown.notify_one();
        if let Err(e) = self.scheduler_handle.await {
            error!("Lifecycle scheduler task panicked: {}", e);
        }

        self.coordinator.shutdown().await;
        info!("FleetRuntime shutdown complete");
    }

    /// Check if the scheduler is still running.
    pub fn is_running(&self) -> bool {
        !self.scheduler_handle.is_finished()
    }
}
