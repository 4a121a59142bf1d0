// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deploy module - rebuild and redeploy instances from source.

mod coordinator;
pub mod mock;
mod pipeline;
mod state;
pub mod toolchain;

pub use coordinator::DeployCoordinator;
pub use mock::{MockImage, MockToolchain};
pub use pipeline::{
    DeployError, DeployPipeline, DeployReport, DeployStep, PipelineConfig, container_name,
    image_name, image_tag,
};
pub use state::{BuildCompletion, BuildPhase, BuildRequestOutcome, BuildSlot};
pub use toolchain::{DockerCli, Toolchain, ToolchainError};
