// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime client module - container engine access.

mod client;
pub mod docker;
pub mod mock;
mod traits;

pub use client::RuntimeClient;
pub use docker::{DockerRuntime, wait_for_socket};
pub use mock::{MockContainer, MockRuntime, RuntimeCall};
pub use traits::*;
