// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Snakepit Core - Instance Lifecycle & Deployment Coordination
//!
//! This crate keeps a fleet of battlesnake containers on one Docker host
//! cheap to run: idle instances are paused and later stopped, requests wake
//! them on demand, and pushes to a repository's default branch rebuild and
//! redeploy its container.
//!
//! # Architecture
//!
//! ```text
//!        proxy                              webhook
//!          │                                   │
//!          ▼                                   ▼
//!   ┌─────────────┐   wake   ┌───────────┐   ┌──────────────────┐
//!   │  Activator  │─────────►│ Lifecycle │   │ DeployCoordinator│
//!   └──────┬──────┘          │ Scheduler │   │   (BuildSlot per │
//!          │                 └─────┬─────┘   │    repository)   │
//!          │                       │         └────────┬─────────┘
//!          ▼                       ▼                  ▼
//!   ┌──────────────────────────────────────┐   ┌──────────────┐
//!   │            RuntimeClient             │◄──│DeployPipeline│──► Toolchain
//!   └──────────────────┬───────────────────┘   └──────────────┘   (git, docker)
//!                      │ writes
//!          ┌───────────┴──────────┐
//!          ▼                      ▼
//!   ┌──────────────┐     ┌──────────────────┐
//!   │InstanceCache │     │ ContainerRuntime │ (Docker socket)
//!   └──────────────┘     └──────────────────┘
//! ```
//!
//! # Instance States
//!
//! ```text
//!   stopped ──start──► running ──pause──► paused
//!      ▲                  ▲                 │
//!      │                  └─────unpause─────┤
//!      └──────────────────stop──────────────┘
//! ```
//!
//! A running instance idle for one minute is paused; a paused instance idle
//! for one hour is stopped. Both thresholds are configurable.
//!
//! # Modules
//!
//! - [`activation`]: On-demand start/unpause before forwarding
//! - [`cache`]: Instance state cache
//! - [`config`]: Configuration from environment variables
//! - [`deploy`]: Build coordination and the rebuild pipeline
//! - [`error`]: Error types
//! - [`lifecycle_scheduler`]: Idle pause/stop scheduling
//! - [`runtime`]: Embeddable runtime wiring everything together
//! - [`runtime_client`]: Container engine access
//! - [`signature`]: Webhook signature verification

#![deny(missing_docs)]

/// On-demand activation of paused and stopped instances.
pub mod activation;

/// Instance state cache.
pub mod cache;

/// Configuration loaded from environment variables.
pub mod config;

/// Per-repository build coordination and the rebuild pipeline.
pub mod deploy;

/// Error types for lifecycle operations.
pub mod error;

/// Background scheduler that pauses and stops idle instances.
pub mod lifecycle_scheduler;

/// Embeddable runtime.
pub mod runtime;

/// Container engine access (Docker socket, mock).
pub mod runtime_client;

/// HMAC signatures on webhook payloads.
pub mod signature;

pub use error::{Error, Result};
