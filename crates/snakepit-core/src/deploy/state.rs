// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-repository build state machine.
//!
//! ```text
//!              request                    request
//!   ┌──────┐ ──────────► ┌──────────┐ ──────────► ┌─────────────────────┐
//!   │ IDLE │             │ BUILDING │             │ BUILDING_WITH_QUEUED│◄─┐
//!   └──────┘ ◄────────── └──────────┘ ◄────────── └─────────────────────┘  │
//!              finish                  finish          │      request      │
//!                                     (run again)      └───────────────────┘
//! ```
//!
//! Transitions are pure; [`BuildSlot`] applies them under one short lock so
//! the check-and-set is atomic.

use tokio::sync::Mutex;

/// Build phase of one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildPhase {
    /// No build in flight.
    #[default]
    Idle,
    /// One build in flight, nothing queued.
    Building,
    /// One build in flight and at least one request arrived during it.
    BuildingWithQueued,
}

/// Result of a build request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildRequestOutcome {
    /// The caller now owns the slot and must start the build.
    Started,
    /// A build is in flight; one more run will follow it.
    Queued,
}

/// What the slot owner does after a build finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildCompletion {
    /// A request was queued: keep the slot and build again.
    RunAgain,
    /// Nothing queued: the slot is released.
    Released,
}

impl BuildPhase {
    /// Transition on an incoming build request.
    pub fn on_request(self) -> (BuildPhase, BuildRequestOutcome) {
        match self {
            BuildPhase::Idle => (BuildPhase::Building, BuildRequestOutcome::Started),
            BuildPhase::Building | BuildPhase::BuildingWithQueued => {
                (BuildPhase::BuildingWithQueued, BuildRequestOutcome::Queued)
            }
        }
    }

    /// Transition when the in-flight build finishes.
    pub fn on_finish(self) -> (BuildPhase, BuildCompletion) {
        match self {
            BuildPhase::BuildingWithQueued => (BuildPhase::Building, BuildCompletion::RunAgain),
            BuildPhase::Building | BuildPhase::Idle => {
                (BuildPhase::Idle, BuildCompletion::Released)
            }
        }
    }
}

/// Lock-protected [`BuildPhase`].
#[derive(Debug, Default)]
pub struct BuildSlot {
    phase: Mutex<BuildPhase>,
}

impl BuildSlot {
    /// Create an idle slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    pub async fn phase(&self) -> BuildPhase {
        *self.phase.lock().await
    }

    /// Apply a build request.
    pub async fn request(&self) -> BuildRequestOutcome {
        let mut phase = self.phase.lock().await;
        let (next, outcome) = phase.on_request();
        *phase = next;
        outcome
    }

    /// Apply a build completion.
    pub async fn finish(&self) -> BuildCompletion {
        let mut phase = self.phase.lock().await;
        let (next, completion) = phase.on_finish();
        *phase = next;
        completion
    }
}
