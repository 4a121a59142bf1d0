// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Idle-based suspend/stop scheduler.
//!
//! Instances decay in two stages: a running instance idle for longer than the
//! pause threshold is paused, and a paused instance idle for longer than the
//! stop threshold is stopped. Each pass also works out how long to sleep so
//! the scheduler wakes exactly when the next kept instance crosses its
//! threshold, or after the fallback delay when nothing is pending.
//!
//! Instances with a request in flight are never suspended. The pass that
//! sees them counts them as not idle at all.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::InstanceState;
use crate::runtime_client::RuntimeClient;

/// Lifecycle scheduler configuration.
#[derive(Debug, Clone)]
pub struct LifecycleSchedulerConfig {
    /// Idle time after which a running instance is paused
    pub pause_after: Duration,
    /// Idle time after which a paused instance is stopped
    pub stop_after: Duration,
    /// Sleep used when no kept instance constrains the next pass
    pub fallback_delay: Duration,
}

impl Default for LifecycleSchedulerConfig {
    fn default() -> Self {
        Self {
            pause_after: Duration::from_secs(60),
            stop_after: Duration::from_secs(3600),
            fallback_delay: Duration::from_secs(3600),
        }
    }
}

/// What a pass decides for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Not running; the scheduler leaves it alone.
    Ignore,
    /// Below its threshold; becomes due after `due_in`.
    Keep {
        /// Time until the instance crosses its threshold.
        due_in: Duration,
    },
    /// Running, unpaused, and idle past the pause threshold.
    PauseDue,
    /// Paused and idle past the stop threshold.
    StopDue,
}

/// Classify one instance at `now`.
pub fn classify(state: &InstanceState, now: Instant, config: &LifecycleSchedulerConfig) -> Verdict {
    if !state.running {
        return Verdict::Ignore;
    }

    let (threshold, due) = if state.paused {
        (config.stop_after, Verdict::StopDue)
    } else {
        (config.pause_after, Verdict::PauseDue)
    };

    if state.is_busy() {
        return Verdict::Keep { due_in: threshold };
    }

    // None means never used: infinitely idle, always due
    match state.last_used.idle_for(now) {
        Some(idle) if idle < threshold => Verdict::Keep {
            due_in: threshold - idle,
        },
        _ => due,
    }
}

/// Outcome of classifying every instance in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecyclePlan {
    /// Paused instances to stop.
    pub to_stop: Vec<String>,
    /// Running instances to pause.
    pub to_pause: Vec<String>,
    /// How long to sleep before the next pass.
    pub next_delay: Duration,
}

/// Build the plan for a set of instances at `now`.
pub fn plan<'a, I>(instances: I, now: Instant, config: &LifecycleSchedulerConfig) -> LifecyclePlan
where
    I: IntoIterator<Item = (&'a str, &'a InstanceState)>,
{
    let mut to_stop = Vec::new();
    let mut to_pause = Vec::new();
    let mut next_delay = config.fallback_delay;

    for (id, state) in instances {
        match classify(state, now, config) {
            Verdict::Ignore => {}
            Verdict::Keep { due_in } => next_delay = next_delay.min(due_in),
            Verdict::PauseDue => to_pause.push(id.to_string()),
            Verdict::StopDue => to_stop.push(id.to_string()),
        }
    }

    LifecyclePlan {
        to_stop,
        to_pause,
        next_delay,
    }
}

/// Handle for cutting the scheduler's sleep short.
///
/// The scheduler publishes when its next pass is due. Recording usage only
/// wakes it when the freshly used instance would become due before that.
#[derive(Debug)]
pub struct SchedulerWake {
    notify: Notify,
    next_pass: Mutex<Option<Instant>>,
    pause_after: Duration,
}

impl SchedulerWake {
    /// Create a handle for a scheduler with the given pause threshold.
    pub fn new(pause_after: Duration) -> Self {
        Self {
            notify: Notify::new(),
            next_pass: Mutex::new(None),
            pause_after,
        }
    }

    /// Trigger a pass now.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Wait until [`wake`](Self::wake) is called. A wake issued while nobody
    /// was waiting is kept for the next caller.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// When the next pass is due, or `None` while a pass is running.
    pub async fn next_pass(&self) -> Option<Instant> {
        *self.next_pass.lock().await
    }

    /// Publish when the next pass is due.
    pub async fn set_next_pass(&self, next_pass: Option<Instant>) {
        *self.next_pass.lock().await = next_pass;
    }

    /// An instance was used at `at`. Wakes the scheduler if the instance
    /// would become due before the pass currently scheduled, and returns
    /// whether it did.
    pub async fn usage_recorded(&self, at: Instant) -> bool {
        let deadline = at + self.pause_after;
        let earlier = match *self.next_pass.lock().await {
            Some(next_pass) => deadline < next_pass,
            // A pass is running and may have missed this stamp
            None => true,
        };
        if earlier {
            self.wake();
        }
        earlier
    }
}

/// Lifecycle scheduler that runs as a background task.
pub struct LifecycleScheduler {
    client: Arc<RuntimeClient>,
    config: LifecycleSchedulerConfig,
    shutdown: Arc<Notify>,
    wake: Arc<SchedulerWake>,
}

impl LifecycleScheduler {
    /// Create a new lifecycle scheduler.
    pub fn new(client: Arc<RuntimeClient>, config: LifecycleSchedulerConfig) -> Self {
        let wake = Arc::new(SchedulerWake::new(config.pause_after));
        Self {
            client,
            config,
            shutdown: Arc::new(Notify::new()),
            wake,
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Get a handle that cuts the current sleep short and triggers a pass.
    pub fn wake_handle(&self) -> Arc<SchedulerWake> {
        self.wake.clone()
    }

    /// Scheduler configuration.
    pub fn config(&self) -> &LifecycleSchedulerConfig {
        &self.config
    }

    /// Run the scheduler loop: pass, sleep, repeat.
    pub async fn run(self) {
        info!(
            pause_after_secs = self.config.pause_after.as_secs(),
            stop_after_secs = self.config.stop_after.as_secs(),
            "Lifecycle scheduler started"
        );

        loop {
            self.wake.set_next_pass(None).await;
            let delay = self.run_pass().await;
            self.wake.set_next_pass(Some(Instant::now() + delay)).await;
            debug!(
                delay_ms = delay.as_millis() as u64,
                "Next lifecycle pass scheduled"
            );

            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Lifecycle scheduler shutting down");
                    break;
                }
                _ = self.wake.notified() => {
                    debug!("Lifecycle scheduler woken early");
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Run one pass and return the delay until the next one.
    ///
    /// Stops are applied before pauses. A failure on one instance is logged
    /// and the rest of the pass continues.
    pub async fn run_pass(&self) -> Duration {
        let now = Instant::now();
        let mut snapshot = Vec::new();
        self.client
            .cache()
            .for_each(|id, state| {
                snapshot.push((id.to_string(), state.clone()));
                ControlFlow::Continue(())
            })
            .await;

        let plan = plan(
            snapshot.iter().map(|(id, state)| (id.as_str(), state)),
            now,
            &self.config,
        );

        for id in &plan.to_stop {
            match self.client.stop(id).await {
                Ok(()) => info!(instance_id = %id, "Stopped idle container"),
                Err(e) => warn!(instance_id = %id, error = %e, "Failed to stop idle container"),
            }
        }

        for id in &plan.to_pause {
            match self.client.pause(id).await {
                Ok(()) => info!(instance_id = %id, "Paused idle container"),
                Err(e) => warn!(instance_id = %id, error = %e, "Failed to pause idle container"),
            }
        }

        plan.next_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LastUsed;

    fn used(now: Instant, idle: Duration, paused: bool) -> InstanceState {
        InstanceState {
            running: true,
            paused,
            address: "172.17.0.2".to_string(),
            last_used: LastUsed::At(now - idle),
            last_refresh: Some(now),
            in_flight: 0,
        }
    }

    #[test]
    fn test_config_default() {
        let config = LifecycleSchedulerConfig::default();
        assert_eq!(config.pause_after, Duration::from_secs(60));
        assert_eq!(config.stop_after, Duration::from_secs(3600));
        assert_eq!(config.fallback_delay, Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_classify_thresholds() {
        tokio::time::advance(Duration::from_secs(3 * 3600)).await;
        let now = Instant::now();
        let config = LifecycleSchedulerConfig::default();

        assert_eq!(
            classify(&used(now, Duration::from_secs(30), false), now, &config),
            Verdict::Keep {
                due_in: Duration::from_secs(30)
            }
        );
        assert_eq!(
            classify(&used(now, Duration::from_secs(90), false), now, &config),
            Verdict::PauseDue
        );
        assert_eq!(
            classify(&used(now, Duration::from_secs(30), true), now, &config),
            Verdict::Keep {
                due_in: Duration::from_secs(3600 - 30)
            }
        );
        let long_idle = Duration::from_secs(2 * 3600);
        assert_eq!(
            classify(&used(now, long_idle, true), now, &config),
            Verdict::StopDue
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_classify_exact_threshold_is_due() {
        tokio::time::advance(Duration::from_secs(120)).await;
        let now = Instant::now();
        let config = LifecycleSchedulerConfig::default();

        assert_eq!(
            classify(&used(now, Duration::from_secs(60), false), now, &config),
            Verdict::PauseDue
        );
    }

    #[test]
    fn test_classify_never_used_is_due() {
        let now = Instant::now();
        let config = LifecycleSchedulerConfig::default();
        let mut state = InstanceState {
            running: true,
            ..Default::default()
        };
        assert_eq!(classify(&state, now, &config), Verdict::PauseDue);
        state.paused = true;
        assert_eq!(classify(&state, now, &config), Verdict::StopDue);
    }

    #[test]
    fn test_classify_busy_instance_is_kept() {
        let now = Instant::now();
        let config = LifecycleSchedulerConfig::default();
        let mut state = InstanceState {
            running: true,
            in_flight: 1,
            ..Default::default()
        };
        assert_eq!(
            classify(&state, now, &config),
            Verdict::Keep {
                due_in: config.pause_after
            }
        );
        state.paused = true;
        assert_eq!(
            classify(&state, now, &config),
            Verdict::Keep {
                due_in: config.stop_after
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_usage_wakes_only_when_due_before_next_pass() {
        let wake = SchedulerWake::new(Duration::from_secs(60));
        let now = Instant::now();

        for (next_pass_in, wakes) in [(30, false), (60, false), (3600, true)] {
            let next_pass = now + Duration::from_secs(next_pass_in);
            wake.set_next_pass(Some(next_pass)).await;
            assert_eq!(wake.usage_recorded(now).await, wakes, "{next_pass_in}s");
        }
    }

    #[tokio::test]
    async fn test_usage_during_pass_wakes() {
        let wake = SchedulerWake::new(Duration::from_secs(60));
        assert!(wake.usage_recorded(Instant::now()).await);
        // The permit is kept until the loop waits again
        tokio::time::timeout(Duration::from_secs(1), wake.notified())
            .await
            .unwrap();
    }

    #[test]
    fn test_classify_ignores_stopped() {
        let now = Instant::now();
        let config = LifecycleSchedulerConfig::default();
        let state = InstanceState {
            running: false,
            paused: true,
            ..Default::default()
        };
        assert_eq!(classify(&state, now, &config), Verdict::Ignore);
    }
}
