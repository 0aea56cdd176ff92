//! Idle watchdog.
//!
//! `IdleWatchdog` is the bare state machine (Active -> Warned -> Expired)
//! evaluated against an idle duration. `IdleWatchdog::spawn` drives it from a
//! tokio interval and from activity notifications, publishing its state and
//! sending `WatchdogEvent`s. It never touches the session or notifications
//! itself.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::activity::ActivityMonitor;
use crate::config::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogState {
    Active,
    Warned,
    /// Terminal for the current session.
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogEvent {
    /// Entered Warned; the session ends after `remaining` more idle time.
    ExpiringSoon { remaining: Duration },
    /// Left Warned because activity was recorded.
    Resumed,
    /// Entered Expired.
    Expired,
}

#[derive(Debug, Clone)]
pub struct IdleWatchdog {
    state: WatchdogState,
    idle_threshold: Duration,
    warning_threshold: Duration,
}

impl IdleWatchdog {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            state: WatchdogState::Active,
            idle_threshold: config.idle_threshold,
            warning_threshold: config.warning_threshold,
        }
    }

    pub fn state(&self) -> WatchdogState {
        self.state
    }

    /// Advance the state machine for the observed idle time.
    pub fn evaluate(&mut self, idle: Duration) -> Option<WatchdogEvent> {
        match self.state {
            WatchdogState::Expired => None,
            state if idle >= self.idle_threshold => {
                if state == WatchdogState::Active {
                    warn!(?idle, "Idle threshold crossed without a warning tick");
                }
                self.state = WatchdogState::Expired;
                Some(WatchdogEvent::Expired)
            }
            WatchdogState::Active if idle >= self.warning_threshold => {
                self.state = WatchdogState::Warned;
                Some(WatchdogEvent::ExpiringSoon {
                    remaining: self.idle_threshold - idle,
                })
            }
            WatchdogState::Warned if idle < self.warning_threshold => {
                self.state = WatchdogState::Active;
                Some(WatchdogEvent::Resumed)
            }
            _ => None,
        }
    }

    /// Run a watchdog task against `monitor`.
    ///
    /// The task re-evaluates every `watchdog_tick_interval` and whenever
    /// activity is recorded, and stops on expiry, on cancellation, or once
    /// `events` is closed.
    pub fn spawn(
        config: &SessionConfig,
        monitor: Arc<ActivityMonitor>,
        events: mpsc::UnboundedSender<WatchdogEvent>,
        cancel: CancellationToken,
    ) -> WatchdogHandle {
        let mut machine = Self::new(config);
        let tick = config.watchdog_tick_interval;
        let (state_tx, state_rx) = watch::channel(machine.state());
        let mut activity = monitor.changes();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + tick, tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(?tick, "Idle watchdog started");

            loop {
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => {
                        debug!("Idle watchdog cancelled");
                        break;
                    }
                    changed = activity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {}
                }

                let event = machine.evaluate(monitor.idle_for());
                let state = machine.state();
                state_tx.send_if_modified(|current| {
                    let modified = *current != state;
                    *current = state;
                    modified
                });

                if let Some(event) = event {
                    debug!(?event, ?state, "Watchdog transition");
                    if events.send(event).is_err() {
                        debug!("Watchdog event receiver dropped");
                        break;
                    }
                }

                if state == WatchdogState::Expired {
                    break;
                }
            }
        });

        WatchdogHandle {
            state: state_rx,
            cancel,
            task,
        }
    }
}

/// Owner of a running watchdog task. Dropping it cancels the task.
pub struct WatchdogHandle {
    state: watch::Receiver<WatchdogState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchdogHandle {
    pub fn state(&self) -> WatchdogState {
        *self.state.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ============================================================================
// Tests
// ============================================================================
