//! Transient notification queue.
//!
//! Producers enqueue messages; the presentation layer renders `visible()` or
//! subscribes to changes. Entries with a TTL are evicted by the queue's own
//! sweep task, never on read.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NotificationId(u64);

impl NotificationId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    pub kind: NotificationKind,
    pub message: String,
    pub created_at: Instant,
    /// `None` means the entry stays until dismissed.
    pub ttl: Option<Duration>,
}

impl Notification {
    pub fn expires_at(&self) -> Option<Instant> {
        self.ttl.map(|ttl| self.created_at + ttl)
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at().is_some_and(|at| now >= at)
    }
}

struct QueueState {
    entries: VecDeque<Notification>,
    next_id: u64,
}

struct QueueInner {
    state: Mutex<QueueState>,
    published: watch::Sender<Vec<Notification>>,
}

/// Ordered queue of notifications. Clones share the same queue.
#[derive(Clone)]
pub struct NotificationQueue {
    inner: Arc<QueueInner>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        let (published, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    entries: VecDeque::new(),
                    next_id: 1,
                }),
                published,
            }),
        }
    }

    pub fn enqueue(
        &self,
        kind: NotificationKind,
        message: impl Into<String>,
        ttl: Option<Duration>,
    ) -> NotificationId {
        let mut state = self.state();
        let id = NotificationId(state.next_id);
        state.next_id += 1;

        let notification = Notification {
            id,
            kind,
            message: message.into(),
            created_at: Instant::now(),
            ttl,
        };
        debug!(%id, ?kind, message = %notification.message, ?ttl, "Notification enqueued");
        state.entries.push_back(notification);
        self.publish(&state);
        id
    }

    pub fn info(&self, message: impl Into<String>, ttl: Option<Duration>) -> NotificationId {
        self.enqueue(NotificationKind::Info, message, ttl)
    }

    pub fn warning(&self, message: impl Into<String>, ttl: Option<Duration>) -> NotificationId {
        self.enqueue(NotificationKind::Warning, message, ttl)
    }

    pub fn error(&self, message: impl Into<String>, ttl: Option<Duration>) -> NotificationId {
        self.enqueue(NotificationKind::Error, message, ttl)
    }

    pub fn success(&self, message: impl Into<String>, ttl: Option<Duration>) -> NotificationId {
        self.enqueue(NotificationKind::Success, message, ttl)
    }

    /// Remove an entry. Unknown or already-evicted ids are ignored.
    pub fn dismiss(&self, id: NotificationId) -> bool {
        let mut state = self.state();
        let Some(pos) = state.entries.iter().position(|n| n.id == id) else {
            return false;
        };
        state.entries.remove(pos);
        self.publish(&state);
        true
    }

    /// Snapshot of the current entries in enqueue order.
    pub fn visible(&self) -> Vec<Notification> {
        self.state().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    /// Evict every entry past its TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let mut state = self.state();
        let before = state.entries.len();
        state.entries.retain(|n| !n.is_expired_at(now));
        let evicted = before - state.entries.len();
        if evicted > 0 {
            trace!(evicted, "Swept expired notifications");
            self.publish(&state);
        }
        evicted
    }

    /// Receiver that yields the full ordered list on every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Notification>> {
        self.inner.published.subscribe()
    }

    /// Start the periodic TTL sweep.
    pub fn spawn_sweeper(&self, every: Duration, cancel: CancellationToken) -> SweepHandle {
        let queue = self.clone();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        queue.sweep();
                    }
                }
            }
            debug!("Notification sweeper stopped");
        });

        SweepHandle { cancel, task }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, state: &QueueState) {
        self.inner
            .published
            .send_replace(state.entries.iter().cloned().collect());
    }
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner of the sweep task. Dropping it stops the sweep.
pub struct SweepHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SweepHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ============================================================================
// Tests
// ============================================================================
