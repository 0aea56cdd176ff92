//! User activity tracking.
//!
//! The monitor keeps a single "last active" instant. The presentation layer
//! forwards interaction events as `ActivitySignal`s; only signals in the
//! configured set count as activity.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::trace;

/// Signals arriving closer together than this are folded into one update.
/// Interaction events fire in bursts (a single scroll produces dozens).
const COALESCE_WINDOW: Duration = Duration::from_millis(100);

/// Kinds of user interaction the dashboard can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySignal {
    PointerMove,
    PointerDown,
    KeyPress,
    Scroll,
    Touch,
    Focus,
}

impl ActivitySignal {
    pub const ALL: [ActivitySignal; 6] = [
        ActivitySignal::PointerMove,
        ActivitySignal::PointerDown,
        ActivitySignal::KeyPress,
        ActivitySignal::Scroll,
        ActivitySignal::Touch,
        ActivitySignal::Focus,
    ];

    /// Pointer movement, key press, scroll and touch.
    pub fn default_set() -> BTreeSet<ActivitySignal> {
        BTreeSet::from([
            ActivitySignal::PointerMove,
            ActivitySignal::KeyPress,
            ActivitySignal::Scroll,
            ActivitySignal::Touch,
        ])
    }

    /// Browser event names the presentation layer should bind for this signal.
    pub fn event_names(&self) -> &'static [&'static str] {
        match self {
            ActivitySignal::PointerMove => &["mousemove", "pointermove"],
            ActivitySignal::PointerDown => &["mousedown", "pointerdown"],
            ActivitySignal::KeyPress => &["keydown"],
            ActivitySignal::Scroll => &["scroll", "wheel"],
            ActivitySignal::Touch => &["touchstart", "touchmove"],
            ActivitySignal::Focus => &["focus"],
        }
    }
}

pub struct ActivityMonitor {
    signals: BTreeSet<ActivitySignal>,
    last_active_at: Mutex<Instant>,
    /// Bumped on every recorded update so waiters can react without polling.
    generation: watch::Sender<u64>,
}

impl ActivityMonitor {
    pub fn new(signals: BTreeSet<ActivitySignal>) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            signals,
            last_active_at: Mutex::new(Instant::now()),
            generation,
        }
    }

    pub fn signals(&self) -> &BTreeSet<ActivitySignal> {
        &self.signals
    }

    /// Record an interaction if `signal` is one of the bound signals.
    pub fn observe(&self, signal: ActivitySignal) -> bool {
        if !self.signals.contains(&signal) {
            trace!(?signal, "Ignoring unbound activity signal");
            return false;
        }
        self.record_activity()
    }

    /// Mark the user as active now. Returns false when the update was
    /// coalesced into a very recent one.
    pub fn record_activity(&self) -> bool {
        let now = Instant::now();
        {
            let mut last = self.lock();
            if now.saturating_duration_since(*last) < COALESCE_WINDOW {
                return false;
            }
            *last = now;
        }
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
        true
    }

    /// Re-initialize the idle clock unconditionally (login, "stay logged in").
    pub fn reset(&self) {
        *self.lock() = Instant::now();
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(*self.lock())
    }

    /// Receiver that changes whenever activity is recorded.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Instant> {
        // A poisoned lock still holds a valid instant
        self.last_active_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ActivityMonitor {
    fn default() -> Self {
        Self::new(ActivitySignal::default_set())
    }
}

// ============================================================================
// Tests
// ============================================================================
