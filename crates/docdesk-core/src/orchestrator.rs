//! Session orchestration.
//!
//! `SessionOrchestrator` is built once at startup from the credential store,
//! activity monitor and notification queue. It is the only component that
//! acts across their boundaries:
//! - idle watchdog warnings become a Warning notification and the banner flag
//! - idle expiry and terminal auth errors end the session exactly once
//! - login re-arms a fresh watchdog and the single-shot logout guard
//! - the token is refreshed ahead of its expiry, and a token that lapses
//!   anyway ends the session like any other auth failure
//!
//! Dropping the orchestrator (or calling `shutdown`) cancels every timer it
//! started and detaches any in-flight refresh.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::activity::{ActivityMonitor, ActivitySignal};
use crate::api::{AuthError, LoginCredentials};
use crate::auth::{CredentialStore, Session};
use crate::config::{ConfigError, SessionConfig};
use crate::notifications::{
    Notification, NotificationId, NotificationKind, NotificationQueue, SweepHandle,
};
use crate::watchdog::{IdleWatchdog, WatchdogEvent, WatchdogHandle, WatchdogState};

const EXPIRING_MESSAGE: &str = "Your session is expiring due to inactivity";
const INACTIVITY_MESSAGE: &str = "Logged out due to inactivity";
const AUTH_FAILURE_MESSAGE: &str = "Your session has ended. Please sign in again.";
const SIGNED_OUT_MESSAGE: &str = "Signed out";

/// How long short-lived confirmations (sign in/out, login errors) stay up.
const NOTICE_TTL: Duration = Duration::from_secs(5);

/// Buffered session events per subscriber before the oldest are dropped.
const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    Inactivity,
    AuthFailure,
    UserRequested,
}

impl LogoutReason {
    fn notification(&self) -> (NotificationKind, &'static str, Option<Duration>) {
        match self {
            LogoutReason::Inactivity => (NotificationKind::Info, INACTIVITY_MESSAGE, None),
            LogoutReason::AuthFailure => (NotificationKind::Info, AUTH_FAILURE_MESSAGE, None),
            LogoutReason::UserRequested => {
                (NotificationKind::Success, SIGNED_OUT_MESSAGE, Some(NOTICE_TTL))
            }
        }
    }
}

/// Session transitions for downstream listeners such as navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { username: String },
    ExpiringSoon { remaining: Duration },
    LoggedOut { reason: LogoutReason },
}

struct Lifecycle {
    /// Bumped whenever a watchdog is armed or disarmed; events tagged with
    /// an older generation are ignored.
    generation: u64,
    watchdog: Option<WatchdogHandle>,
    warning: Option<NotificationId>,
    sweeper: Option<SweepHandle>,
}

/// Timer deadlines for one token, fixed when the token is first seen.
struct TokenDeadlines {
    token: String,
    refresh_at: Instant,
    expiry: Instant,
    refreshed: bool,
}

impl TokenDeadlines {
    /// Keep `previous` while the token is unchanged, otherwise schedule the
    /// new one. None once the session has no token.
    fn resolve(
        previous: Option<TokenDeadlines>,
        session: &Session,
        config: &SessionConfig,
    ) -> Option<Self> {
        let token = session.token.as_deref()?;
        let expires_at = session.expires_at?;
        if let Some(previous) = previous.filter(|p| p.token == token) {
            return Some(previous);
        }

        let now = Instant::now();
        let remaining = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let lifetime = session
            .issued_at
            .and_then(|issued| (expires_at - issued).to_std().ok())
            .unwrap_or(remaining);
        let lead = config.refresh_buffer.min(lifetime / 2);

        Some(Self {
            token: token.to_string(),
            refresh_at: now + remaining.saturating_sub(lead),
            expiry: now + remaining,
            refreshed: false,
        })
    }
}

struct OrchestratorInner {
    config: SessionConfig,
    store: Arc<CredentialStore>,
    monitor: Arc<ActivityMonitor>,
    queue: NotificationQueue,
    cancel: CancellationToken,
    /// Single-shot logout guard. Set when a session starts; the first
    /// logout trigger to swap it back wins.
    session_live: AtomicBool,
    banner: watch::Sender<bool>,
    events: broadcast::Sender<SessionEvent>,
    lifecycle: Mutex<Lifecycle>,
}

pub struct SessionOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl SessionOrchestrator {
    pub fn new(
        config: SessionConfig,
        store: Arc<CredentialStore>,
        monitor: Arc<ActivityMonitor>,
        queue: NotificationQueue,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (banner, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(OrchestratorInner {
                config,
                store,
                monitor,
                queue,
                cancel: CancellationToken::new(),
                session_live: AtomicBool::new(false),
                banner,
                events,
                lifecycle: Mutex::new(Lifecycle {
                    generation: 0,
                    watchdog: None,
                    warning: None,
                    sweeper: None,
                }),
            }),
        })
    }

    /// Start the notification sweep and, if the store already holds a live
    /// session, the idle watchdog. Must run inside a tokio runtime.
    pub fn start(&self) {
        {
            let mut lifecycle = self.inner.lifecycle();
            if lifecycle.sweeper.is_none() {
                lifecycle.sweeper = Some(self.inner.queue.spawn_sweeper(
                    self.inner.config.notification_sweep_interval,
                    self.inner.cancel.child_token(),
                ));
            }
        }

        if self.inner.store.is_authenticated() {
            debug!("Resuming persisted session");
            self.inner.arm();
        }
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> Result<Session, AuthError> {
        match self.inner.store.login(credentials).await {
            Ok(session) => {
                self.inner.arm();
                self.inner.queue.success(
                    format!("Signed in as {}", credentials.username),
                    Some(NOTICE_TTL),
                );
                let _ = self.inner.events.send(SessionEvent::LoggedIn {
                    username: credentials.username.clone(),
                });
                Ok(session)
            }
            Err(err) => {
                warn!(error = %err, "Login failed");
                if err.is_terminal() {
                    self.inner.queue.error(err.user_message(), Some(NOTICE_TTL));
                }
                Err(err)
            }
        }
    }

    /// Refresh the token; a terminal failure ends the session.
    pub async fn refresh(&self) -> Result<Session, AuthError> {
        let result = self.inner.store.refresh().await;
        if let Err(ref err) = result {
            self.report_auth_error(err);
        }
        result
    }

    /// Route an auth failure seen anywhere in the app. Returns whether this
    /// call performed the logout.
    pub fn report_auth_error(&self, err: &AuthError) -> bool {
        if !err.is_terminal() {
            debug!(error = %err, "Ignoring non-terminal auth error");
            return false;
        }
        warn!(error = %err, "Auth failure, ending session");
        self.inner.end_session(LogoutReason::AuthFailure)
    }

    /// Explicit sign-out by the user.
    pub fn logout(&self) -> bool {
        self.inner.end_session(LogoutReason::UserRequested)
    }

    /// The user chose to stay signed in from the expiring-soon prompt.
    pub fn stay_logged_in(&self) -> bool {
        if !self.inner.session_live.load(Ordering::SeqCst)
            || self.watchdog_state() == Some(WatchdogState::Expired)
        {
            return false;
        }
        self.inner.monitor.reset();
        self.inner.hide_warning();
        true
    }

    /// Forward an interaction from the presentation layer.
    pub fn record_signal(&self, signal: ActivitySignal) -> bool {
        self.inner.monitor.observe(signal)
    }

    /// Signals the presentation layer should bind, with their event names.
    pub fn signal_bindings(&self) -> BTreeMap<ActivitySignal, &'static [&'static str]> {
        self.inner
            .monitor
            .signals()
            .iter()
            .map(|signal| (*signal, signal.event_names()))
            .collect()
    }

    pub fn dismiss(&self, id: NotificationId) -> bool {
        self.inner.queue.dismiss(id)
    }

    pub fn current_session(&self) -> Session {
        self.inner.store.current()
    }

    pub fn visible_notifications(&self) -> Vec<Notification> {
        self.inner.queue.visible()
    }

    pub fn watchdog_state(&self) -> Option<WatchdogState> {
        self.inner.lifecycle().watchdog.as_ref().map(|w| w.state())
    }

    pub fn session(&self) -> watch::Receiver<Session> {
        self.inner.store.subscribe()
    }

    pub fn notifications(&self) -> watch::Receiver<Vec<Notification>> {
        self.inner.queue.subscribe()
    }

    /// True while the expiring-soon banner should be shown.
    pub fn expiring_banner(&self) -> watch::Receiver<bool> {
        self.inner.banner.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Cancel all timers and detach in-flight auth calls. Final.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl OrchestratorInner {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a fresh session lifetime: reset the idle clock, re-arm the
    /// logout guard and replace the watchdog.
    fn arm(self: &Arc<Self>) {
        self.monitor.reset();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = self.cancel.child_token();
        let generation = {
            let mut lifecycle = self.lifecycle();
            lifecycle.generation += 1;
            // Replacing the handle drops and cancels the previous watchdog
            lifecycle.watchdog = Some(IdleWatchdog::spawn(
                &self.config,
                Arc::clone(&self.monitor),
                tx,
                token.clone(),
            ));
            if let Some(id) = lifecycle.warning.take() {
                self.queue.dismiss(id);
            }
            lifecycle.generation
        };
        self.banner.send_replace(false);
        self.session_live.store(true, Ordering::SeqCst);
        debug!(generation, "Idle watchdog armed");

        let inner = Arc::clone(self);
        let events_cancel = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = events_cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => inner.handle_watchdog_event(generation, event),
                        None => break,
                    },
                }
            }
        });

        tokio::spawn(Arc::clone(self).follow_token_lifetime(generation, token));
    }

    fn handle_watchdog_event(&self, generation: u64, event: WatchdogEvent) {
        let mut lifecycle = self.lifecycle();
        if lifecycle.generation != generation {
            debug!(generation, ?event, "Ignoring event from a retired watchdog");
            return;
        }

        match event {
            WatchdogEvent::ExpiringSoon { remaining } => {
                // end_session drops the guard before it takes this lock
                if !self.session_live.load(Ordering::SeqCst) {
                    return;
                }
                let id = self
                    .queue
                    .warning(EXPIRING_MESSAGE, Some(self.config.warning_threshold));
                if let Some(previous) = lifecycle.warning.replace(id) {
                    self.queue.dismiss(previous);
                }
                self.banner.send_replace(true);
                drop(lifecycle);

                info!(?remaining, "Session expiring soon");
                let _ = self.events.send(SessionEvent::ExpiringSoon { remaining });
            }
            WatchdogEvent::Resumed => {
                drop(lifecycle);
                debug!("Activity resumed before expiry");
                self.hide_warning();
            }
            WatchdogEvent::Expired => {
                drop(lifecycle);
                self.end_session(LogoutReason::Inactivity);
            }
        }
    }

    /// Track the server-declared token lifetime for one armed session.
    ///
    /// Refreshes once per token, `refresh_buffer` ahead of expiry (or halfway
    /// through a shorter lifetime), and ends the session when the token
    /// lapses without being replaced.
    async fn follow_token_lifetime(self: Arc<Self>, generation: u64, cancel: CancellationToken) {
        let mut sessions = self.store.subscribe();
        let mut deadlines: Option<TokenDeadlines> = None;

        loop {
            let session = sessions.borrow_and_update().clone();
            let Some(current) = TokenDeadlines::resolve(deadlines.take(), &session, &self.config)
            else {
                return;
            };
            let expiry = current.expiry;
            let refresh_at = current.refresh_at;
            let refresh_due = !current.refreshed;
            deadlines = Some(current);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = sleep_until(expiry) => {
                    self.expire_token(generation);
                    return;
                }
                changed = sessions.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = sleep_until(refresh_at), if refresh_due => {
                    if let Some(current) = deadlines.as_mut() {
                        current.refreshed = true;
                    }
                    self.refresh_ahead_of_expiry().await;
                }
            }
        }
    }

    async fn refresh_ahead_of_expiry(&self) {
        debug!("Refreshing token ahead of expiry");
        match self.store.refresh().await {
            Ok(session) => debug!(expires_at = ?session.expires_at, "Token refreshed"),
            Err(err @ (AuthError::Network(_) | AuthError::RateLimited | AuthError::Server(_))) => {
                warn!(error = %err, "Token refresh failed, keeping current token until expiry");
            }
            Err(err) if err.is_terminal() => {
                warn!(error = %err, "Token refresh rejected, ending session");
                self.end_session(LogoutReason::AuthFailure);
            }
            Err(_) => {}
        }
    }

    fn expire_token(&self, generation: u64) {
        if self.lifecycle().generation != generation {
            return;
        }
        warn!("Session token expired");
        self.end_session(LogoutReason::AuthFailure);
    }

    fn hide_warning(&self) {
        let warning = self.lifecycle().warning.take();
        if let Some(id) = warning {
            self.queue.dismiss(id);
        }
        self.banner.send_replace(false);
    }

    /// The one logout path. Only the first trigger per session lifetime
    /// clears the store and notifies; the rest return false.
    fn end_session(&self, reason: LogoutReason) -> bool {
        if !self.session_live.swap(false, Ordering::SeqCst) {
            debug!(?reason, "Session already ended");
            return false;
        }

        {
            let mut lifecycle = self.lifecycle();
            lifecycle.generation += 1;
            lifecycle.watchdog = None;
            if let Some(id) = lifecycle.warning.take() {
                self.queue.dismiss(id);
            }
        }
        self.banner.send_replace(false);
        self.store.clear();

        let (kind, message, ttl) = reason.notification();
        self.queue.enqueue(kind, message, ttl);
        info!(?reason, "Session ended");
        let _ = self.events.send(SessionEvent::LoggedOut { reason });
        true
    }

    fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.store.invalidate_pending();

        let mut lifecycle = self.lifecycle();
        lifecycle.generation += 1;
        lifecycle.watchdog = None;
        lifecycle.sweeper = None;
        debug!("Session orchestrator shut down");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryStorage, SessionData, SessionStatus, SessionStorage};
    use crate::testing::{fast_config, CountingStorage, MockBackend};
    use chrono::Utc;
    use tokio::time::sleep;

    struct Harness {
        orchestrator: Arc<SessionOrchestrator>,
        backend: Arc<MockBackend>,
        storage: CountingStorage,
    }

    fn harness_with(backend: MockBackend, storage: CountingStorage) -> Harness {
        harness_with_config(fast_config(), backend, storage)
    }

    fn harness_with_config(
        config: SessionConfig,
        backend: MockBackend,
        storage: CountingStorage,
    ) -> Harness {
        let backend = Arc::new(backend);
        let store = Arc::new(CredentialStore::new(
            backend.clone(),
            storage.clone(),
            config.refresh_buffer,
        ));
        store.restore();
        let monitor = Arc::new(ActivityMonitor::new(config.activity_signals.clone()));
        let orchestrator =
            SessionOrchestrator::new(config, store, monitor, NotificationQueue::new()).unwrap();
        orchestrator.start();

        Harness {
            orchestrator: Arc::new(orchestrator),
            backend,
            storage,
        }
    }

    fn harness() -> Harness {
        harness_with(MockBackend::new(), CountingStorage::default())
    }

    fn creds() -> LoginCredentials {
        LoginCredentials::new("records-admin", "correct horse")
    }

    fn count(orchestrator: &SessionOrchestrator, kind: NotificationKind) -> usize {
        orchestrator
            .visible_notifications()
            .iter()
            .filter(|n| n.kind == kind)
            .count()
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Idle limits far beyond the token lifetimes used with it.
    fn patient_config() -> SessionConfig {
        SessionConfig {
            idle_threshold: Duration::from_secs(60),
            warning_threshold: Duration::from_secs(40),
            watchdog_tick_interval: Duration::from_secs(1),
            ..fast_config()
        }
    }

    fn short_token_harness() -> Harness {
        harness_with_config(
            patient_config(),
            MockBackend::with_lifetime(Duration::from_secs(10)),
            CountingStorage::default(),
        )
    }

    // -------------------------------------------------------------------------
    // Idle scenarios
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_idle_warning_then_forced_logout() {
        let h = harness();
        let o = &h.orchestrator;
        o.login(&creds()).await.unwrap();
        let banner = o.expiring_banner();

        sleep(ms(650)).await;
        assert_eq!(o.watchdog_state(), Some(WatchdogState::Warned));
        assert_eq!(count(o, NotificationKind::Warning), 1);
        assert!(*banner.borrow());
        assert!(o.current_session().is_authenticated());

        sleep(ms(400)).await;
        assert_eq!(o.watchdog_state(), None);
        assert_eq!(o.current_session().status, SessionStatus::Anonymous);
        assert_eq!(count(o, NotificationKind::Info), 1);
        assert_eq!(h.storage.clears(), 1);
        assert!(!*banner.borrow());
        assert!(h.storage.inner.load().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_while_warned_prevents_expiry() {
        let h = harness();
        let o = &h.orchestrator;
        o.login(&creds()).await.unwrap();

        sleep(ms(650)).await;
        assert_eq!(o.watchdog_state(), Some(WatchdogState::Warned));

        assert!(o.record_signal(ActivitySignal::KeyPress));
        sleep(ms(1)).await;
        assert_eq!(o.watchdog_state(), Some(WatchdogState::Active));
        assert!(!*o.expiring_banner().borrow());
        assert_eq!(count(o, NotificationKind::Warning), 0);

        // Past the point the original threshold would have fired
        sleep(ms(450)).await;
        assert_eq!(o.watchdog_state(), Some(WatchdogState::Active));
        assert!(o.current_session().is_authenticated());
        assert_eq!(count(o, NotificationKind::Info), 0);
        assert_eq!(h.storage.clears(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbound_signal_does_not_keep_session_alive() {
        let h = harness();
        let o = &h.orchestrator;
        o.login(&creds()).await.unwrap();

        sleep(ms(650)).await;
        assert!(!o.record_signal(ActivitySignal::Focus));

        sleep(ms(400)).await;
        assert_eq!(o.current_session().status, SessionStatus::Anonymous);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stay_logged_in_hides_banner_and_warning() {
        let h = harness();
        let o = &h.orchestrator;
        o.login(&creds()).await.unwrap();

        sleep(ms(650)).await;
        assert!(o.stay_logged_in());
        assert!(!*o.expiring_banner().borrow());
        assert_eq!(count(o, NotificationKind::Warning), 0);

        sleep(ms(500)).await;
        assert!(o.current_session().is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stay_refused_once_watchdog_has_expired() {
        let h = harness();
        let o = &h.orchestrator;
        o.login(&creds()).await.unwrap();

        // Retire the generation so the Expired event stays unhandled
        o.inner.lifecycle().generation += 1;
        sleep(ms(1100)).await;
        assert_eq!(o.watchdog_state(), Some(WatchdogState::Expired));
        assert!(o.inner.session_live.load(Ordering::SeqCst));

        assert!(!o.stay_logged_in());
    }

    #[tokio::test(start_paused = true)]
    async fn test_relogin_after_expiry_rearms_everything() {
        let h = harness();
        let o = &h.orchestrator;
        o.login(&creds()).await.unwrap();
        sleep(ms(1100)).await;
        assert_eq!(o.current_session().status, SessionStatus::Anonymous);
        assert!(!o.stay_logged_in());

        o.login(&creds()).await.unwrap();
        assert_eq!(o.watchdog_state(), Some(WatchdogState::Active));

        sleep(ms(1100)).await;
        assert_eq!(o.current_session().status, SessionStatus::Anonymous);
        assert_eq!(count(o, NotificationKind::Info), 2);
        assert_eq!(h.storage.clears(), 2);
        assert_eq!(h.backend.login_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_arms_watchdog_for_restored_session() {
        let now = Utc::now();
        let storage = CountingStorage::default();
        storage
            .save(&SessionData {
                token: "seeded".to_string(),
                username: Some("records-admin".to_string()),
                issued_at: now,
                expires_at: now + chrono::Duration::hours(1),
            })
            .unwrap();

        let h = harness_with(MockBackend::new(), storage);
        assert_eq!(h.orchestrator.watchdog_state(), Some(WatchdogState::Active));

        sleep(ms(1100)).await;
        assert_eq!(
            h.orchestrator.current_session().status,
            SessionStatus::Anonymous
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_anonymous_start_has_no_watchdog() {
        let h = harness();
        assert_eq!(h.orchestrator.watchdog_state(), None);
        sleep(ms(2000)).await;
        assert!(h.orchestrator.visible_notifications().is_empty());
    }

    // -------------------------------------------------------------------------
    // Token lifetime
    // -------------------------------------------------------------------------

    fn session_for(token: &str, lifetime: chrono::Duration) -> Session {
        let now = Utc::now();
        let data = SessionData {
            token: token.to_string(),
            username: None,
            issued_at: now,
            expires_at: now + lifetime,
        };
        Session::from_data(Some(&data), Duration::from_secs(300), now)
    }

    #[test]
    fn test_token_deadlines_follow_token_changes() {
        let config = SessionConfig::default();
        let first = session_for("token-1", chrono::Duration::minutes(30));

        let mut deadlines = TokenDeadlines::resolve(None, &first, &config).unwrap();
        assert_eq!(deadlines.expiry - deadlines.refresh_at, Duration::from_secs(300));
        deadlines.refreshed = true;

        // Same token keeps its schedule
        let kept = TokenDeadlines::resolve(Some(deadlines), &first, &config).unwrap();
        assert!(kept.refreshed);

        // Short lifetimes refresh halfway through
        let short = session_for("token-2", chrono::Duration::seconds(10));
        let renewed = TokenDeadlines::resolve(Some(kept), &short, &config).unwrap();
        assert!(!renewed.refreshed);
        assert_eq!(renewed.expiry - renewed.refresh_at, Duration::from_secs(5));

        assert!(TokenDeadlines::resolve(Some(renewed), &Session::anonymous(), &config).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_refreshed_ahead_of_expiry() {
        let h = short_token_harness();
        let o = &h.orchestrator;
        o.login(&creds()).await.unwrap();

        // Each 10s token is renewed halfway through its lifetime
        sleep(ms(22_000)).await;
        assert!(h.backend.refresh_calls() >= 3);
        assert!(o.current_session().is_authenticated());
        assert_eq!(h.storage.clears(), 0);
        assert_eq!(count(o, NotificationKind::Info), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lapsed_token_ends_session_with_notice() {
        let h = short_token_harness();
        let o = &h.orchestrator;
        let mut events = o.events();
        o.login(&creds()).await.unwrap();
        h.backend.fail_refresh(AuthError::Network("connection reset".into()));

        // Transient refresh failure keeps the token until it runs out
        sleep(ms(6_000)).await;
        assert_eq!(h.backend.refresh_calls(), 1);
        assert!(o.current_session().is_authenticated());

        sleep(ms(4_100)).await;
        assert_eq!(o.current_session().status, SessionStatus::Anonymous);
        assert!(o.current_session().token.is_none());
        assert_eq!(o.watchdog_state(), None);
        assert_eq!(h.storage.clears(), 1);
        assert!(h.storage.inner.load().unwrap().is_none());

        let notices: Vec<_> = o
            .visible_notifications()
            .into_iter()
            .filter(|n| n.kind == NotificationKind::Info)
            .collect();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].message, AUTH_FAILURE_MESSAGE);

        let _ = events.try_recv(); // LoggedIn
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::LoggedOut {
                reason: LogoutReason::AuthFailure
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_background_refresh_ends_session() {
        let h = short_token_harness();
        let o = &h.orchestrator;
        o.login(&creds()).await.unwrap();
        h.backend.fail_refresh(AuthError::ExpiredOnServer);

        sleep(ms(5_100)).await;
        assert_eq!(h.backend.refresh_calls(), 1);
        assert_eq!(o.current_session().status, SessionStatus::Anonymous);
        assert_eq!(count(o, NotificationKind::Info), 1);

        // The original expiry instant passes without a second notice
        sleep(ms(10_000)).await;
        assert_eq!(count(o, NotificationKind::Info), 1);
        assert_eq!(h.storage.clears(), 1);
    }

    // -------------------------------------------------------------------------
    // Auth failures and the single-shot guard
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_warning_after_session_end_is_dropped() {
        let h = harness();
        let o = &h.orchestrator;
        o.login(&creds()).await.unwrap();
        let generation = o.inner.lifecycle().generation;

        // A warning racing the logout still carries the live generation
        o.inner.session_live.store(false, Ordering::SeqCst);
        o.inner.handle_watchdog_event(
            generation,
            WatchdogEvent::ExpiringSoon { remaining: ms(400) },
        );

        assert_eq!(count(o, NotificationKind::Warning), 0);
        assert!(!*o.expiring_banner().borrow());
        assert!(o.inner.lifecycle().warning.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_triggers_clear_exactly_once() {
        let h = harness();
        let o = Arc::clone(&h.orchestrator);
        o.login(&creds()).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let o = Arc::clone(&o);
            tasks.push(tokio::spawn(async move {
                if i % 4 == 0 {
                    o.logout()
                } else {
                    o.report_auth_error(&AuthError::ExpiredOnServer)
                }
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(h.storage.clears(), 1);
        let logout_notices = o
            .visible_notifications()
            .iter()
            .filter(|n| n.kind == NotificationKind::Info || n.message == SIGNED_OUT_MESSAGE)
            .count();
        assert_eq!(logout_notices, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_ends_session_once() {
        let h = harness_with(
            MockBackend::with_delay(ms(100)),
            CountingStorage::default(),
        );
        let o = &h.orchestrator;
        o.login(&creds()).await.unwrap();
        h.backend.fail_refresh(AuthError::ExpiredOnServer);

        let (a, b, c) = tokio::join!(o.refresh(), o.refresh(), o.refresh());

        assert_eq!(h.backend.refresh_calls(), 1);
        for result in [a, b, c] {
            assert_eq!(result, Err(AuthError::ExpiredOnServer));
        }
        assert_eq!(o.current_session().status, SessionStatus::Anonymous);
        assert_eq!(h.storage.clears(), 1);
        assert_eq!(count(o, NotificationKind::Info), 1);

        // Idle expiry later in the same lifetime adds nothing
        sleep(ms(2000)).await;
        assert_eq!(count(o, NotificationKind::Info), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_error_is_not_a_logout() {
        let h = harness();
        let o = &h.orchestrator;
        o.login(&creds()).await.unwrap();

        assert!(!o.report_auth_error(&AuthError::Superseded));
        assert!(o.current_session().is_authenticated());
        assert_eq!(h.storage.clears(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_while_anonymous_is_silent() {
        let h = harness();
        assert!(!h.orchestrator.report_auth_error(&AuthError::ExpiredOnServer));
        assert!(h.orchestrator.visible_notifications().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_login_shows_error_and_stays_anonymous() {
        let backend = MockBackend::new();
        backend.fail_login(AuthError::CredentialsRejected("bad".into()));
        let h = harness_with(backend, CountingStorage::default());
        let o = &h.orchestrator;

        assert!(o.login(&creds()).await.is_err());
        assert_eq!(o.current_session().status, SessionStatus::Anonymous);
        assert_eq!(o.watchdog_state(), None);

        let visible = o.visible_notifications();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].kind, NotificationKind::Error);
        assert_eq!(visible[0].message, "Invalid username or password");
    }

    // -------------------------------------------------------------------------
    // Events and teardown
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_downstream_events() {
        let h = harness();
        let o = &h.orchestrator;
        let mut events = o.events();

        o.login(&creds()).await.unwrap();
        sleep(ms(1100)).await;

        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::LoggedIn {
                username: "records-admin".to_string()
            }
        );
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::ExpiringSoon { .. }
        ));
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::LoggedOut {
                reason: LogoutReason::Inactivity
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_logout_notifies_success() {
        let h = harness();
        let o = &h.orchestrator;
        o.login(&creds()).await.unwrap();

        assert!(o.logout());
        assert!(!o.logout());
        let last = o.visible_notifications().pop().unwrap();
        assert_eq!(last.kind, NotificationKind::Success);
        assert_eq!(last.message, SIGNED_OUT_MESSAGE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_timers() {
        let h = harness();
        let o = &h.orchestrator;
        o.login(&creds()).await.unwrap();
        let login_notice = o.visible_notifications();
        assert_eq!(login_notice.len(), 1);

        o.shutdown();
        sleep(ms(10_000)).await;

        // No idle logout ran and the sweeper no longer evicts
        assert!(o.current_session().is_authenticated());
        assert_eq!(h.storage.clears(), 0);
        assert_eq!(o.visible_notifications(), login_notice);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_in_flight_at_teardown_does_not_resurrect() {
        let h = harness_with(
            MockBackend::with_delay(ms(200)),
            CountingStorage::default(),
        );
        let o = Arc::clone(&h.orchestrator);
        o.login(&creds()).await.unwrap();

        let pending = {
            let o = Arc::clone(&o);
            tokio::spawn(async move { o.refresh().await })
        };
        sleep(ms(50)).await;
        o.logout();
        o.shutdown();

        assert_eq!(pending.await.unwrap(), Err(AuthError::Superseded));
        assert_eq!(o.current_session().status, SessionStatus::Anonymous);
        assert!(h.storage.inner.load().unwrap().is_none());
        assert_eq!(h.storage.clears(), 1);
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let config = SessionConfig {
            warning_threshold: Duration::from_secs(20 * 60),
            ..SessionConfig::default()
        };
        let store = Arc::new(CredentialStore::new(
            Arc::new(MockBackend::new()),
            MemoryStorage::new(),
            config.refresh_buffer,
        ));
        let result = SessionOrchestrator::new(
            config,
            store,
            Arc::new(ActivityMonitor::default()),
            NotificationQueue::new(),
        );
        assert!(matches!(result, Err(ConfigError::ThresholdOrder { .. })));
    }

    #[tokio::test]
    async fn test_signal_bindings_cover_configured_set() {
        let h = harness();
        let bindings = h.orchestrator.signal_bindings();
        assert_eq!(bindings.len(), 4);
        assert_eq!(bindings[&ActivitySignal::KeyPress], &["keydown"]);
    }
}
