//! Shared fakes for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::api::{AuthBackend, AuthError, AuthGrant, LoginCredentials};
use crate::auth::{MemoryStorage, SessionData, SessionStorage};
use crate::config::SessionConfig;

/// Thresholds small enough to drive with paused tokio time.
pub(crate) fn fast_config() -> SessionConfig {
    SessionConfig {
        idle_threshold: Duration::from_millis(1000),
        warning_threshold: Duration::from_millis(600),
        watchdog_tick_interval: Duration::from_millis(50),
        notification_sweep_interval: Duration::from_millis(100),
        ..SessionConfig::default()
    }
}

/// Backend that issues numbered tokens after an optional delay.
pub(crate) struct MockBackend {
    delay: Duration,
    lifetime: Duration,
    issued: AtomicUsize,
    login_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    login_error: Mutex<Option<AuthError>>,
    refresh_error: Mutex<Option<AuthError>>,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            lifetime: Duration::from_secs(3600),
            issued: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            login_error: Mutex::new(None),
            refresh_error: Mutex::new(None),
        }
    }

    /// Grant tokens that expire after `lifetime`.
    pub(crate) fn with_lifetime(lifetime: Duration) -> Self {
        Self {
            lifetime,
            ..Self::new()
        }
    }

    pub(crate) fn fail_login(&self, err: AuthError) {
        *self.login_error.lock().unwrap() = Some(err);
    }

    pub(crate) fn fail_refresh(&self, err: AuthError) {
        *self.refresh_error.lock().unwrap() = Some(err);
    }

    pub(crate) fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn grant(&self) -> AuthGrant {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        AuthGrant {
            token: format!("token-{}", n),
            expires_in: self.lifetime,
        }
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl AuthBackend for MockBackend {
    async fn authenticate(&self, _credentials: &LoginCredentials) -> Result<AuthGrant, AuthError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let failure = self.login_error.lock().unwrap().clone();
        match failure {
            Some(err) => Err(err),
            None => Ok(self.grant()),
        }
    }

    async fn refresh(&self, _token: &str) -> Result<AuthGrant, AuthError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let failure = self.refresh_error.lock().unwrap().clone();
        match failure {
            Some(err) => Err(err),
            None => Ok(self.grant()),
        }
    }
}

/// Memory storage that counts how often it was cleared.
#[derive(Clone, Default)]
pub(crate) struct CountingStorage {
    pub(crate) inner: MemoryStorage,
    clears: Arc<AtomicUsize>,
}

impl CountingStorage {
    pub(crate) fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl SessionStorage for CountingStorage {
    fn load(&self) -> anyhow::Result<Option<SessionData>> {
        self.inner.load()
    }

    fn save(&self, data: &SessionData) -> anyhow::Result<()> {
        self.inner.save(data)
    }

    fn clear(&self) -> anyhow::Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear()
    }
}
