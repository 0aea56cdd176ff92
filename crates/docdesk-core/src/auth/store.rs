//! The credential store: sole owner of the session.
//!
//! Every mutation goes through `login`, `refresh` or `clear`. Each one
//! writes storage, updates memory and publishes the new view while holding
//! the state lock, so no observer sees one without the others.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::session::{Session, SessionData};
use super::storage::SessionStorage;
use crate::api::{AuthBackend, AuthError, AuthGrant, LoginCredentials};

type SharedRefresh = Shared<BoxFuture<'static, Result<Session, AuthError>>>;

struct InFlight {
    id: u64,
    future: SharedRefresh,
}

struct StoreState {
    data: Option<SessionData>,
    /// Bumped by every login and clear. Results of calls started under an
    /// older epoch are discarded.
    epoch: u64,
    in_flight: Option<InFlight>,
}

struct StoreInner {
    backend: Arc<dyn AuthBackend>,
    storage: Box<dyn SessionStorage>,
    refresh_buffer: Duration,
    state: Mutex<StoreState>,
    published: watch::Sender<Session>,
    next_flight: AtomicU64,
}

pub struct CredentialStore {
    inner: Arc<StoreInner>,
}

impl CredentialStore {
    pub fn new(
        backend: Arc<dyn AuthBackend>,
        storage: impl SessionStorage + 'static,
        refresh_buffer: Duration,
    ) -> Self {
        let (published, _) = watch::channel(Session::anonymous());
        Self {
            inner: Arc::new(StoreInner {
                backend,
                storage: Box::new(storage),
                refresh_buffer,
                state: Mutex::new(StoreState {
                    data: None,
                    epoch: 0,
                    in_flight: None,
                }),
                published,
                next_flight: AtomicU64::new(0),
            }),
        }
    }

    /// Seed the store from durable storage. Expired or unreadable records
    /// are dropped and the store stays anonymous.
    pub fn restore(&self) -> Session {
        let mut state = self.inner.state();
        match self.inner.storage.load() {
            Ok(Some(data)) if !data.is_expired() => {
                debug!(expires_at = %data.expires_at, "Restored persisted session");
                state.data = Some(data);
            }
            Ok(Some(_)) => {
                debug!("Persisted session already expired, discarding");
                if let Err(e) = self.inner.storage.clear() {
                    warn!(error = %e, "Failed to remove expired session");
                }
            }
            Ok(None) => debug!("No persisted session found"),
            Err(e) => warn!(error = %e, "Failed to load persisted session"),
        }
        self.inner.publish(&state)
    }

    /// Authenticate and replace the current session. On failure the prior
    /// session is left untouched.
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<Session, AuthError> {
        let epoch = self.inner.state().epoch;
        let grant = self.inner.backend.authenticate(credentials).await?;

        let mut state = self.inner.state();
        if state.epoch != epoch {
            debug!("Discarding login result, store was reset while waiting");
            return Err(AuthError::Superseded);
        }

        let data = self
            .inner
            .build_data(grant, Some(credentials.username.clone()))?;
        self.inner.persist(&data)?;

        state.epoch += 1;
        state.in_flight = None;
        state.data = Some(data);
        info!(username = %credentials.username, "Login successful");
        Ok(self.inner.publish(&state))
    }

    /// Exchange the current token for a fresh one.
    ///
    /// Concurrent callers share one backend call and all receive its result.
    pub async fn refresh(&self) -> Result<Session, AuthError> {
        let future = {
            let mut state = self.inner.state();
            match &state.in_flight {
                Some(flight) => {
                    debug!(flight = flight.id, "Joining in-flight token refresh");
                    flight.future.clone()
                }
                None => {
                    let token = state
                        .data
                        .as_ref()
                        .map(|d| d.token.clone())
                        .ok_or(AuthError::NotAuthenticated)?;
                    let epoch = state.epoch;
                    let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                    let inner = Arc::clone(&self.inner);

                    let future = async move {
                        let result = inner.backend.refresh(&token).await;
                        inner.complete_refresh(id, epoch, result)
                    }
                    .boxed()
                    .shared();

                    debug!(flight = id, "Starting token refresh");
                    state.in_flight = Some(InFlight {
                        id,
                        future: future.clone(),
                    });
                    future
                }
            }
        };
        future.await
    }

    /// Drop the session from memory and storage. Idempotent.
    pub fn clear(&self) {
        let mut state = self.inner.state();
        state.epoch += 1;
        state.in_flight = None;
        let had_session = state.data.take().is_some();

        if let Err(e) = self.inner.storage.clear() {
            warn!(error = %e, "Failed to remove persisted session");
        }
        self.inner.publish(&state);

        if had_session {
            info!("Session cleared");
        }
    }

    /// Detach any in-flight login or refresh so its completion is ignored.
    /// The current session is kept.
    pub fn invalidate_pending(&self) {
        let mut state = self.inner.state();
        state.epoch += 1;
        if state.in_flight.take().is_some() {
            debug!("Detached in-flight token refresh");
        }
    }

    pub fn current(&self) -> Session {
        let state = self.inner.state();
        Session::from_data(state.data.as_ref(), self.inner.refresh_buffer, Utc::now())
    }

    pub fn is_authenticated(&self) -> bool {
        self.current().is_authenticated()
    }

    /// Receiver of every published session change.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.published.subscribe()
    }
}

impl StoreInner {
    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, state: &StoreState) -> Session {
        let session = Session::from_data(state.data.as_ref(), self.refresh_buffer, Utc::now());
        self.published.send_replace(session.clone());
        session
    }

    fn build_data(&self, grant: AuthGrant, username: Option<String>) -> Result<SessionData, AuthError> {
        SessionData::from_grant(grant, username, Utc::now())
            .ok_or_else(|| AuthError::InvalidResponse("token lifetime out of range".to_string()))
    }

    fn persist(&self, data: &SessionData) -> Result<(), AuthError> {
        self.storage
            .save(data)
            .map_err(|e| AuthError::Storage(format!("{:#}", e)))
    }

    fn complete_refresh(
        &self,
        id: u64,
        epoch: u64,
        result: Result<AuthGrant, AuthError>,
    ) -> Result<Session, AuthError> {
        let mut state = self.state();
        if state.in_flight.as_ref().is_some_and(|f| f.id == id) {
            state.in_flight = None;
        }

        if state.epoch != epoch {
            debug!(flight = id, "Discarding refresh result for a cleared session");
            return Err(AuthError::Superseded);
        }

        let grant = result.map_err(|e| {
            warn!(flight = id, error = %e, "Token refresh failed");
            e
        })?;

        let username = state.data.as_ref().and_then(|d| d.username.clone());
        let data = self.build_data(grant, username)?;
        self.persist(&data)?;
        state.data = Some(data);
        debug!(flight = id, "Token refreshed");
        Ok(self.publish(&state))
    }
}

// ============================================================================
// Tests
// ============================================================================
