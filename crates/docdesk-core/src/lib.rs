//! Session lifecycle core for the docdesk administrative dashboard.
//!
//! This crate owns everything stateful about a dashboard session:
//! - `CredentialStore`: the authenticated session, its durable copy and refresh
//! - `ActivityMonitor`: last-interaction tracking from configured signals
//! - `IdleWatchdog`: inactivity warning and forced logout
//! - `NotificationQueue`: transient user-visible messages
//! - `SessionOrchestrator`: wires the above together
//!
//! Nothing here renders. The presentation layer subscribes to the watch
//! channels exposed by the orchestrator.

pub mod activity;
pub mod api;
pub mod auth;
pub mod config;
pub mod notifications;
pub mod orchestrator;
pub mod watchdog;

pub use activity::{ActivityMonitor, ActivitySignal};
pub use api::{AuthBackend, AuthError, AuthGrant, HttpAuthBackend, LoginCredentials};
pub use auth::{
    CredentialStore, FileStorage, KeyringStorage, MemoryStorage, Session, SessionData,
    SessionStatus, SessionStorage,
};
pub use config::{Config, ConfigError, SessionConfig, StorageBackend};
pub use notifications::{Notification, NotificationId, NotificationKind, NotificationQueue};
pub use orchestrator::{LogoutReason, SessionEvent, SessionOrchestrator};
pub use watchdog::{IdleWatchdog, WatchdogEvent, WatchdogHandle, WatchdogState};

#[cfg(test)]
pub(crate) mod testing;
