//! Authentication module for managing the dashboard session.
//!
//! This module provides:
//! - `CredentialStore`: sole owner of the session (login, refresh, clear)
//! - `Session`: read-only view with derived status
//! - `SessionStorage`: durable session copy in a file, the OS keychain or memory
//!
//! The durable copy is read once at startup and discarded if already expired.

pub mod credentials;
pub mod session;
pub mod storage;
pub mod store;

pub use credentials::KeyringStorage;
pub use session::{Session, SessionData, SessionStatus};
pub use storage::{FileStorage, MemoryStorage, SessionStorage};
pub use store::CredentialStore;
