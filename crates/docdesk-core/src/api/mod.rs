//! Authentication API module.
//!
//! This module provides the `AuthBackend` seam the credential store calls
//! for login and refresh, and `HttpAuthBackend`, its implementation against
//! the docdesk REST API.
//!
//! Responses are classified into `AuthError` so the session layer can treat
//! every terminal failure the same way.

pub mod client;
pub mod error;

pub use client::{AuthBackend, AuthGrant, HttpAuthBackend, LoginCredentials};
pub use error::{AuthCall, AuthError};
