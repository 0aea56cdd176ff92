use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::api::AuthGrant;

/// Lifecycle status of the dashboard session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Anonymous,
    Authenticated,
    /// Token still valid but inside the refresh buffer.
    Expiring,
    /// Token present but past its expiry.
    Expired,
}

impl SessionStatus {
    /// True while the token can still be presented to the server.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionStatus::Authenticated | SessionStatus::Expiring)
    }
}

/// Durable form of a session, as written to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub token: String,
    pub username: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionData {
    pub fn from_grant(
        grant: AuthGrant,
        username: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let lifetime = Duration::from_std(grant.expires_in).ok()?;
        Some(Self {
            token: grant.token,
            username,
            issued_at: now,
            expires_at: now.checked_add_signed(lifetime)?,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check if the session will expire within `buffer` and should be refreshed
    pub fn needs_refresh_at(&self, buffer: StdDuration, now: DateTime<Utc>) -> bool {
        let buffer = Duration::from_std(buffer).unwrap_or_else(|_| Duration::zero());
        now + buffer >= self.expires_at
    }
}

/// Read-only view of the session handed to everything outside the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub token: Option<String>,
    pub username: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
}

impl Session {
    pub fn anonymous() -> Self {
        Self {
            token: None,
            username: None,
            issued_at: None,
            expires_at: None,
            status: SessionStatus::Anonymous,
        }
    }

    /// Derive the view of `data` as of `now`.
    pub fn from_data(
        data: Option<&SessionData>,
        refresh_buffer: StdDuration,
        now: DateTime<Utc>,
    ) -> Self {
        let Some(data) = data else {
            return Self::anonymous();
        };

        let status = if data.is_expired_at(now) {
            SessionStatus::Expired
        } else if data.needs_refresh_at(refresh_buffer, now) {
            SessionStatus::Expiring
        } else {
            SessionStatus::Authenticated
        };

        Self {
            token: Some(data.token.clone()),
            username: data.username.clone(),
            issued_at: Some(data.issued_at),
            expires_at: Some(data.expires_at),
            status,
        }
    }

    /// Get the bearer token if the session is usable
    pub fn bearer_token(&self) -> Option<&str> {
        if self.status.is_authenticated() {
            self.token.as_deref()
        } else {
            None
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status.is_authenticated()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::anonymous()
    }
}
