use thiserror::Error;

/// Failure classes reported by the authentication backend.
///
/// `Clone` so a single in-flight refresh result can be handed to every
/// caller awaiting it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Credentials rejected: {0}")]
    CredentialsRejected(String),

    #[error("Session expired on server")]
    ExpiredOnServer,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("No active session")]
    NotAuthenticated,

    #[error("Session storage error: {0}")]
    Storage(String),

    /// The session was cleared while the request was in flight; the result
    /// was discarded.
    #[error("Request superseded by logout")]
    Superseded,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Which call produced a response, since the same status means different
/// things for login and refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthCall {
    Login,
    Refresh,
}

impl AuthError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!(
                "{}... (truncated, {} total bytes)",
                &body[..end],
                body.len()
            )
        }
    }

    pub fn from_status(call: AuthCall, status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match (call, status.as_u16()) {
            (AuthCall::Login, 400 | 401 | 403) => AuthError::CredentialsRejected(truncated),
            (AuthCall::Refresh, 401 | 403) => AuthError::ExpiredOnServer,
            (_, 429) => AuthError::RateLimited,
            (_, 500..=599) => AuthError::Server(truncated),
            _ => AuthError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// Whether this error ends the session. A superseded request already
    /// belongs to a cleared session, so it is not a fresh failure.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AuthError::Superseded)
    }

    /// Short text suitable for a notification.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::CredentialsRejected(_) => "Invalid username or password".to_string(),
            AuthError::ExpiredOnServer | AuthError::NotAuthenticated => {
                "Your session has ended. Please sign in again.".to_string()
            }
            AuthError::Network(_) => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            AuthError::RateLimited => "Too many attempts. Please wait and try again.".to_string(),
            other => format!("Sign-in failed: {}", other),
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AuthError::InvalidResponse(err.to_string())
        } else {
            AuthError::Network(err.to_string())
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
