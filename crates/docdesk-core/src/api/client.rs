//! Authentication backend for the docdesk server.
//!
//! The session core only needs two calls, login and refresh, both of which
//! answer with a bearer token and its lifetime. `AuthBackend` is the seam
//! tests substitute; `HttpAuthBackend` talks to the real server.

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use tracing::debug;

use super::error::{AuthCall, AuthError};

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Username/password pair submitted at login.
#[derive(Clone)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

impl LoginCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A token issued by the server together with its declared lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthGrant {
    pub token: String,
    pub expires_in: Duration,
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Exchange credentials for a token.
    async fn authenticate(&self, credentials: &LoginCredentials) -> Result<AuthGrant, AuthError>;

    /// Exchange a still-valid token for a fresh one.
    async fn refresh(&self, token: &str) -> Result<AuthGrant, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    #[serde(rename = "expiresIn")]
    expires_in: u64,
}

impl From<TokenResponse> for AuthGrant {
    fn from(response: TokenResponse) -> Self {
        Self {
            token: response.token,
            expires_in: Duration::from_secs(response.expires_in),
        }
    }
}

/// Backend client for the docdesk REST API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpAuthBackend {
    client: Client,
    base_url: String,
}

impl HttpAuthBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if response is successful, classifying the failure if not.
    async fn check_response(
        call: AuthCall,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, AuthError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(AuthError::from_status(call, status, &body))
        }
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn authenticate(&self, credentials: &LoginCredentials) -> Result<AuthGrant, AuthError> {
        let url = format!("{}/auth/login", self.base_url);
        debug!(username = %credentials.username, "Sending login request");

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .form(&[
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await?;

        let response = Self::check_response(AuthCall::Login, response).await?;
        let body: TokenResponse = response.json().await?;
        Ok(body.into())
    }

    async fn refresh(&self, token: &str) -> Result<AuthGrant, AuthError> {
        let url = format!("{}/auth/refresh", self.base_url);
        debug!("Sending token refresh request");

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(token)
            .send()
            .await?;

        let response = Self::check_response(AuthCall::Refresh, response).await?;
        let body: TokenResponse = response.json().await?;
        Ok(body.into())
    }
}
