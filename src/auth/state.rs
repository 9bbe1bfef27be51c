//! Authentication state for amoCRM accounts.
//!
//! This module provides [`AuthState`], the per-subdomain record the request
//! pipeline consults before sending anything, together with the inputs used to
//! establish it: [`Credentials`] for legacy cookie-based login and
//! [`OAuth2Tokens`] for bearer-token access.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Login credentials for legacy cookie-based authentication.
///
/// The `hash` is the account's API key. Its value is masked in debug output.
///
/// # Example
///
/// ```rust
/// use amocrm_api::Credentials;
///
/// let credentials = Credentials::new("manager@example.com", "f9e8d7");
/// assert_eq!(credentials.login(), "manager@example.com");
/// assert!(!format!("{credentials:?}").contains("f9e8d7"));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    login: String,
    hash: String,
}

impl Credentials {
    /// Creates credentials from a user login and API hash.
    #[must_use]
    pub fn new(login: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            hash: hash.into(),
        }
    }

    /// Returns the user login.
    #[must_use]
    pub fn login(&self) -> &str {
        &self.login
    }

    /// Returns the API hash.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("hash", &"*****")
            .finish()
    }
}

/// OAuth 2.0 tokens for bearer-token authentication.
///
/// Obtaining the initial tokens (authorization code exchange) happens outside
/// this crate; refreshing them is delegated to a
/// [`TokenRefresher`](crate::auth::TokenRefresher).
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct OAuth2Tokens {
    /// The bearer access token.
    pub access_token: String,
    /// The refresh token, if issued.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl OAuth2Tokens {
    /// Creates a token pair.
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }
}

impl fmt::Debug for OAuth2Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Tokens")
            .field("access_token", &"*****")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "*****"))
            .finish()
    }
}

/// Authentication state of one amoCRM account (subdomain).
///
/// A request can only be sent for a subdomain that has an `AuthState`. States
/// are created by [`AmoClient::authenticate`](crate::AmoClient::authenticate)
/// and [`AmoClient::authenticate_oauth2`](crate::AmoClient::authenticate_oauth2),
/// updated on token refresh, and kept for the lifetime of the client.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthState {
    /// The subdomain as given by the caller (the registry key).
    pub subdomain: String,
    /// The fully-qualified account host, e.g. `acme.amocrm.ru`.
    pub domain: String,
    /// Whether bearer-token (OAuth 2.0) authentication is used.
    pub is_oauth2: bool,
    /// The bearer access token (OAuth 2.0 only).
    pub access_token: Option<String>,
    /// The refresh token (OAuth 2.0 only).
    pub refresh_token: Option<String>,
    /// The cookie jar file replayed for legacy sessions.
    pub cookies_path: Option<PathBuf>,
    /// When this state was established or last refreshed.
    pub refreshed_at: DateTime<Utc>,
}

impl AuthState {
    /// Creates a legacy cookie-based state.
    #[must_use]
    pub fn legacy(
        subdomain: impl Into<String>,
        domain: impl Into<String>,
        cookies_path: PathBuf,
    ) -> Self {
        Self {
            subdomain: subdomain.into(),
            domain: domain.into(),
            is_oauth2: false,
            access_token: None,
            refresh_token: None,
            cookies_path: Some(cookies_path),
            refreshed_at: Utc::now(),
        }
    }

    /// Creates a bearer-token state.
    #[must_use]
    pub fn oauth2(
        subdomain: impl Into<String>,
        domain: impl Into<String>,
        tokens: OAuth2Tokens,
    ) -> Self {
        Self {
            subdomain: subdomain.into(),
            domain: domain.into(),
            is_oauth2: true,
            access_token: Some(tokens.access_token),
            refresh_token: tokens.refresh_token,
            cookies_path: None,
            refreshed_at: Utc::now(),
        }
    }

    /// Returns the bearer token to send, if this is an OAuth 2.0 state with a
    /// non-empty access token.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        if !self.is_oauth2 {
            return None;
        }
        self.access_token.as_deref().filter(|token| !token.is_empty())
    }

    /// Applies refreshed tokens, keeping the old refresh token when none was issued.
    pub fn apply_tokens(&mut self, tokens: OAuth2Tokens) {
        self.access_token = Some(tokens.access_token);
        if tokens.refresh_token.is_some() {
            self.refresh_token = tokens.refresh_token;
        }
        self.refreshed_at = Utc::now();
    }
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |token: &Option<String>| token.as_ref().map(|_| "*****");
        f.debug_struct("AuthState")
            .field("subdomain", &self.subdomain)
            .field("domain", &self.domain)
            .field("is_oauth2", &self.is_oauth2)
            .field("access_token", &mask(&self.access_token))
            .field("refresh_token", &mask(&self.refresh_token))
            .field("cookies_path", &self.cookies_path)
            .field("refreshed_at", &self.refreshed_at)
            .finish()
    }
}

// Verify AuthState is Send + Sync at compile time
const _: fn() = || {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<AuthState>();
};
