//! OAuth 2.0 token renewal.
//!
//! When a bearer-token request comes back with HTTP 401, the client asks its
//! [`TokenRefresher`] for a fresh token pair, stores it, and retries the
//! request once. [`RefreshTokenGrant`] is the stock implementation using the
//! `refresh_token` grant against amoCRM's `/oauth2/access_token` endpoint.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use amocrm_api::{AmoClient, AmoConfig};
//! use amocrm_api::auth::RefreshTokenGrant;
//!
//! let refresher = RefreshTokenGrant::new("client-id", "client-secret", "https://app.example.com/oauth");
//! let client = AmoClient::builder(AmoConfig::default())
//!     .token_refresher(Arc::new(refresher))
//!     .build()?;
//! ```

use async_trait::async_trait;
use serde::Serialize;

use crate::auth::{AuthError, AuthState, OAuth2Tokens};

/// Grant type for refresh token requests.
const REFRESH_TOKEN_GRANT_TYPE: &str = "refresh_token";

/// Renews the tokens of an expired OAuth 2.0 session.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Returns a fresh token pair for `state`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the tokens cannot be renewed; the client then
    /// gives up on the request instead of retrying it.
    async fn refresh(&self, state: &AuthState) -> Result<OAuth2Tokens, AuthError>;
}

/// Request body for token refresh.
#[derive(Debug, Serialize)]
struct TokenRefreshRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
    refresh_token: &'a str,
    redirect_uri: &'a str,
}

/// Refreshes tokens with the OAuth 2.0 `refresh_token` grant.
#[derive(Clone)]
pub struct RefreshTokenGrant {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    token_url: Option<String>,
    client: reqwest::Client,
}

impl RefreshTokenGrant {
    /// Creates a refresher for the given integration.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            token_url: None,
            client: reqwest::Client::new(),
        }
    }

    /// Sends refresh requests to `url` instead of the account's token endpoint.
    #[must_use]
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = Some(url.into());
        self
    }

    /// Returns the token endpoint used for `state`.
    #[must_use]
    pub fn token_url(&self, state: &AuthState) -> String {
        self.token_url
            .clone()
            .unwrap_or_else(|| format!("https://{}/oauth2/access_token", state.domain))
    }
}

impl std::fmt::Debug for RefreshTokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTokenGrant")
            .field("client_id", &self.client_id)
            .field("client_secret", &"*****")
            .field("redirect_uri", &self.redirect_uri)
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenRefresher for RefreshTokenGrant {
    async fn refresh(&self, state: &AuthState) -> Result<OAuth2Tokens, AuthError> {
        let refresh_token =
            state
                .refresh_token
                .as_deref()
                .ok_or_else(|| AuthError::MissingRefreshToken {
                    subdomain: state.subdomain.clone(),
                })?;

        let request_body = TokenRefreshRequest {
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            grant_type: REFRESH_TOKEN_GRANT_TYPE,
            refresh_token,
            redirect_uri: &self.redirect_uri,
        };

        let response = self
            .client
            .post(self.token_url(state))
            .json(&request_body)
            .send()
            .await
            .map_err(|e| AuthError::TokenRefreshFailed {
                status: 0,
                message: format!("Network error: {e}"),
            })?;

        let status = response.status().as_u16();

        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenRefreshFailed {
                status,
                message: error_body,
            });
        }

        let tokens: OAuth2Tokens =
            response
                .json()
                .await
                .map_err(|e| AuthError::TokenRefreshFailed {
                    status,
                    message: format!("Failed to parse token response: {e}"),
                })?;

        tracing::debug!(subdomain = %state.subdomain, "Refreshed OAuth 2.0 access token");
        Ok(tokens)
    }
}
