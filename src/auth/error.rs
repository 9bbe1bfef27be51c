//! Authentication error types for the amoCRM API client.
//!
//! [`AuthError`] covers failures to establish or renew an account session.
//! When such a failure happens while recovering from an HTTP 401, the client
//! wraps it in [`AmoError::AuthExpiredRetryFailed`](crate::AmoError::AuthExpiredRetryFailed).

use thiserror::Error;

use crate::clients::AmoError;

/// Errors that can occur while authenticating or re-authenticating.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The login request succeeded at the HTTP level but amoCRM refused it.
    #[error("amoCRM rejected the login for subdomain '{subdomain}'")]
    LoginRejected {
        /// The subdomain the login was attempted for.
        subdomain: String,
    },

    /// The login request itself failed.
    #[error("Login request for subdomain '{subdomain}' failed: {source}")]
    LoginFailed {
        /// The subdomain the login was attempted for.
        subdomain: String,
        /// The underlying pipeline error.
        #[source]
        source: Box<AmoError>,
    },

    /// An OAuth 2.0 session was requested without an access token.
    #[error("OAuth 2.0 access token for subdomain '{subdomain}' is empty")]
    EmptyAccessToken {
        /// The subdomain the tokens were given for.
        subdomain: String,
    },

    /// No credentials are stored for re-login of a legacy session.
    #[error("No stored credentials to re-authenticate subdomain '{subdomain}'")]
    MissingCredentials {
        /// The subdomain without credentials.
        subdomain: String,
    },

    /// The OAuth 2.0 session has no refresh token.
    #[error("No refresh token to re-authenticate subdomain '{subdomain}'")]
    MissingRefreshToken {
        /// The subdomain without a refresh token.
        subdomain: String,
    },

    /// No [`TokenRefresher`](crate::auth::TokenRefresher) was configured on the client.
    #[error("No token refresher configured; cannot renew OAuth 2.0 session for '{subdomain}'")]
    NoTokenRefresher {
        /// The subdomain whose token expired.
        subdomain: String,
    },

    /// The token endpoint returned an error or an unreadable response.
    #[error("Token refresh failed with status {status}: {message}")]
    TokenRefreshFailed {
        /// The HTTP status code returned (0 for network failures).
        status: u16,
        /// The error message or response body.
        message: String,
    },
}

// Verify AuthError is Send + Sync at compile time
const _: fn() = || {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<AuthError>();
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_rejected_message() {
        let error = AuthError::LoginRejected {
            subdomain: "acme".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "amoCRM rejected the login for subdomain 'acme'"
        );
    }

    #[test]
    fn test_token_refresh_failed_message() {
        let error = AuthError::TokenRefreshFailed {
            status: 400,
            message: "invalid_grant".to_string(),
        };
        let message = error.to_string();
        assert!(message.contains("400"));
        assert!(message.contains("invalid_grant"));
    }

    #[test]
    fn test_login_failed_exposes_source() {
        let error = AuthError::LoginFailed {
            subdomain: "acme".to_string(),
            source: Box::new(AmoError::AuthRequired { subdomain: None }),
        };
        assert!(std::error::Error::source(&error).is_some());
    }
}
