//! Error types for the amoCRM request pipeline.
//!
//! # Error Handling
//!
//! Every failure is terminal for the current call; nothing is swallowed and
//! no partial result is returned:
//!
//! - [`InvalidRequestError`]: The request was rejected before any network activity
//! - [`ApiResponseError`]: amoCRM answered with an error status or embedded item errors
//! - [`AmoError`]: Unified error type encompassing all pipeline errors
//!
//! # Example
//!
//! ```rust,ignore
//! use amocrm_api::{AmoError, RequestMethod};
//!
//! match client.request("/api/v4/leads", RequestMethod::Get, &(), None).await {
//!     Ok(body) => println!("Leads: {:?}", body.json()),
//!     Err(AmoError::Api(e)) => println!("API error {}: {}", e.code, e.message),
//!     Err(AmoError::Transport { message, .. }) => println!("Network error: {message}"),
//!     Err(e) => println!("Request failed: {e}"),
//! }
//! ```

use std::path::PathBuf;

use thiserror::Error;

use crate::auth::AuthError;
use crate::error::ConfigError;

/// Error returned when amoCRM reports a failure.
///
/// Raised for non-success HTTP statuses (where `code` is the status) and for
/// success responses whose `_embedded.errors` lists per-item failures (where
/// `code` is the first item error code and `codes` lists all of them).
///
/// # Example
///
/// ```rust
/// use amocrm_api::clients::ApiResponseError;
///
/// let error = ApiResponseError {
///     code: 240,
///     codes: vec![240],
///     status: 200,
///     message: "Error 240 Adding/updating leads: invalid custom field \"id\"".to_string(),
///     request: "POST: https://acme.amocrm.ru/api/v2/leads".to_string(),
///     response_body: String::new(),
/// };
///
/// assert!(error.to_string().contains("240"));
/// assert!(error.to_string().contains("POST"));
/// ```
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message} ({request})")]
pub struct ApiResponseError {
    /// The primary error code: the first embedded code, or the HTTP status.
    pub code: u32,
    /// All embedded error codes in encounter order (`update` before `add`).
    pub codes: Vec<u32>,
    /// The HTTP status code of the response.
    pub status: u16,
    /// Message built from the error code table.
    pub message: String,
    /// Description of the offending request (method, URL, body).
    pub request: String,
    /// The raw response body, for diagnostics.
    pub response_body: String,
}

/// Error returned when a request is rejected before it is sent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidRequestError {
    /// The request method is not one of `GET`, `POST` or `AJAX`.
    #[error("Invalid request method {method}.")]
    InvalidMethod {
        /// The method that was provided.
        method: String,
    },

    /// The request parameters could not be encoded.
    #[error("Failed to encode request parameters: {message}")]
    Encoding {
        /// The encoder's error message.
        message: String,
    },
}

/// Unified error type for the amoCRM client.
#[derive(Debug, Error)]
pub enum AmoError {
    /// No session was established for the requested (or any) subdomain.
    #[error(
        "Authentication required{}: call authenticate() or authenticate_oauth2() first",
        .subdomain.as_ref().map(|s| format!(" for subdomain '{s}'")).unwrap_or_default()
    )]
    AuthRequired {
        /// The subdomain that lacks a session, if one was named.
        subdomain: Option<String>,
    },

    /// The request failed validation or encoding.
    #[error(transparent)]
    InvalidRequest(#[from] InvalidRequestError),

    /// Network, TLS or timeout failure; the response was never decoded.
    #[error("Transport error: {message} ({request})")]
    Transport {
        /// The underlying error text.
        message: String,
        /// Description of the request.
        request: String,
    },

    /// The response body of a success status was not valid JSON.
    #[error("Failed to decode response body ({message}): {body}")]
    Decoding {
        /// The decoder's error message.
        message: String,
        /// The raw response body.
        body: String,
    },

    /// amoCRM reported an error.
    #[error(transparent)]
    Api(#[from] ApiResponseError),

    /// Establishing a session failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The session expired (HTTP 401) and could not be renewed.
    #[error("Session for subdomain '{subdomain}' expired and re-authentication failed: {source}")]
    AuthExpiredRetryFailed {
        /// The subdomain whose session expired.
        subdomain: String,
        /// Why re-authentication failed.
        #[source]
        source: AuthError,
    },

    /// A rate limiter acquisition asked for more tokens than the bucket holds.
    #[error("Cannot acquire {weight} tokens from a bucket with capacity {capacity}")]
    RateLimitWeight {
        /// The requested weight.
        weight: u32,
        /// The bucket capacity.
        capacity: u32,
    },

    /// A cookie jar, lock or rate limiter file could not be accessed.
    #[error("Storage error at {}: {source}", .path.display())]
    Storage {
        /// The file or directory involved.
        path: PathBuf,
        /// The I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The client configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AmoError {
    /// Returns the API error code, if this is an [`AmoError::Api`].
    #[must_use]
    pub const fn api_code(&self) -> Option<u32> {
        match self {
            Self::Api(error) => Some(error.code),
            _ => None,
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}

// Verify AmoError is Send + Sync at compile time
const _: fn() = || {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<AmoError>();
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_required_message_without_subdomain() {
        let error = AmoError::AuthRequired { subdomain: None };
        assert_eq!(
            error.to_string(),
            "Authentication required: call authenticate() or authenticate_oauth2() first"
        );
    }

    #[test]
    fn test_auth_required_message_with_subdomain() {
        let error = AmoError::AuthRequired {
            subdomain: Some("acme".to_string()),
        };
        assert!(error.to_string().contains("for subdomain 'acme'"));
    }

    #[test]
    fn test_invalid_method_message() {
        let error = InvalidRequestError::InvalidMethod {
            method: "PATCH".to_string(),
        };
        assert_eq!(error.to_string(), "Invalid request method PATCH.");
    }

    #[test]
    fn test_api_code_accessor() {
        let error = AmoError::Api(ApiResponseError {
            code: 404,
            codes: Vec::new(),
            status: 404,
            message: "Error 404 Not found".to_string(),
            request: "GET: https://acme.amocrm.ru/api/v4/leads/1".to_string(),
            response_body: String::new(),
        });
        assert_eq!(error.api_code(), Some(404));
        assert_eq!(AmoError::AuthRequired { subdomain: None }.api_code(), None);
    }

    #[test]
    fn test_auth_expired_retry_failed_exposes_source() {
        let error = AmoError::AuthExpiredRetryFailed {
            subdomain: "acme".to_string(),
            source: AuthError::NoTokenRefresher {
                subdomain: "acme".to_string(),
            },
        };
        assert!(std::error::Error::source(&error).is_some());
        assert!(error.to_string().contains("acme"));
    }

    #[test]
    fn test_error_types_implement_std_error() {
        let _: &dyn std::error::Error = &InvalidRequestError::Encoding {
            message: "bad".to_string(),
        };
        let _: &dyn std::error::Error = &AmoError::RateLimitWeight {
            weight: 10,
            capacity: 5,
        };
    }
}
