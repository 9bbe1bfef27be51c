//! Configuration error types for the amoCRM API client.
//!
//! All configuration constructors return `Result<T, ConfigError>` to enable
//! fail-fast validation. Error messages are designed to be clear and actionable.
//!
//! # Example
//!
//! ```rust
//! use amocrm_api::{AmoDomain, ConfigError};
//!
//! let result = AmoDomain::new("");
//! assert!(matches!(result, Err(ConfigError::InvalidAmoDomain { .. })));
//! ```

use thiserror::Error;

/// Errors that can occur while building an [`AmoConfig`](crate::AmoConfig).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The vendor domain suffix is invalid.
    #[error("Invalid amoCRM domain '{domain}'. Expected a bare domain such as 'amocrm.ru' or 'amocrm.com'.")]
    InvalidAmoDomain {
        /// The invalid domain that was provided.
        domain: String,
    },

    /// The subdomain is invalid.
    #[error("Invalid subdomain '{subdomain}'. Expected an account name such as 'mycompany' or 'mycompany.amocrm.ru'.")]
    InvalidSubdomain {
        /// The invalid subdomain that was provided.
        subdomain: String,
    },

    /// Host URL is invalid.
    #[error("Invalid host URL '{url}'. Please provide a valid URL with scheme (e.g., 'https://proxy.example.com').")]
    InvalidHostUrl {
        /// The invalid URL that was provided.
        url: String,
    },

    /// The throttle (bucket capacity) or refill rate is zero.
    #[error("Invalid rate limit: {reason}")]
    InvalidRateLimit {
        /// Why the rate limit settings were rejected.
        reason: String,
    },

    /// The set of success status codes is empty.
    #[error("At least one HTTP status code must be treated as success.")]
    EmptySuccessStatusCodes,

    /// The user agent string is empty.
    #[error("User agent cannot be empty.")]
    EmptyUserAgent,

    /// The PEM trust-anchor file could not be loaded.
    #[error("Invalid SSL certificate file '{path}': {reason}")]
    InvalidCertificate {
        /// The certificate file path.
        path: String,
        /// Why the file was rejected.
        reason: String,
    },

    /// A custom header has an invalid name or value.
    #[error("Invalid custom header '{name}'.")]
    InvalidHeader {
        /// The header name as provided.
        name: String,
    },
}
