//! Authentication types for the amoCRM API client.
//!
//! # Overview
//!
//! - [`AuthState`]: Per-subdomain authentication record used by the pipeline
//! - [`Credentials`]: Login and API hash for legacy cookie-based sessions
//! - [`OAuth2Tokens`]: Bearer and refresh tokens for OAuth 2.0 sessions
//! - [`TokenRefresher`]: Strategy for renewing OAuth 2.0 tokens after a 401
//! - [`RefreshTokenGrant`]: Stock `refresh_token` grant implementation
//! - [`AuthError`]: Authentication failures
//!
//! # Session Types
//!
//! amoCRM supports two kinds of sessions:
//!
//! - **Legacy sessions**: a login request sets a session cookie, which the
//!   client persists per account domain and replays on every request. On 401
//!   the client logs in again with the stored credentials.
//! - **OAuth 2.0 sessions**: requests carry `Authorization: Bearer`. On 401
//!   the client asks its [`TokenRefresher`] for new tokens.
//!
//! # Example
//!
//! ```rust
//! use amocrm_api::{AuthState, OAuth2Tokens};
//!
//! let state = AuthState::oauth2(
//!     "acme",
//!     "acme.amocrm.ru",
//!     OAuth2Tokens::new("access-token", Some("refresh-token".to_string())),
//! );
//! assert_eq!(state.bearer_token(), Some("access-token"));
//! ```

mod error;
mod refresh;
pub(crate) mod registry;
mod state;

pub use error::AuthError;
pub use refresh::{RefreshTokenGrant, TokenRefresher};
pub use state::{AuthState, Credentials, OAuth2Tokens};
