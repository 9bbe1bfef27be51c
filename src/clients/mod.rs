//! HTTP client types for amoCRM API communication.
//!
//! This module provides the request pipeline: building authenticated
//! requests, rate limiting them, sending them, and turning responses into
//! decoded bodies or typed errors.
//!
//! # Overview
//!
//! The main types in this module are:
//!
//! - [`AmoClient`]: The async client every request goes through
//! - [`RequestMethod`]: Request types (`GET`, JSON `POST`, form-encoded `AJAX`)
//! - [`RequestDescriptor`]: A request as issued by the caller
//! - [`PreparedRequest`]: The URL, headers and body actually sent
//! - [`ResponseBody`]: A decoded response (JSON or no content)
//! - [`Transport`]: The network seam, with [`HttpTransport`] as default
//! - [`ErrorCodeTable`]: amoCRM error code messages
//! - [`AmoError`]: Every failure a request can produce
//!
//! # Example
//!
//! ```rust,ignore
//! use amocrm_api::{AmoClient, AmoConfig, OAuth2Tokens};
//! use serde_json::json;
//!
//! let client = AmoClient::new(AmoConfig::default())?;
//! client.authenticate_oauth2("acme", OAuth2Tokens::new("access-token", None))?;
//!
//! let body = client
//!     .post("/api/v2/leads", &json!({"add": [{"name": "Deal"}]}), None)
//!     .await?;
//! ```
//!
//! # Retry Behavior
//!
//! The client retries only one case automatically:
//!
//! - **401 (Unauthorized)**: re-authenticates the subdomain (re-login for
//!   legacy sessions, token refresh for OAuth 2.0) and retries once
//! - **Everything else**: returned to the caller without retry

mod amo_client;
mod debug_log;
mod error_codes;
mod errors;
mod http_request;
mod http_response;
mod transport;

pub use amo_client::{AmoClient, AmoClientBuilder, AUTH_PATH};
pub use debug_log::DebugSink;
pub use error_codes::{ErrorCodeTable, UNKNOWN_ERROR};
pub use errors::{AmoError, ApiResponseError, InvalidRequestError};
pub use http_request::{
    http_build_query, to_params, Params, PreparedRequest, RequestDescriptor, RequestMethod,
};
pub use http_response::{unescape_unicode, RawResponse, ResponseBody};
pub use transport::{HttpTransport, RequestInterceptor, Transport};
