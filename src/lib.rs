//! # amoCRM API Rust Client
//!
//! A Rust client for the amoCRM REST API, providing type-safe configuration,
//! session handling, and a rate-limited HTTP request pipeline.
//!
//! ## Overview
//!
//! This crate provides:
//! - Type-safe configuration via [`AmoConfig`] and [`AmoConfigBuilder`]
//! - Legacy cookie sessions and OAuth 2.0 bearer sessions, several subdomains at once
//! - Automatic re-authentication and a single retry on HTTP 401
//! - A token-bucket rate limiter shared by every process on the host
//! - Exclusive entity locks for read-modify-write updates
//! - amoCRM error code decoding into typed [`ApiResponseError`]s
//! - Debug tracing of every request and response
//!
//! ## Quick Start
//!
//! ```rust
//! use amocrm_api::{AmoConfig, AmoDomain};
//!
//! let config = AmoConfig::builder()
//!     .amo_domain(AmoDomain::new("amocrm.com").unwrap())
//!     .throttle(7)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.get_domain("acme"), "acme.amocrm.com");
//! ```
//!
//! ## OAuth 2.0 Sessions
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use amocrm_api::{AmoClient, AmoConfig, OAuth2Tokens, RefreshTokenGrant};
//! use serde_json::json;
//!
//! let client = AmoClient::builder(AmoConfig::default())
//!     .token_refresher(Arc::new(RefreshTokenGrant::new(
//!         "client-id",
//!         "client-secret",
//!         "https://app.example.com/oauth",
//!     )))
//!     .build()?;
//!
//! client.authenticate_oauth2(
//!     "acme",
//!     OAuth2Tokens::new("access-token", Some("refresh-token".to_string())),
//! )?;
//!
//! let leads = client.get("/api/v4/leads", &json!({"limit": 50}), None).await?;
//! ```
//!
//! ## Legacy Sessions
//!
//! ```rust,ignore
//! use amocrm_api::{AmoClient, AmoConfig, Credentials};
//! use serde_json::json;
//!
//! let client = AmoClient::new(AmoConfig::default())?;
//! client
//!     .authenticate("acme", Credentials::new("manager@example.com", "api-hash"))
//!     .await?;
//!
//! let result = client
//!     .post("/api/v2/leads", &json!({"add": [{"name": "Deal"}]}), None)
//!     .await?;
//! ```
//!
//! ## Entity Locks
//!
//! ```rust,ignore
//! let lock = client.lock_entity(&lead).await?;
//! client.post("/api/v2/leads", &json!({"update": [lead_update]}), None).await?;
//! client.unlock_entity(Some(lock));
//! ```
//!
//! ## Design Principles
//!
//! - **No global state**: Configuration is instance-based and passed explicitly
//! - **Fail-fast validation**: All newtypes validate on construction
//! - **Thread-safe**: All types are `Send + Sync`
//! - **Async-first**: Designed for use with Tokio async runtime
//! - **Shared limits**: Rate limiting and locks coordinate through the filesystem

pub mod auth;
pub mod clients;
pub mod config;
pub mod error;
pub mod storage;

// Re-export public types at crate root for convenience
pub use auth::{AuthError, AuthState, Credentials, OAuth2Tokens, RefreshTokenGrant, TokenRefresher};
pub use config::{AmoConfig, AmoConfigBuilder, AmoDomain, HostUrl};
pub use error::ConfigError;

// Re-export client types
pub use clients::{
    AmoClient, AmoClientBuilder, AmoError, ApiResponseError, DebugSink, InvalidRequestError,
    RequestInterceptor, RequestMethod, ResponseBody,
};

// Re-export storage types
pub use storage::{LockHandle, LockableEntity};
