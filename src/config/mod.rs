//! Configuration types for the amoCRM API client.
//!
//! This module provides the configuration used to construct an
//! [`AmoClient`](crate::AmoClient).
//!
//! # Overview
//!
//! - [`AmoConfig`]: The configuration struct holding all client settings
//! - [`AmoConfigBuilder`]: A builder for constructing [`AmoConfig`] instances
//! - [`AmoDomain`]: A validated vendor domain suffix
//! - [`HostUrl`]: A validated proxy/test host override
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use amocrm_api::{AmoConfig, AmoDomain};
//!
//! let config = AmoConfig::builder()
//!     .amo_domain(AmoDomain::new("amocrm.com").unwrap())
//!     .throttle(3)
//!     .timeout(Duration::from_secs(10))
//!     .storage_dir("/var/lib/myapp/amocrm")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.throttle(), 3);
//! ```

mod newtypes;

pub use newtypes::{AmoDomain, HostUrl};

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Crate version from Cargo.toml.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration for the amoCRM API client.
///
/// # Thread Safety
///
/// `AmoConfig` is `Clone`, `Send`, and `Sync`.
///
/// # Defaults
///
/// | Setting | Default |
/// |---|---|
/// | `debug` | `false` |
/// | `throttle` | 5 tokens |
/// | `refill_per_second` | 5 tokens |
/// | `verify_ssl` | `true` |
/// | `amo_domain` | `amocrm.ru` |
/// | `connect_timeout` / `timeout` | 30 seconds |
/// | `storage_dir` | `storage/` |
/// | `lock_ttl` | 30 seconds |
/// | `success_status_codes` | 200, 202, 204 |
#[derive(Clone, Debug)]
pub struct AmoConfig {
    debug: bool,
    throttle: u32,
    refill_per_second: u32,
    custom_headers: Vec<(String, String)>,
    verify_ssl: bool,
    ssl_certificate_file: Option<PathBuf>,
    amo_domain: AmoDomain,
    user_agent: String,
    connect_timeout: Duration,
    timeout: Duration,
    storage_dir: PathBuf,
    lock_ttl: Duration,
    success_status_codes: Vec<u16>,
    api_host: Option<HostUrl>,
}

impl AmoConfig {
    /// Creates a new builder for constructing an `AmoConfig`.
    #[must_use]
    pub fn builder() -> AmoConfigBuilder {
        AmoConfigBuilder::new()
    }

    /// Returns whether debug tracing of requests and responses is enabled.
    #[must_use]
    pub const fn debug(&self) -> bool {
        self.debug
    }

    /// Returns the rate limiter bucket capacity (maximum burst).
    #[must_use]
    pub const fn throttle(&self) -> u32 {
        self.throttle
    }

    /// Returns the number of tokens added to the bucket every second.
    #[must_use]
    pub const fn refill_per_second(&self) -> u32 {
        self.refill_per_second
    }

    /// Returns the custom headers appended to every request.
    #[must_use]
    pub fn custom_headers(&self) -> &[(String, String)] {
        &self.custom_headers
    }

    /// Returns whether the server certificate is verified.
    #[must_use]
    pub const fn verify_ssl(&self) -> bool {
        self.verify_ssl
    }

    /// Returns the PEM trust-anchor file used instead of the built-in roots.
    #[must_use]
    pub fn ssl_certificate_file(&self) -> Option<&Path> {
        self.ssl_certificate_file.as_deref()
    }

    /// Returns the vendor domain suffix.
    #[must_use]
    pub const fn amo_domain(&self) -> &AmoDomain {
        &self.amo_domain
    }

    /// Returns the `User-Agent` header value.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Returns the connection-establish timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the total request/response exchange timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the directory holding cookie jars, lock files and limiter state.
    #[must_use]
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Returns the time-to-live recorded for entity locks.
    #[must_use]
    pub const fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    /// Returns the HTTP status codes treated as success.
    #[must_use]
    pub fn success_status_codes(&self) -> &[u16] {
        &self.success_status_codes
    }

    /// Returns the host override, if configured.
    #[must_use]
    pub const fn api_host(&self) -> Option<&HostUrl> {
        self.api_host.as_ref()
    }

    /// Normalizes a subdomain into a fully-qualified account host.
    ///
    /// See [`AmoDomain::qualify`].
    #[must_use]
    pub fn get_domain(&self, subdomain: &str) -> String {
        self.amo_domain.qualify(subdomain)
    }

    /// Returns the base URL (`scheme://host`) requests for `subdomain` go to.
    #[must_use]
    pub fn base_url(&self, subdomain: &str) -> String {
        self.api_host.as_ref().map_or_else(
            || format!("https://{}", self.get_domain(subdomain)),
            |host| host.origin().to_string(),
        )
    }
}

impl Default for AmoConfig {
    fn default() -> Self {
        Self {
            debug: false,
            throttle: 5,
            refill_per_second: 5,
            custom_headers: Vec::new(),
            verify_ssl: true,
            ssl_certificate_file: None,
            amo_domain: AmoDomain::default(),
            user_agent: format!("amoCRM-API-client/{SDK_VERSION}"),
            connect_timeout: Duration::from_secs(30),
            timeout: Duration::from_secs(30),
            storage_dir: PathBuf::from("storage"),
            lock_ttl: Duration::from_secs(30),
            success_status_codes: vec![200, 202, 204],
            api_host: None,
        }
    }
}

// Verify AmoConfig is Send + Sync at compile time
const _: fn() = || {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<AmoConfig>();
};

/// Builder for constructing [`AmoConfig`] instances.
///
/// Every field is optional; unset fields take the defaults listed on
/// [`AmoConfig`].
#[derive(Debug, Default)]
pub struct AmoConfigBuilder {
    debug: Option<bool>,
    throttle: Option<u32>,
    refill_per_second: Option<u32>,
    custom_headers: Vec<(String, String)>,
    verify_ssl: Option<bool>,
    ssl_certificate_file: Option<PathBuf>,
    amo_domain: Option<AmoDomain>,
    user_agent: Option<String>,
    connect_timeout: Option<Duration>,
    timeout: Option<Duration>,
    storage_dir: Option<PathBuf>,
    lock_ttl: Option<Duration>,
    success_status_codes: Option<Vec<u16>>,
    api_host: Option<HostUrl>,
}

impl AmoConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables debug tracing of requests and responses.
    #[must_use]
    pub const fn debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Sets the bucket capacity, i.e. the maximum request burst.
    ///
    /// amoCRM rejects more than 7 requests per second per account.
    #[must_use]
    pub const fn throttle(mut self, throttle: u32) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Sets how many tokens are added to the bucket every second.
    #[must_use]
    pub const fn refill_per_second(mut self, rate: u32) -> Self {
        self.refill_per_second = Some(rate);
        self
    }

    /// Adds a custom header appended to every request.
    #[must_use]
    pub fn custom_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.push((name.into(), value.into()));
        self
    }

    /// Enables or disables server certificate verification.
    #[must_use]
    pub const fn verify_ssl(mut self, verify: bool) -> Self {
        self.verify_ssl = Some(verify);
        self
    }

    /// Sets a PEM file of trust anchors used instead of the built-in roots.
    #[must_use]
    pub fn ssl_certificate_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssl_certificate_file = Some(path.into());
        self
    }

    /// Sets the vendor domain suffix.
    #[must_use]
    pub fn amo_domain(mut self, domain: AmoDomain) -> Self {
        self.amo_domain = Some(domain);
        self
    }

    /// Sets the `User-Agent` header value.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Sets the connection-establish timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the total exchange timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the storage directory for cookie jars, locks and limiter state.
    #[must_use]
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    /// Sets the time-to-live recorded for entity locks.
    #[must_use]
    pub const fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = Some(ttl);
        self
    }

    /// Sets the HTTP status codes treated as success.
    #[must_use]
    pub fn success_status_codes(mut self, codes: impl Into<Vec<u16>>) -> Self {
        self.success_status_codes = Some(codes.into());
        self
    }

    /// Routes all requests to `host` instead of the account domain.
    #[must_use]
    pub fn api_host(mut self, host: HostUrl) -> Self {
        self.api_host = Some(host);
        self
    }

    /// Builds the [`AmoConfig`], validating the settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the throttle or refill rate is zero, the
    /// success status set or user agent is empty, or a custom header is not a
    /// valid HTTP header.
    pub fn build(self) -> Result<AmoConfig, ConfigError> {
        let defaults = AmoConfig::default();

        let throttle = self.throttle.unwrap_or(defaults.throttle);
        if throttle == 0 {
            return Err(ConfigError::InvalidRateLimit {
                reason: "throttle must be greater than zero".to_string(),
            });
        }
        let refill_per_second = self.refill_per_second.unwrap_or(defaults.refill_per_second);
        if refill_per_second == 0 {
            return Err(ConfigError::InvalidRateLimit {
                reason: "refill_per_second must be greater than zero".to_string(),
            });
        }

        let success_status_codes = self
            .success_status_codes
            .unwrap_or(defaults.success_status_codes);
        if success_status_codes.is_empty() {
            return Err(ConfigError::EmptySuccessStatusCodes);
        }

        let user_agent = self.user_agent.unwrap_or(defaults.user_agent);
        if user_agent.trim().is_empty() {
            return Err(ConfigError::EmptyUserAgent);
        }

        for (name, value) in &self.custom_headers {
            let valid = reqwest::header::HeaderName::from_bytes(name.as_bytes()).is_ok()
                && reqwest::header::HeaderValue::from_str(value).is_ok();
            if !valid {
                return Err(ConfigError::InvalidHeader { name: name.clone() });
            }
        }

        Ok(AmoConfig {
            debug: self.debug.unwrap_or(defaults.debug),
            throttle,
            refill_per_second,
            custom_headers: self.custom_headers,
            verify_ssl: self.verify_ssl.unwrap_or(defaults.verify_ssl),
            ssl_certificate_file: self.ssl_certificate_file,
            amo_domain: self.amo_domain.unwrap_or(defaults.amo_domain),
            user_agent,
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            storage_dir: self.storage_dir.unwrap_or(defaults.storage_dir),
            lock_ttl: self.lock_ttl.unwrap_or(defaults.lock_ttl),
            success_status_codes,
            api_host: self.api_host,
        })
    }
}
