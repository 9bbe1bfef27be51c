//! The amoCRM API client.
//!
//! [`AmoClient`] owns everything a request needs: the authenticated
//! subdomains, the shared rate limiter, the entity lock manager, the
//! transport, and the last request/response for diagnostics.
//!
//! # Request Pipeline
//!
//! 1. Resolve the [`AuthState`] of the requested (or last authenticated) subdomain
//! 2. Build the URL, headers and body
//! 3. Take a token from the rate limiter, waiting if the bucket is empty
//! 4. Send through the [`Transport`]
//! 5. Classify the response; on HTTP 401 re-authenticate once and retry once
//!
//! # Example
//!
//! ```rust,ignore
//! use amocrm_api::{AmoClient, AmoConfig, OAuth2Tokens, RequestMethod};
//! use serde_json::json;
//!
//! let client = AmoClient::new(AmoConfig::default())?;
//! client.authenticate_oauth2("mycompany", OAuth2Tokens::new("access-token", None))?;
//!
//! let leads = client
//!     .request("/api/v4/leads", RequestMethod::Get, &json!({"limit": 50}), None)
//!     .await?;
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;

use crate::auth::registry::AuthRegistry;
use crate::auth::{AuthError, AuthState, Credentials, OAuth2Tokens, TokenRefresher};
use crate::clients::debug_log::{DebugLogger, DebugSink};
use crate::clients::errors::AmoError;
use crate::clients::http_request::{RequestBuilder, RequestDescriptor, RequestMethod};
use crate::clients::http_response::{classify, unescape_unicode, Outcome, ResponseBody};
use crate::clients::transport::{HttpTransport, RequestInterceptor, Transport};
use crate::config::AmoConfig;
use crate::error::ConfigError;
use crate::storage::{CookieJar, LockHandle, LockManager, LockableEntity, RateLimiter};

/// Legacy login endpoint.
pub const AUTH_PATH: &str = "/private/api/auth.php?type=json";

#[derive(Debug, Default)]
struct LastExchange {
    request: Option<RequestDescriptor>,
    response: Option<String>,
}

/// Client for the amoCRM REST API.
///
/// # Thread Safety
///
/// `AmoClient` is `Send + Sync`; share it between tasks with an `Arc`.
pub struct AmoClient {
    config: AmoConfig,
    transport: Arc<dyn Transport>,
    auth: AuthRegistry,
    rate_limiter: RateLimiter,
    locks: LockManager,
    cookies: CookieJar,
    logger: DebugLogger,
    token_refresher: Option<Arc<dyn TokenRefresher>>,
    last_exchange: Mutex<LastExchange>,
}

// Verify AmoClient is Send + Sync at compile time
const _: fn() = || {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<AmoClient>();
};

impl AmoClient {
    /// Creates a client with the default `reqwest` transport.
    ///
    /// # Errors
    ///
    /// Returns [`AmoError::Storage`] if the storage directories cannot be
    /// created, or [`AmoError::Config`] if the trust-anchor file is invalid.
    pub fn new(config: AmoConfig) -> Result<Self, AmoError> {
        Self::builder(config).build()
    }

    /// Creates a builder for a client with custom collaborators.
    pub fn builder(config: AmoConfig) -> AmoClientBuilder {
        AmoClientBuilder::new(config)
    }

    /// Returns the client configuration.
    #[must_use]
    pub const fn config(&self) -> &AmoConfig {
        &self.config
    }

    /// Normalizes a subdomain into a fully-qualified account host.
    ///
    /// See [`AmoDomain::qualify`](crate::AmoDomain::qualify).
    #[must_use]
    pub fn get_domain(&self, subdomain: &str) -> String {
        self.config.get_domain(subdomain)
    }

    /// Establishes a legacy cookie-based session.
    ///
    /// Posts the login and API hash to the login endpoint; the session cookie
    /// lands in the account's cookie jar. The credentials are kept so the
    /// session can be re-established after a 401.
    ///
    /// # Errors
    ///
    /// Returns [`AmoError::Config`] for a malformed subdomain and
    /// [`AmoError::Auth`] if the login request fails or amoCRM rejects the
    /// credentials.
    pub async fn authenticate(
        &self,
        subdomain: &str,
        credentials: Credentials,
    ) -> Result<AuthState, AmoError> {
        validate_subdomain(subdomain)?;
        let domain = self.get_domain(subdomain);
        let state = AuthState::legacy(subdomain, &domain, self.cookies.path_for(&domain));

        self.login(&state, &credentials).await?;

        tracing::debug!(%subdomain, "Authenticated legacy session");
        self.auth.insert(state.clone(), Some(credentials));
        Ok(state)
    }

    /// Establishes an OAuth 2.0 session from already-obtained tokens.
    ///
    /// # Errors
    ///
    /// Returns [`AmoError::Config`] for a malformed subdomain and
    /// [`AuthError::EmptyAccessToken`] (as [`AmoError::Auth`]) if the access
    /// token is empty.
    pub fn authenticate_oauth2(
        &self,
        subdomain: &str,
        tokens: OAuth2Tokens,
    ) -> Result<AuthState, AmoError> {
        validate_subdomain(subdomain)?;
        if tokens.access_token.trim().is_empty() {
            return Err(AuthError::EmptyAccessToken {
                subdomain: subdomain.to_string(),
            }
            .into());
        }

        let state = AuthState::oauth2(subdomain, self.get_domain(subdomain), tokens);
        tracing::debug!(%subdomain, "Authenticated OAuth 2.0 session");
        self.auth.insert(state.clone(), None);
        Ok(state)
    }

    /// Returns the current auth state of `subdomain`.
    #[must_use]
    pub fn auth_state(&self, subdomain: &str) -> Option<AuthState> {
        self.auth.get(subdomain)
    }

    /// Returns the subdomain used when a request names none.
    #[must_use]
    pub fn default_subdomain(&self) -> Option<String> {
        self.auth.last_subdomain()
    }

    /// Sends a request and returns the decoded response body.
    ///
    /// Without a `subdomain` the request goes to the last authenticated one.
    ///
    /// # Errors
    ///
    /// - [`AmoError::AuthRequired`] if the subdomain has no session
    /// - [`AmoError::InvalidRequest`] if `params` cannot be encoded
    /// - [`AmoError::Transport`] on network, TLS or timeout failures
    /// - [`AmoError::Decoding`] if a success response is not valid JSON
    /// - [`AmoError::Api`] for error statuses and embedded item errors
    /// - [`AmoError::AuthExpiredRetryFailed`] if a 401 could not be recovered
    pub async fn request<P: Serialize + ?Sized>(
        &self,
        path: &str,
        method: RequestMethod,
        params: &P,
        subdomain: Option<&str>,
    ) -> Result<ResponseBody, AmoError> {
        let mut state = self.auth.resolve(subdomain)?;
        let descriptor = RequestDescriptor::new(path, method, params, state.subdomain.clone())?;
        self.record_request(&descriptor);

        let mut retried = false;
        loop {
            match self.execute(&descriptor, &state).await? {
                Outcome::Success(body) => return Ok(body),
                Outcome::AuthExpired(error) if retried => return Err(error.into()),
                Outcome::AuthExpired(_) => {
                    let subdomain = state.subdomain.clone();
                    tracing::debug!(%subdomain, "Session expired, re-authenticating");
                    state = self.reauthenticate(&state).await.map_err(|source| {
                        AmoError::AuthExpiredRetryFailed { subdomain, source }
                    })?;
                    retried = true;
                }
            }
        }
    }

    /// Sends a `GET` request.
    ///
    /// # Errors
    ///
    /// See [`AmoClient::request`].
    pub async fn get<P: Serialize + ?Sized>(
        &self,
        path: &str,
        params: &P,
        subdomain: Option<&str>,
    ) -> Result<ResponseBody, AmoError> {
        self.request(path, RequestMethod::Get, params, subdomain)
            .await
    }

    /// Sends a JSON `POST` request.
    ///
    /// # Errors
    ///
    /// See [`AmoClient::request`].
    pub async fn post<P: Serialize + ?Sized>(
        &self,
        path: &str,
        params: &P,
        subdomain: Option<&str>,
    ) -> Result<ResponseBody, AmoError> {
        self.request(path, RequestMethod::Post, params, subdomain)
            .await
    }

    /// Sends a form-encoded `AJAX` request.
    ///
    /// # Errors
    ///
    /// See [`AmoClient::request`].
    pub async fn ajax<P: Serialize + ?Sized>(
        &self,
        path: &str,
        params: &P,
        subdomain: Option<&str>,
    ) -> Result<ResponseBody, AmoError> {
        self.request(path, RequestMethod::Ajax, params, subdomain)
            .await
    }

    /// Returns the raw body of the last response, optionally with `\uXXXX`
    /// sequences decoded.
    #[must_use]
    pub fn last_response(&self, unescape: bool) -> Option<String> {
        let last = self.last_exchange();
        last.response.as_deref().map(|body| {
            if unescape {
                unescape_unicode(body)
            } else {
                body.to_string()
            }
        })
    }

    /// Returns the last request issued through [`AmoClient::request`] or a login.
    #[must_use]
    pub fn last_request(&self) -> Option<RequestDescriptor> {
        self.last_exchange().request.clone()
    }

    /// Locks `entity` for an update, waiting while another holder has it.
    ///
    /// # Errors
    ///
    /// Returns [`AmoError::Storage`] if the lock file cannot be used.
    pub async fn lock_entity(&self, entity: &impl LockableEntity) -> Result<LockHandle, AmoError> {
        let key = entity.lock_key();
        let handle = self.locks.acquire(&key, None).await?;
        self.logger.locked(&key);
        Ok(handle)
    }

    /// Locks `entity` only if it is not locked already.
    ///
    /// # Errors
    ///
    /// Returns [`AmoError::Storage`] if the lock file cannot be used.
    pub fn try_lock_entity(
        &self,
        entity: &impl LockableEntity,
    ) -> Result<Option<LockHandle>, AmoError> {
        let key = entity.lock_key();
        let handle = self.locks.try_acquire(&key, None)?;
        if handle.is_some() {
            self.logger.locked(&key);
        }
        Ok(handle)
    }

    /// Releases an entity lock. `None` and already-released handles are ignored.
    pub fn unlock_entity(&self, handle: Option<LockHandle>) {
        if let Some(mut handle) = handle {
            if handle.is_acquired() {
                handle.release();
                self.logger.unlocked(handle.resource_key());
            }
        }
    }

    /// Returns the shared rate limiter.
    #[must_use]
    pub const fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Returns the entity lock manager.
    #[must_use]
    pub const fn lock_manager(&self) -> &LockManager {
        &self.locks
    }

    /// Returns the random id tagging this client's debug lines.
    #[must_use]
    pub fn uniq_id(&self) -> &str {
        self.logger.uniq_id()
    }

    /// Returns how many requests this client has sent.
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.logger.current()
    }

    /// Runs one attempt: build, rate limit, send, classify.
    async fn execute(
        &self,
        descriptor: &RequestDescriptor,
        state: &AuthState,
    ) -> Result<Outcome, AmoError> {
        let prepared = RequestBuilder::new(&self.config).build(descriptor, state)?;

        self.rate_limiter.acquire_token(1).await?;

        let number = self.logger.next_request();
        self.logger.request(number, &prepared);

        let raw = self.transport.send(&prepared).await?;

        self.logger
            .response(number, raw.elapsed, raw.status, &raw.body);
        self.last_exchange().response = Some(raw.body.clone());

        classify(&raw, &prepared, self.config.success_status_codes())
    }

    /// Posts the legacy login form for `state`.
    async fn login(&self, state: &AuthState, credentials: &Credentials) -> Result<(), AuthError> {
        let login_failed = |source: AmoError| AuthError::LoginFailed {
            subdomain: state.subdomain.clone(),
            source: Box::new(source),
        };

        let params = serde_json::json!({
            "USER_LOGIN": credentials.login(),
            "USER_HASH": credentials.hash(),
        });
        let descriptor = RequestDescriptor::new(
            AUTH_PATH,
            RequestMethod::Ajax,
            &params,
            state.subdomain.clone(),
        )
        .map_err(|e| login_failed(e.into()))?;
        self.record_request(&descriptor);

        let body = match self
            .execute(&descriptor, state)
            .await
            .map_err(login_failed)?
        {
            Outcome::Success(body) => body,
            Outcome::AuthExpired(error) => return Err(login_failed(error.into())),
        };

        let accepted = body
            .json()
            .and_then(|value| value.pointer("/response/auth"))
            .map_or(false, |auth| auth == &Value::Bool(true));

        if accepted {
            Ok(())
        } else {
            Err(AuthError::LoginRejected {
                subdomain: state.subdomain.clone(),
            })
        }
    }

    /// Renews an expired session and returns the updated state.
    async fn reauthenticate(&self, state: &AuthState) -> Result<AuthState, AuthError> {
        if state.is_oauth2 {
            let refresher =
                self.token_refresher
                    .as_ref()
                    .ok_or_else(|| AuthError::NoTokenRefresher {
                        subdomain: state.subdomain.clone(),
                    })?;

            let tokens = refresher.refresh(state).await?;
            if tokens.access_token.trim().is_empty() {
                return Err(AuthError::EmptyAccessToken {
                    subdomain: state.subdomain.clone(),
                });
            }

            let updated = self
                .auth
                .update_tokens(&state.subdomain, tokens.clone())
                .unwrap_or_else(|| {
                    let mut updated = state.clone();
                    updated.apply_tokens(tokens);
                    updated
                });
            tracing::debug!(subdomain = %state.subdomain, "Renewed OAuth 2.0 session");
            return Ok(updated);
        }

        let credentials =
            self.auth
                .credentials(&state.subdomain)
                .ok_or_else(|| AuthError::MissingCredentials {
                    subdomain: state.subdomain.clone(),
                })?;
        self.login(state, &credentials).await?;
        tracing::debug!(subdomain = %state.subdomain, "Renewed legacy session");
        Ok(state.clone())
    }

    fn record_request(&self, descriptor: &RequestDescriptor) {
        self.last_exchange().request = Some(descriptor.clone());
    }

    fn last_exchange(&self) -> std::sync::MutexGuard<'_, LastExchange> {
        self.last_exchange
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Accepts bare account names and fully-qualified account hosts.
fn validate_subdomain(subdomain: &str) -> Result<(), ConfigError> {
    let valid = !subdomain.is_empty()
        && !subdomain.starts_with(['.', '-'])
        && !subdomain.ends_with('.')
        && subdomain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');

    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidSubdomain {
            subdomain: subdomain.to_string(),
        })
    }
}

impl std::fmt::Debug for AmoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmoClient")
            .field("config", &self.config)
            .field("auth", &self.auth)
            .field("rate_limiter", &self.rate_limiter)
            .field("locks", &self.locks)
            .field("logger", &self.logger)
            .field("has_token_refresher", &self.token_refresher.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`AmoClient`].
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use amocrm_api::{AmoClient, AmoConfig, RefreshTokenGrant};
///
/// let client = AmoClient::builder(AmoConfig::default())
///     .token_refresher(Arc::new(RefreshTokenGrant::new("id", "secret", "https://app.example.com")))
///     .build()?;
/// ```
#[must_use]
pub struct AmoClientBuilder {
    config: AmoConfig,
    transport: Option<Arc<dyn Transport>>,
    interceptor: Option<Arc<dyn RequestInterceptor>>,
    token_refresher: Option<Arc<dyn TokenRefresher>>,
    debug_sink: Option<Arc<dyn DebugSink>>,
}

impl AmoClientBuilder {
    fn new(config: AmoConfig) -> Self {
        Self {
            config,
            transport: None,
            interceptor: None,
            token_refresher: None,
            debug_sink: None,
        }
    }

    /// Replaces the default `reqwest` transport.
    ///
    /// An [`interceptor`](Self::interceptor) only applies to the default transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Installs a hook that sees every outbound request before it is sent.
    pub fn interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Sets the strategy used to renew OAuth 2.0 tokens after a 401.
    pub fn token_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.token_refresher = Some(refresher);
        self
    }

    /// Forwards debug trace lines to `sink`, whether or not debug is enabled.
    pub fn debug_sink(mut self, sink: Arc<dyn DebugSink>) -> Self {
        self.debug_sink = Some(sink);
        self
    }

    /// Builds the client, creating the storage directories.
    ///
    /// # Errors
    ///
    /// Returns [`AmoError::Storage`] if the storage directories cannot be
    /// created, or [`AmoError::Config`] if the trust-anchor file is invalid.
    pub fn build(self) -> Result<AmoClient, AmoError> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => {
                let mut transport = HttpTransport::new(&self.config)?;
                if let Some(interceptor) = self.interceptor {
                    transport = transport.with_interceptor(interceptor);
                }
                Arc::new(transport)
            }
        };

        Ok(AmoClient {
            transport,
            auth: AuthRegistry::new(),
            rate_limiter: RateLimiter::from_config(&self.config)?,
            locks: LockManager::from_config(&self.config)?,
            cookies: CookieJar::new(self.config.storage_dir())?,
            logger: DebugLogger::new(self.config.debug(), self.debug_sink),
            token_refresher: self.token_refresher,
            last_exchange: Mutex::new(LastExchange::default()),
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::http_request::PreparedRequest;
    use crate::clients::http_response::RawResponse;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::time::Duration;

    /// Replays canned responses and records what was sent.
    #[derive(Default)]
    struct ScriptedTransport {
        responses: Mutex<VecDeque<(u16, String)>>,
        sent: Mutex<Vec<PreparedRequest>>,
    }

    impl ScriptedTransport {
        fn new(responses: &[(u16, &str)]) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(
                    responses
                        .iter()
                        .map(|(status, body)| (*status, (*body).to_string()))
                        .collect(),
                ),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<PreparedRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: &PreparedRequest) -> Result<RawResponse, AmoError> {
            self.sent.lock().unwrap().push(request.clone());
            let (status, body) = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or((500, String::new()));
            Ok(RawResponse {
                status,
                body,
                elapsed: Duration::from_millis(5),
                headers: HashMap::new(),
            })
        }
    }

    struct StaticRefresher(&'static str);

    #[async_trait]
    impl TokenRefresher for StaticRefresher {
        async fn refresh(&self, _state: &AuthState) -> Result<OAuth2Tokens, AuthError> {
            Ok(OAuth2Tokens::new(self.0, None))
        }
    }

    fn client(
        dir: &tempfile::TempDir,
        transport: Arc<ScriptedTransport>,
        refresher: Option<Arc<dyn TokenRefresher>>,
    ) -> AmoClient {
        let config = AmoConfig::builder()
            .storage_dir(dir.path())
            .throttle(100)
            .refill_per_second(100)
            .build()
            .unwrap();
        let mut builder = AmoClient::builder(config).transport(transport);
        if let Some(refresher) = refresher {
            builder = builder.token_refresher(refresher);
        }
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn test_request_without_auth_fails() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new(&[]);
        let client = client(&dir, transport.clone(), None);

        let result = client.get("/api/v4/leads", &(), None).await;
        assert!(matches!(result, Err(AmoError::AuthRequired { subdomain: None })));
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_subdomain_validation() {
        assert!(validate_subdomain("acme").is_ok());
        assert!(validate_subdomain("acme-2.amocrm.com").is_ok());
        assert!(validate_subdomain("").is_err());
        assert!(validate_subdomain("-acme").is_err());
        assert!(validate_subdomain("acme/../x").is_err());

        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir, ScriptedTransport::new(&[]), None);
        assert!(matches!(
            client.authenticate_oauth2("a b", OAuth2Tokens::new("t", None)),
            Err(AmoError::Config(ConfigError::InvalidSubdomain { .. }))
        ));
    }

    #[tokio::test]
    async fn test_empty_access_token_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir, ScriptedTransport::new(&[]), None);
        let result = client.authenticate_oauth2("acme", OAuth2Tokens::new(" ", None));
        assert!(matches!(
            result,
            Err(AmoError::Auth(AuthError::EmptyAccessToken { .. }))
        ));
        assert!(client.default_subdomain().is_none());
    }

    #[tokio::test]
    async fn test_refresh_and_retry_on_401() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new(&[(401, ""), (200, r#"{"ok":true}"#)]);
        let client = client(
            &dir,
            transport.clone(),
            Some(Arc::new(StaticRefresher("fresh"))),
        );
        client
            .authenticate_oauth2("acme", OAuth2Tokens::new("stale", Some("r".to_string())))
            .unwrap();

        let body = client.get("/api/v4/account", &(), None).await.unwrap();
        assert_eq!(body.json(), Some(&serde_json::json!({"ok": true})));

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].header("Authorization"), Some("Bearer stale"));
        assert_eq!(sent[1].header("Authorization"), Some("Bearer fresh"));
        assert_eq!(
            client.auth_state("acme").unwrap().refresh_token.as_deref(),
            Some("r")
        );
    }

    #[tokio::test]
    async fn test_second_401_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new(&[(401, ""), (401, ""), (200, "{}")]);
        let client = client(
            &dir,
            transport.clone(),
            Some(Arc::new(StaticRefresher("fresh"))),
        );
        client
            .authenticate_oauth2("acme", OAuth2Tokens::new("stale", None))
            .unwrap();

        let result = client.get("/api/v4/account", &(), None).await;
        assert_eq!(result.unwrap_err().api_code(), Some(401));
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_401_without_refresher_fails_retry() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new(&[(401, "")]);
        let client = client(&dir, transport.clone(), None);
        client
            .authenticate_oauth2("acme", OAuth2Tokens::new("stale", None))
            .unwrap();

        let result = client.get("/api/v4/account", &(), None).await;
        assert!(matches!(
            result,
            Err(AmoError::AuthExpiredRetryFailed {
                source: AuthError::NoTokenRefresher { .. },
                ..
            })
        ));
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_legacy_login_and_relogin() {
        let dir = tempfile::tempdir().unwrap();
        let auth_ok = r#"{"response":{"auth":true}}"#;
        let transport = ScriptedTransport::new(&[
            (200, auth_ok),
            (401, ""),
            (200, auth_ok),
            (200, r#"{"id":1}"#),
        ]);
        let client = client(&dir, transport.clone(), None);

        let state = client
            .authenticate("acme", Credentials::new("user@example.com", "hash"))
            .await
            .unwrap();
        assert!(!state.is_oauth2);
        assert_eq!(state.domain, "acme.amocrm.ru");

        client.get("/api/v2/account", &(), None).await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 4);
        assert!(sent[0].url.ends_with(AUTH_PATH));
        assert_eq!(
            sent[0].body.as_deref(),
            Some("USER_LOGIN=user%40example.com&USER_HASH=hash")
        );
        assert!(sent[2].url.ends_with(AUTH_PATH));
        assert_eq!(sent[3].cookie_domain.as_deref(), Some("acme.amocrm.ru"));
    }

    #[tokio::test]
    async fn test_rejected_login() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new(&[(200, r#"{"response":{"auth":false}}"#)]);
        let client = client(&dir, transport, None);

        let result = client
            .authenticate("acme", Credentials::new("user", "wrong"))
            .await;
        assert!(matches!(
            result,
            Err(AmoError::Auth(AuthError::LoginRejected { .. }))
        ));
        assert!(client.auth_state("acme").is_none());
    }

    #[tokio::test]
    async fn test_last_request_and_response() {
        let dir = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new(&[(200, r#"{"name":"\u0414"}"#)]);
        let client = client(&dir, transport, None);
        client
            .authenticate_oauth2("acme", OAuth2Tokens::new("t", None))
            .unwrap();

        assert!(client.last_request().is_none());
        client
            .get("/api/v4/leads", &serde_json::json!({"limit": 1}), None)
            .await
            .unwrap();

        let last = client.last_request().unwrap();
        assert_eq!(last.path, "/api/v4/leads");
        assert_eq!(last.method, RequestMethod::Get);
        assert_eq!(last.subdomain, "acme");
        assert_eq!(
            client.last_response(false).as_deref(),
            Some(r#"{"name":"\u0414"}"#)
        );
        assert_eq!(client.last_response(true).as_deref(), Some("{\"name\":\"\u{0414}\"}"));
        assert_eq!(client.request_count(), 1);
    }

    #[tokio::test]
    async fn test_entity_locks() {
        struct Contact;
        impl LockableEntity for Contact {
            fn entity_type(&self) -> &str {
                "contact"
            }
            fn entity_id(&self) -> u64 {
                9
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let client = client(&dir, ScriptedTransport::new(&[]), None);

        let handle = client.lock_entity(&Contact).await.unwrap();
        assert_eq!(handle.resource_key(), "amo_lock_9_contact");
        assert!(client.try_lock_entity(&Contact).unwrap().is_none());

        client.unlock_entity(Some(handle));
        client.unlock_entity(None);
        assert!(client.try_lock_entity(&Contact).unwrap().is_some());
    }
}
