//! HTTP transport for amoCRM requests.
//!
//! The [`Transport`] trait is the seam between the request pipeline and the
//! network: it takes a [`PreparedRequest`] and returns the raw status, body
//! and latency. [`HttpTransport`] is the `reqwest` implementation:
//!
//! - TLS 1.2 or newer via rustls
//! - Connect and total timeouts from [`AmoConfig`]
//! - Certificate verification on by default, optionally against a PEM
//!   trust-anchor file instead of the built-in roots
//! - Cookie replay and persistence for legacy sessions through a
//!   [`CookieJar`]
//! - An optional [`RequestInterceptor`] that sees every outbound request last
//!
//! Any network, TLS or timeout failure becomes [`AmoError::Transport`] and the
//! response is never decoded.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::tls::Version;
use reqwest::{Certificate, Method};

use crate::clients::errors::AmoError;
use crate::clients::http_request::{PreparedRequest, RequestMethod};
use crate::clients::http_response::RawResponse;
use crate::config::AmoConfig;
use crate::error::ConfigError;
use crate::storage::CookieJar;

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// Sends prepared requests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the raw response.
    ///
    /// # Errors
    ///
    /// Returns [`AmoError::Transport`] for network failures and
    /// [`AmoError::Storage`] if the cookie jar cannot be accessed.
    async fn send(&self, request: &PreparedRequest) -> Result<RawResponse, AmoError>;
}

/// Inspects or mutates outbound requests just before they are sent.
///
/// # Example
///
/// ```rust
/// use amocrm_api::clients::RequestInterceptor;
///
/// struct TraceHeader;
///
/// impl RequestInterceptor for TraceHeader {
///     fn before_send(&self, request: &mut reqwest::Request) {
///         request
///             .headers_mut()
///             .insert("x-trace-id", reqwest::header::HeaderValue::from_static("abc"));
///     }
/// }
/// ```
pub trait RequestInterceptor: Send + Sync {
    /// Called with the fully built request.
    fn before_send(&self, request: &mut reqwest::Request);
}

/// `reqwest`-based [`Transport`].
pub struct HttpTransport {
    client: reqwest::Client,
    cookies: CookieJar,
    interceptor: Option<Arc<dyn RequestInterceptor>>,
}

// Verify HttpTransport is Send + Sync at compile time
const _: fn() = || {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<HttpTransport>();
};

impl HttpTransport {
    /// Creates a transport from the client configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AmoError::Config`] if the trust-anchor file cannot be
    /// loaded, [`AmoError::Storage`] if the cookie directory cannot be
    /// created, or [`AmoError::Transport`] if the TLS backend fails to
    /// initialize.
    pub fn new(config: &AmoConfig) -> Result<Self, AmoError> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .min_tls_version(Version::TLS_1_2)
            .connect_timeout(config.connect_timeout())
            .timeout(config.timeout());

        if config.verify_ssl() {
            if let Some(path) = config.ssl_certificate_file() {
                builder = builder.tls_built_in_root_certs(false);
                for certificate in load_certificates(path)? {
                    builder = builder.add_root_certificate(certificate);
                }
            }
        } else {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().map_err(|e| AmoError::Transport {
            message: e.to_string(),
            request: "HTTP client initialization".to_string(),
        })?;

        Ok(Self {
            client,
            cookies: CookieJar::new(config.storage_dir())?,
            interceptor: None,
        })
    }

    /// Installs a request interceptor.
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Returns the cookie jar used for legacy sessions.
    #[must_use]
    pub const fn cookie_jar(&self) -> &CookieJar {
        &self.cookies
    }

    fn build_request(&self, request: &PreparedRequest) -> Result<reqwest::Request, AmoError> {
        let method = match request.method {
            RequestMethod::Get => Method::GET,
            RequestMethod::Post | RequestMethod::Ajax => Method::POST,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(domain) = &request.cookie_domain {
            if let Some(cookie) = self.cookies.cookie_header(domain)? {
                builder = builder.header(COOKIE, cookie);
            }
        }

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        builder
            .build()
            .map_err(|e| transport_error(&e, request))
    }

    /// Parses response headers into a `HashMap`.
    fn parse_response_headers(
        headers: &reqwest::header::HeaderMap,
    ) -> HashMap<String, Vec<String>> {
        let mut result: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in headers {
            let key = name.as_str().to_lowercase();
            let value = value.to_str().unwrap_or_default().to_string();
            result.entry(key).or_default().push(value);
        }
        result
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("cookies", &self.cookies)
            .field("has_interceptor", &self.interceptor.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &PreparedRequest) -> Result<RawResponse, AmoError> {
        let mut http_request = self.build_request(request)?;
        if let Some(interceptor) = &self.interceptor {
            interceptor.before_send(&mut http_request);
        }

        let start = Instant::now();
        let response = self
            .client
            .execute(http_request)
            .await
            .map_err(|e| transport_error(&e, request))?;

        let status = response.status().as_u16();
        let headers = Self::parse_response_headers(response.headers());

        if let Some(domain) = &request.cookie_domain {
            let set_cookies: Vec<&str> = response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .collect();
            self.cookies.store(domain, &set_cookies)?;
        }

        let body = response
            .text()
            .await
            .map_err(|e| transport_error(&e, request))?;

        Ok(RawResponse {
            status,
            body,
            elapsed: start.elapsed(),
            headers,
        })
    }
}

fn transport_error(error: &reqwest::Error, request: &PreparedRequest) -> AmoError {
    AmoError::Transport {
        message: error_chain(error),
        request: request.describe(),
    }
}

/// Joins an error with its sources, since `reqwest` hides the root cause.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Loads every certificate of a PEM bundle.
fn load_certificates(path: &Path) -> Result<Vec<Certificate>, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidCertificate {
        path: path.display().to_string(),
        reason,
    };

    let pem = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;

    let mut certificates = Vec::new();
    let mut rest = pem.as_str();
    while let Some(start) = rest.find(PEM_BEGIN) {
        let block = &rest[start..];
        let end = block
            .find(PEM_END)
            .ok_or_else(|| invalid("unterminated certificate block".to_string()))?
            + PEM_END.len();
        let certificate =
            Certificate::from_pem(block[..end].as_bytes()).map_err(|e| invalid(e.to_string()))?;
        certificates.push(certificate);
        rest = &block[end..];
    }

    if certificates.is_empty() {
        return Err(invalid("no certificates found".to_string()));
    }
    Ok(certificates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> AmoConfig {
        AmoConfig::builder().storage_dir(dir).build().unwrap()
    }

    #[test]
    fn test_transport_creates_cookie_directory() {
        let dir = tempfile::tempdir().unwrap();
        let _transport = HttpTransport::new(&config(dir.path())).unwrap();
        assert!(dir.path().join("cookies").is_dir());
    }

    #[test]
    fn test_transport_without_verification() {
        let dir = tempfile::tempdir().unwrap();
        let config = AmoConfig::builder()
            .storage_dir(dir.path())
            .verify_ssl(false)
            .build()
            .unwrap();
        assert!(HttpTransport::new(&config).is_ok());
    }

    #[test]
    fn test_missing_certificate_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = AmoConfig::builder()
            .storage_dir(dir.path())
            .ssl_certificate_file(dir.path().join("missing.pem"))
            .build()
            .unwrap();
        assert!(matches!(
            HttpTransport::new(&config),
            Err(AmoError::Config(ConfigError::InvalidCertificate { .. }))
        ));
    }

    #[test]
    fn test_certificate_file_without_certificates_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pem = dir.path().join("empty.pem");
        std::fs::write(&pem, "nothing here").unwrap();
        assert!(matches!(
            load_certificates(&pem),
            Err(ConfigError::InvalidCertificate { reason, .. }) if reason == "no certificates found"
        ));
    }

    #[test]
    fn test_build_request_replays_cookies_for_legacy_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let transport = HttpTransport::new(&config(dir.path())).unwrap();
        transport
            .cookie_jar()
            .store("acme.amocrm.ru", &["session_id=abc"])
            .unwrap();

        let mut request = PreparedRequest {
            method: RequestMethod::Ajax,
            url: "https://acme.amocrm.ru/ajax/test".to_string(),
            headers: vec![("X-Requested-With".to_string(), "XMLHttpRequest".to_string())],
            body: Some("a=1".to_string()),
            cookie_domain: Some("acme.amocrm.ru".to_string()),
        };

        let built = transport.build_request(&request).unwrap();
        assert_eq!(built.method(), Method::POST);
        assert_eq!(built.headers().get(COOKIE).unwrap(), "session_id=abc");
        assert_eq!(built.headers().get("x-requested-with").unwrap(), "XMLHttpRequest");

        request.cookie_domain = None;
        let built = transport.build_request(&request).unwrap();
        assert!(built.headers().get(COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_connection_failure_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let transport = HttpTransport::new(&config(dir.path())).unwrap();
        let request = PreparedRequest {
            method: RequestMethod::Get,
            url: "http://127.0.0.1:1/api/v4/account".to_string(),
            headers: Vec::new(),
            body: None,
            cookie_domain: None,
        };

        match transport.send(&request).await {
            Err(AmoError::Transport { message, request }) => {
                assert!(!message.is_empty());
                assert_eq!(request, "GET: http://127.0.0.1:1/api/v4/account");
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }
}
