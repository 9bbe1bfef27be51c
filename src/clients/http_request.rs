//! Request construction for the amoCRM API.
//!
//! This module turns a [`RequestDescriptor`] (path, method, params, subdomain)
//! and the subdomain's [`AuthState`] into a [`PreparedRequest`]: the final URL,
//! header list and body that the transport sends.
//!
//! # Request Types
//!
//! | Method | URL | Body | Extra headers |
//! |---|---|---|---|
//! | `GET` | params appended as a query string | none | |
//! | `POST` | path only | params as JSON | `Content-Type: application/json` |
//! | `AJAX` | path only | params form-encoded | `X-Requested-With: XMLHttpRequest` |
//!
//! Query strings and form bodies follow PHP `http_build_query` conventions:
//! nested maps become `a[b]=..`, lists become `a[0]=..`, booleans become
//! `1`/`0` and nulls are skipped.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use crate::auth::AuthState;
use crate::clients::errors::InvalidRequestError;
use crate::config::AmoConfig;

/// Ordered request parameters.
pub type Params = serde_json::Map<String, Value>;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Request types supported by the amoCRM API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestMethod {
    /// Read request; params go to the query string.
    Get,
    /// JSON write request.
    Post,
    /// Form-encoded `POST` imitating a browser XHR call.
    Ajax,
}

impl RequestMethod {
    /// Returns the HTTP verb sent on the wire.
    #[must_use]
    pub const fn http_verb(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post | Self::Ajax => "POST",
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Ajax => write!(f, "AJAX"),
        }
    }
}

impl FromStr for RequestMethod {
    type Err = InvalidRequestError;

    /// Parses `GET`, `POST` or `AJAX`.
    ///
    /// ```rust
    /// use amocrm_api::RequestMethod;
    ///
    /// assert_eq!("AJAX".parse::<RequestMethod>().unwrap(), RequestMethod::Ajax);
    /// assert!("PATCH".parse::<RequestMethod>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "AJAX" => Ok(Self::Ajax),
            other => Err(InvalidRequestError::InvalidMethod {
                method: other.to_string(),
            }),
        }
    }
}

/// A request as issued by the caller, before URL and header construction.
///
/// Retained by the client as the "last request" diagnostic.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestDescriptor {
    /// Path relative to the account host, e.g. `/api/v4/leads`.
    pub path: String,
    /// The request type.
    pub method: RequestMethod,
    /// Parameters in caller order.
    pub params: Params,
    /// The resolved subdomain the request is sent to.
    pub subdomain: String,
}

impl RequestDescriptor {
    /// Creates a descriptor, converting `params` into an ordered mapping.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidRequestError::Encoding`] if `params` does not
    /// serialize to a JSON object (or null).
    pub fn new<P: Serialize + ?Sized>(
        path: impl Into<String>,
        method: RequestMethod,
        params: &P,
        subdomain: impl Into<String>,
    ) -> Result<Self, InvalidRequestError> {
        Ok(Self {
            path: path.into(),
            method,
            params: to_params(params)?,
            subdomain: subdomain.into(),
        })
    }
}

/// Converts any serializable value into request parameters.
///
/// `()` and `None` become an empty mapping; any other non-object value is
/// rejected.
///
/// # Errors
///
/// Returns [`InvalidRequestError::Encoding`] if serialization fails or the
/// value is not a JSON object.
pub fn to_params<P: Serialize + ?Sized>(params: &P) -> Result<Params, InvalidRequestError> {
    let value = serde_json::to_value(params).map_err(|e| InvalidRequestError::Encoding {
        message: e.to_string(),
    })?;

    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Params::new()),
        other => Err(InvalidRequestError::Encoding {
            message: format!("request parameters must be a map, got {other}"),
        }),
    }
}

/// A fully built request, ready for the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedRequest {
    /// The request type.
    pub method: RequestMethod,
    /// The absolute URL.
    pub url: String,
    /// Headers in send order; names are unique case-insensitively.
    pub headers: Vec<(String, String)>,
    /// The encoded body (`POST` and `AJAX` only).
    pub body: Option<String>,
    /// The account host whose cookie jar is replayed (legacy sessions only).
    pub cookie_domain: Option<String>,
}

impl PreparedRequest {
    /// Returns the value of a header, matched case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the request label used in logs and error messages:
    /// `GET`, `POST` or `POST (AJAX)`.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self.method {
            RequestMethod::Get => "GET",
            RequestMethod::Post => "POST",
            RequestMethod::Ajax => "POST (AJAX)",
        }
    }

    /// Describes the request for error messages, e.g. `POST: https://.. {"a":1}`.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.body {
            Some(body) => format!("{}: {} {}", self.label(), self.url, body),
            None => format!("{}: {}", self.label(), self.url),
        }
    }
}

/// Builds [`PreparedRequest`]s from descriptors using the client configuration.
#[derive(Debug)]
pub(crate) struct RequestBuilder<'a> {
    config: &'a AmoConfig,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) const fn new(config: &'a AmoConfig) -> Self {
        Self { config }
    }

    /// Builds the request for `descriptor` under `state`.
    pub(crate) fn build(
        &self,
        descriptor: &RequestDescriptor,
        state: &AuthState,
    ) -> Result<PreparedRequest, InvalidRequestError> {
        let mut url = format!("{}{}", self.config.base_url(&state.domain), descriptor.path);
        let mut headers = vec![(
            "User-Agent".to_string(),
            self.config.user_agent().to_string(),
        )];

        let bearer = state.bearer_token();
        if let Some(token) = bearer {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }

        let body = match descriptor.method {
            RequestMethod::Get => {
                let query = http_build_query(&descriptor.params);
                if !query.is_empty() {
                    url.push(if url.contains('?') { '&' } else { '?' });
                    url.push_str(&query);
                }
                None
            }
            RequestMethod::Post => {
                let json = serde_json::to_string(&descriptor.params).map_err(|e| {
                    InvalidRequestError::Encoding {
                        message: e.to_string(),
                    }
                })?;
                headers.push(("Content-Type".to_string(), JSON_CONTENT_TYPE.to_string()));
                Some(json)
            }
            RequestMethod::Ajax => {
                headers.push((
                    "X-Requested-With".to_string(),
                    "XMLHttpRequest".to_string(),
                ));
                headers.push(("Content-Type".to_string(), FORM_CONTENT_TYPE.to_string()));
                Some(http_build_query(&descriptor.params))
            }
        };

        merge_custom_headers(&mut headers, self.config.custom_headers(), bearer.is_some());

        Ok(PreparedRequest {
            method: descriptor.method,
            url,
            headers,
            body,
            cookie_domain: (!state.is_oauth2).then(|| state.domain.clone()),
        })
    }
}

/// Appends custom headers, replacing defaults with the same name.
///
/// A custom `Authorization` header never overrides an active bearer token.
fn merge_custom_headers(
    headers: &mut Vec<(String, String)>,
    custom: &[(String, String)],
    bearer_active: bool,
) {
    for (name, value) in custom {
        if bearer_active && name.eq_ignore_ascii_case("authorization") {
            tracing::warn!("Ignoring custom Authorization header while a bearer token is active");
            continue;
        }

        match headers
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some(existing) => *existing = (name.clone(), value.clone()),
            None => headers.push((name.clone(), value.clone())),
        }
    }
}

/// Encodes parameters the way PHP's `http_build_query` does.
///
/// ```rust
/// use amocrm_api::clients::http_build_query;
/// use serde_json::json;
///
/// let params = json!({"filter": {"id": [1, 2]}, "with": "contacts"});
/// let query = http_build_query(params.as_object().unwrap());
/// assert_eq!(query, "filter%5Bid%5D%5B0%5D=1&filter%5Bid%5D%5B1%5D=2&with=contacts");
/// ```
#[must_use]
pub fn http_build_query(params: &Params) -> String {
    let mut pairs = Vec::new();
    for (key, value) in params {
        push_pairs(&mut pairs, key.clone(), value);
    }
    pairs.join("&")
}

fn push_pairs(pairs: &mut Vec<String>, key: String, value: &Value) {
    let scalar = match value {
        Value::Null => return,
        Value::Bool(flag) => if *flag { "1" } else { "0" }.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                push_pairs(pairs, format!("{key}[{index}]"), item);
            }
            return;
        }
        Value::Object(map) => {
            for (name, item) in map {
                push_pairs(pairs, format!("{key}[{name}]"), item);
            }
            return;
        }
    };

    pairs.push(format!(
        "{}={}",
        urlencoding::encode(&key),
        urlencoding::encode(&scalar)
    ));
}
