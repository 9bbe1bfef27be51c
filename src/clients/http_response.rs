//! Response decoding and error classification.
//!
//! Every attempt ends in one of four states:
//!
//! - **Success**: the status is in the configured success set. `204` yields
//!   [`ResponseBody::NoContent`] without touching the body; anything else must
//!   be valid JSON and must not carry per-item errors under `_embedded.errors`.
//! - **Auth expired**: `401`. The client re-authenticates and retries once.
//! - **HTTP error**: any other status, reported as an [`ApiResponseError`].
//! - **Transport failure**: handled by the transport; never reaches here.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::clients::error_codes::ErrorCodeTable;
use crate::clients::errors::{AmoError, ApiResponseError};
use crate::clients::http_request::PreparedRequest;

const STATUS_NO_CONTENT: u16 = 204;
const STATUS_UNAUTHORIZED: u16 = 401;

/// Decoded body of a successful response.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseBody {
    /// A JSON document.
    Json(Value),
    /// HTTP 204; there is no body.
    NoContent,
}

impl ResponseBody {
    /// Returns the JSON document, if any.
    #[must_use]
    pub const fn json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::NoContent => None,
        }
    }

    /// Consumes the body, returning the JSON document, if any.
    #[must_use]
    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::NoContent => None,
        }
    }

    /// Returns `true` for an HTTP 204 response.
    #[must_use]
    pub const fn is_no_content(&self) -> bool {
        matches!(self, Self::NoContent)
    }
}

/// What the transport got back: status, raw body, latency and headers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawResponse {
    /// The HTTP status code.
    pub status: u16,
    /// The raw response body.
    pub body: String,
    /// Time from send to fully-read body.
    pub elapsed: Duration,
    /// Response headers; names are lowercase and may repeat.
    pub headers: HashMap<String, Vec<String>>,
}

impl RawResponse {
    /// Returns the first value of a header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

/// Result of classifying one attempt.
#[derive(Debug)]
pub(crate) enum Outcome {
    Success(ResponseBody),
    AuthExpired(ApiResponseError),
}

/// Classifies a raw response against the success status set.
pub(crate) fn classify(
    raw: &RawResponse,
    request: &PreparedRequest,
    success_codes: &[u16],
) -> Result<Outcome, AmoError> {
    if raw.status == STATUS_UNAUTHORIZED {
        return Ok(Outcome::AuthExpired(status_error(raw, request)));
    }

    if !success_codes.contains(&raw.status) {
        return Err(status_error(raw, request).into());
    }

    if raw.status == STATUS_NO_CONTENT {
        return Ok(Outcome::Success(ResponseBody::NoContent));
    }

    let value: Value = serde_json::from_str(&raw.body).map_err(|e| AmoError::Decoding {
        message: e.to_string(),
        body: raw.body.clone(),
    })?;
    if value.is_null() {
        return Err(AmoError::Decoding {
            message: "response body is null".to_string(),
            body: raw.body.clone(),
        });
    }

    check_embedded_errors(&value, raw, request)?;

    Ok(Outcome::Success(ResponseBody::Json(value)))
}

fn status_error(raw: &RawResponse, request: &PreparedRequest) -> ApiResponseError {
    let code = u32::from(raw.status);
    ApiResponseError {
        code,
        codes: Vec::new(),
        status: raw.status,
        message: ErrorCodeTable::bundled().describe(&[code]),
        request: request.describe(),
        response_body: raw.body.clone(),
    }
}

/// Fails on per-item errors reported inside a success response.
fn check_embedded_errors(
    value: &Value,
    raw: &RawResponse,
    request: &PreparedRequest,
) -> Result<(), ApiResponseError> {
    let Some(errors) = value.pointer("/_embedded/errors") else {
        return Ok(());
    };
    if is_empty_container(errors) {
        return Ok(());
    }

    let codes: Vec<u32> = ["update", "add"]
        .iter()
        .filter_map(|section| errors.get(section))
        .flat_map(items)
        .filter_map(|item| item.get("code").and_then(parse_code))
        .collect();

    let table = ErrorCodeTable::bundled();
    let error = match codes.first() {
        Some(first) => ApiResponseError {
            code: *first,
            message: table.describe(&codes),
            codes,
            status: raw.status,
            request: request.describe(),
            response_body: raw.body.clone(),
        },
        None => ApiResponseError {
            code: u32::from(raw.status),
            codes,
            status: raw.status,
            message: format!(
                "API returned status {} with errors in the response body",
                raw.status
            ),
            request: request.describe(),
            response_body: raw.body.clone(),
        },
    };

    tracing::debug!(code = error.code, "Embedded errors in amoCRM response");
    Err(error)
}

fn is_empty_container(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Iterates the entries of a list or the values of a map.
fn items(value: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match value {
        Value::Array(list) => Box::new(list.iter()),
        Value::Object(map) => Box::new(map.values()),
        _ => Box::new(std::iter::empty()),
    }
}

fn parse_code(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Decodes `\uXXXX` escape sequences, joining surrogate pairs.
///
/// Unpaired surrogates become U+FFFD.
///
/// ```rust
/// use amocrm_api::clients::unescape_unicode;
///
/// assert_eq!(unescape_unicode(r#"{"name":"\u0421\u0434\u0435\u043b\u043a\u0430"}"#), r#"{"name":"Сделка"}"#);
/// assert_eq!(unescape_unicode(r"\ud83d\ude00"), "😀");
/// ```
#[must_use]
pub fn unescape_unicode(text: &str) -> String {
    static ESCAPES: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(escapes) = ESCAPES
        .get_or_init(|| Regex::new(r"(?:\\u[0-9a-fA-F]{4})+").ok())
        .as_ref()
    else {
        return text.to_string();
    };

    escapes
        .replace_all(text, |caps: &Captures<'_>| {
            let units = caps[0]
                .split("\\u")
                .filter(|unit| !unit.is_empty())
                .filter_map(|unit| u16::from_str_radix(unit, 16).ok());
            char::decode_utf16(units)
                .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect::<String>()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::http_request::RequestMethod;
    use serde_json::json;

    const SUCCESS: &[u16] = &[200, 202, 204];

    fn request() -> PreparedRequest {
        PreparedRequest {
            method: RequestMethod::Post,
            url: "https://acme.amocrm.ru/api/v2/leads".to_string(),
            headers: Vec::new(),
            body: Some("{}".to_string()),
            cookie_domain: None,
        }
    }

    fn raw(status: u16, body: &str) -> RawResponse {
        RawResponse {
            status,
            body: body.to_string(),
            elapsed: Duration::from_millis(12),
            headers: HashMap::new(),
        }
    }

    fn api_error(result: Result<Outcome, AmoError>) -> ApiResponseError {
        match result {
            Err(AmoError::Api(error)) => error,
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[test]
    fn test_success_decodes_json() {
        let outcome = classify(&raw(200, r#"{"id":1}"#), &request(), SUCCESS).unwrap();
        assert!(matches!(
            outcome,
            Outcome::Success(ResponseBody::Json(value)) if value == json!({"id": 1})
        ));
    }

    #[test]
    fn test_no_content_skips_decoding() {
        let outcome = classify(&raw(204, "not json at all"), &request(), SUCCESS).unwrap();
        assert!(matches!(outcome, Outcome::Success(ResponseBody::NoContent)));
    }

    #[test]
    fn test_unauthorized_is_auth_expired() {
        let outcome = classify(&raw(401, ""), &request(), SUCCESS).unwrap();
        match outcome {
            Outcome::AuthExpired(error) => {
                assert_eq!(error.code, 401);
                assert_eq!(error.message, "Error 401 Unauthorized");
            }
            Outcome::Success(_) => panic!("expected auth expiry"),
        }
    }

    #[test]
    fn test_error_status_uses_code_table() {
        let error = api_error(classify(&raw(404, "{}"), &request(), SUCCESS));
        assert_eq!(error.code, 404);
        assert_eq!(error.status, 404);
        assert_eq!(error.message, "Error 404 Not found");
        assert!(error.request.starts_with("POST: https://acme.amocrm.ru"));
    }

    #[test]
    fn test_unknown_status_falls_back() {
        let error = api_error(classify(&raw(418, ""), &request(), SUCCESS));
        assert_eq!(error.message, "Error 418 Unknown error");
    }

    #[test]
    fn test_invalid_json_is_decoding_error() {
        let result = classify(&raw(200, "<html>"), &request(), SUCCESS);
        assert!(matches!(
            result,
            Err(AmoError::Decoding { body, .. }) if body == "<html>"
        ));
    }

    #[test]
    fn test_null_body_is_decoding_error() {
        let result = classify(&raw(200, "null"), &request(), SUCCESS);
        assert!(matches!(
            result,
            Err(AmoError::Decoding { body, .. }) if body == "null"
        ));

        let result = classify(&raw(200, "  null\n"), &request(), SUCCESS);
        assert!(matches!(result, Err(AmoError::Decoding { .. })));
    }

    #[test]
    fn test_embedded_update_errors_come_first() {
        let body = json!({
            "_embedded": {"errors": {
                "add": [{"code": 213}],
                "update": [{"id": 5, "code": "240"}]
            }}
        })
        .to_string();
        let error = api_error(classify(&raw(200, &body), &request(), SUCCESS));
        assert_eq!(error.code, 240);
        assert_eq!(error.codes, vec![240, 213]);
        assert!(error
            .message
            .starts_with("Error 240 Adding/updating leads: invalid custom field \"id\""));
    }

    #[test]
    fn test_embedded_errors_keyed_by_index() {
        let body = json!({"_embedded": {"errors": {"update": {"0": {"code": 240}}}}}).to_string();
        let error = api_error(classify(&raw(202, &body), &request(), SUCCESS));
        assert_eq!(error.code, 240);
    }

    #[test]
    fn test_embedded_errors_without_codes_carry_status() {
        let body = json!({"_embedded": {"errors": [{"message": "boom"}]}}).to_string();
        let error = api_error(classify(&raw(200, &body), &request(), SUCCESS));
        assert_eq!(error.code, 200);
        assert!(error.codes.is_empty());
    }

    #[test]
    fn test_empty_embedded_errors_are_ignored() {
        let body = json!({"_embedded": {"errors": [], "items": [{"id": 1}]}}).to_string();
        assert!(classify(&raw(200, &body), &request(), SUCCESS).is_ok());
    }

    #[test]
    fn test_unescape_unicode() {
        assert_eq!(unescape_unicode(r"\u041f\u0440\u0438\u0432\u0435\u0442"), "Привет");
        assert_eq!(unescape_unicode("plain text"), "plain text");
        assert_eq!(unescape_unicode(r"a\ud83d\ude00b"), "a😀b");
        assert_eq!(unescape_unicode(r"\ud83d"), "\u{fffd}");
    }

    #[test]
    fn test_response_body_accessors() {
        let body = ResponseBody::Json(json!({"a": 1}));
        assert_eq!(body.json(), Some(&json!({"a": 1})));
        assert!(!body.is_no_content());
        assert!(ResponseBody::NoContent.is_no_content());
        assert!(ResponseBody::NoContent.into_json().is_none());
    }
}
