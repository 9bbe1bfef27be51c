//! Request/response trace lines.
//!
//! Each client numbers its requests and tags itself with a random 7-character
//! id. Trace lines look like:
//!
//! ```text
//! [3] POST: https://acme.amocrm.ru/api/v2/leads
//! {"add":[{"name":"Сделка"}]}
//! [3] RESPONSE 0.1234s (200):
//! {"_embedded":{"items":[{"id":1}]}}
//! [3] LOCKED amo_lock_42_lead
//! ```
//!
//! Lines are emitted through `tracing` when debug is enabled in
//! [`AmoConfig`](crate::AmoConfig), and always forwarded to the
//! [`DebugSink`] if one is installed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::clients::http_request::PreparedRequest;
use crate::clients::http_response::unescape_unicode;

const UNIQ_ID_LEN: usize = 7;

/// Receives debug trace lines.
pub trait DebugSink: Send + Sync {
    /// Handles one trace message; `uniq_id` identifies the client instance.
    fn debug(&self, uniq_id: &str, message: &str);
}

/// Numbers requests and formats trace lines.
pub(crate) struct DebugLogger {
    enabled: bool,
    sink: Option<Arc<dyn DebugSink>>,
    counter: AtomicU64,
    uniq_id: String,
}

impl DebugLogger {
    pub(crate) fn new(enabled: bool, sink: Option<Arc<dyn DebugSink>>) -> Self {
        let uniq_id = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(UNIQ_ID_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();

        Self {
            enabled,
            sink,
            counter: AtomicU64::new(0),
            uniq_id,
        }
    }

    pub(crate) fn uniq_id(&self) -> &str {
        &self.uniq_id
    }

    /// Increments the request counter and returns the new request number.
    pub(crate) fn next_request(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the number of the most recent request.
    pub(crate) fn current(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    pub(crate) fn request(&self, number: u64, request: &PreparedRequest) {
        let message = match &request.body {
            Some(body) => format!(
                "[{number}] {}: {}\n{}",
                request.label(),
                request.url,
                unescape_unicode(body)
            ),
            None => format!("[{number}] {}: {}", request.label(), request.url),
        };
        self.emit(&message);
    }

    pub(crate) fn response(&self, number: u64, elapsed: Duration, status: u16, body: &str) {
        self.emit(&format!(
            "[{number}] RESPONSE {:.4}s ({status}):\n{}",
            elapsed.as_secs_f64(),
            unescape_unicode(body)
        ));
    }

    pub(crate) fn locked(&self, resource_key: &str) {
        self.emit(&format!("[{}] LOCKED {resource_key}", self.current()));
    }

    pub(crate) fn unlocked(&self, resource_key: &str) {
        self.emit(&format!("[{}] UNLOCKED {resource_key}", self.current()));
    }

    fn emit(&self, message: &str) {
        if self.enabled {
            tracing::debug!(client = %self.uniq_id, "{message}");
        }
        if let Some(sink) = &self.sink {
            sink.debug(&self.uniq_id, message);
        }
    }
}

impl std::fmt::Debug for DebugLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugLogger")
            .field("enabled", &self.enabled)
            .field("has_sink", &self.sink.is_some())
            .field("counter", &self.counter)
            .field("uniq_id", &self.uniq_id)
            .finish()
    }
}
