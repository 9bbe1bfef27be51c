//! amoCRM error code table.
//!
//! Maps the numeric codes found in error responses (HTTP statuses and the
//! per-item codes under `_embedded.errors`) to human-readable messages. The
//! table is bundled with the crate in `data/error_codes.json` and parsed once
//! on first use.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Fallback text for codes missing from the table.
pub const UNKNOWN_ERROR: &str = "Unknown error";

const ERROR_CODES_JSON: &str = include_str!("../../data/error_codes.json");

/// Immutable lookup from error code to message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCodeTable {
    messages: HashMap<u32, String>,
}

impl ErrorCodeTable {
    /// Returns the table bundled with the crate.
    #[must_use]
    pub fn bundled() -> &'static Self {
        static TABLE: OnceLock<ErrorCodeTable> = OnceLock::new();
        TABLE.get_or_init(|| {
            let messages = serde_json::from_str(ERROR_CODES_JSON).unwrap_or_else(|e| {
                tracing::warn!("Bundled error code table is unreadable: {e}");
                HashMap::new()
            });
            Self { messages }
        })
    }

    /// Returns the message for `code`, or [`UNKNOWN_ERROR`].
    #[must_use]
    pub fn message(&self, code: u32) -> &str {
        self.messages.get(&code).map_or(UNKNOWN_ERROR, String::as_str)
    }

    /// Builds an error message listing every code with its text.
    ///
    /// ```rust
    /// use amocrm_api::clients::ErrorCodeTable;
    ///
    /// let table = ErrorCodeTable::bundled();
    /// assert_eq!(table.describe(&[404]), "Error 404 Not found");
    /// ```
    #[must_use]
    pub fn describe(&self, codes: &[u32]) -> String {
        let listed = codes
            .iter()
            .map(|code| format!("{code} {}", self.message(*code)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("Error {listed}")
    }

    /// Returns the number of known codes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if the table holds no codes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_table_parses() {
        let table = ErrorCodeTable::bundled();
        assert!(!table.is_empty());
        assert!(table.len() > 40);
    }

    #[test]
    fn test_known_codes() {
        let table = ErrorCodeTable::bundled();
        assert_eq!(table.message(404), "Not found");
        assert_eq!(
            table.message(240),
            "Adding/updating leads: invalid custom field \"id\""
        );
    }

    #[test]
    fn test_unknown_code_falls_back() {
        assert_eq!(ErrorCodeTable::bundled().message(999), UNKNOWN_ERROR);
    }

    #[test]
    fn test_describe_lists_all_codes_in_order() {
        let message = ErrorCodeTable::bundled().describe(&[240, 213, 999]);
        assert!(message.starts_with("Error 240 Adding/updating leads"));
        assert!(message.contains(", 213 Adding leads: empty array"));
        assert!(message.ends_with(", 999 Unknown error"));
    }
}
