//! Per-domain cookie persistence for legacy sessions.
//!
//! Legacy (non-OAuth) amoCRM sessions are identified by cookies set by the
//! login endpoint. The jar keeps one JSON file per account domain under
//! `{storage_dir}/cookies/`, replays the stored cookies on every request and
//! merges `Set-Cookie` headers from every response. Files are replaced
//! atomically (temp file + rename); when two writers race, the last one wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use cookie::Cookie;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::clients::AmoError;
use crate::storage::{subdir, COOKIES_DIR};

/// A stored cookie value with its optional expiry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    /// The cookie value.
    pub value: String,
    /// When the cookie expires; session cookies have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredCookie {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

type Cookies = BTreeMap<String, StoredCookie>;

/// Cookie files keyed by account domain.
#[derive(Clone, Debug)]
pub struct CookieJar {
    dir: PathBuf,
}

impl CookieJar {
    /// Creates a jar under `{storage_dir}/cookies/`.
    ///
    /// # Errors
    ///
    /// Returns [`AmoError::Storage`] if the directory cannot be created.
    pub fn new(storage_dir: impl AsRef<Path>) -> Result<Self, AmoError> {
        Ok(Self {
            dir: subdir(storage_dir.as_ref(), COOKIES_DIR)?,
        })
    }

    /// Returns the file holding the cookies of `domain`.
    #[must_use]
    pub fn path_for(&self, domain: &str) -> PathBuf {
        let file_name: String = domain
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }

    /// Loads the unexpired cookies of `domain`.
    ///
    /// A missing or unreadable file yields an empty jar.
    ///
    /// # Errors
    ///
    /// Returns [`AmoError::Storage`] if the file exists but cannot be read.
    pub fn load(&self, domain: &str) -> Result<BTreeMap<String, StoredCookie>, AmoError> {
        let path = self.path_for(domain);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Cookies::new()),
            Err(e) => return Err(AmoError::storage(path, e)),
        };

        let mut cookies: Cookies = serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), "Ignoring unreadable cookie jar: {e}");
            Cookies::new()
        });
        let now = Utc::now();
        cookies.retain(|_, cookie| !cookie.is_expired(now));
        Ok(cookies)
    }

    /// Returns the `Cookie` header value for `domain`, if any cookies are stored.
    ///
    /// # Errors
    ///
    /// Returns [`AmoError::Storage`] if the jar cannot be read.
    pub fn cookie_header(&self, domain: &str) -> Result<Option<String>, AmoError> {
        let cookies = self.load(domain)?;
        if cookies.is_empty() {
            return Ok(None);
        }
        let header = cookies
            .iter()
            .map(|(name, cookie)| format!("{name}={}", cookie.value))
            .collect::<Vec<_>>()
            .join("; ");
        Ok(Some(header))
    }

    /// Merges `Set-Cookie` header values into the jar of `domain`.
    ///
    /// Cookies whose `Max-Age` is not positive or whose `Expires` is in the
    /// past are removed.
    ///
    /// # Errors
    ///
    /// Returns [`AmoError::Storage`] if the jar cannot be read or written.
    pub fn store<S: AsRef<str>>(&self, domain: &str, set_cookies: &[S]) -> Result<(), AmoError> {
        if set_cookies.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut cookies = self.load(domain)?;
        for header in set_cookies {
            let Some((name, cookie)) = parse_set_cookie(header.as_ref(), now) else {
                continue;
            };
            if cookie.is_expired(now) {
                cookies.remove(&name);
            } else {
                cookies.insert(name, cookie);
            }
        }

        self.write(domain, &cookies)
    }

    /// Removes all cookies of `domain`.
    ///
    /// # Errors
    ///
    /// Returns [`AmoError::Storage`] if the file exists but cannot be removed.
    pub fn clear(&self, domain: &str) -> Result<(), AmoError> {
        let path = self.path_for(domain);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AmoError::storage(path, e)),
        }
    }

    fn write(&self, domain: &str, cookies: &Cookies) -> Result<(), AmoError> {
        let path = self.path_for(domain);
        let json = serde_json::to_string_pretty(cookies).map_err(|e| {
            AmoError::storage(&path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        let tmp = path.with_extension(format!("json.{}.{suffix}.tmp", std::process::id()));

        std::fs::write(&tmp, json).map_err(|e| AmoError::storage(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            AmoError::storage(&path, e)
        })
    }
}

/// Parses one `Set-Cookie` header into a name and stored cookie.
fn parse_set_cookie(header: &str, now: DateTime<Utc>) -> Option<(String, StoredCookie)> {
    let cookie = Cookie::parse(header).ok()?;

    // Max-Age takes precedence over Expires
    let expires_at = match cookie.max_age() {
        Some(max_age) => max_age_expiry(now, max_age.whole_seconds()),
        None => cookie
            .expires_datetime()
            .and_then(|at| Utc.timestamp_opt(at.unix_timestamp(), 0).single()),
    };

    Some((
        cookie.name().to_string(),
        StoredCookie {
            value: cookie.value().to_string(),
            expires_at,
        },
    ))
}

/// Expiry for a `Max-Age` of `seconds`; ages past chrono's range never expire.
fn max_age_expiry(now: DateTime<Utc>, seconds: i64) -> Option<DateTime<Utc>> {
    if seconds <= 0 {
        return Some(now);
    }
    chrono::Duration::try_seconds(seconds).and_then(|age| now.checked_add_signed(age))
}
