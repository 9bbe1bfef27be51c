//! Validated newtype wrappers for configuration values.
//!
//! This module provides type-safe wrappers around string values that validate
//! their contents on construction. Invalid values are rejected with clear error messages.

use crate::error::ConfigError;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Domain suffixes served by amoCRM regardless of the configured domain.
const KNOWN_SUFFIXES: [&str; 2] = [".amocrm.ru", ".amocrm.com"];

/// A validated amoCRM vendor domain such as `amocrm.ru`.
///
/// Account hosts are formed by prefixing a subdomain to this value, see
/// [`AmoDomain::qualify`].
///
/// # Serialization
///
/// `AmoDomain` serializes to and deserializes from the bare domain string:
///
/// ```rust
/// use amocrm_api::AmoDomain;
///
/// let domain = AmoDomain::new("amocrm.com").unwrap();
/// let json = serde_json::to_string(&domain).unwrap();
/// assert_eq!(json, r#""amocrm.com""#);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AmoDomain(String);

impl AmoDomain {
    /// The domain used when none is configured.
    pub const DEFAULT: &'static str = "amocrm.ru";

    /// Creates a new validated vendor domain.
    ///
    /// Leading dots are stripped and the value is lowercased.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAmoDomain`] if the domain is empty, has no
    /// dot, or contains characters other than letters, digits, hyphens and dots.
    pub fn new(domain: impl Into<String>) -> Result<Self, ConfigError> {
        let domain = domain.into();
        let normalized = domain.trim().trim_start_matches('.').to_lowercase();

        let valid = !normalized.is_empty()
            && normalized.contains('.')
            && !normalized.ends_with('.')
            && normalized
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');

        if !valid {
            return Err(ConfigError::InvalidAmoDomain { domain });
        }
        Ok(Self(normalized))
    }

    /// Normalizes a subdomain into a fully-qualified account host.
    ///
    /// Hosts already ending in `.amocrm.ru`, `.amocrm.com` or this domain are
    /// returned unchanged.
    ///
    /// # Example
    ///
    /// ```rust
    /// use amocrm_api::AmoDomain;
    ///
    /// let domain = AmoDomain::default();
    /// assert_eq!(domain.qualify("mycompany"), "mycompany.amocrm.ru");
    /// assert_eq!(domain.qualify("mycompany.amocrm.com"), "mycompany.amocrm.com");
    /// ```
    #[must_use]
    pub fn qualify(&self, subdomain: &str) -> String {
        let own_suffix = format!(".{}", self.0);
        let already_qualified = KNOWN_SUFFIXES
            .iter()
            .any(|suffix| subdomain.ends_with(suffix))
            || subdomain.ends_with(&own_suffix);

        if already_qualified {
            subdomain.to_string()
        } else {
            format!("{subdomain}{own_suffix}")
        }
    }
}

impl Default for AmoDomain {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl AsRef<str> for AmoDomain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AmoDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for AmoDomain {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AmoDomain {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(de::Error::custom)
    }
}

/// A validated URL for routing API traffic through a proxy or test server.
///
/// When configured, requests go to this URL's scheme and authority instead of
/// `https://{subdomain}.{domain}`.
///
/// # Example
///
/// ```rust
/// use amocrm_api::HostUrl;
///
/// let url = HostUrl::new("http://127.0.0.1:8080").unwrap();
/// assert_eq!(url.scheme(), "http");
/// assert_eq!(url.host_name(), Some("127.0.0.1"));
/// assert_eq!(url.origin(), "http://127.0.0.1:8080");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostUrl {
    url: String,
    scheme_end: usize,
    host_start: usize,
    host_end: usize,
    authority_end: usize,
}

impl HostUrl {
    /// Creates a new validated host URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidHostUrl`] if the URL is invalid.
    pub fn new(url: impl Into<String>) -> Result<Self, ConfigError> {
        let url = url.into();
        let url = url.trim().to_string();

        let scheme_end = url
            .find("://")
            .ok_or_else(|| ConfigError::InvalidHostUrl { url: url.clone() })?;

        let scheme = &url[..scheme_end];
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::InvalidHostUrl { url: url.clone() });
        }

        let host_start = scheme_end + 3;
        if host_start >= url.len() {
            return Err(ConfigError::InvalidHostUrl { url: url.clone() });
        }

        let remainder = &url[host_start..];
        let host_end = if remainder.starts_with('[') {
            // IPv6 literal, brackets stay part of the host
            let close = remainder
                .find(']')
                .ok_or_else(|| ConfigError::InvalidHostUrl { url: url.clone() })?;
            let after = &remainder[close + 1..];
            if !(after.is_empty() || after.starts_with([':', '/', '?', '#'])) || close == 1 {
                return Err(ConfigError::InvalidHostUrl { url: url.clone() });
            }
            host_start + close + 1
        } else {
            remainder
                .find([':', '/', '?', '#'])
                .map_or(url.len(), |i| host_start + i)
        };
        let authority_end = url[host_end..]
            .find(['/', '?', '#'])
            .map_or(url.len(), |i| host_end + i);

        if host_end == host_start {
            return Err(ConfigError::InvalidHostUrl { url: url.clone() });
        }

        Ok(Self {
            url,
            scheme_end,
            host_start,
            host_end,
            authority_end,
        })
    }

    /// Returns the URL scheme (e.g., "https").
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.url[..self.scheme_end]
    }

    /// Returns the host name portion of the URL.
    #[must_use]
    pub fn host_name(&self) -> Option<&str> {
        let host = &self.url[self.host_start..self.host_end];
        if host.is_empty() {
            None
        } else {
            Some(host)
        }
    }

    /// Returns `scheme://host[:port]` without any path.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.url[..self.authority_end]
    }
}

impl AsRef<str> for HostUrl {
    fn as_ref(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amo_domain_defaults_to_ru() {
        assert_eq!(AmoDomain::default().as_ref(), "amocrm.ru");
    }

    #[test]
    fn test_amo_domain_normalizes_input() {
        let domain = AmoDomain::new(" .AmoCRM.com ").unwrap();
        assert_eq!(domain.as_ref(), "amocrm.com");
    }

    #[test]
    fn test_amo_domain_rejects_invalid() {
        assert!(AmoDomain::new("").is_err());
        assert!(AmoDomain::new("localhost").is_err());
        assert!(AmoDomain::new("amo crm.ru").is_err());
        assert!(AmoDomain::new("https://amocrm.ru").is_err());
        assert!(AmoDomain::new("amocrm.ru.").is_err());
    }

    #[test]
    fn test_qualify_appends_configured_domain() {
        let domain = AmoDomain::new("kommo.com").unwrap();
        assert_eq!(domain.qualify("acme"), "acme.kommo.com");
    }

    #[test]
    fn test_qualify_keeps_known_suffixes() {
        let domain = AmoDomain::new("kommo.com").unwrap();
        assert_eq!(domain.qualify("acme.amocrm.ru"), "acme.amocrm.ru");
        assert_eq!(domain.qualify("acme.amocrm.com"), "acme.amocrm.com");
        assert_eq!(domain.qualify("acme.kommo.com"), "acme.kommo.com");
    }

    #[test]
    fn test_amo_domain_deserialize_validates() {
        let domain: AmoDomain = serde_json::from_str(r#""amocrm.com""#).unwrap();
        assert_eq!(domain.as_ref(), "amocrm.com");
        assert!(serde_json::from_str::<AmoDomain>(r#""""#).is_err());
    }

    #[test]
    fn test_host_url_validates_format() {
        let url = HostUrl::new("https://proxy.example.com").unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_name(), Some("proxy.example.com"));
        assert_eq!(url.origin(), "https://proxy.example.com");

        let url = HostUrl::new("http://localhost:3000/some/path").unwrap();
        assert_eq!(url.host_name(), Some("localhost"));
        assert_eq!(url.origin(), "http://localhost:3000");
    }

    #[test]
    fn test_host_url_rejects_invalid() {
        assert!(HostUrl::new("proxy.example.com").is_err());
        assert!(HostUrl::new("https://").is_err());
        assert!(HostUrl::new("://example.com").is_err());
        assert!(HostUrl::new("http://:8080").is_err());
    }

    #[test]
    fn test_host_url_keeps_bracketed_ipv6_host() {
        let url = HostUrl::new("http://[::1]:8080").unwrap();
        assert_eq!(url.host_name(), Some("[::1]"));
        assert_eq!(url.origin(), "http://[::1]:8080");

        let url = HostUrl::new("https://[2001:db8::7]/api/v4").unwrap();
        assert_eq!(url.host_name(), Some("[2001:db8::7]"));
        assert_eq!(url.origin(), "https://[2001:db8::7]");

        assert!(HostUrl::new("http://[::1").is_err());
        assert!(HostUrl::new("http://[]:8080").is_err());
        assert!(HostUrl::new("http://[::1]x").is_err());
    }
}
