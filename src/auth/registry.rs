//! Per-client registry of authenticated subdomains.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::auth::{AuthState, Credentials, OAuth2Tokens};
use crate::clients::AmoError;

#[derive(Debug)]
struct Entry {
    state: AuthState,
    credentials: Option<Credentials>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    last_subdomain: Option<String>,
}

/// Auth states keyed by subdomain, plus the most recently authenticated one.
///
/// Entries are never removed. Several subdomains may be authenticated at once;
/// requests without an explicit subdomain go to the last one authenticated.
#[derive(Debug, Default)]
pub(crate) struct AuthRegistry {
    inner: RwLock<Inner>,
}

impl AuthRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Stores (or replaces) the state for its subdomain and makes it the default.
    pub(crate) fn insert(&self, state: AuthState, credentials: Option<Credentials>) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.last_subdomain = Some(state.subdomain.clone());
        inner
            .entries
            .insert(state.subdomain.clone(), Entry { state, credentials });
    }

    /// Resolves the state to use for a request.
    pub(crate) fn resolve(&self, subdomain: Option<&str>) -> Result<AuthState, AmoError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);

        let key = match subdomain {
            Some(subdomain) => subdomain,
            None => inner
                .last_subdomain
                .as_deref()
                .ok_or(AmoError::AuthRequired { subdomain: None })?,
        };

        inner
            .entries
            .get(key)
            .map(|entry| entry.state.clone())
            .ok_or_else(|| AmoError::AuthRequired {
                subdomain: Some(key.to_string()),
            })
    }

    pub(crate) fn get(&self, subdomain: &str) -> Option<AuthState> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.entries.get(subdomain).map(|entry| entry.state.clone())
    }

    pub(crate) fn credentials(&self, subdomain: &str) -> Option<Credentials> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .entries
            .get(subdomain)
            .and_then(|entry| entry.credentials.clone())
    }

    /// Applies refreshed tokens to a stored state and returns the updated copy.
    pub(crate) fn update_tokens(&self, subdomain: &str, tokens: OAuth2Tokens) -> Option<AuthState> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.entries.get_mut(subdomain).map(|entry| {
            entry.state.apply_tokens(tokens);
            entry.state.clone()
        })
    }

    pub(crate) fn last_subdomain(&self) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.last_subdomain.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oauth_state(subdomain: &str, token: &str) -> AuthState {
        AuthState::oauth2(
            subdomain,
            format!("{subdomain}.amocrm.ru"),
            OAuth2Tokens::new(token, Some("refresh".to_string())),
        )
    }

    #[test]
    fn test_resolve_without_any_auth_fails() {
        let registry = AuthRegistry::new();
        assert!(matches!(
            registry.resolve(None),
            Err(AmoError::AuthRequired { subdomain: None })
        ));
    }

    #[test]
    fn test_resolve_unknown_subdomain_fails() {
        let registry = AuthRegistry::new();
        registry.insert(oauth_state("acme", "t"), None);
        assert!(matches!(
            registry.resolve(Some("other")),
            Err(AmoError::AuthRequired { subdomain: Some(s) }) if s == "other"
        ));
    }

    #[test]
    fn test_resolve_defaults_to_last_authenticated() {
        let registry = AuthRegistry::new();
        registry.insert(oauth_state("first", "t1"), None);
        registry.insert(oauth_state("second", "t2"), None);

        assert_eq!(registry.resolve(None).unwrap().subdomain, "second");
        assert_eq!(registry.resolve(Some("first")).unwrap().subdomain, "first");
        assert_eq!(registry.last_subdomain().as_deref(), Some("second"));
    }

    #[test]
    fn test_update_tokens_mutates_stored_state() {
        let registry = AuthRegistry::new();
        registry.insert(oauth_state("acme", "old"), None);

        let updated = registry
            .update_tokens("acme", OAuth2Tokens::new("new", None))
            .unwrap();
        assert_eq!(updated.access_token.as_deref(), Some("new"));
        assert_eq!(
            registry.get("acme").unwrap().access_token.as_deref(),
            Some("new")
        );
        assert!(registry
            .update_tokens("missing", OAuth2Tokens::new("x", None))
            .is_none());
    }

    #[test]
    fn test_credentials_are_kept_per_subdomain() {
        let registry = AuthRegistry::new();
        let state = AuthState::legacy("acme", "acme.amocrm.ru", "acme.json".into());
        registry.insert(state, Some(Credentials::new("user", "hash")));

        assert_eq!(registry.credentials("acme").unwrap().login(), "user");
        assert!(registry.credentials("other").is_none());
    }
}
