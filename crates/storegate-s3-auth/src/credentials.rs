//! Secret key lookup.

use std::collections::HashMap;

use crate::error::AuthError;

/// Resolves secret access keys by access key id.
pub trait CredentialProvider: Send + Sync {
    /// Secret key for `access_key_id`.
    ///
    /// # Errors
    ///
    /// [`AuthError::AccessKeyNotFound`] for an unknown id.
    fn get_secret_key(&self, access_key_id: &str) -> Result<String, AuthError>;
}

/// Fixed set of `(access key id, secret key)` pairs.
///
/// # Examples
///
/// ```
/// use storegate_s3_auth::credentials::{CredentialProvider, StaticCredentialProvider};
///
/// let provider = StaticCredentialProvider::single("gateway", "s3cr3t");
/// assert_eq!(provider.get_secret_key("gateway").unwrap(), "s3cr3t");
/// assert!(provider.get_secret_key("other").is_err());
/// ```
#[derive(Clone, Default)]
pub struct StaticCredentialProvider {
    credentials: HashMap<String, String>,
}

impl std::fmt::Debug for StaticCredentialProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&str> = self.credentials.keys().map(String::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("StaticCredentialProvider")
            .field("access_key_ids", &ids)
            .finish()
    }
}

impl StaticCredentialProvider {
    /// Build from `(access key id, secret key)` pairs.
    pub fn new(credentials: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            credentials: credentials.into_iter().collect(),
        }
    }

    /// Build with a single key pair.
    #[must_use]
    pub fn single(access_key_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self::new([(access_key_id.into(), secret_key.into())])
    }

    /// Whether no keys are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn get_secret_key(&self, access_key_id: &str) -> Result<String, AuthError> {
        self.credentials
            .get(access_key_id)
            .cloned()
            .ok_or_else(|| AuthError::AccessKeyNotFound(access_key_id.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_resolve_known_key_only() {
        let provider = StaticCredentialProvider::new(vec![
            ("a".to_owned(), "1".to_owned()),
            ("b".to_owned(), "2".to_owned()),
        ]);
        assert_eq!(
            provider.get_secret_key("b").unwrap_or_else(|e| panic!("{e}")),
            "2"
        );
        assert!(matches!(
            provider.get_secret_key("c"),
            Err(AuthError::AccessKeyNotFound(id)) if id == "c"
        ));
    }

    #[test]
    fn test_should_not_leak_secrets_in_debug() {
        let provider = StaticCredentialProvider::single("id", "hunter2");
        let debug = format!("{provider:?}");
        assert!(debug.contains("id"));
        assert!(!debug.contains("hunter2"));
    }
}
