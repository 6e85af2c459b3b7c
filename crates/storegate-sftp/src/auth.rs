//! Client authentication.
//!
//! The SSH layer asks an [`SftpAuthenticator`] about every password or
//! public-key attempt. [`StaticAuthenticator`] answers from the configured
//! password table and `authorized_keys` file; embedders can plug in their own
//! implementation through [`SftpServer::with_authenticator`].
//!
//! [`SftpServer::with_authenticator`]: crate::server::SftpServer::with_authenticator

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::Context as _;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use russh::keys::{PublicKey, PublicKeyBase64};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::config::SftpConfig;

/// Decides whether a connecting user may log in.
pub trait SftpAuthenticator: Send + Sync + fmt::Debug {
    /// Check a password attempt.
    fn check_password(&self, user: &str, password: &str) -> bool;

    /// Check a public key offered by `user`.
    fn check_public_key(&self, user: &str, key: &PublicKey) -> bool;

    /// Whether `user` may log in without credentials.
    fn allow_anonymous(&self, _user: &str) -> bool {
        false
    }
}

/// One entry of an `authorized_keys` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedKey {
    /// Key type, e.g. `ssh-ed25519`.
    pub algorithm: String,
    /// Wire encoding of the public key.
    pub blob: Vec<u8>,
    /// Trailing comment, possibly empty.
    pub comment: String,
}

fn is_key_type(token: &str) -> bool {
    token.starts_with("ssh-") || token.starts_with("ecdsa-sha2-") || token.starts_with("sk-")
}

/// Parse the contents of an `authorized_keys` file.
///
/// Blank lines and comments are skipped. Leading key options
/// (`from="...",no-pty ...`) are ignored; lines without a recognizable key
/// type or with an undecodable key are logged and dropped.
#[must_use]
pub fn parse_authorized_keys(text: &str) -> Vec<AuthorizedKey> {
    let mut keys = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(pos) = tokens.iter().position(|t| is_key_type(t)) else {
            warn!(line = n + 1, "skipping authorized key without a known key type");
            continue;
        };
        let Some(encoded) = tokens.get(pos + 1) else {
            warn!(line = n + 1, "skipping authorized key without key data");
            continue;
        };
        match BASE64.decode(encoded) {
            Ok(blob) => keys.push(AuthorizedKey {
                algorithm: tokens[pos].to_owned(),
                blob,
                comment: tokens[pos + 2..].join(" "),
            }),
            Err(e) => warn!(line = n + 1, error = %e, "skipping undecodable authorized key"),
        }
    }
    keys
}

/// Read and parse an `authorized_keys` file.
///
/// # Errors
///
/// Fails when the file cannot be read.
pub fn load_authorized_keys(path: &Path) -> anyhow::Result<Vec<AuthorizedKey>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading authorized keys from {}", path.display()))?;
    let keys = parse_authorized_keys(&text);
    info!(path = %path.display(), count = keys.len(), "loaded authorized keys");
    Ok(keys)
}

/// Authenticates against a fixed password table and key list.
#[derive(Default)]
pub struct StaticAuthenticator {
    passwords: HashMap<String, String>,
    keys: Vec<AuthorizedKey>,
    anonymous: bool,
}

impl fmt::Debug for StaticAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticAuthenticator")
            .field("users", &self.passwords.len())
            .field("keys", &self.keys.len())
            .field("anonymous", &self.anonymous)
            .finish()
    }
}

impl StaticAuthenticator {
    /// Build from explicit credentials.
    #[must_use]
    pub fn new(passwords: HashMap<String, String>, keys: Vec<AuthorizedKey>) -> Self {
        Self {
            passwords,
            keys,
            anonymous: false,
        }
    }

    /// Accept logins without credentials.
    #[must_use]
    pub fn anonymous(mut self, allow: bool) -> Self {
        self.anonymous = allow;
        self
    }

    /// Build from configuration, loading the `authorized_keys` file if set.
    ///
    /// # Errors
    ///
    /// Fails when the configured key file cannot be read.
    pub fn from_config(config: &SftpConfig) -> anyhow::Result<Self> {
        let keys = match &config.authorized_keys_path {
            Some(path) => load_authorized_keys(path)?,
            None => Vec::new(),
        };
        if keys.is_empty() && config.users.is_empty() && !config.allow_anonymous {
            warn!("no SFTP users or authorized keys configured; every login will be rejected");
        }
        Ok(Self::new(config.users.clone(), keys).anonymous(config.allow_anonymous))
    }
}

impl SftpAuthenticator for StaticAuthenticator {
    fn check_password(&self, user: &str, password: &str) -> bool {
        self.passwords
            .get(user)
            .is_some_and(|expected| expected.as_bytes().ct_eq(password.as_bytes()).into())
    }

    fn check_public_key(&self, _user: &str, key: &PublicKey) -> bool {
        let offered = key.public_key_bytes();
        self.keys.iter().any(|k| k.blob == offered)
    }

    fn allow_anonymous(&self, _user: &str) -> bool {
        self.anonymous
    }
}

#[cfg(test)]
mod tests {
    use russh::keys::signature::rand_core::OsRng;
    use russh::keys::{Algorithm, PrivateKey};

    use super::*;

    fn random_key() -> PublicKey {
        PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
            .unwrap_or_else(|e| panic!("keygen: {e}"))
            .public_key()
            .clone()
    }

    #[test]
    fn test_should_parse_keys_with_options_and_comments() {
        let key = random_key();
        let encoded = key.public_key_base64();
        let text = format!(
            "# team keys\n\nssh-ed25519 {encoded} alice@laptop\n\
             from=\"10.0.0.0/8\",no-pty ssh-ed25519 {encoded}\n\
             garbage line\n\
             ssh-rsa !!!notbase64!!!\n"
        );
        let keys = parse_authorized_keys(&text);
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].algorithm, "ssh-ed25519");
        assert_eq!(keys[0].comment, "alice@laptop");
        assert_eq!(keys[1].comment, "");
        assert_eq!(keys[0].blob, keys[1].blob);
    }

    #[test]
    fn test_should_accept_only_listed_keys() {
        let allowed = random_key();
        let other = random_key();
        let keys = parse_authorized_keys(&format!("ssh-ed25519 {}", allowed.public_key_base64()));
        let auth = StaticAuthenticator::new(HashMap::new(), keys);
        assert!(auth.check_public_key("anyone", &allowed));
        assert!(!auth.check_public_key("anyone", &other));
    }

    #[test]
    fn test_should_check_passwords() {
        let auth = StaticAuthenticator::new(
            HashMap::from([("alice".to_owned(), "secret".to_owned())]),
            Vec::new(),
        );
        assert!(auth.check_password("alice", "secret"));
        assert!(!auth.check_password("alice", "secret2"));
        assert!(!auth.check_password("alice", ""));
        assert!(!auth.check_password("bob", "secret"));
        assert!(!auth.allow_anonymous("alice"));
    }

    #[test]
    fn test_should_load_key_file() {
        let key = random_key();
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let path = dir.path().join("authorized_keys");
        std::fs::write(&path, format!("ssh-ed25519 {}\n", key.public_key_base64()))
            .unwrap_or_else(|e| panic!("write: {e}"));

        let config = SftpConfig::builder().authorized_keys_path(path).build();
        let auth = StaticAuthenticator::from_config(&config)
            .unwrap_or_else(|e| panic!("from_config: {e}"));
        assert!(auth.check_public_key("alice", &key));
    }

    #[test]
    fn test_should_fail_on_missing_key_file() {
        let config = SftpConfig::builder()
            .authorized_keys_path("/nonexistent/authorized_keys")
            .build();
        assert!(StaticAuthenticator::from_config(&config).is_err());
    }
}
