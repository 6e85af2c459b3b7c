//! HTTP Basic and Bearer authentication for the DAV tree.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use dav_server::body::Body;
use http::{HeaderMap, HeaderValue, Response, StatusCode, header};
use subtle::ConstantTimeEq;

use crate::config::WebDavConfig;

const CHALLENGE: &str = "Basic realm=\"storegate\", charset=\"UTF-8\"";

/// Principal recorded for requests authenticated by token.
pub const BEARER_PRINCIPAL: &str = "bearer";

/// Checks `Authorization` headers against configured users and tokens.
///
/// With neither configured every request is allowed.
#[derive(Clone, Default)]
pub struct WebDavAuth {
    users: Arc<HashMap<String, String>>,
    tokens: Arc<Vec<String>>,
}

impl fmt::Debug for WebDavAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebDavAuth")
            .field("users", &self.users.len())
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

impl WebDavAuth {
    /// Accept `users` (name to password) and bearer `tokens`.
    #[must_use]
    pub fn new(users: HashMap<String, String>, tokens: Vec<String>) -> Self {
        Self {
            users: Arc::new(users),
            tokens: Arc::new(tokens),
        }
    }

    /// Credentials from the front-end configuration.
    #[must_use]
    pub fn from_config(config: &WebDavConfig) -> Self {
        Self::new(config.users.clone(), config.bearer_tokens.clone())
    }

    /// Whether any credential is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.users.is_empty() || !self.tokens.is_empty()
    }

    /// The authenticated principal, or `None` when the request must be
    /// challenged. Anonymous requests pass as `Some("")` when auth is off.
    #[must_use]
    pub fn authorize(&self, headers: &HeaderMap) -> Option<String> {
        if !self.is_enabled() {
            return Some(String::new());
        }
        let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let (scheme, credentials) = value.trim().split_once(' ')?;
        let credentials = credentials.trim();

        if scheme.eq_ignore_ascii_case("basic") {
            let decoded = BASE64.decode(credentials).ok()?;
            let decoded = String::from_utf8(decoded).ok()?;
            let (user, password) = decoded.split_once(':')?;
            let expected = self.users.get(user)?;
            return bool::from(expected.as_bytes().ct_eq(password.as_bytes()))
                .then(|| user.to_owned());
        }
        if scheme.eq_ignore_ascii_case("bearer") {
            let matched = self
                .tokens
                .iter()
                .fold(false, |hit, t| hit | bool::from(t.as_bytes().ct_eq(credentials.as_bytes())));
            return matched.then(|| BEARER_PRINCIPAL.to_owned());
        }
        None
    }
}

/// `401` with a Basic challenge.
#[must_use]
pub fn challenge() -> Response<Body> {
    let mut resp = Response::new(Body::from("authentication required\n"));
    *resp.status_mut() = StatusCode::UNAUTHORIZED;
    resp.headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(CHALLENGE));
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(authorization: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(authorization).unwrap_or_else(|e| panic!("header: {e}")),
        );
        headers
    }

    fn basic(user: &str, password: &str) -> String {
        format!("Basic {}", BASE64.encode(format!("{user}:{password}")))
    }

    fn auth() -> WebDavAuth {
        WebDavAuth::new(
            HashMap::from([("alice".to_owned(), "s3cret".to_owned())]),
            vec!["tok-123".to_owned()],
        )
    }

    #[test]
    fn test_should_allow_everything_when_disabled() {
        let auth = WebDavAuth::default();
        assert!(!auth.is_enabled());
        assert_eq!(auth.authorize(&HeaderMap::new()).as_deref(), Some(""));
    }

    #[test]
    fn test_should_accept_valid_basic_credentials() {
        let auth = auth();
        assert_eq!(
            auth.authorize(&headers(&basic("alice", "s3cret"))).as_deref(),
            Some("alice")
        );
        assert_eq!(auth.authorize(&headers(&basic("alice", "wrong"))), None);
        assert_eq!(auth.authorize(&headers(&basic("bob", "s3cret"))), None);
        assert_eq!(auth.authorize(&HeaderMap::new()), None);
    }

    #[test]
    fn test_should_accept_configured_bearer_token() {
        let auth = auth();
        assert_eq!(
            auth.authorize(&headers("Bearer tok-123")).as_deref(),
            Some(BEARER_PRINCIPAL)
        );
        assert_eq!(auth.authorize(&headers("bearer tok-124")), None);
        assert_eq!(auth.authorize(&headers("Digest abc")), None);
    }

    #[test]
    fn test_should_build_basic_challenge() {
        let resp = challenge();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let value = resp
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(value.starts_with("Basic realm=\"storegate\""), "{value}");
    }
}
