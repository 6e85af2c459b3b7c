//! Canonical request construction.
//!
//! ```text
//! HTTPRequestMethod\n
//! CanonicalURI\n
//! CanonicalQueryString\n
//! CanonicalHeaders\n\n
//! SignedHeaders\n
//! HashedPayload
//! ```

use std::collections::BTreeMap;
use std::fmt;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use sha2::{Digest, Sha256};

/// Everything except RFC 3986 unreserved characters is encoded.
const URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Inputs of a canonical request. Render it with `to_string()`.
///
/// # Examples
///
/// ```
/// use storegate_s3_auth::canonical::CanonicalRequest;
///
/// let req = CanonicalRequest {
///     method: "GET",
///     path: "/photos/cat 1.jpg",
///     query: "b=2&a=1",
///     headers: &[("Host", "localhost:9000")],
///     signed_headers: &["host"],
///     payload_hash: "UNSIGNED-PAYLOAD",
/// };
/// assert_eq!(
///     req.to_string(),
///     "GET\n/photos/cat%201.jpg\na=1&b=2\nhost:localhost:9000\n\nhost\nUNSIGNED-PAYLOAD"
/// );
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CanonicalRequest<'a> {
    /// HTTP method.
    pub method: &'a str,
    /// Raw request path.
    pub path: &'a str,
    /// Raw query string without `?`.
    pub query: &'a str,
    /// Header name/value pairs; may include unsigned headers.
    pub headers: &'a [(&'a str, &'a str)],
    /// Lower-case names listed in `SignedHeaders`.
    pub signed_headers: &'a [&'a str],
    /// `x-amz-content-sha256` value or the hex SHA-256 of the body.
    pub payload_hash: &'a str,
}

impl CanonicalRequest<'_> {
    /// Hex SHA-256 of the rendered request.
    #[must_use]
    pub fn hash(&self) -> String {
        hex::encode(Sha256::digest(self.to_string().as_bytes()))
    }
}

impl fmt::Display for CanonicalRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n{}\n{}\n{}\n\n{}\n{}",
            self.method,
            canonical_uri(self.path),
            canonical_query(self.query),
            canonical_headers(self.headers, self.signed_headers),
            signed_headers_list(self.signed_headers),
            self.payload_hash,
        )
    }
}

/// Encode each path segment, keeping `/`. An empty path becomes `/`.
///
/// Segments are decoded first so an already-encoded path is not encoded
/// twice.
#[must_use]
pub fn canonical_uri(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "/".to_owned();
    }
    path.split('/')
        .map(|segment| {
            let decoded = percent_decode_str(segment).decode_utf8_lossy();
            utf8_percent_encode(&decoded, URI_ENCODE_SET).to_string()
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Sort query parameters by key, then value.
///
/// Values keep the client's encoding: SDKs disagree on which characters they
/// escape, and the signature covers whatever went over the wire.
#[must_use]
pub fn canonical_query(query: &str) -> String {
    let mut params: Vec<(&str, &str)> = query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|param| param.split_once('=').unwrap_or((param, "")))
        .collect();
    params.sort_unstable();
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// `name:value` lines for the signed headers, sorted by name.
///
/// Names are lower-cased, values trimmed with inner whitespace runs
/// collapsed. Repeated headers are joined with `,`. No trailing newline.
#[must_use]
pub fn canonical_headers(headers: &[(&str, &str)], signed_headers: &[&str]) -> String {
    let mut by_name: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
        by_name
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    let mut names: Vec<&str> = signed_headers.to_vec();
    names.sort_unstable();
    names
        .iter()
        .filter_map(|name| by_name.get(*name).map(|value| format!("{name}:{value}")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Sorted, `;`-joined header names.
#[must_use]
pub fn signed_headers_list(signed_headers: &[&str]) -> String {
    let mut names: Vec<&str> = signed_headers.to_vec();
    names.sort_unstable();
    names.join(";")
}
