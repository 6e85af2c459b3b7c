//! Request header and query parsing.
//!
//! Standard and S3-specific headers become opaque [`Options::params`];
//! `x-amz-meta-*` headers become metadata. Nothing here interprets them.

use http::HeaderMap;
use storegate_core::{Options, params};

use crate::error::S3Error;
use crate::router::decode_uri_component;

/// Content type assumed when the client sends none.
pub const DEFAULT_CONTENT_TYPE: &str = "binary/octet-stream";

const META_PREFIX: &str = "x-amz-meta-";

/// Headers forwarded verbatim as backend params.
const FORWARDED_HEADERS: &[(&str, &str)] = &[
    ("cache-control", params::CACHE_CONTROL),
    ("content-encoding", params::CONTENT_ENCODING),
    ("content-disposition", params::CONTENT_DISPOSITION),
    ("content-language", params::CONTENT_LANGUAGE),
    ("expires", params::EXPIRES),
    ("x-amz-storage-class", params::STORAGE_CLASS),
    ("x-amz-acl", params::ACL),
    ("x-amz-server-side-encryption", params::SSE),
    (
        "x-amz-server-side-encryption-aws-kms-key-id",
        params::SSE_KMS_KEY_ID,
    ),
    ("x-amz-server-side-encryption-context", params::SSE_CONTEXT),
    ("x-amz-checksum-algorithm", params::CHECKSUM_ALGORITHM),
    ("x-amz-sdk-checksum-algorithm", params::CHECKSUM_ALGORITHM),
];

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `Content-Type`, or [`DEFAULT_CONTENT_TYPE`].
#[must_use]
pub fn content_type(headers: &HeaderMap) -> String {
    header_str(headers, "content-type")
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_owned()
}

/// Declared `Content-Length`, if present and numeric.
#[must_use]
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, "content-length").and_then(|v| v.trim().parse().ok())
}

/// Build call options from request headers.
///
/// # Examples
///
/// ```
/// use http::HeaderMap;
/// use storegate_s3_http::request::options_from_headers;
///
/// let mut headers = HeaderMap::new();
/// headers.insert("x-amz-meta-Owner", "alice".parse().unwrap());
/// headers.insert("cache-control", "no-cache".parse().unwrap());
/// let opts = options_from_headers(&headers);
/// assert_eq!(opts.metadata.get("owner").map(String::as_str), Some("alice"));
/// assert_eq!(opts.param("cache_control"), Some("no-cache"));
/// ```
#[must_use]
pub fn options_from_headers(headers: &HeaderMap) -> Options {
    let mut opts = Options::new();

    for (name, value) in headers {
        let Some(meta_key) = name.as_str().strip_prefix(META_PREFIX) else {
            continue;
        };
        if meta_key.is_empty() {
            continue;
        }
        if let Ok(value) = value.to_str() {
            opts.metadata
                .entry(meta_key.to_owned())
                .or_insert_with(|| value.to_owned());
        }
    }

    for (header, param) in FORWARDED_HEADERS {
        if let Some(value) = header_str(headers, header).filter(|v| !v.is_empty()) {
            opts.params
                .entry((*param).to_owned())
                .or_insert_with(|| value.to_owned());
        }
    }

    if let Some(tagging) = header_str(headers, "x-amz-tagging") {
        opts.tags = form_pairs(tagging).collect();
    }

    opts
}

fn form_pairs(encoded: &str) -> impl Iterator<Item = (String, String)> + '_ {
    form_urlencoded::parse(encoded.as_bytes())
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
}

/// `x-amz-copy-source` split into `(bucket, key)`.
///
/// Accepts `bucket/key` and `/bucket/key`, percent-encoded, and ignores a
/// trailing `?versionId=...`.
///
/// # Errors
///
/// `InvalidArgument` when the value has no bucket or key.
pub fn parse_copy_source(value: &str) -> Result<(String, String), S3Error> {
    let without_version = value.split_once('?').map_or(value, |(path, _)| path);
    let decoded = decode_uri_component(without_version);
    let trimmed = decoded.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
            Ok((bucket.to_owned(), key.to_owned()))
        }
        _ => Err(S3Error::invalid_argument(format!(
            "Invalid copy source: {value}"
        ))),
    }
}

/// Parse a positive page size, falling back to `default` and capping at
/// `max`.
#[must_use]
pub fn page_size(value: Option<&str>, default: usize, max: usize) -> usize {
    value
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .map_or(default, |n| n.min(max))
}
