//! Per-call options passed through to drivers.
//!
//! Transports translate protocol headers into an [`Options`] value. Only the
//! flags are interpreted by the core; `params` and `tags` are opaque and
//! forwarded to the backend untouched.

use std::collections::{BTreeMap, HashMap};

/// Well-known keys for [`Options::params`].
pub mod params {
    /// `Cache-Control` header value.
    pub const CACHE_CONTROL: &str = "cache_control";
    /// `Content-Encoding` header value.
    pub const CONTENT_ENCODING: &str = "content_encoding";
    /// `Content-Disposition` header value.
    pub const CONTENT_DISPOSITION: &str = "content_disposition";
    /// `Content-Language` header value.
    pub const CONTENT_LANGUAGE: &str = "content_language";
    /// `Expires` header value.
    pub const EXPIRES: &str = "expires";
    /// Requested storage class.
    pub const STORAGE_CLASS: &str = "storage_class";
    /// Canned ACL.
    pub const ACL: &str = "acl";
    /// Server-side encryption algorithm.
    pub const SSE: &str = "sse";
    /// KMS key id for server-side encryption.
    pub const SSE_KMS_KEY_ID: &str = "sse_kms_key_id";
    /// Encryption context for server-side encryption.
    pub const SSE_CONTEXT: &str = "sse_context";
    /// Extra checksum algorithm to compute (`CRC32`, `CRC32C`, `SHA1`, `SHA256`).
    pub const CHECKSUM_ALGORITHM: &str = "checksum_algorithm";
    /// Source bucket of a part copy.
    pub const COPY_SOURCE_BUCKET: &str = "copy_source_bucket";
    /// Source key of a part copy.
    pub const COPY_SOURCE_KEY: &str = "copy_source_key";
    /// Byte range of a part copy (`bytes=a-b`).
    pub const COPY_SOURCE_RANGE: &str = "copy_source_range";
}

/// Options accepted by every Storage, Bucket and multipart call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    /// User metadata stored with the object.
    pub metadata: HashMap<String, String>,
    /// Opaque backend parameters (see [`params`]).
    pub params: BTreeMap<String, String>,
    /// Object tags.
    pub tags: BTreeMap<String, String>,
    /// List everything below the prefix instead of direct children only.
    pub recursive: bool,
    /// Delete non-empty buckets.
    pub force: bool,
    /// Fail with `AlreadyExists` instead of overwriting.
    pub no_overwrite: bool,
}

impl Options {
    /// Empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options with `recursive` set.
    #[must_use]
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            ..Self::default()
        }
    }

    /// Options with `force` set.
    #[must_use]
    pub fn force() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    /// Builder-style setter for a single param.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Builder-style setter for a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Look up a param.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}
