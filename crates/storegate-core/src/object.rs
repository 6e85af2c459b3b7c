//! Value types exchanged with the storage contract.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

/// Body source handed to `write`/`upload_part`.
pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

/// Body returned by `open`.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Wrap in-memory bytes as a [`ByteSource`].
#[must_use]
pub fn bytes_source(data: impl Into<Bytes>) -> ByteSource {
    Box::new(std::io::Cursor::new(data.into()))
}

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

/// Capability flag names.
pub mod feature {
    /// The backend can move objects.
    pub const MOVE: &str = "move";
    /// Moves happen without transferring bytes through the gateway.
    pub const SERVER_SIDE_MOVE: &str = "server_side_move";
    /// Copies happen without transferring bytes through the gateway.
    pub const SERVER_SIDE_COPY: &str = "server_side_copy";
    /// Virtual directories can be listed and stat'ed.
    pub const DIRECTORIES: &str = "directories";
    /// The multipart capability is available.
    pub const MULTIPART: &str = "multipart";
    /// Objects carry an MD5 hash.
    pub const HASH_MD5: &str = "hash:md5";
    /// Signed URLs can be issued.
    pub const SIGNED_URL: &str = "signed_url";
}

/// Capability flags reported by a Storage or Bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features(BTreeMap<String, bool>);

impl Features {
    /// Build from `(name, enabled)` pairs.
    #[must_use]
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, bool)>) -> Self {
        Self(pairs.into_iter().map(|(k, v)| (k.to_owned(), v)).collect())
    }

    /// Whether `name` is set and enabled.
    #[must_use]
    pub fn supports(&self, name: &str) -> bool {
        self.0.get(name).copied().unwrap_or(false)
    }

    /// Iterate over all flags.
    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

// ---------------------------------------------------------------------------
// Bucket / Object
// ---------------------------------------------------------------------------

/// Descriptive information about a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    /// Bucket name.
    pub name: String,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Capability flags.
    pub features: Features,
}

/// An object, or a virtual directory when `is_dir` is set.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    /// Owning bucket.
    pub bucket: String,
    /// Full key. Virtual directories have no trailing `/`.
    pub key: String,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// MIME type.
    pub content_type: String,
    /// Quoted entity tag, when the backend computes one.
    pub etag: Option<String>,
    /// Hashes by lower-case algorithm name (`md5`, `sha256`, ...).
    pub hashes: BTreeMap<String, String>,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Last modification time.
    pub updated: DateTime<Utc>,
    /// User metadata.
    pub metadata: HashMap<String, String>,
    /// Set only for virtual directories, which are never stored.
    pub is_dir: bool,
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("size", &self.size)
            .field("is_dir", &self.is_dir)
            .finish_non_exhaustive()
    }
}

impl Object {
    /// Build a virtual directory entry for `key` (trailing `/` removed).
    #[must_use]
    pub fn directory(bucket: &str, key: &str, created: DateTime<Utc>, updated: DateTime<Utc>) -> Self {
        Self {
            bucket: bucket.to_owned(),
            key: key.trim_end_matches('/').to_owned(),
            size: 0,
            content_type: String::new(),
            etag: None,
            hashes: BTreeMap::new(),
            created,
            updated,
            metadata: HashMap::new(),
            is_dir: true,
        }
    }

    /// Final path segment of the key.
    #[must_use]
    pub fn name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

// ---------------------------------------------------------------------------
// Multipart
// ---------------------------------------------------------------------------

/// An in-progress multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartUpload {
    /// Target bucket.
    pub bucket: String,
    /// Target key.
    pub key: String,
    /// Opaque upload id.
    pub upload_id: String,
    /// Content type of the object to materialize.
    pub content_type: String,
    /// Initiation time.
    pub initiated: DateTime<Utc>,
    /// Metadata captured at initiation.
    pub metadata: HashMap<String, String>,
    /// Opaque parameters captured at initiation (cache, encoding, ACL, SSE).
    pub params: BTreeMap<String, String>,
}

/// One uploaded part, or a caller's reference to one on completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartInfo {
    /// Part number, 1 to 10000.
    pub number: u32,
    /// Size in bytes.
    pub size: u64,
    /// Quoted MD5 of the part content.
    pub etag: String,
    /// Extra checksums by lower-case algorithm name (base64 values).
    pub checksums: BTreeMap<String, String>,
    /// Upload time.
    pub last_modified: Option<DateTime<Utc>>,
}

impl PartInfo {
    /// A completion reference carrying only number and ETag.
    #[must_use]
    pub fn reference(number: u32, etag: impl Into<String>) -> Self {
        Self {
            number,
            etag: etag.into(),
            ..Self::default()
        }
    }
}
