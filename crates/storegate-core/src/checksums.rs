//! Content fingerprints for objects and multipart parts.
//!
//! MD5 is always computed and drives the ETag of every object and part.
//! Callers may additionally request one of the [`ChecksumAlgorithm`]s through
//! the `checksum_algorithm` option; the multipart engine records the result in
//! [`PartInfo::checksums`](crate::object::PartInfo::checksums).
//!
//! [`StreamingHasher`] lets drivers hash a body while draining it from a
//! reader, without holding a second copy.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use bytes::{Bytes, BytesMut};
use digest::Digest;
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// ChecksumAlgorithm
// ---------------------------------------------------------------------------

/// Optional checksum algorithms (MD5 is always computed for the ETag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    /// CRC-32 (IEEE 802.3).
    Crc32,
    /// CRC-32C (Castagnoli).
    Crc32c,
    /// SHA-1.
    Sha1,
    /// SHA-256.
    Sha256,
}

impl ChecksumAlgorithm {
    /// Canonical upper-case name, as used in S3 headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crc32 => "CRC32",
            Self::Crc32c => "CRC32C",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
        }
    }

    /// Lower-case key under which the value is stored in hash maps.
    #[must_use]
    pub fn key(&self) -> &'static str {
        match self {
            Self::Crc32 => "crc32",
            Self::Crc32c => "crc32c",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`ChecksumAlgorithm`] from a string fails.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown checksum algorithm: {0}")]
pub struct ParseChecksumAlgorithmError(String);

impl FromStr for ChecksumAlgorithm {
    type Err = ParseChecksumAlgorithmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CRC32" => Ok(Self::Crc32),
            "CRC32C" => Ok(Self::Crc32c),
            "SHA1" => Ok(Self::Sha1),
            "SHA256" => Ok(Self::Sha256),
            _ => Err(ParseChecksumAlgorithmError(s.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// One-shot functions
// ---------------------------------------------------------------------------

/// Compute the hex-encoded MD5 digest of `data`.
///
/// # Examples
///
/// ```
/// use storegate_core::checksums::compute_md5;
///
/// assert_eq!(compute_md5(b"hello"), "5d41402abc4b2a76b9719d911017c592");
/// ```
#[must_use]
pub fn compute_md5(data: &[u8]) -> String {
    hex::encode(md5::Md5::digest(data))
}

/// Compute the quoted MD5 ETag of `data`.
#[must_use]
pub fn compute_etag(data: &[u8]) -> String {
    format!("\"{}\"", compute_md5(data))
}

/// Compute the composite ETag of a completed multipart upload.
///
/// The value is the MD5 of the concatenated binary part digests, suffixed
/// with the part count: `"<hex>-<n>"`. Quoted or unquoted part digests are
/// both accepted.
///
/// # Examples
///
/// ```
/// use storegate_core::checksums::compute_multipart_etag;
///
/// let etag = compute_multipart_etag(&["5d41402abc4b2a76b9719d911017c592"], 1);
/// assert!(etag.ends_with("-1\""));
/// ```
#[must_use]
pub fn compute_multipart_etag(part_md5_hexes: &[impl AsRef<str>], part_count: usize) -> String {
    let mut combined = Vec::with_capacity(part_md5_hexes.len() * 16);
    for hex_str in part_md5_hexes {
        let hex_str = hex_str.as_ref().trim_matches('"');
        if let Ok(bytes) = hex::decode(hex_str) {
            combined.extend_from_slice(&bytes);
        }
    }
    let final_md5 = hex::encode(md5::Md5::digest(&combined));
    format!("\"{final_md5}-{part_count}\"")
}

/// Compute a base64-encoded checksum for the given algorithm.
#[must_use]
pub fn compute_checksum(algorithm: ChecksumAlgorithm, data: &[u8]) -> String {
    match algorithm {
        ChecksumAlgorithm::Crc32 => {
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(data);
            BASE64_STANDARD.encode(hasher.finalize().to_be_bytes())
        }
        ChecksumAlgorithm::Crc32c => BASE64_STANDARD.encode(crc32c::crc32c(data).to_be_bytes()),
        ChecksumAlgorithm::Sha1 => BASE64_STANDARD.encode(sha1::Sha1::digest(data)),
        ChecksumAlgorithm::Sha256 => BASE64_STANDARD.encode(sha2::Sha256::digest(data)),
    }
}

// ---------------------------------------------------------------------------
// StreamingHasher
// ---------------------------------------------------------------------------

/// Result produced by [`StreamingHasher::finish`].
#[derive(Debug, Clone)]
pub struct HasherResult {
    /// Hex-encoded MD5 digest.
    pub md5_hex: String,
    /// Number of bytes hashed.
    pub size: u64,
    /// Base64 checksum for the optional algorithm, if one was requested.
    pub checksum: Option<(ChecksumAlgorithm, String)>,
}

/// Incremental MD5 hasher with one optional extra algorithm.
///
/// # Examples
///
/// ```
/// use storegate_core::checksums::{ChecksumAlgorithm, StreamingHasher};
///
/// let mut hasher = StreamingHasher::new(Some(ChecksumAlgorithm::Sha256));
/// hasher.update(b"hello ");
/// hasher.update(b"world");
/// let result = hasher.finish();
/// assert_eq!(result.size, 11);
/// assert!(result.checksum.is_some());
/// ```
#[derive(Debug)]
pub struct StreamingHasher {
    md5: md5::Md5,
    extra: Option<ExtraHasher>,
    size: u64,
}

#[derive(Debug)]
enum ExtraHasher {
    Crc32(crc32fast::Hasher),
    Crc32c(u32),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
}

impl StreamingHasher {
    /// Create a hasher computing MD5 plus `algorithm`, when given.
    #[must_use]
    pub fn new(algorithm: Option<ChecksumAlgorithm>) -> Self {
        let extra = algorithm.map(|algo| match algo {
            ChecksumAlgorithm::Crc32 => ExtraHasher::Crc32(crc32fast::Hasher::new()),
            ChecksumAlgorithm::Crc32c => ExtraHasher::Crc32c(0),
            ChecksumAlgorithm::Sha1 => ExtraHasher::Sha1(<sha1::Sha1 as Digest>::new()),
            ChecksumAlgorithm::Sha256 => ExtraHasher::Sha256(<sha2::Sha256 as Digest>::new()),
        });
        Self {
            md5: <md5::Md5 as Digest>::new(),
            extra,
            size: 0,
        }
    }

    /// Feed more data into the hasher.
    pub fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.md5, data);
        self.size += data.len() as u64;
        match self.extra.as_mut() {
            Some(ExtraHasher::Crc32(h)) => h.update(data),
            Some(ExtraHasher::Crc32c(v)) => *v = crc32c::crc32c_append(*v, data),
            Some(ExtraHasher::Sha1(h)) => Digest::update(h, data),
            Some(ExtraHasher::Sha256(h)) => Digest::update(h, data),
            None => {}
        }
    }

    /// Finalize the hasher.
    #[must_use]
    pub fn finish(self) -> HasherResult {
        let md5_hex = hex::encode(Digest::finalize(self.md5));
        let checksum = self.extra.map(|extra| match extra {
            ExtraHasher::Crc32(h) => (
                ChecksumAlgorithm::Crc32,
                BASE64_STANDARD.encode(h.finalize().to_be_bytes()),
            ),
            ExtraHasher::Crc32c(v) => (
                ChecksumAlgorithm::Crc32c,
                BASE64_STANDARD.encode(v.to_be_bytes()),
            ),
            ExtraHasher::Sha1(h) => (
                ChecksumAlgorithm::Sha1,
                BASE64_STANDARD.encode(Digest::finalize(h)),
            ),
            ExtraHasher::Sha256(h) => (
                ChecksumAlgorithm::Sha256,
                BASE64_STANDARD.encode(Digest::finalize(h)),
            ),
        });
        HasherResult {
            md5_hex,
            size: self.size,
            checksum,
        }
    }
}

/// Drain `src` into memory while hashing it.
///
/// `capacity` pre-sizes the buffer; it is only a hint.
pub async fn read_and_hash<R>(
    src: &mut R,
    algorithm: Option<ChecksumAlgorithm>,
    capacity: usize,
) -> std::io::Result<(Bytes, HasherResult)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = StreamingHasher::new(algorithm);
    let mut buf = BytesMut::with_capacity(capacity);
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = src.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok((buf.freeze(), hasher.finish()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
