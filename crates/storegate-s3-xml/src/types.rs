//! S3 XML document types.
//!
//! Field names follow the element names on the wire. Optional fields are
//! omitted from the output when `None`.

use chrono::{DateTime, Utc};

/// `<Owner>` of buckets and uploads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Owner {
    /// Canonical user id.
    pub id: String,
    /// Display name.
    pub display_name: String,
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

/// One `<Bucket>` of a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketEntry {
    /// Bucket name.
    pub name: String,
    /// Creation time.
    pub creation_date: DateTime<Utc>,
}

/// `ListAllMyBucketsResult` body of `GET /`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListAllMyBucketsResult {
    /// Owner of every listed bucket.
    pub owner: Owner,
    /// Buckets sorted by name.
    pub buckets: Vec<BucketEntry>,
}

/// One `<Contents>` entry of an object listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Object key.
    pub key: String,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// Quoted ETag.
    pub etag: String,
    /// Size in bytes.
    pub size: u64,
    /// Storage class.
    pub storage_class: String,
}

/// `ListBucketResult` body of ListObjectsV2.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListBucketResult {
    /// Bucket name.
    pub name: String,
    /// Requested prefix.
    pub prefix: String,
    /// Number of keys and common prefixes returned.
    pub key_count: usize,
    /// Requested page size.
    pub max_keys: usize,
    /// Requested delimiter.
    pub delimiter: Option<String>,
    /// Whether more results follow.
    pub is_truncated: bool,
    /// Token the request carried.
    pub continuation_token: Option<String>,
    /// Token for the next page.
    pub next_continuation_token: Option<String>,
    /// Requested start key.
    pub start_after: Option<String>,
    /// Objects.
    pub contents: Vec<ObjectEntry>,
    /// Rolled-up prefixes when a delimiter is given.
    pub common_prefixes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Multipart
// ---------------------------------------------------------------------------

/// `InitiateMultipartUploadResult` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateMultipartUploadResult {
    /// Bucket.
    pub bucket: String,
    /// Key.
    pub key: String,
    /// New upload id.
    pub upload_id: String,
}

/// One `<Part>` of a ListParts response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartEntry {
    /// Part number.
    pub part_number: u32,
    /// Upload time.
    pub last_modified: Option<DateTime<Utc>>,
    /// Quoted MD5 of the part.
    pub etag: String,
    /// Size in bytes.
    pub size: u64,
    /// `(element name, base64 value)` pairs such as `("ChecksumCRC32", ..)`.
    pub checksums: Vec<(String, String)>,
}

/// `ListPartsResult` body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPartsResult {
    /// Bucket.
    pub bucket: String,
    /// Key.
    pub key: String,
    /// Upload id.
    pub upload_id: String,
    /// Marker the request carried.
    pub part_number_marker: u32,
    /// Marker for the next page, set when truncated.
    pub next_part_number_marker: Option<u32>,
    /// Page size.
    pub max_parts: usize,
    /// Whether more parts follow.
    pub is_truncated: bool,
    /// Storage class.
    pub storage_class: String,
    /// Initiator and owner of the upload.
    pub owner: Owner,
    /// Parts ascending by number.
    pub parts: Vec<PartEntry>,
}

/// One `<Upload>` of a ListMultipartUploads response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEntry {
    /// Key.
    pub key: String,
    /// Upload id.
    pub upload_id: String,
    /// Initiation time.
    pub initiated: DateTime<Utc>,
    /// Storage class.
    pub storage_class: String,
}

/// `ListMultipartUploadsResult` body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListMultipartUploadsResult {
    /// Bucket.
    pub bucket: String,
    /// Requested prefix.
    pub prefix: String,
    /// Page size.
    pub max_uploads: usize,
    /// Whether more uploads follow.
    pub is_truncated: bool,
    /// Uploads sorted by key.
    pub uploads: Vec<UploadEntry>,
}

/// `CompleteMultipartUploadResult` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteMultipartUploadResult {
    /// Path of the new object.
    pub location: String,
    /// Bucket.
    pub bucket: String,
    /// Key.
    pub key: String,
    /// Composite ETag.
    pub etag: String,
}

/// `CopyObjectResult` / `CopyPartResult` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyResult {
    /// ETag of the copy.
    pub etag: String,
    /// Modification time of the copy.
    pub last_modified: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// One `<Part>` of a `CompleteMultipartUpload` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletedPart {
    /// Part number, as sent. Range checks are the caller's job.
    pub part_number: Option<i32>,
    /// ETag, as sent.
    pub etag: Option<String>,
    /// `(element name, value)` checksum pairs, as sent.
    pub checksums: Vec<(String, String)>,
}

/// `CompleteMultipartUpload` request body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletedMultipartUpload {
    /// Parts in document order.
    pub parts: Vec<CompletedPart>,
}
