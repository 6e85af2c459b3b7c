//! The backend-agnostic storage contract.
//!
//! # Architecture
//!
//! ```text
//! Storage ──bucket(name)──> Bucket ──multipart()──> Option<&dyn MultipartBucket>
//!    │                        │
//!    └ buckets/create/delete  └ write/open/stat/delete/copy/move/list
//! ```
//!
//! A [`Storage`] exclusively owns bucket existence. [`Storage::bucket`] hands
//! out a cheap [`Bucket`] handle without confirming the bucket exists; calls
//! on a handle whose bucket is missing fail with `NotExist`. Multipart
//! support is an optional capability discovered through
//! [`Bucket::multipart`], not a method every backend must stub out.
//!
//! Keys are opaque `/`-delimited strings. Directories are never stored: a
//! virtual directory exists while at least one key lives below its prefix.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::{StorageError, StorageResult};
use crate::object::{
    BucketInfo, ByteSource, Features, MultipartUpload, Object, ObjectReader, PartInfo,
};
use crate::options::Options;

/// Root handle of a storage backend.
#[async_trait]
pub trait Storage: Send + Sync + fmt::Debug {
    /// Return a handle for `name` without performing I/O. An empty name
    /// resolves to the backend's default bucket.
    fn bucket(&self, name: &str) -> Arc<dyn Bucket>;

    /// List buckets sorted by name. `limit == 0` means no cap.
    async fn buckets(
        &self,
        ctx: &Context,
        limit: usize,
        offset: usize,
        opts: &Options,
    ) -> StorageResult<Vec<BucketInfo>>;

    /// Create a bucket; `AlreadyExists` if the name is taken.
    async fn create_bucket(&self, ctx: &Context, name: &str, opts: &Options)
    -> StorageResult<BucketInfo>;

    /// Delete a bucket; `PermissionDenied` if non-empty unless `opts.force`.
    async fn delete_bucket(&self, ctx: &Context, name: &str, opts: &Options) -> StorageResult<()>;

    /// Capability flags of the backend.
    fn features(&self) -> Features;

    /// Release backend resources.
    async fn close(&self) -> StorageResult<()>;
}

/// A named collection of objects.
#[async_trait]
pub trait Bucket: Send + Sync + fmt::Debug {
    /// Bucket name.
    fn name(&self) -> &str;

    /// Bucket information; `NotExist` if the bucket is gone.
    async fn info(&self, ctx: &Context) -> StorageResult<BucketInfo>;

    /// Capability flags of this bucket.
    fn features(&self) -> Features;

    /// Store `src` under `key`, replacing an existing object unless
    /// `opts.no_overwrite` is set. `size`, when known, is the exact length.
    async fn write(
        &self,
        ctx: &Context,
        key: &str,
        src: ByteSource,
        size: Option<u64>,
        content_type: &str,
        opts: &Options,
    ) -> StorageResult<Object>;

    /// Open `key` for reading from `offset`. `length` of `None` (or 0) reads
    /// to the end.
    async fn open(
        &self,
        ctx: &Context,
        key: &str,
        offset: u64,
        length: Option<u64>,
        opts: &Options,
    ) -> StorageResult<(ObjectReader, Object)>;

    /// Describe `key`. A trailing `/` stats the virtual directory at that
    /// prefix.
    async fn stat(&self, ctx: &Context, key: &str, opts: &Options) -> StorageResult<Object>;

    /// Delete `key`; `NotExist` if it is missing.
    async fn delete(&self, ctx: &Context, key: &str, opts: &Options) -> StorageResult<()>;

    /// Copy `src_bucket/src_key` to `dst_key` in this bucket. An empty
    /// `src_bucket` means this bucket.
    async fn copy(
        &self,
        ctx: &Context,
        dst_key: &str,
        src_bucket: &str,
        src_key: &str,
        opts: &Options,
    ) -> StorageResult<Object>;

    /// Move `src_bucket/src_key` to `dst_key` in this bucket.
    async fn move_object(
        &self,
        ctx: &Context,
        dst_key: &str,
        src_bucket: &str,
        src_key: &str,
        opts: &Options,
    ) -> StorageResult<Object>;

    /// List objects under `prefix` sorted by key. Without `opts.recursive`
    /// only keys with no further `/` after the prefix are returned.
    async fn list(
        &self,
        ctx: &Context,
        prefix: &str,
        limit: usize,
        offset: usize,
        opts: &Options,
    ) -> StorageResult<Vec<Object>>;

    /// Issue a pre-signed URL for `key`.
    async fn signed_url(
        &self,
        ctx: &Context,
        key: &str,
        method: &str,
        expires: Duration,
        opts: &Options,
    ) -> StorageResult<String> {
        let _ = (ctx, method, expires, opts);
        Err(StorageError::unsupported(format!("signed url for {key}")))
    }

    /// The multipart capability, when the backend has one.
    fn multipart(&self) -> Option<&dyn MultipartBucket> {
        None
    }
}

/// Optional multipart-upload capability of a [`Bucket`].
#[async_trait]
pub trait MultipartBucket: Send + Sync {
    /// Start an upload for `key`.
    async fn init_multipart(
        &self,
        ctx: &Context,
        key: &str,
        content_type: &str,
        opts: &Options,
    ) -> StorageResult<MultipartUpload>;

    /// Store part `number` (1 to 10000), replacing any previous content.
    async fn upload_part(
        &self,
        ctx: &Context,
        upload: &MultipartUpload,
        number: i32,
        src: ByteSource,
        size: Option<u64>,
        opts: &Options,
    ) -> StorageResult<PartInfo>;

    /// Copy a byte range of an existing object into part `number`. Reads the
    /// `copy_source_*` params. May be `Unsupported`.
    async fn copy_part(
        &self,
        ctx: &Context,
        upload: &MultipartUpload,
        number: i32,
        opts: &Options,
    ) -> StorageResult<PartInfo> {
        let _ = (ctx, number, opts);
        Err(StorageError::unsupported(format!(
            "copy part for upload {}",
            upload.upload_id
        )))
    }

    /// Parts in ascending number order, skipping `offset` parts and returning
    /// at most `limit` (0 means no cap).
    async fn list_parts(
        &self,
        ctx: &Context,
        upload: &MultipartUpload,
        limit: usize,
        offset: usize,
        opts: &Options,
    ) -> StorageResult<Vec<PartInfo>>;

    /// Assemble the listed parts into the final object.
    async fn complete_multipart(
        &self,
        ctx: &Context,
        upload: &MultipartUpload,
        parts: &[PartInfo],
        opts: &Options,
    ) -> StorageResult<Object>;

    /// Discard the upload and its parts.
    async fn abort_multipart(
        &self,
        ctx: &Context,
        upload: &MultipartUpload,
        opts: &Options,
    ) -> StorageResult<()>;

    /// In-progress uploads whose key starts with `prefix`.
    async fn list_uploads(
        &self,
        ctx: &Context,
        prefix: &str,
        limit: usize,
        opts: &Options,
    ) -> StorageResult<Vec<MultipartUpload>>;
}
