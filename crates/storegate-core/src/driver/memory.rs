//! In-memory storage driver.
//!
//! Registered under the `mem` and `memory` schemes:
//!
//! ```text
//! mem://[name][?bucket=<default>&spill_threshold=<bytes>&temp_dir=<path>]
//! ```
//!
//! Object bodies above the spill threshold live in temporary files that are
//! removed when the object is overwritten or deleted. Bucket handles are
//! plain `(storage, name)` pairs; the first write into a missing bucket
//! creates it, every other call on a missing bucket fails with `NotExist`.
//! Multipart uploads are served by an embedded [`MultipartEngine`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, trace};
use typed_builder::TypedBuilder;

use crate::checksums;
use crate::context::Context;
use crate::error::{StorageError, StorageResult};
use crate::multipart::MultipartEngine;
use crate::object::{
    BucketInfo, ByteSource, Features, MultipartUpload, Object, ObjectReader, PartInfo, feature,
};
use crate::options::{Options, params};
use crate::registry::{Dsn, DriverFactory};
use crate::spill::{SpillPolicy, StoredData};
use crate::storage::{Bucket, MultipartBucket, Storage};
use crate::utils::parse_range_header;

/// Bucket used for `bucket("")` when the DSN names none.
pub const DEFAULT_BUCKET: &str = "default";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

fn default_features() -> Features {
    Features::from_pairs([
        (feature::MOVE, true),
        (feature::SERVER_SIDE_MOVE, true),
        (feature::SERVER_SIDE_COPY, true),
        (feature::DIRECTORIES, true),
        (feature::MULTIPART, true),
        (feature::HASH_MD5, true),
        (feature::SIGNED_URL, false),
    ])
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// [`DriverFactory`] for `mem://` DSNs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryDriver;

#[async_trait]
impl DriverFactory for MemoryDriver {
    async fn open(&self, ctx: &Context, dsn: &Dsn) -> StorageResult<Arc<dyn Storage>> {
        ctx.check()?;
        let config = MemoryConfig::from_dsn(dsn)?;
        let storage = MemoryStorage::new(config);
        if let Some(bucket) = storage.inner.config.default_bucket.clone() {
            storage.ensure_bucket(&bucket);
        }
        Ok(Arc::new(storage))
    }
}

/// Settings of a [`MemoryStorage`].
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct MemoryConfig {
    /// Instance name, used in logs only.
    #[builder(default)]
    pub name: String,
    /// Bucket returned for `bucket("")`, created at open.
    #[builder(default)]
    pub default_bucket: Option<String>,
    /// Spill policy for object and part bodies.
    #[builder(default)]
    pub spill: SpillPolicy,
}

impl MemoryConfig {
    /// Build from a `mem://` DSN.
    pub fn from_dsn(dsn: &Dsn) -> StorageResult<Self> {
        let mut spill = SpillPolicy::default();
        if let Some(threshold) = dsn.query("spill_threshold") {
            spill.threshold = threshold.parse().map_err(|_| {
                StorageError::invalid_argument(format!("invalid spill_threshold {threshold:?}"))
            })?;
        }
        if let Some(dir) = dsn.query("temp_dir").filter(|d| !d.is_empty()) {
            spill.temp_dir = Some(dir.into());
        }
        Ok(Self {
            name: dsn.host().to_owned(),
            default_bucket: dsn
                .query("bucket")
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(str::to_owned),
            spill,
        })
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Entry {
    object: Object,
    data: StoredData,
}

#[derive(Debug)]
struct BucketData {
    created: DateTime<Utc>,
    objects: DashMap<String, Arc<Entry>>,
}

impl BucketData {
    fn new() -> Self {
        Self {
            created: Utc::now(),
            objects: DashMap::new(),
        }
    }

    fn sorted_with_prefix(&self, prefix: &str) -> Vec<Arc<Entry>> {
        let mut entries: Vec<Arc<Entry>> = self
            .objects
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| Arc::clone(e.value()))
            .collect();
        entries.sort_by(|a, b| a.object.key.cmp(&b.object.key));
        entries
    }
}

#[derive(Debug)]
struct Inner {
    config: MemoryConfig,
    features: Features,
    buckets: RwLock<BTreeMap<String, Arc<BucketData>>>,
    uploads: MultipartEngine,
}

impl Inner {
    fn bucket_data(&self, name: &str) -> StorageResult<Arc<BucketData>> {
        self.buckets
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::not_exist(format!("bucket {name}")))
    }
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

/// Storage backed by process memory.
///
/// # Examples
///
/// ```
/// use storegate_core::{Context, Options, Storage, bytes_source};
/// use storegate_core::driver::memory::MemoryStorage;
///
/// # tokio_test::block_on(async {
/// let storage = MemoryStorage::default();
/// let ctx = Context::background();
/// storage.create_bucket(&ctx, "docs", &Options::new()).await.unwrap();
/// let bucket = storage.bucket("docs");
/// let obj = bucket
///     .write(&ctx, "hello.txt", bytes_source("hello"), Some(5), "text/plain", &Options::new())
///     .await
///     .unwrap();
/// assert_eq!(obj.size, 5);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    inner: Arc<Inner>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

impl MemoryStorage {
    /// Create an empty storage.
    #[must_use]
    pub fn new(config: MemoryConfig) -> Self {
        debug!(name = %config.name, threshold = config.spill.threshold, "creating memory storage");
        let uploads = MultipartEngine::new(config.spill.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                features: default_features(),
                buckets: RwLock::new(BTreeMap::new()),
                uploads,
            }),
        }
    }

    fn ensure_bucket(&self, name: &str) -> Arc<BucketData> {
        let mut buckets = self.inner.buckets.write();
        Arc::clone(
            buckets
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(BucketData::new())),
        )
    }

    fn handle(&self, name: &str) -> MemoryBucket {
        MemoryBucket {
            storage: self.clone(),
            name: name.to_owned(),
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn bucket(&self, name: &str) -> Arc<dyn Bucket> {
        let name = name.trim();
        let name = if name.is_empty() {
            self.inner
                .config
                .default_bucket
                .as_deref()
                .unwrap_or(DEFAULT_BUCKET)
        } else {
            name
        };
        Arc::new(self.handle(name))
    }

    async fn buckets(
        &self,
        ctx: &Context,
        limit: usize,
        offset: usize,
        _opts: &Options,
    ) -> StorageResult<Vec<BucketInfo>> {
        ctx.check()?;
        let buckets = self.inner.buckets.read();
        let iter = buckets.iter().skip(offset).map(|(name, data)| BucketInfo {
            name: name.clone(),
            created: data.created,
            features: self.inner.features.clone(),
        });
        Ok(if limit == 0 {
            iter.collect()
        } else {
            iter.take(limit).collect()
        })
    }

    async fn create_bucket(
        &self,
        ctx: &Context,
        name: &str,
        _opts: &Options,
    ) -> StorageResult<BucketInfo> {
        ctx.check()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(StorageError::invalid_argument("bucket name is empty"));
        }
        let mut buckets = self.inner.buckets.write();
        if buckets.contains_key(name) {
            return Err(StorageError::already_exists(format!("bucket {name}")));
        }
        let data = Arc::new(BucketData::new());
        let created = data.created;
        buckets.insert(name.to_owned(), data);
        debug!(bucket = name, "created bucket");
        Ok(BucketInfo {
            name: name.to_owned(),
            created,
            features: self.inner.features.clone(),
        })
    }

    async fn delete_bucket(&self, ctx: &Context, name: &str, opts: &Options) -> StorageResult<()> {
        ctx.check()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(StorageError::invalid_argument("bucket name is empty"));
        }
        {
            let mut buckets = self.inner.buckets.write();
            let data = buckets
                .get(name)
                .ok_or_else(|| StorageError::not_exist(format!("bucket {name}")))?;
            if !opts.force && !data.objects.is_empty() {
                return Err(StorageError::permission_denied(format!(
                    "bucket {name} is not empty"
                )));
            }
            buckets.remove(name);
        }
        self.inner.uploads.discard_bucket(name);
        debug!(bucket = name, force = opts.force, "deleted bucket");
        Ok(())
    }

    fn features(&self) -> Features {
        self.inner.features.clone()
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.buckets.write().clear();
        let uploads = self.inner.uploads.clear();
        debug!(name = %self.inner.config.name, uploads, "closed memory storage");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryBucket
// ---------------------------------------------------------------------------

/// Handle to a bucket of a [`MemoryStorage`].
#[derive(Debug, Clone)]
pub struct MemoryBucket {
    storage: MemoryStorage,
    name: String,
}

impl MemoryBucket {
    fn data(&self) -> StorageResult<Arc<BucketData>> {
        self.storage.inner.bucket_data(&self.name)
    }

    fn entry(&self, key: &str) -> StorageResult<Arc<Entry>> {
        self.data()?
            .objects
            .get(key)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| StorageError::not_exist(format!("{}/{key}", self.name)))
    }

    fn clean_key(key: &str) -> StorageResult<&str> {
        let key = key.trim();
        if key.is_empty() {
            Err(StorageError::invalid_argument("key is empty"))
        } else {
            Ok(key)
        }
    }

    /// Insert a body under `key`, preserving the creation time of a replaced
    /// object.
    async fn put(
        &self,
        data: &Arc<BucketData>,
        key: &str,
        body: StoredData,
        template: Object,
        opts: &Options,
    ) -> StorageResult<Object> {
        let now = Utc::now();
        let existing = data.objects.get(key).map(|e| e.object.created);
        if opts.no_overwrite && existing.is_some() {
            return Err(StorageError::already_exists(format!("{}/{key}", self.name)));
        }
        let object = Object {
            created: existing.unwrap_or(now),
            updated: now,
            ..template
        };
        data.objects.insert(
            key.to_owned(),
            Arc::new(Entry {
                object: object.clone(),
                data: body,
            }),
        );
        Ok(object)
    }
}

#[async_trait]
impl Bucket for MemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn info(&self, ctx: &Context) -> StorageResult<BucketInfo> {
        ctx.check()?;
        let data = self.data()?;
        Ok(BucketInfo {
            name: self.name.clone(),
            created: data.created,
            features: self.storage.inner.features.clone(),
        })
    }

    fn features(&self) -> Features {
        self.storage.inner.features.clone()
    }

    async fn write(
        &self,
        ctx: &Context,
        key: &str,
        mut src: ByteSource,
        size: Option<u64>,
        content_type: &str,
        opts: &Options,
    ) -> StorageResult<Object> {
        ctx.check()?;
        let key = Self::clean_key(key)?;
        let spill = &self.storage.inner.config.spill;

        let capacity = size
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0)
            .min(spill.threshold);
        let (body, hashed) = ctx
            .run(async {
                checksums::read_and_hash(&mut src, None, capacity)
                    .await
                    .map_err(StorageError::from)
            })
            .await?;
        if let Some(expected) = size {
            if expected != hashed.size {
                return Err(StorageError::invalid_argument(format!(
                    "{key}: expected {expected} bytes, got {}",
                    hashed.size
                )));
            }
        }

        let stored = spill.store(body).await?;
        let data = self.storage.ensure_bucket(&self.name);
        let content_type = if content_type.is_empty() {
            DEFAULT_CONTENT_TYPE
        } else {
            content_type
        };
        let template = Object {
            bucket: self.name.clone(),
            key: key.to_owned(),
            size: hashed.size,
            content_type: content_type.to_owned(),
            etag: Some(format!("\"{}\"", hashed.md5_hex)),
            hashes: BTreeMap::from([("md5".to_owned(), hashed.md5_hex)]),
            created: Utc::now(),
            updated: Utc::now(),
            metadata: opts.metadata.clone(),
            is_dir: false,
        };
        let object = self.put(&data, key, stored, template, opts).await?;
        trace!(bucket = %self.name, key, size = object.size, "stored object");
        Ok(object)
    }

    async fn open(
        &self,
        ctx: &Context,
        key: &str,
        offset: u64,
        length: Option<u64>,
        _opts: &Options,
    ) -> StorageResult<(ObjectReader, Object)> {
        ctx.check()?;
        let key = Self::clean_key(key)?;
        let entry = self.entry(key)?;
        let reader = ctx.run(entry.data.open_reader(offset, length)).await?;
        Ok((reader, entry.object.clone()))
    }

    async fn stat(&self, ctx: &Context, key: &str, _opts: &Options) -> StorageResult<Object> {
        ctx.check()?;
        let key = Self::clean_key(key)?;

        if key.ends_with('/') {
            let data = self.data()?;
            let mut span: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
            for entry in data.objects.iter().filter(|e| e.key().starts_with(key)) {
                let obj = &entry.value().object;
                span = Some(match span {
                    None => (obj.created, obj.updated),
                    Some((c, u)) => (c.min(obj.created), u.max(obj.updated)),
                });
            }
            let (created, updated) =
                span.ok_or_else(|| StorageError::not_exist(format!("{}/{key}", self.name)))?;
            return Ok(Object::directory(&self.name, key, created, updated));
        }

        Ok(self.entry(key)?.object.clone())
    }

    async fn delete(&self, ctx: &Context, key: &str, _opts: &Options) -> StorageResult<()> {
        ctx.check()?;
        let key = Self::clean_key(key)?;
        self.data()?
            .objects
            .remove(key)
            .map(|_| trace!(bucket = %self.name, key, "deleted object"))
            .ok_or_else(|| StorageError::not_exist(format!("{}/{key}", self.name)))
    }

    async fn copy(
        &self,
        ctx: &Context,
        dst_key: &str,
        src_bucket: &str,
        src_key: &str,
        opts: &Options,
    ) -> StorageResult<Object> {
        ctx.check()?;
        let dst_key = Self::clean_key(dst_key)?;
        let src_key = Self::clean_key(src_key)?;
        let src_bucket = if src_bucket.is_empty() {
            self.name.as_str()
        } else {
            src_bucket
        };

        let source = self.storage.handle(src_bucket).entry(src_key)?;
        let body = source.data.read_all().await?;
        let stored = self.storage.inner.config.spill.store(body).await?;
        let data = self.data()?;

        let metadata = if opts.metadata.is_empty() {
            source.object.metadata.clone()
        } else {
            opts.metadata.clone()
        };
        let template = Object {
            bucket: self.name.clone(),
            key: dst_key.to_owned(),
            metadata,
            ..source.object.clone()
        };
        let object = self.put(&data, dst_key, stored, template, opts).await?;
        debug!(src_bucket, src_key, dst_bucket = %self.name, dst_key, "copied object");
        Ok(object)
    }

    async fn move_object(
        &self,
        ctx: &Context,
        dst_key: &str,
        src_bucket: &str,
        src_key: &str,
        opts: &Options,
    ) -> StorageResult<Object> {
        let src_bucket = if src_bucket.is_empty() {
            self.name.as_str()
        } else {
            src_bucket
        };
        if src_bucket == self.name && src_key.trim() == dst_key.trim() {
            return self.stat(ctx, dst_key, opts).await;
        }
        let object = self.copy(ctx, dst_key, src_bucket, src_key, opts).await?;
        self.storage
            .handle(src_bucket)
            .delete(ctx, src_key, &Options::new())
            .await?;
        Ok(object)
    }

    async fn list(
        &self,
        ctx: &Context,
        prefix: &str,
        limit: usize,
        offset: usize,
        opts: &Options,
    ) -> StorageResult<Vec<Object>> {
        ctx.check()?;
        let prefix = prefix.trim();
        let data = self.data()?;
        let iter = data
            .sorted_with_prefix(prefix)
            .into_iter()
            .filter(|e| {
                opts.recursive || {
                    let rest = &e.object.key[prefix.len()..];
                    !rest.trim_start_matches('/').contains('/')
                }
            })
            .skip(offset)
            .map(|e| e.object.clone());
        Ok(if limit == 0 {
            iter.collect()
        } else {
            iter.take(limit).collect()
        })
    }

    fn multipart(&self) -> Option<&dyn MultipartBucket> {
        Some(self)
    }
}

#[async_trait]
impl MultipartBucket for MemoryBucket {
    async fn init_multipart(
        &self,
        ctx: &Context,
        key: &str,
        content_type: &str,
        opts: &Options,
    ) -> StorageResult<MultipartUpload> {
        self.data()?;
        let content_type = if content_type.is_empty() {
            DEFAULT_CONTENT_TYPE
        } else {
            content_type
        };
        self.storage
            .inner
            .uploads
            .init(ctx, &self.name, key, content_type, opts)
    }

    async fn upload_part(
        &self,
        ctx: &Context,
        upload: &MultipartUpload,
        number: i32,
        src: ByteSource,
        size: Option<u64>,
        opts: &Options,
    ) -> StorageResult<PartInfo> {
        self.storage
            .inner
            .uploads
            .upload_part(ctx, upload, number, src, size, opts)
            .await
    }

    async fn copy_part(
        &self,
        ctx: &Context,
        upload: &MultipartUpload,
        number: i32,
        opts: &Options,
    ) -> StorageResult<PartInfo> {
        crate::multipart::validate_part_number(number)?;
        let src_key = opts
            .param(params::COPY_SOURCE_KEY)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| StorageError::invalid_argument("copy part needs a source key"))?;
        let src_bucket = opts
            .param(params::COPY_SOURCE_BUCKET)
            .filter(|b| !b.is_empty())
            .unwrap_or(&self.name);

        let source = self.storage.handle(src_bucket).entry(src_key)?;
        let body = match opts.param(params::COPY_SOURCE_RANGE) {
            Some(range) if !range.is_empty() => {
                let (start, end) = parse_range_header(range, source.data.len())?;
                source.data.read_range(start, Some(end - start + 1)).await?
            }
            _ => source.data.read_all().await?,
        };
        self.storage
            .inner
            .uploads
            .put_part(ctx, upload, number, body, opts)
            .await
    }

    async fn list_parts(
        &self,
        ctx: &Context,
        upload: &MultipartUpload,
        limit: usize,
        offset: usize,
        _opts: &Options,
    ) -> StorageResult<Vec<PartInfo>> {
        self.storage
            .inner
            .uploads
            .list_parts(ctx, upload, limit, offset)
            .await
    }

    async fn complete_multipart(
        &self,
        ctx: &Context,
        upload: &MultipartUpload,
        parts: &[PartInfo],
        opts: &Options,
    ) -> StorageResult<Object> {
        let done = self
            .storage
            .inner
            .uploads
            .complete(ctx, upload, parts)
            .await?;
        let size = done.data.len() as u64;
        let stored = self.storage.inner.config.spill.store(done.data).await?;
        let data = self.data()?;
        let template = Object {
            bucket: self.name.clone(),
            key: done.upload.key.clone(),
            size,
            content_type: done.upload.content_type.clone(),
            etag: Some(done.etag),
            hashes: BTreeMap::new(),
            created: Utc::now(),
            updated: Utc::now(),
            metadata: done.upload.metadata.clone(),
            is_dir: false,
        };
        let overwrite = Options {
            no_overwrite: false,
            ..opts.clone()
        };
        let object = self
            .put(&data, &done.upload.key, stored, template, &overwrite)
            .await?;
        debug!(
            bucket = %self.name,
            key = %object.key,
            size,
            parts = done.parts.len(),
            "completed multipart upload"
        );
        Ok(object)
    }

    async fn abort_multipart(
        &self,
        ctx: &Context,
        upload: &MultipartUpload,
        _opts: &Options,
    ) -> StorageResult<()> {
        self.storage.inner.uploads.abort(ctx, upload)
    }

    async fn list_uploads(
        &self,
        ctx: &Context,
        prefix: &str,
        limit: usize,
        _opts: &Options,
    ) -> StorageResult<Vec<MultipartUpload>> {
        ctx.check()?;
        self.data()?;
        Ok(self.storage.inner.uploads.list_uploads(&self.name, prefix, limit))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
