//! Transport-independent multipart upload engine.
//!
//! # Lifecycle
//!
//! ```text
//! init ──> Open ──upload_part/put_part*──> Open ──complete──> Completed
//!                                            └────abort─────> Aborted
//! ```
//!
//! Completed and aborted uploads are forgotten: their id no longer resolves
//! and every later call fails with `NotExist`. A completion that fails
//! validation (empty part list, unknown part number) leaves the upload open
//! so the client can retry.
//!
//! Parts of one upload live behind a per-upload mutex, so concurrent uploads
//! of different part numbers never corrupt each other. Re-uploading a number
//! replaces the earlier content; the last write wins.
//!
//! Backends embed a [`MultipartEngine`] and materialize the
//! [`CompletedUpload`] it returns through their own write path.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::checksums::{self, ChecksumAlgorithm};
use crate::context::Context;
use crate::error::{StorageError, StorageResult};
use crate::object::{ByteSource, MultipartUpload, PartInfo};
use crate::options::{Options, params};
use crate::spill::{SpillPolicy, StoredData};
use crate::utils::generate_upload_id;

/// Lowest valid part number.
pub const MIN_PART_NUMBER: i32 = 1;

/// Highest valid part number.
pub const MAX_PART_NUMBER: i32 = 10_000;

/// Validate a part number and convert it to `u32`.
///
/// # Errors
///
/// Returns [`StorageError::InvalidArgument`] outside `1..=10000`.
pub fn validate_part_number(number: i32) -> StorageResult<u32> {
    if (MIN_PART_NUMBER..=MAX_PART_NUMBER).contains(&number) {
        u32::try_from(number)
            .map_err(|_| StorageError::invalid_argument(format!("invalid part number {number}")))
    } else {
        Err(StorageError::invalid_argument(format!(
            "part number {number} is outside {MIN_PART_NUMBER}..={MAX_PART_NUMBER}"
        )))
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct StoredPart {
    info: PartInfo,
    data: StoredData,
}

#[derive(Debug)]
struct UploadState {
    upload: MultipartUpload,
    parts: Mutex<BTreeMap<u32, StoredPart>>,
}

/// The assembled result of a successful completion.
#[derive(Debug, Clone)]
pub struct CompletedUpload {
    /// The upload that was completed.
    pub upload: MultipartUpload,
    /// Concatenated part content in ascending part order.
    pub data: Bytes,
    /// Composite ETag, `"<md5>-<n>"`.
    pub etag: String,
    /// The parts that were assembled, ascending.
    pub parts: Vec<PartInfo>,
}

/// In-memory multipart state machine with disk spill for large parts.
#[derive(Debug, Default)]
pub struct MultipartEngine {
    uploads: DashMap<String, Arc<UploadState>>,
    spill: SpillPolicy,
}

impl MultipartEngine {
    /// Create an engine spilling parts according to `spill`.
    #[must_use]
    pub fn new(spill: SpillPolicy) -> Self {
        Self {
            uploads: DashMap::new(),
            spill,
        }
    }

    /// Number of open uploads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.uploads.len()
    }

    /// Whether no uploads are open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty()
    }

    /// Start a new upload for `bucket/key`.
    ///
    /// # Errors
    ///
    /// [`StorageError::InvalidArgument`] for an empty key.
    pub fn init(
        &self,
        ctx: &Context,
        bucket: &str,
        key: &str,
        content_type: &str,
        opts: &Options,
    ) -> StorageResult<MultipartUpload> {
        ctx.check()?;
        let key = key.trim();
        if key.is_empty() {
            return Err(StorageError::invalid_argument("multipart upload key is empty"));
        }

        let upload = MultipartUpload {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            upload_id: generate_upload_id(),
            content_type: content_type.to_owned(),
            initiated: Utc::now(),
            metadata: opts.metadata.clone(),
            params: opts.params.clone(),
        };
        self.uploads.insert(
            upload.upload_id.clone(),
            Arc::new(UploadState {
                upload: upload.clone(),
                parts: Mutex::new(BTreeMap::new()),
            }),
        );
        debug!(bucket, key, upload_id = %upload.upload_id, "initiated multipart upload");
        Ok(upload)
    }

    /// Look up the state of `upload`, checking that bucket and key match.
    fn state(&self, upload: &MultipartUpload) -> StorageResult<Arc<UploadState>> {
        let state = self
            .uploads
            .get(&upload.upload_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StorageError::not_exist(format!("upload {}", upload.upload_id)))?;
        if state.upload.bucket != upload.bucket || state.upload.key != upload.key {
            return Err(StorageError::not_exist(format!("upload {}", upload.upload_id)));
        }
        Ok(state)
    }

    /// Return the stored descriptor of an open upload.
    pub fn get(&self, upload_id: &str) -> StorageResult<MultipartUpload> {
        self.uploads
            .get(upload_id)
            .map(|entry| entry.value().upload.clone())
            .ok_or_else(|| StorageError::not_exist(format!("upload {upload_id}")))
    }

    /// Read `src` into part `number`, replacing earlier content.
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidArgument`] for a number outside `1..=10000`
    ///   or a body whose length differs from `size`.
    /// - [`StorageError::NotExist`] for an unknown, completed or aborted upload.
    pub async fn upload_part(
        &self,
        ctx: &Context,
        upload: &MultipartUpload,
        number: i32,
        mut src: ByteSource,
        size: Option<u64>,
        opts: &Options,
    ) -> StorageResult<PartInfo> {
        let number = validate_part_number(number)?;
        ctx.check()?;
        // Fail fast for dead uploads before draining the body.
        self.state(upload)?;

        let algorithm = requested_algorithm(opts)?;
        let capacity = size
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0)
            .min(self.spill.threshold);
        let (data, hashed) = ctx
            .run(async {
                checksums::read_and_hash(&mut src, algorithm, capacity)
                    .await
                    .map_err(StorageError::from)
            })
            .await?;

        if let Some(expected) = size {
            if expected != hashed.size {
                return Err(StorageError::invalid_argument(format!(
                    "part {number}: expected {expected} bytes, got {}",
                    hashed.size
                )));
            }
        }

        let mut info = PartInfo {
            number,
            size: hashed.size,
            etag: format!("\"{}\"", hashed.md5_hex),
            checksums: BTreeMap::new(),
            last_modified: Some(Utc::now()),
        };
        if let Some((algo, value)) = hashed.checksum {
            info.checksums.insert(algo.key().to_owned(), value);
        }
        self.store_part(upload, info, data).await
    }

    /// Store in-memory bytes as part `number` (used for server-side part
    /// copies).
    pub async fn put_part(
        &self,
        ctx: &Context,
        upload: &MultipartUpload,
        number: i32,
        data: Bytes,
        opts: &Options,
    ) -> StorageResult<PartInfo> {
        let number = validate_part_number(number)?;
        ctx.check()?;
        let mut info = PartInfo {
            number,
            size: data.len() as u64,
            etag: checksums::compute_etag(&data),
            checksums: BTreeMap::new(),
            last_modified: Some(Utc::now()),
        };
        if let Some(algo) = requested_algorithm(opts)? {
            info.checksums
                .insert(algo.key().to_owned(), checksums::compute_checksum(algo, &data));
        }
        self.store_part(upload, info, data).await
    }

    async fn store_part(
        &self,
        upload: &MultipartUpload,
        info: PartInfo,
        data: Bytes,
    ) -> StorageResult<PartInfo> {
        let state = self.state(upload)?;
        let stored = self.spill.store(data).await?;

        let mut parts = state.parts.lock().await;
        // A completion or abort may have won the race while we were reading.
        if !self.uploads.contains_key(&upload.upload_id) {
            return Err(StorageError::not_exist(format!("upload {}", upload.upload_id)));
        }
        trace!(
            upload_id = %upload.upload_id,
            part_number = info.number,
            size = info.size,
            replaced = parts.contains_key(&info.number),
            "stored part"
        );
        parts.insert(
            info.number,
            StoredPart {
                info: info.clone(),
                data: stored,
            },
        );
        Ok(info)
    }

    /// Parts in ascending number order after skipping `offset`, at most
    /// `limit` (0 means no cap).
    pub async fn list_parts(
        &self,
        ctx: &Context,
        upload: &MultipartUpload,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<PartInfo>> {
        ctx.check()?;
        let state = self.state(upload)?;
        let parts = state.parts.lock().await;
        let iter = parts.values().skip(offset).map(|p| p.info.clone());
        Ok(if limit == 0 {
            iter.collect()
        } else {
            iter.take(limit).collect()
        })
    }

    /// Validate `parts`, then assemble them in ascending number order and
    /// close the upload.
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidArgument`] for an empty list or a part number
    ///   that was never uploaded; the upload stays open.
    /// - [`StorageError::NotExist`] for an unknown upload.
    pub async fn complete(
        &self,
        ctx: &Context,
        upload: &MultipartUpload,
        parts: &[PartInfo],
    ) -> StorageResult<CompletedUpload> {
        ctx.check()?;
        if parts.is_empty() {
            return Err(StorageError::invalid_argument(
                "complete multipart requires at least one part",
            ));
        }
        let state = self.state(upload)?;

        let mut numbers: Vec<u32> = parts.iter().map(|p| p.number).collect();
        numbers.sort_unstable();
        numbers.dedup();

        let taken = {
            let mut stored = state.parts.lock().await;
            if let Some(missing) = numbers.iter().find(|n| !stored.contains_key(*n)) {
                return Err(StorageError::invalid_argument(format!(
                    "part {missing} was never uploaded"
                )));
            }
            if self
                .uploads
                .remove_if(&upload.upload_id, |_, v| Arc::ptr_eq(v, &state))
                .is_none()
            {
                return Err(StorageError::not_exist(format!("upload {}", upload.upload_id)));
            }
            std::mem::take(&mut *stored)
        };

        let mut combined = BytesMut::new();
        let mut md5s = Vec::with_capacity(numbers.len());
        let mut assembled = Vec::with_capacity(numbers.len());
        for number in &numbers {
            if let Some(part) = taken.get(number) {
                let data = part.data.read_all().await?;
                combined.extend_from_slice(&data);
                md5s.push(part.info.etag.clone());
                assembled.push(part.info.clone());
            }
        }
        let etag = checksums::compute_multipart_etag(&md5s, numbers.len());
        debug!(
            bucket = %upload.bucket,
            key = %upload.key,
            upload_id = %upload.upload_id,
            parts = numbers.len(),
            size = combined.len(),
            "assembled multipart upload"
        );

        Ok(CompletedUpload {
            upload: state.upload.clone(),
            data: combined.freeze(),
            etag,
            parts: assembled,
        })
    }

    /// Discard an upload and its parts.
    ///
    /// # Errors
    ///
    /// [`StorageError::NotExist`] if the upload is unknown, including a
    /// repeated abort. Transports decide whether that is an error.
    pub fn abort(&self, ctx: &Context, upload: &MultipartUpload) -> StorageResult<()> {
        ctx.check()?;
        let state = self.state(upload)?;
        if self
            .uploads
            .remove_if(&upload.upload_id, |_, v| Arc::ptr_eq(v, &state))
            .is_none()
        {
            return Err(StorageError::not_exist(format!("upload {}", upload.upload_id)));
        }
        debug!(upload_id = %upload.upload_id, "aborted multipart upload");
        Ok(())
    }

    /// Open uploads in `bucket` whose key starts with `prefix`, sorted by
    /// key then initiation time. `limit == 0` means no cap.
    #[must_use]
    pub fn list_uploads(&self, bucket: &str, prefix: &str, limit: usize) -> Vec<MultipartUpload> {
        let mut uploads: Vec<MultipartUpload> = self
            .uploads
            .iter()
            .filter(|e| e.value().upload.bucket == bucket && e.value().upload.key.starts_with(prefix))
            .map(|e| e.value().upload.clone())
            .collect();
        uploads.sort_by(|a, b| a.key.cmp(&b.key).then(a.initiated.cmp(&b.initiated)));
        if limit > 0 {
            uploads.truncate(limit);
        }
        uploads
    }

    /// Drop every open upload. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let removed = self.uploads.len();
        self.uploads.clear();
        removed
    }

    /// Drop every upload targeting `bucket`. Returns how many were removed.
    pub fn discard_bucket(&self, bucket: &str) -> usize {
        let before = self.uploads.len();
        self.uploads.retain(|_, state| state.upload.bucket != bucket);
        let removed = before.saturating_sub(self.uploads.len());
        if removed > 0 {
            debug!(bucket, removed, "discarded multipart uploads");
        }
        removed
    }
}

fn requested_algorithm(opts: &Options) -> StorageResult<Option<ChecksumAlgorithm>> {
    opts.param(params::CHECKSUM_ALGORITHM)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<ChecksumAlgorithm>()
                .map_err(|e| StorageError::invalid_argument(e.to_string()))
        })
        .transpose()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
