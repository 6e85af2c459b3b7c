//! Operation handlers translating S3 requests into storage calls.
//!
//! Each operation lives in the submodule for its resource level. Handlers
//! return `Result<S3Response, S3Error>`; the service renders errors.

mod bucket;
mod multipart;
mod object;

use std::sync::Arc;

use bytes::Bytes;
use storegate_core::{Bucket, Context, MultipartBucket, Storage, StorageError};
use storegate_s3_xml::types::Owner;
use tracing::debug;

use crate::config::S3Config;
use crate::error::S3Error;
use crate::response::S3Response;
use crate::router::{RoutingContext, S3Operation};

/// Owner reported in listings.
const OWNER_ID: &str = "storegate";

fn owner() -> Owner {
    Owner {
        id: OWNER_ID.to_owned(),
        display_name: OWNER_ID.to_owned(),
    }
}

/// Serves routed S3 operations against a [`Storage`].
#[derive(Debug, Clone)]
pub struct S3Handler {
    storage: Arc<dyn Storage>,
    config: Arc<S3Config>,
}

impl S3Handler {
    /// Create a handler for `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, config: Arc<S3Config>) -> Self {
        Self { storage, config }
    }

    /// The backing storage.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Run the operation identified by `route`.
    ///
    /// # Errors
    ///
    /// The S3 error to render for the client.
    pub async fn dispatch(
        &self,
        ctx: &Context,
        parts: &http::request::Parts,
        body: Bytes,
        route: &RoutingContext,
    ) -> Result<S3Response, S3Error> {
        debug!(operation = %route.operation, bucket = ?route.bucket, key = ?route.key, "dispatching");
        match route.operation {
            S3Operation::ListBuckets => self.list_buckets(ctx).await,
            S3Operation::CreateBucket => self.create_bucket(ctx, route).await,
            S3Operation::DeleteBucket => self.delete_bucket(ctx, route).await,
            S3Operation::HeadBucket => self.head_bucket(ctx, route).await,
            S3Operation::GetBucketLocation => self.get_bucket_location(ctx, route).await,
            S3Operation::ListObjectsV2 => self.list_objects_v2(ctx, route).await,
            S3Operation::ListMultipartUploads => self.list_multipart_uploads(ctx, route).await,
            S3Operation::PutObject => self.put_object(ctx, parts, body, route).await,
            S3Operation::CopyObject => self.copy_object(ctx, parts, route).await,
            S3Operation::GetObject => self.get_object(ctx, parts, route).await,
            S3Operation::HeadObject => self.head_object(ctx, route).await,
            S3Operation::DeleteObject => self.delete_object(ctx, route).await,
            S3Operation::CreateMultipartUpload => {
                self.create_multipart_upload(ctx, parts, route).await
            }
            S3Operation::UploadPart => self.upload_part(ctx, parts, body, route).await,
            S3Operation::UploadPartCopy => self.upload_part_copy(ctx, parts, route).await,
            S3Operation::ListParts => self.list_parts(ctx, route).await,
            S3Operation::CompleteMultipartUpload => {
                self.complete_multipart_upload(ctx, parts, body, route).await
            }
            S3Operation::AbortMultipartUpload => self.abort_multipart_upload(ctx, route).await,
        }
    }

    fn bucket(&self, name: &str) -> Arc<dyn Bucket> {
        self.storage.bucket(name)
    }

    /// Fail with `NoSuchBucket` unless `name` exists.
    async fn require_bucket(&self, ctx: &Context, name: &str) -> Result<Arc<dyn Bucket>, S3Error> {
        let bucket = self.bucket(name);
        bucket
            .info(ctx)
            .await
            .map_err(|err| bucket_error(name, err))?;
        Ok(bucket)
    }

    /// Translate an object-level failure, telling a missing bucket apart
    /// from a missing key.
    async fn object_error(
        &self,
        ctx: &Context,
        bucket: &str,
        key: &str,
        err: StorageError,
    ) -> S3Error {
        if !err.is_not_exist() {
            return err.into();
        }
        match self.bucket(bucket).info(ctx).await {
            Err(missing) if missing.is_not_exist() => S3Error::no_such_bucket(bucket).with_source(err),
            _ => S3Error::no_such_key(key).with_source(err),
        }
    }
}

/// `NotExist` at bucket level means `NoSuchBucket`.
fn bucket_error(bucket: &str, err: StorageError) -> S3Error {
    if err.is_not_exist() {
        S3Error::no_such_bucket(bucket).with_source(err)
    } else {
        err.into()
    }
}

fn multipart_of(bucket: &dyn Bucket) -> Result<&dyn MultipartBucket, S3Error> {
    bucket
        .multipart()
        .ok_or_else(|| S3Error::not_implemented("multipart uploads are not supported by this backend"))
}
