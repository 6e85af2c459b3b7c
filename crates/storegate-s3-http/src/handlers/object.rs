//! Object operations: put, get, head, delete and server-side copy.

use bytes::Bytes;
use http::StatusCode;
use storegate_core::utils::parse_range_header;
use storegate_core::{Context, Options, bytes_source};
use storegate_s3_xml::types::CopyResult;
use tracing::debug;

use super::S3Handler;
use crate::body::S3ResponseBody;
use crate::error::S3Error;
use crate::request::{content_type, header_str, options_from_headers, parse_copy_source};
use crate::response::{
    S3Response, empty, set_header, set_object_headers, with_status, xml_response,
};
use crate::router::RoutingContext;

impl S3Handler {
    pub(super) async fn put_object(
        &self,
        ctx: &Context,
        parts: &http::request::Parts,
        body: Bytes,
        route: &RoutingContext,
    ) -> Result<S3Response, S3Error> {
        let (name, key) = (route.bucket_name(), route.object_key());
        // Backends may create buckets lazily on write; S3 clients expect
        // NoSuchBucket instead.
        let bucket = self.require_bucket(ctx, name).await?;

        let size = body.len() as u64;
        let object = bucket
            .write(
                ctx,
                key,
                bytes_source(body),
                Some(size),
                &content_type(&parts.headers),
                &options_from_headers(&parts.headers),
            )
            .await
            .map_err(|err| S3Error::from(err).with_resource(format!("/{name}/{key}")))?;
        debug!(bucket = %name, key, size, "put object");

        let mut resp = empty(StatusCode::OK);
        if let Some(etag) = &object.etag {
            set_header(&mut resp, "etag", etag);
        }
        Ok(resp)
    }

    pub(super) async fn get_object(
        &self,
        ctx: &Context,
        parts: &http::request::Parts,
        route: &RoutingContext,
    ) -> Result<S3Response, S3Error> {
        let (name, key) = (route.bucket_name(), route.object_key());
        let bucket = self.bucket(name);
        let opts = Options::new();

        let meta = match bucket.stat(ctx, key, &opts).await {
            Ok(meta) => meta,
            Err(err) => return Err(self.object_error(ctx, name, key, err).await),
        };
        if meta.is_dir {
            return Err(S3Error::no_such_key(key));
        }

        let range = match header_str(&parts.headers, "range") {
            Some(r) => match parse_range_header(r, meta.size) {
                Ok(bounds) => Some(bounds),
                Err(_) if range_starts_past_end(r, meta.size) => {
                    return Err(S3Error::invalid_range(r, meta.size)
                        .with_resource(format!("/{name}/{key}")));
                }
                // Malformed ranges are ignored and the whole object is served.
                Err(_) => None,
            },
            None => None,
        };
        let (offset, length) = range.map_or((0, meta.size), |(start, end)| (start, end - start + 1));

        let (reader, object) = match bucket.open(ctx, key, offset, Some(length), &opts).await {
            Ok(opened) => opened,
            Err(err) => return Err(self.object_error(ctx, name, key, err).await),
        };

        let status = if range.is_some() {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        };
        let mut resp = with_status(status, S3ResponseBody::from_reader(reader, length));
        set_object_headers(&mut resp, &object);
        set_header(&mut resp, "content-length", &length.to_string());
        if let Some((start, end)) = range {
            set_header(
                &mut resp,
                "content-range",
                &format!("bytes {start}-{end}/{}", object.size),
            );
        }
        Ok(resp)
    }

    pub(super) async fn head_object(
        &self,
        ctx: &Context,
        route: &RoutingContext,
    ) -> Result<S3Response, S3Error> {
        let (name, key) = (route.bucket_name(), route.object_key());
        let object = match self.bucket(name).stat(ctx, key, &Options::new()).await {
            Ok(object) if object.is_dir => return Err(S3Error::no_such_key(key)),
            Ok(object) => object,
            Err(err) => return Err(self.object_error(ctx, name, key, err).await),
        };
        let mut resp = empty(StatusCode::OK);
        set_object_headers(&mut resp, &object);
        set_header(&mut resp, "content-length", &object.size.to_string());
        Ok(resp)
    }

    pub(super) async fn delete_object(
        &self,
        ctx: &Context,
        route: &RoutingContext,
    ) -> Result<S3Response, S3Error> {
        let (name, key) = (route.bucket_name(), route.object_key());
        match self.bucket(name).delete(ctx, key, &Options::new()).await {
            Ok(()) => {}
            // Deleting an absent key succeeds as long as the bucket exists.
            Err(err) if err.is_not_exist() => {
                self.require_bucket(ctx, name).await?;
            }
            Err(err) => return Err(err.into()),
        }
        debug!(bucket = %name, key, "deleted object");
        Ok(empty(StatusCode::NO_CONTENT))
    }

    pub(super) async fn copy_object(
        &self,
        ctx: &Context,
        parts: &http::request::Parts,
        route: &RoutingContext,
    ) -> Result<S3Response, S3Error> {
        let (name, key) = (route.bucket_name(), route.object_key());
        let source = header_str(&parts.headers, "x-amz-copy-source").unwrap_or_default();
        let (src_bucket, src_key) = parse_copy_source(source)?;

        let replace = header_str(&parts.headers, "x-amz-metadata-directive")
            .is_some_and(|d| d.eq_ignore_ascii_case("REPLACE"));
        let opts = if replace {
            options_from_headers(&parts.headers)
        } else {
            Options::new()
        };

        let object = match self
            .bucket(name)
            .copy(ctx, key, &src_bucket, &src_key, &opts)
            .await
        {
            Ok(object) => object,
            Err(err) if err.is_not_exist() => {
                self.require_bucket(ctx, name).await?;
                self.require_bucket(ctx, &src_bucket).await?;
                return Err(S3Error::no_such_key(src_key).with_source(err));
            }
            Err(err) => return Err(err.into()),
        };
        debug!(src_bucket = %src_bucket, src_key = %src_key, bucket = %name, key, "copied object");

        xml_response(
            "CopyObjectResult",
            &CopyResult {
                etag: object.etag.unwrap_or_default(),
                last_modified: object.updated,
            },
        )
    }
}

/// Whether `range` is well formed but begins at or after `size`.
fn range_starts_past_end(range: &str, size: u64) -> bool {
    let Some(bounds) = range.trim().strip_prefix("bytes=") else {
        return false;
    };
    if bounds.contains(',') {
        return false;
    }
    match bounds.split_once('-') {
        Some((start, end)) if !start.is_empty() => {
            let end_ok = end.is_empty() || end.parse::<u64>().is_ok();
            start.parse::<u64>().is_ok_and(|start| start >= size) && end_ok
        }
        _ => false,
    }
}
