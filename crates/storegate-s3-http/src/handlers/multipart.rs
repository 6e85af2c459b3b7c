//! Multipart upload operations.
//!
//! Upload state lives in the backend; these handlers only translate the
//! S3 wire shapes. A repeated abort is reported as success.

use bytes::Bytes;
use chrono::Utc;
use http::StatusCode;
use storegate_core::multipart::{MAX_PART_NUMBER, MIN_PART_NUMBER};
use storegate_core::{Context, ErrorKind, MultipartUpload, Options, PartInfo, bytes_source, params};
use storegate_s3_xml::from_xml;
use storegate_s3_xml::types::{
    CompleteMultipartUploadResult, CompletedMultipartUpload, CopyResult,
    InitiateMultipartUploadResult, ListPartsResult, PartEntry,
};
use tracing::{debug, info};

use super::{S3Handler, bucket_error, multipart_of, owner};
use crate::error::{S3Error, S3ErrorCode};
use crate::request::{content_type, header_str, options_from_headers, page_size, parse_copy_source};
use crate::response::{S3Response, empty, set_header, xml_response};
use crate::router::RoutingContext;

const MAX_PARTS: usize = 1000;

/// Headers echoed back from the initiation request.
const ECHOED_HEADERS: &[&str] = &[
    "x-amz-server-side-encryption",
    "x-amz-server-side-encryption-aws-kms-key-id",
    "x-amz-checksum-algorithm",
];

/// Reference to an upload named by the request's `uploadId`.
fn upload_ref(route: &RoutingContext) -> Result<MultipartUpload, S3Error> {
    let upload_id = route
        .query("uploadId")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| S3Error::invalid_argument("uploadId is required"))?;
    Ok(MultipartUpload {
        bucket: route.bucket_name().to_owned(),
        key: route.object_key().to_owned(),
        upload_id: upload_id.to_owned(),
        content_type: String::new(),
        initiated: Utc::now(),
        metadata: std::collections::HashMap::new(),
        params: std::collections::BTreeMap::new(),
    })
}

fn part_number(route: &RoutingContext) -> Result<i32, S3Error> {
    route
        .query("partNumber")
        .and_then(|n| n.parse::<i32>().ok())
        .filter(|n| (MIN_PART_NUMBER..=MAX_PART_NUMBER).contains(n))
        .ok_or_else(|| {
            S3Error::invalid_argument(format!(
                "Part number must be an integer between {MIN_PART_NUMBER} and {MAX_PART_NUMBER}, inclusive"
            ))
        })
}

/// `crc32c` becomes `ChecksumCRC32C`.
fn checksum_element(algorithm: &str) -> String {
    format!("Checksum{}", algorithm.to_ascii_uppercase())
}

impl S3Handler {
    pub(super) async fn create_multipart_upload(
        &self,
        ctx: &Context,
        parts: &http::request::Parts,
        route: &RoutingContext,
    ) -> Result<S3Response, S3Error> {
        let (name, key) = (route.bucket_name(), route.object_key());
        let bucket = self.bucket(name);
        let mp = multipart_of(bucket.as_ref())?;
        let upload = mp
            .init_multipart(
                ctx,
                key,
                &content_type(&parts.headers),
                &options_from_headers(&parts.headers),
            )
            .await
            .map_err(|err| bucket_error(name, err))?;
        info!(bucket = %name, key, upload_id = %upload.upload_id, "initiated multipart upload");

        let mut resp = xml_response(
            "InitiateMultipartUploadResult",
            &InitiateMultipartUploadResult {
                bucket: upload.bucket,
                key: upload.key,
                upload_id: upload.upload_id,
            },
        )?;
        for header in ECHOED_HEADERS {
            if let Some(value) = header_str(&parts.headers, header) {
                set_header(&mut resp, header, value);
            }
        }
        Ok(resp)
    }

    pub(super) async fn upload_part(
        &self,
        ctx: &Context,
        parts: &http::request::Parts,
        body: Bytes,
        route: &RoutingContext,
    ) -> Result<S3Response, S3Error> {
        let number = part_number(route)?;
        let upload = upload_ref(route)?;
        let bucket = self.bucket(route.bucket_name());
        let mp = multipart_of(bucket.as_ref())?;

        let size = body.len() as u64;
        let part = mp
            .upload_part(
                ctx,
                &upload,
                number,
                bytes_source(body),
                Some(size),
                &options_from_headers(&parts.headers),
            )
            .await
            .map_err(|err| {
                if err.is_not_exist() {
                    S3Error::no_such_upload(&upload.upload_id).with_source(err)
                } else {
                    err.into()
                }
            })?;
        debug!(upload_id = %upload.upload_id, part_number = number, size, "uploaded part");

        let mut resp = empty(StatusCode::OK);
        set_header(&mut resp, "etag", &part.etag);
        for (algorithm, value) in &part.checksums {
            set_header(&mut resp, &format!("x-amz-checksum-{algorithm}"), value);
        }
        Ok(resp)
    }

    pub(super) async fn upload_part_copy(
        &self,
        ctx: &Context,
        parts: &http::request::Parts,
        route: &RoutingContext,
    ) -> Result<S3Response, S3Error> {
        let number = part_number(route)?;
        let upload = upload_ref(route)?;
        let source = header_str(&parts.headers, "x-amz-copy-source").unwrap_or_default();
        let (src_bucket, src_key) = parse_copy_source(source)?;

        let mut opts = Options::new()
            .with_param(params::COPY_SOURCE_BUCKET, src_bucket.as_str())
            .with_param(params::COPY_SOURCE_KEY, src_key.as_str());
        if let Some(range) = header_str(&parts.headers, "x-amz-copy-source-range") {
            opts = opts.with_param(params::COPY_SOURCE_RANGE, range);
        }

        let bucket = self.bucket(route.bucket_name());
        let mp = multipart_of(bucket.as_ref())?;
        let part = match mp.copy_part(ctx, &upload, number, &opts).await {
            Ok(part) => part,
            Err(err) if err.is_not_exist() => {
                let source_missing = self
                    .bucket(&src_bucket)
                    .stat(ctx, &src_key, &Options::new())
                    .await
                    .is_err();
                return Err(if source_missing {
                    S3Error::no_such_key(src_key).with_source(err)
                } else {
                    S3Error::no_such_upload(&upload.upload_id).with_source(err)
                });
            }
            Err(err) => return Err(err.into()),
        };
        debug!(
            upload_id = %upload.upload_id,
            part_number = number,
            src_bucket = %src_bucket,
            src_key = %src_key,
            "copied part"
        );

        xml_response(
            "CopyPartResult",
            &CopyResult {
                etag: part.etag,
                last_modified: part.last_modified.unwrap_or_else(Utc::now),
            },
        )
    }

    pub(super) async fn list_parts(
        &self,
        ctx: &Context,
        route: &RoutingContext,
    ) -> Result<S3Response, S3Error> {
        let upload = upload_ref(route)?;
        let max_parts = page_size(route.query("max-parts"), MAX_PARTS, MAX_PARTS);
        let marker: u32 = route
            .query("part-number-marker")
            .and_then(|m| m.parse().ok())
            .unwrap_or(0);

        let bucket = self.bucket(route.bucket_name());
        let mp = multipart_of(bucket.as_ref())?;
        let all = mp
            .list_parts(ctx, &upload, 0, 0, &Options::new())
            .await
            .map_err(|err| {
                if err.is_not_exist() {
                    S3Error::no_such_upload(&upload.upload_id).with_source(err)
                } else {
                    err.into()
                }
            })?;

        let mut page: Vec<PartInfo> = all.into_iter().filter(|p| p.number > marker).collect();
        let is_truncated = page.len() > max_parts;
        page.truncate(max_parts);

        let result = ListPartsResult {
            bucket: upload.bucket,
            key: upload.key,
            upload_id: upload.upload_id,
            part_number_marker: marker,
            next_part_number_marker: if is_truncated {
                page.last().map(|p| p.number)
            } else {
                None
            },
            max_parts,
            is_truncated,
            storage_class: "STANDARD".to_owned(),
            owner: owner(),
            parts: page
                .into_iter()
                .map(|p| PartEntry {
                    part_number: p.number,
                    last_modified: p.last_modified,
                    etag: p.etag,
                    size: p.size,
                    checksums: p
                        .checksums
                        .iter()
                        .map(|(algo, value)| (checksum_element(algo), value.clone()))
                        .collect(),
                })
                .collect(),
        };
        xml_response("ListPartsResult", &result)
    }

    pub(super) async fn complete_multipart_upload(
        &self,
        ctx: &Context,
        parts: &http::request::Parts,
        body: Bytes,
        route: &RoutingContext,
    ) -> Result<S3Response, S3Error> {
        let upload = upload_ref(route)?;
        let request: CompletedMultipartUpload =
            from_xml(&body).map_err(|e| S3Error::malformed_xml(e.to_string()))?;
        if request.parts.is_empty() {
            return Err(S3Error::malformed_xml("no parts listed"));
        }

        let mut refs = Vec::with_capacity(request.parts.len());
        let mut previous: Option<i32> = None;
        for part in &request.parts {
            let number = part
                .part_number
                .ok_or_else(|| S3Error::malformed_xml("part without PartNumber"))?;
            if previous.is_some_and(|p| number <= p) {
                return Err(S3Error::invalid_part_order(format!(
                    "part {number} follows part {}",
                    previous.unwrap_or_default()
                )));
            }
            previous = Some(number);
            let number = u32::try_from(number).map_err(|_| {
                S3Error::with_message(S3ErrorCode::InvalidPart, format!("invalid part number {number}"))
            })?;
            refs.push(PartInfo::reference(number, part.etag.clone().unwrap_or_default()));
        }

        let bucket = self.bucket(route.bucket_name());
        let mp = multipart_of(bucket.as_ref())?;
        let object = mp
            .complete_multipart(ctx, &upload, &refs, &Options::new())
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::NotExist => S3Error::no_such_upload(&upload.upload_id).with_source(err),
                ErrorKind::InvalidArgument => {
                    S3Error::with_message(S3ErrorCode::InvalidPart, err.to_string())
                }
                _ => err.into(),
            })?;
        info!(
            bucket = %object.bucket,
            key = %object.key,
            size = object.size,
            parts = refs.len(),
            "completed multipart upload"
        );

        let location = match header_str(&parts.headers, "host") {
            Some(host) => format!("http://{host}/{}/{}", object.bucket, object.key),
            None => format!("/{}/{}", object.bucket, object.key),
        };
        xml_response(
            "CompleteMultipartUploadResult",
            &CompleteMultipartUploadResult {
                location,
                bucket: object.bucket,
                key: object.key,
                etag: object.etag.unwrap_or_default(),
            },
        )
    }

    pub(super) async fn abort_multipart_upload(
        &self,
        ctx: &Context,
        route: &RoutingContext,
    ) -> Result<S3Response, S3Error> {
        let upload = upload_ref(route)?;
        let bucket = self.bucket(route.bucket_name());
        let mp = multipart_of(bucket.as_ref())?;
        match mp.abort_multipart(ctx, &upload, &Options::new()).await {
            Ok(()) => info!(upload_id = %upload.upload_id, "aborted multipart upload"),
            Err(err) if err.is_not_exist() => {
                debug!(upload_id = %upload.upload_id, "abort of unknown upload");
            }
            Err(err) => return Err(err.into()),
        }
        Ok(empty(StatusCode::NO_CONTENT))
    }
}
