//! Service- and bucket-level operations.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http::StatusCode;
use storegate_core::{Context, ErrorKind, Options};
use storegate_s3_xml::S3_NAMESPACE;
use storegate_s3_xml::types::{
    BucketEntry, ListAllMyBucketsResult, ListBucketResult, ListMultipartUploadsResult,
    ObjectEntry, UploadEntry,
};
use tracing::{debug, info};

use super::{S3Handler, bucket_error, multipart_of, owner};
use crate::body::S3ResponseBody;
use crate::error::{S3Error, S3ErrorCode};
use crate::request::page_size;
use crate::response::{S3Response, empty, set_header, with_status, xml_response};
use crate::router::RoutingContext;

const MAX_KEYS: usize = 1000;
const MAX_UPLOADS: usize = 1000;
const STORAGE_CLASS: &str = "STANDARD";

fn encode_token(key: &str) -> String {
    URL_SAFE_NO_PAD.encode(key)
}

fn decode_token(token: &str) -> Result<String, S3Error> {
    URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|raw| String::from_utf8(raw).ok())
        .ok_or_else(|| S3Error::invalid_argument("The continuation token provided is incorrect"))
}

impl S3Handler {
    pub(super) async fn list_buckets(&self, ctx: &Context) -> Result<S3Response, S3Error> {
        let infos = self.storage.buckets(ctx, 0, 0, &Options::new()).await?;
        let result = ListAllMyBucketsResult {
            owner: owner(),
            buckets: infos
                .into_iter()
                .map(|b| BucketEntry {
                    name: b.name,
                    creation_date: b.created,
                })
                .collect(),
        };
        xml_response("ListAllMyBucketsResult", &result)
    }

    pub(super) async fn create_bucket(
        &self,
        ctx: &Context,
        route: &RoutingContext,
    ) -> Result<S3Response, S3Error> {
        let name = route.bucket_name();
        match self.storage.create_bucket(ctx, name, &Options::new()).await {
            Ok(info) => {
                info!(bucket = %info.name, "bucket created");
                let mut resp = empty(StatusCode::OK);
                set_header(&mut resp, "location", &format!("/{name}"));
                Ok(resp)
            }
            Err(err) => Err(match err.kind() {
                ErrorKind::AlreadyExists => {
                    S3Error::new(S3ErrorCode::BucketAlreadyOwnedByYou).with_resource(name)
                }
                ErrorKind::InvalidArgument => S3Error::new(S3ErrorCode::InvalidBucketName)
                    .with_resource(name)
                    .with_source(err),
                _ => err.into(),
            }),
        }
    }

    pub(super) async fn delete_bucket(
        &self,
        ctx: &Context,
        route: &RoutingContext,
    ) -> Result<S3Response, S3Error> {
        let name = route.bucket_name();
        match self.storage.delete_bucket(ctx, name, &Options::new()).await {
            Ok(()) => {
                info!(bucket = %name, "bucket deleted");
                Ok(empty(StatusCode::NO_CONTENT))
            }
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                Err(S3Error::new(S3ErrorCode::BucketNotEmpty)
                    .with_resource(name)
                    .with_source(err))
            }
            Err(err) => Err(bucket_error(name, err)),
        }
    }

    pub(super) async fn head_bucket(
        &self,
        ctx: &Context,
        route: &RoutingContext,
    ) -> Result<S3Response, S3Error> {
        self.require_bucket(ctx, route.bucket_name()).await?;
        let mut resp = empty(StatusCode::OK);
        set_header(&mut resp, "x-amz-bucket-region", &self.config.region);
        Ok(resp)
    }

    pub(super) async fn get_bucket_location(
        &self,
        ctx: &Context,
        route: &RoutingContext,
    ) -> Result<S3Response, S3Error> {
        self.require_bucket(ctx, route.bucket_name()).await?;
        // us-east-1 is reported as an empty constraint.
        let region = if self.config.region == "us-east-1" {
            ""
        } else {
            self.config.region.as_str()
        };
        let xml = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<LocationConstraint xmlns=\"{S3_NAMESPACE}\">{}</LocationConstraint>",
            quick_escape(region)
        );
        let mut resp = with_status(StatusCode::OK, S3ResponseBody::from_string(xml));
        set_header(&mut resp, "content-type", "application/xml");
        Ok(resp)
    }

    pub(super) async fn list_objects_v2(
        &self,
        ctx: &Context,
        route: &RoutingContext,
    ) -> Result<S3Response, S3Error> {
        let name = route.bucket_name();
        let prefix = route.query("prefix").unwrap_or("");
        let delimiter = route.query("delimiter").filter(|d| !d.is_empty());
        let max_keys = page_size(route.query("max-keys"), MAX_KEYS, MAX_KEYS);
        let continuation_token = route.query("continuation-token").filter(|t| !t.is_empty());
        let start_after = route.query("start-after").filter(|s| !s.is_empty());

        let resume = match continuation_token {
            Some(token) => Some(decode_token(token)?),
            None => start_after.map(str::to_owned),
        };

        let objects = self
            .bucket(name)
            .list(ctx, prefix, 0, 0, &Options::recursive())
            .await
            .map_err(|err| bucket_error(name, err))?;

        let mut contents = Vec::new();
        let mut common_prefixes: Vec<String> = Vec::new();
        let mut last_emitted: Option<String> = None;
        let mut is_truncated = false;

        for obj in objects.iter().filter(|o| !o.is_dir) {
            let key = obj.key.as_str();
            let Some(rest) = key.strip_prefix(prefix) else {
                continue;
            };
            if let Some(marker) = resume.as_deref() {
                if key <= marker {
                    continue;
                }
                // A marker that is a rolled-up prefix covers every key below it.
                if delimiter.is_some_and(|d| marker.ends_with(d)) && key.starts_with(marker) {
                    continue;
                }
            }

            let rolled_up = delimiter.and_then(|d| {
                rest.find(d)
                    .map(|idx| key[..prefix.len() + idx + d.len()].to_owned())
            });
            if let Some(cp) = &rolled_up {
                if common_prefixes.last() == Some(cp) {
                    continue;
                }
            }

            if contents.len() + common_prefixes.len() >= max_keys {
                is_truncated = true;
                break;
            }

            match rolled_up {
                Some(cp) => {
                    last_emitted = Some(cp.clone());
                    common_prefixes.push(cp);
                }
                None => {
                    last_emitted = Some(key.to_owned());
                    contents.push(ObjectEntry {
                        key: key.to_owned(),
                        last_modified: obj.updated,
                        etag: obj.etag.clone().unwrap_or_default(),
                        size: obj.size,
                        storage_class: STORAGE_CLASS.to_owned(),
                    });
                }
            }
        }

        debug!(
            bucket = %name,
            prefix,
            keys = contents.len(),
            prefixes = common_prefixes.len(),
            is_truncated,
            "listed objects"
        );

        let result = ListBucketResult {
            name: name.to_owned(),
            prefix: prefix.to_owned(),
            key_count: contents.len() + common_prefixes.len(),
            max_keys,
            delimiter: delimiter.map(str::to_owned),
            is_truncated,
            continuation_token: continuation_token.map(str::to_owned),
            next_continuation_token: if is_truncated {
                last_emitted.as_deref().map(encode_token)
            } else {
                None
            },
            start_after: start_after.map(str::to_owned),
            contents,
            common_prefixes,
        };
        xml_response("ListBucketResult", &result)
    }

    pub(super) async fn list_multipart_uploads(
        &self,
        ctx: &Context,
        route: &RoutingContext,
    ) -> Result<S3Response, S3Error> {
        let name = route.bucket_name();
        let prefix = route.query("prefix").unwrap_or("");
        let max_uploads = page_size(route.query("max-uploads"), MAX_UPLOADS, MAX_UPLOADS);

        let bucket = self.bucket(name);
        let mp = multipart_of(bucket.as_ref())?;
        let mut uploads = mp
            .list_uploads(ctx, prefix, max_uploads + 1, &Options::new())
            .await
            .map_err(|err| bucket_error(name, err))?;
        let is_truncated = uploads.len() > max_uploads;
        uploads.truncate(max_uploads);

        let result = ListMultipartUploadsResult {
            bucket: name.to_owned(),
            prefix: prefix.to_owned(),
            max_uploads,
            is_truncated,
            uploads: uploads
                .into_iter()
                .map(|u| UploadEntry {
                    key: u.key,
                    upload_id: u.upload_id,
                    initiated: u.initiated,
                    storage_class: STORAGE_CLASS.to_owned(),
                })
                .collect(),
        };
        xml_response("ListMultipartUploadsResult", &result)
    }
}

fn quick_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
