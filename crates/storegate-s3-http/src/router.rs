//! Path-style request routing.
//!
//! `/{bucket}/{key...}` plus method, sub-resource query parameters and the
//! `x-amz-copy-source` header identify one [`S3Operation`].

use std::fmt;

use http::Method;
use percent_encoding::percent_decode_str;

use crate::error::S3Error;

/// Sub-resources the gateway recognizes but does not serve.
const UNSUPPORTED_SUBRESOURCES: &[&str] = &[
    "acl",
    "cors",
    "encryption",
    "lifecycle",
    "logging",
    "notification",
    "object-lock",
    "policy",
    "replication",
    "tagging",
    "versioning",
    "versions",
    "website",
];

/// Operations served by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum S3Operation {
    /// `GET /`
    ListBuckets,
    /// `PUT /b`
    CreateBucket,
    /// `DELETE /b`
    DeleteBucket,
    /// `HEAD /b`
    HeadBucket,
    /// `GET /b?location`
    GetBucketLocation,
    /// `GET /b`
    ListObjectsV2,
    /// `GET /b?uploads`
    ListMultipartUploads,
    /// `PUT /b/k`
    PutObject,
    /// `PUT /b/k` with `x-amz-copy-source`
    CopyObject,
    /// `GET /b/k`
    GetObject,
    /// `HEAD /b/k`
    HeadObject,
    /// `DELETE /b/k`
    DeleteObject,
    /// `POST /b/k?uploads`
    CreateMultipartUpload,
    /// `PUT /b/k?partNumber=N&uploadId=ID`
    UploadPart,
    /// `PUT /b/k?partNumber=N&uploadId=ID` with `x-amz-copy-source`
    UploadPartCopy,
    /// `GET /b/k?uploadId=ID`
    ListParts,
    /// `POST /b/k?uploadId=ID`
    CompleteMultipartUpload,
    /// `DELETE /b/k?uploadId=ID`
    AbortMultipartUpload,
}

impl S3Operation {
    /// Operation name as used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ListBuckets => "ListBuckets",
            Self::CreateBucket => "CreateBucket",
            Self::DeleteBucket => "DeleteBucket",
            Self::HeadBucket => "HeadBucket",
            Self::GetBucketLocation => "GetBucketLocation",
            Self::ListObjectsV2 => "ListObjectsV2",
            Self::ListMultipartUploads => "ListMultipartUploads",
            Self::PutObject => "PutObject",
            Self::CopyObject => "CopyObject",
            Self::GetObject => "GetObject",
            Self::HeadObject => "HeadObject",
            Self::DeleteObject => "DeleteObject",
            Self::CreateMultipartUpload => "CreateMultipartUpload",
            Self::UploadPart => "UploadPart",
            Self::UploadPartCopy => "UploadPartCopy",
            Self::ListParts => "ListParts",
            Self::CompleteMultipartUpload => "CompleteMultipartUpload",
            Self::AbortMultipartUpload => "AbortMultipartUpload",
        }
    }

    /// Whether the operation changes state.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::CreateBucket
                | Self::DeleteBucket
                | Self::PutObject
                | Self::CopyObject
                | Self::DeleteObject
                | Self::CreateMultipartUpload
                | Self::UploadPart
                | Self::UploadPartCopy
                | Self::CompleteMultipartUpload
                | Self::AbortMultipartUpload
        )
    }

    /// Whether the request body carries object data subject to the size limit.
    #[must_use]
    pub fn carries_object_data(&self) -> bool {
        matches!(self, Self::PutObject | Self::UploadPart)
    }
}

impl fmt::Display for S3Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of routing a request.
#[derive(Debug, Clone)]
pub struct RoutingContext {
    /// Decoded bucket name, if any.
    pub bucket: Option<String>,
    /// Decoded object key, if any.
    pub key: Option<String>,
    /// The identified operation.
    pub operation: S3Operation,
    /// Decoded query parameters in request order.
    pub query_params: Vec<(String, String)>,
}

impl RoutingContext {
    /// First value of query parameter `name`.
    #[must_use]
    pub fn query(&self, name: &str) -> Option<&str> {
        query_value(&self.query_params, name)
    }

    /// The bucket name, or an empty string at service level.
    #[must_use]
    pub fn bucket_name(&self) -> &str {
        self.bucket.as_deref().unwrap_or("")
    }

    /// The object key, or an empty string at bucket level.
    #[must_use]
    pub fn object_key(&self) -> &str {
        self.key.as_deref().unwrap_or("")
    }
}

/// Path-style router.
#[derive(Debug, Clone, Copy, Default)]
pub struct S3Router;

impl S3Router {
    /// Create a router.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Identify the operation addressed by `req`.
    ///
    /// # Errors
    ///
    /// `MethodNotAllowed` for methods S3 does not define on the resource and
    /// `NotImplemented` for recognized but unsupported sub-resources.
    pub fn resolve<B>(&self, req: &http::Request<B>) -> Result<RoutingContext, S3Error> {
        let query_params = parse_query_params(req.uri().query().unwrap_or(""));
        let (bucket, key) = parse_path(req.uri().path());
        let operation = identify_operation(
            req.method(),
            bucket.as_deref(),
            key.as_deref(),
            &query_params,
            req.headers(),
        )?;

        Ok(RoutingContext {
            bucket,
            key,
            operation,
            query_params,
        })
    }
}

/// Split `/{bucket}/{key...}`. A trailing `/` on a key is kept.
fn parse_path(path: &str) -> (Option<String>, Option<String>) {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return (None, None);
    }

    match trimmed.split_once('/') {
        Some((bucket, "")) => (Some(decode_uri_component(bucket)), None),
        Some((bucket, key)) => (
            Some(decode_uri_component(bucket)),
            Some(decode_uri_component(key)),
        ),
        None => (Some(decode_uri_component(trimmed)), None),
    }
}

pub(crate) fn decode_uri_component(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

fn parse_query_params(query: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn query_has_key(params: &[(String, String)], key: &str) -> bool {
    params.iter().any(|(k, _)| k == key)
}

fn query_value<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn unsupported_subresource(params: &[(String, String)]) -> Option<&str> {
    params
        .iter()
        .map(|(k, _)| k.as_str())
        .find(|k| UNSUPPORTED_SUBRESOURCES.contains(k))
}

fn identify_operation(
    method: &Method,
    bucket: Option<&str>,
    key: Option<&str>,
    params: &[(String, String)],
    headers: &http::HeaderMap,
) -> Result<S3Operation, S3Error> {
    match (bucket, key) {
        (None, _) => {
            if *method == Method::GET {
                Ok(S3Operation::ListBuckets)
            } else {
                Err(S3Error::method_not_allowed(method.as_str()))
            }
        }
        (Some(_), None) => identify_bucket_operation(method, params),
        (Some(_), Some(_)) => identify_object_operation(method, params, headers),
    }
}

fn identify_bucket_operation(
    method: &Method,
    params: &[(String, String)],
) -> Result<S3Operation, S3Error> {
    if let Some(sub) = unsupported_subresource(params) {
        return Err(S3Error::not_implemented(format!(
            "bucket sub-resource '{sub}' is not implemented"
        )));
    }

    match *method {
        Method::GET if query_has_key(params, "uploads") => Ok(S3Operation::ListMultipartUploads),
        Method::GET if query_has_key(params, "location") => Ok(S3Operation::GetBucketLocation),
        Method::GET => Ok(S3Operation::ListObjectsV2),
        Method::PUT => Ok(S3Operation::CreateBucket),
        Method::DELETE => Ok(S3Operation::DeleteBucket),
        Method::HEAD => Ok(S3Operation::HeadBucket),
        Method::POST => Err(S3Error::not_implemented(
            "bucket POST operation is not implemented",
        )),
        _ => Err(S3Error::method_not_allowed(method.as_str())),
    }
}

fn identify_object_operation(
    method: &Method,
    params: &[(String, String)],
    headers: &http::HeaderMap,
) -> Result<S3Operation, S3Error> {
    if let Some(sub) = unsupported_subresource(params) {
        return Err(S3Error::not_implemented(format!(
            "object sub-resource '{sub}' is not implemented"
        )));
    }

    let has_copy_source = headers.contains_key("x-amz-copy-source");
    let has_upload_id = query_has_key(params, "uploadId");

    if query_has_key(params, "uploads") {
        return if *method == Method::POST {
            Ok(S3Operation::CreateMultipartUpload)
        } else {
            Err(S3Error::method_not_allowed(method.as_str()))
        };
    }

    if has_upload_id {
        return match *method {
            Method::PUT if query_has_key(params, "partNumber") => {
                if has_copy_source {
                    Ok(S3Operation::UploadPartCopy)
                } else {
                    Ok(S3Operation::UploadPart)
                }
            }
            Method::GET => Ok(S3Operation::ListParts),
            Method::POST => Ok(S3Operation::CompleteMultipartUpload),
            Method::DELETE => Ok(S3Operation::AbortMultipartUpload),
            _ => Err(S3Error::method_not_allowed(method.as_str())),
        };
    }

    match *method {
        Method::GET => Ok(S3Operation::GetObject),
        Method::HEAD => Ok(S3Operation::HeadObject),
        Method::PUT if has_copy_source => Ok(S3Operation::CopyObject),
        Method::PUT => Ok(S3Operation::PutObject),
        Method::DELETE => Ok(S3Operation::DeleteObject),
        Method::POST => Err(S3Error::not_implemented(
            "object POST operation is not implemented",
        )),
        _ => Err(S3Error::method_not_allowed(method.as_str())),
    }
}
