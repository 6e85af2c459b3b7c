//! Response construction helpers.
//!
//! Responses are assembled with `Response::new` and header inserts so no
//! builder step can fail; invalid header values are dropped.

use chrono::{DateTime, Utc};
use http::header::{HeaderName, HeaderValue};
use http::{Response, StatusCode};
use storegate_core::Object;
use storegate_s3_xml::{S3Serialize, error_to_xml, to_xml};

use crate::body::S3ResponseBody;
use crate::error::S3Error;

/// Response type produced by every handler.
pub type S3Response = Response<S3ResponseBody>;

/// Build a response with `status` and `body`.
#[must_use]
pub fn with_status(status: StatusCode, body: S3ResponseBody) -> S3Response {
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    resp
}

/// An empty response.
#[must_use]
pub fn empty(status: StatusCode) -> S3Response {
    with_status(status, S3ResponseBody::empty())
}

/// Set `name` to `value`, silently skipping values that are not valid header
/// text.
pub fn set_header(resp: &mut S3Response, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        resp.headers_mut().insert(name, value);
    }
}

/// Serialize `value` under `root` into a 200 XML response.
///
/// # Errors
///
/// `InternalError` when serialization fails.
pub fn xml_response<T: S3Serialize>(root: &str, value: &T) -> Result<S3Response, S3Error> {
    let xml = to_xml(root, value).map_err(|e| S3Error::internal_error(e.to_string()))?;
    let mut resp = with_status(StatusCode::OK, S3ResponseBody::from_bytes(xml));
    set_header(&mut resp, "content-type", "application/xml");
    Ok(resp)
}

/// Render `err` as an S3 `<Error>` document.
#[must_use]
pub fn error_to_response(err: &S3Error, request_id: &str) -> S3Response {
    let xml = error_to_xml(
        err.code.as_str(),
        &err.message,
        err.resource.as_deref(),
        request_id,
    );
    let mut resp = with_status(err.status_code, S3ResponseBody::from_bytes(xml));
    set_header(&mut resp, "content-type", "application/xml");
    resp
}

/// RFC 7231 date used by `Last-Modified`.
#[must_use]
pub fn http_date(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Headers describing `obj`, shared by GetObject and HeadObject.
pub fn set_object_headers(resp: &mut S3Response, obj: &Object) {
    set_header(resp, "content-type", &obj.content_type);
    set_header(resp, "last-modified", &http_date(&obj.updated));
    set_header(resp, "accept-ranges", "bytes");
    if let Some(etag) = &obj.etag {
        set_header(resp, "etag", etag);
    }
    for (name, value) in &obj.metadata {
        set_header(resp, &format!("x-amz-meta-{name}"), value);
    }
}
