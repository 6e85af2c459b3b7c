//! S3 error vocabulary and its mapping from the storage taxonomy.

use std::fmt;

use storegate_core::{ErrorKind, StorageError};

/// S3 error codes produced by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum S3ErrorCode {
    /// AccessDenied error.
    AccessDenied,
    /// BadDigest error.
    BadDigest,
    /// BucketAlreadyOwnedByYou error.
    BucketAlreadyOwnedByYou,
    /// BucketNotEmpty error.
    BucketNotEmpty,
    /// EntityTooLarge error.
    EntityTooLarge,
    /// IncompleteBody error.
    IncompleteBody,
    /// InternalError error.
    InternalError,
    /// InvalidArgument error.
    InvalidArgument,
    /// InvalidBucketName error.
    InvalidBucketName,
    /// InvalidPart error.
    InvalidPart,
    /// InvalidPartOrder error.
    InvalidPartOrder,
    /// InvalidRange error.
    InvalidRange,
    /// InvalidRequest error.
    InvalidRequest,
    /// MalformedXML error.
    MalformedXML,
    /// MethodNotAllowed error.
    MethodNotAllowed,
    /// NoSuchBucket error.
    NoSuchBucket,
    /// NoSuchKey error.
    NoSuchKey,
    /// NoSuchUpload error.
    NoSuchUpload,
    /// NotImplemented error.
    NotImplemented,
    /// PreconditionFailed error.
    PreconditionFailed,
    /// RequestTimeout error.
    RequestTimeout,
    /// SignatureDoesNotMatch error.
    SignatureDoesNotMatch,
    /// XAmzContentSHA256Mismatch error.
    XAmzContentSHA256Mismatch,
}

impl S3ErrorCode {
    /// Wire name of the code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessDenied => "AccessDenied",
            Self::BadDigest => "BadDigest",
            Self::BucketAlreadyOwnedByYou => "BucketAlreadyOwnedByYou",
            Self::BucketNotEmpty => "BucketNotEmpty",
            Self::EntityTooLarge => "EntityTooLarge",
            Self::IncompleteBody => "IncompleteBody",
            Self::InternalError => "InternalError",
            Self::InvalidArgument => "InvalidArgument",
            Self::InvalidBucketName => "InvalidBucketName",
            Self::InvalidPart => "InvalidPart",
            Self::InvalidPartOrder => "InvalidPartOrder",
            Self::InvalidRange => "InvalidRange",
            Self::InvalidRequest => "InvalidRequest",
            Self::MalformedXML => "MalformedXML",
            Self::MethodNotAllowed => "MethodNotAllowed",
            Self::NoSuchBucket => "NoSuchBucket",
            Self::NoSuchKey => "NoSuchKey",
            Self::NoSuchUpload => "NoSuchUpload",
            Self::NotImplemented => "NotImplemented",
            Self::PreconditionFailed => "PreconditionFailed",
            Self::RequestTimeout => "RequestTimeout",
            Self::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            Self::XAmzContentSHA256Mismatch => "XAmzContentSHA256Mismatch",
        }
    }

    /// HTTP status that accompanies the code.
    #[must_use]
    pub fn default_status_code(&self) -> http::StatusCode {
        use http::StatusCode;

        match self {
            Self::AccessDenied | Self::SignatureDoesNotMatch => StatusCode::FORBIDDEN,
            Self::BucketAlreadyOwnedByYou | Self::BucketNotEmpty => StatusCode::CONFLICT,
            Self::EntityTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadDigest
            | Self::IncompleteBody
            | Self::InvalidArgument
            | Self::InvalidBucketName
            | Self::InvalidPart
            | Self::InvalidPartOrder
            | Self::InvalidRequest
            | Self::MalformedXML
            | Self::RequestTimeout
            | Self::XAmzContentSHA256Mismatch => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::NoSuchBucket | Self::NoSuchKey | Self::NoSuchUpload => StatusCode::NOT_FOUND,
            Self::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            Self::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            Self::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,
        }
    }

    /// Message used when the caller gives none.
    #[must_use]
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::AccessDenied => "Access Denied",
            Self::BadDigest => "The Content-MD5 or checksum value that you specified did not match what we received",
            Self::BucketAlreadyOwnedByYou => {
                "Your previous request to create the named bucket succeeded and you already own it"
            }
            Self::BucketNotEmpty => "The bucket you tried to delete is not empty",
            Self::EntityTooLarge => "Your proposed upload exceeds the maximum allowed size",
            Self::IncompleteBody => "You did not provide the number of bytes specified by the Content-Length HTTP header",
            Self::InternalError => "We encountered an internal error. Please try again.",
            Self::InvalidArgument => "Invalid Argument",
            Self::InvalidBucketName => "The specified bucket is not valid",
            Self::InvalidPart => "One or more of the specified parts could not be found",
            Self::InvalidPartOrder => "The list of parts was not in ascending order",
            Self::InvalidRange => "The requested range is not satisfiable",
            Self::InvalidRequest => "The request is invalid",
            Self::MalformedXML => "The XML you provided was not well-formed",
            Self::MethodNotAllowed => "The specified method is not allowed against this resource",
            Self::NoSuchBucket => "The specified bucket does not exist",
            Self::NoSuchKey => "The specified key does not exist",
            Self::NoSuchUpload => "The specified multipart upload does not exist",
            Self::NotImplemented => "A header you provided implies functionality that is not implemented",
            Self::PreconditionFailed => "At least one of the preconditions you specified did not hold",
            Self::RequestTimeout => "Your socket connection to the server was not read from or written to within the timeout period",
            Self::SignatureDoesNotMatch => {
                "The request signature we calculated does not match the signature you provided"
            }
            Self::XAmzContentSHA256Mismatch => {
                "The provided 'x-amz-content-sha256' header does not match what was computed"
            }
        }
    }
}

impl fmt::Display for S3ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An S3 error response.
#[derive(Debug)]
pub struct S3Error {
    /// The error code.
    pub code: S3ErrorCode,
    /// A human-readable error message.
    pub message: String,
    /// The resource that caused the error.
    pub resource: Option<String>,
    /// The HTTP status code.
    pub status_code: http::StatusCode,
    /// The underlying storage error, if any.
    pub source: Option<StorageError>,
}

impl fmt::Display for S3Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S3Error({}): {}", self.code, self.message)
    }
}

impl std::error::Error for S3Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl S3Error {
    /// Create an error with the code's default message.
    #[must_use]
    pub fn new(code: S3ErrorCode) -> Self {
        Self::with_message(code, code.default_message())
    }

    /// Create an error with a custom message.
    #[must_use]
    pub fn with_message(code: S3ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status_code: code.default_status_code(),
            message: message.into(),
            code,
            resource: None,
            source: None,
        }
    }

    /// Set the resource that caused this error.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Attach the storage error this one was translated from.
    #[must_use]
    pub fn with_source(mut self, source: StorageError) -> Self {
        self.source = Some(source);
        self
    }

    /// Create a NoSuchBucket error.
    #[must_use]
    pub fn no_such_bucket(bucket: impl Into<String>) -> Self {
        Self::new(S3ErrorCode::NoSuchBucket).with_resource(bucket)
    }

    /// Create a NoSuchKey error.
    #[must_use]
    pub fn no_such_key(key: impl Into<String>) -> Self {
        Self::new(S3ErrorCode::NoSuchKey).with_resource(key)
    }

    /// Create a NoSuchUpload error.
    #[must_use]
    pub fn no_such_upload(upload_id: impl Into<String>) -> Self {
        Self::new(S3ErrorCode::NoSuchUpload).with_resource(upload_id)
    }

    /// Create an AccessDenied error.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::with_message(S3ErrorCode::AccessDenied, message)
    }

    /// Create an InternalError error.
    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::with_message(S3ErrorCode::InternalError, message)
    }

    /// Create an InvalidArgument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::with_message(S3ErrorCode::InvalidArgument, message)
    }

    /// Create an InvalidPartOrder error.
    #[must_use]
    pub fn invalid_part_order(detail: impl Into<String>) -> Self {
        Self::with_message(S3ErrorCode::InvalidPartOrder, detail)
    }

    /// Create a MalformedXML error.
    #[must_use]
    pub fn malformed_xml(detail: impl Into<String>) -> Self {
        Self::with_message(S3ErrorCode::MalformedXML, detail)
    }

    /// Create a MethodNotAllowed error.
    #[must_use]
    pub fn method_not_allowed(method: impl Into<String>) -> Self {
        Self::new(S3ErrorCode::MethodNotAllowed).with_resource(method)
    }

    /// Create a NotImplemented error.
    #[must_use]
    pub fn not_implemented(detail: impl Into<String>) -> Self {
        Self::with_message(S3ErrorCode::NotImplemented, detail)
    }

    /// Create an InvalidRange error for an object of `size` bytes.
    #[must_use]
    pub fn invalid_range(range: &str, size: u64) -> Self {
        Self::with_message(
            S3ErrorCode::InvalidRange,
            format!("The requested range {range} is not satisfiable for an object of {size} bytes"),
        )
    }

    /// Create an EntityTooLarge error.
    #[must_use]
    pub fn entity_too_large(size: u64, max: u64) -> Self {
        Self::with_message(
            S3ErrorCode::EntityTooLarge,
            format!("Your proposed upload of {size} bytes exceeds the maximum allowed size of {max} bytes"),
        )
    }
}

/// Context-free translation. Object handlers refine `NotExist` into
/// `NoSuchBucket`/`NoSuchKey`/`NoSuchUpload` themselves.
impl From<StorageError> for S3Error {
    fn from(err: StorageError) -> Self {
        let code = match err.kind() {
            ErrorKind::NotExist => S3ErrorCode::NoSuchKey,
            ErrorKind::AlreadyExists => S3ErrorCode::PreconditionFailed,
            ErrorKind::PermissionDenied => S3ErrorCode::AccessDenied,
            ErrorKind::Unsupported => S3ErrorCode::NotImplemented,
            ErrorKind::InvalidArgument => S3ErrorCode::InvalidArgument,
            ErrorKind::ResourceExhausted => S3ErrorCode::EntityTooLarge,
            ErrorKind::Canceled => S3ErrorCode::RequestTimeout,
            ErrorKind::Internal => S3ErrorCode::InternalError,
        };
        let message = match code {
            S3ErrorCode::InvalidArgument => err.to_string(),
            _ => code.default_message().to_owned(),
        };
        Self::with_message(code, message).with_source(err)
    }
}
