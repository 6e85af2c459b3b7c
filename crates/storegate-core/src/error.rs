//! Storage error taxonomy.
//!
//! Every backend driver and the multipart engine report failures through
//! [`StorageError`]. The taxonomy is deliberately small: transports match on
//! [`StorageError::kind`] and translate each [`ErrorKind`] into their own
//! wire vocabulary (S3 error codes, SFTP status codes, WebDAV statuses).
//!
//! # Usage
//!
//! ```
//! use storegate_core::error::{ErrorKind, StorageError};
//!
//! let err = StorageError::not_exist("photos/cat.jpg");
//! assert_eq!(err.kind(), ErrorKind::NotExist);
//! assert!(err.is_not_exist());
//! ```

use std::fmt;

/// Coarse classification of a [`StorageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The addressed bucket, object or upload does not exist.
    NotExist,
    /// The resource already exists and the call asked not to overwrite it.
    AlreadyExists,
    /// The caller may not perform the operation.
    PermissionDenied,
    /// The backend does not implement the operation.
    Unsupported,
    /// An argument was out of range or malformed.
    InvalidArgument,
    /// A size or quota limit was exceeded.
    ResourceExhausted,
    /// The caller cancelled the call or its deadline elapsed.
    Canceled,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Return a stable lowercase name for logging.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotExist => "not_exist",
            Self::AlreadyExists => "already_exists",
            Self::PermissionDenied => "permission_denied",
            Self::Unsupported => "unsupported",
            Self::InvalidArgument => "invalid_argument",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Canceled => "canceled",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage error type shared by drivers, the multipart engine and the
/// write buffer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The addressed resource does not exist.
    #[error("not found: {0}")]
    NotExist(String),

    /// The resource already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The operation is not permitted.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The backend does not support the operation.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// An argument was invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A size or quota limit was exceeded.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The call was cancelled before it completed.
    #[error("operation canceled")]
    Canceled,

    /// Internal error (catch-all).
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Convenience result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Build a [`StorageError::NotExist`].
    #[must_use]
    pub fn not_exist(what: impl Into<String>) -> Self {
        Self::NotExist(what.into())
    }

    /// Build a [`StorageError::AlreadyExists`].
    #[must_use]
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    /// Build a [`StorageError::PermissionDenied`].
    #[must_use]
    pub fn permission_denied(what: impl Into<String>) -> Self {
        Self::PermissionDenied(what.into())
    }

    /// Build a [`StorageError::Unsupported`].
    #[must_use]
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    /// Build a [`StorageError::InvalidArgument`].
    #[must_use]
    pub fn invalid_argument(what: impl Into<String>) -> Self {
        Self::InvalidArgument(what.into())
    }

    /// Build a [`StorageError::ResourceExhausted`].
    #[must_use]
    pub fn resource_exhausted(what: impl Into<String>) -> Self {
        Self::ResourceExhausted(what.into())
    }

    /// Return the taxonomy member of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotExist(_) => ErrorKind::NotExist,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::Canceled => ErrorKind::Canceled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for `kind() == ErrorKind::NotExist`.
    #[must_use]
    pub fn is_not_exist(&self) -> bool {
        self.kind() == ErrorKind::NotExist
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;

        match err.kind() {
            Io::NotFound => Self::NotExist(err.to_string()),
            Io::AlreadyExists => Self::AlreadyExists(err.to_string()),
            Io::PermissionDenied => Self::PermissionDenied(err.to_string()),
            Io::Unsupported => Self::Unsupported(err.to_string()),
            Io::InvalidInput => Self::InvalidArgument(err.to_string()),
            Io::Interrupted => Self::Canceled,
            _ => Self::Internal(anyhow::Error::new(err)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_classify_every_variant() {
        let cases = [
            (StorageError::not_exist("k"), ErrorKind::NotExist),
            (StorageError::already_exists("b"), ErrorKind::AlreadyExists),
            (StorageError::permission_denied("b"), ErrorKind::PermissionDenied),
            (StorageError::unsupported("copy"), ErrorKind::Unsupported),
            (StorageError::invalid_argument("n"), ErrorKind::InvalidArgument),
            (StorageError::resource_exhausted("size"), ErrorKind::ResourceExhausted),
            (StorageError::Canceled, ErrorKind::Canceled),
            (
                StorageError::Internal(anyhow::anyhow!("boom")),
                ErrorKind::Internal,
            ),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind, "{err}");
        }
    }

    #[test]
    fn test_should_map_io_not_found_to_not_exist() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: StorageError = io.into();
        assert!(err.is_not_exist());
    }

    #[test]
    fn test_should_map_unknown_io_error_to_internal() {
        let io = std::io::Error::other("disk on fire");
        let err: StorageError = io.into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("disk on fire"));
    }

    #[test]
    fn test_should_format_kind_names() {
        assert_eq!(ErrorKind::ResourceExhausted.to_string(), "resource_exhausted");
        assert_eq!(ErrorKind::Canceled.as_str(), "canceled");
    }
}
