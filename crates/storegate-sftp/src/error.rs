//! Storage errors as SFTP status codes.

use russh_sftp::protocol::StatusCode;
use storegate_core::{ErrorKind, StorageError};
use tracing::debug;

/// SFTP v3 has no "already exists" or "invalid argument" status; those
/// become a generic failure.
#[must_use]
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotExist => StatusCode::NoSuchFile,
        ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
        ErrorKind::Unsupported => StatusCode::OpUnsupported,
        ErrorKind::AlreadyExists
        | ErrorKind::InvalidArgument
        | ErrorKind::ResourceExhausted
        | ErrorKind::Canceled
        | ErrorKind::Internal => StatusCode::Failure,
    }
}

/// Map and log a storage failure for `op` on `path`.
pub(crate) fn to_status(op: &'static str, path: &str, err: &StorageError) -> StatusCode {
    let status = status_for(err.kind());
    debug!(op, path, kind = %err.kind(), error = %err, ?status, "sftp operation failed");
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_map_error_kinds() {
        assert_eq!(status_for(ErrorKind::NotExist), StatusCode::NoSuchFile);
        assert_eq!(
            status_for(ErrorKind::PermissionDenied),
            StatusCode::PermissionDenied
        );
        assert_eq!(status_for(ErrorKind::Unsupported), StatusCode::OpUnsupported);
        assert_eq!(status_for(ErrorKind::AlreadyExists), StatusCode::Failure);
        assert_eq!(status_for(ErrorKind::Internal), StatusCode::Failure);
    }

    #[test]
    fn test_should_map_storage_errors() {
        let err = StorageError::not_exist("b/k");
        assert_eq!(to_status("stat", "/b/k", &err), StatusCode::NoSuchFile);
        let err = StorageError::resource_exhausted("too big");
        assert_eq!(to_status("write", "/b/k", &err), StatusCode::Failure);
    }
}
