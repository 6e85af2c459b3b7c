//! Storage errors as dav-server filesystem errors.

use dav_server::fs::FsError;
use storegate_core::{ErrorKind, StorageError};
use tracing::debug;

/// dav-server turns these into HTTP statuses (404, 405/412, 403, 501, 413).
#[must_use]
pub fn fs_error_for(kind: ErrorKind) -> FsError {
    match kind {
        ErrorKind::NotExist => FsError::NotFound,
        ErrorKind::AlreadyExists => FsError::Exists,
        ErrorKind::PermissionDenied => FsError::Forbidden,
        ErrorKind::Unsupported => FsError::NotImplemented,
        ErrorKind::ResourceExhausted => FsError::TooLarge,
        ErrorKind::InvalidArgument | ErrorKind::Canceled | ErrorKind::Internal => {
            FsError::GeneralFailure
        }
    }
}

/// Map and log a storage failure for `op` on `path`.
pub(crate) fn to_fs_error(op: &'static str, path: &str, err: &StorageError) -> FsError {
    debug!(op, path, kind = %err.kind(), error = %err, "webdav operation failed");
    fs_error_for(err.kind())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_map_error_kinds() {
        assert!(matches!(fs_error_for(ErrorKind::NotExist), FsError::NotFound));
        assert!(matches!(fs_error_for(ErrorKind::AlreadyExists), FsError::Exists));
        assert!(matches!(
            fs_error_for(ErrorKind::PermissionDenied),
            FsError::Forbidden
        ));
        assert!(matches!(
            fs_error_for(ErrorKind::Unsupported),
            FsError::NotImplemented
        ));
        assert!(matches!(
            fs_error_for(ErrorKind::ResourceExhausted),
            FsError::TooLarge
        ));
        assert!(matches!(
            fs_error_for(ErrorKind::Internal),
            FsError::GeneralFailure
        ));
    }
}
