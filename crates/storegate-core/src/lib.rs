//! Backend-agnostic object storage contract for storegate.
//!
//! Protocol front-ends (S3, SFTP, WebDAV) talk to a [`Storage`] obtained from
//! the driver [`registry`] by DSN. Drivers implement [`Storage`] and
//! [`Bucket`]; a bucket that also implements [`MultipartBucket`] exposes it
//! through [`Bucket::multipart`]. Drivers without native multipart support
//! can embed the [`MultipartEngine`].
//!
//! # Architecture
//!
//! ```text
//!   S3 / SFTP / WebDAV transports
//!        |
//!        v
//!   Registry::open(dsn) --> DriverFactory
//!        |
//!        v
//!   Storage --> Bucket [--> MultipartBucket]
//!        |
//!        v
//!   driver state (memory + spill files)
//! ```
//!
//! Every operation takes a [`Context`] carrying cancellation and an optional
//! deadline, and fails with a [`StorageError`] whose [`ErrorKind`] transports
//! map to their own status codes.

pub mod buffer;
pub mod checksums;
pub mod context;
pub mod driver;
pub mod error;
pub mod multipart;
pub mod object;
pub mod options;
pub mod registry;
pub mod spill;
pub mod storage;
pub mod utils;
pub mod vfs;

pub use buffer::{BufferConfig, WriteBuffer};
pub use context::Context;
pub use error::{ErrorKind, StorageError, StorageResult};
pub use multipart::MultipartEngine;
pub use object::{
    BucketInfo, ByteSource, Features, MultipartUpload, Object, ObjectReader, PartInfo,
    bytes_source, feature,
};
pub use options::{Options, params};
pub use registry::{DriverFactory, Dsn, Registry};
pub use spill::SpillPolicy;
pub use storage::{Bucket, MultipartBucket, Storage};
pub use vfs::{Location, VfsEntry, VirtualFs};

/// Register the built-in drivers (`mem`, `memory`) with the global registry.
///
/// Safe to call more than once.
pub fn register_builtin_drivers() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| driver::register_builtin(registry::global()));
}
