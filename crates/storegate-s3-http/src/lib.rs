//! S3 REST front-end for storegate.
//!
//! Translates path-style S3 requests into calls on a
//! [`Storage`](storegate_core::Storage) and renders results and failures in
//! the S3 wire format.
//!
//! # Architecture
//!
//! ```text
//! HTTP Request
//!   -> S3HttpService (hyper Service)
//!     -> Health check interception
//!     -> S3Router (operation identification)
//!     -> Read-only check, bounded body collection
//!     -> SigV4 authentication (when credentials are configured)
//!     -> aws-chunked decoding (streaming uploads, checksum trailers)
//!     -> S3Handler (bucket, object and multipart operations)
//!     -> Common response headers (x-amz-request-id, Server)
//!   <- HTTP Response
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use storegate_core::driver::memory::MemoryStorage;
//! use storegate_s3_http::{S3Config, S3HttpService};
//!
//! let service = S3HttpService::new(Arc::new(MemoryStorage::default()), S3Config::default());
//! // Hand `service` to `storegate_s3_http::server::serve`.
//! ```

// S3Error carries its code, message, resource and source; boxing it in every
// Result buys nothing on this path.
#![allow(clippy::result_large_err)]

pub mod body;
pub mod codec;
pub mod config;
pub mod error;
pub mod handlers;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod service;

pub use body::S3ResponseBody;
pub use config::S3Config;
pub use error::{S3Error, S3ErrorCode};
pub use handlers::S3Handler;
pub use router::{RoutingContext, S3Operation, S3Router};
pub use server::serve;
pub use service::S3HttpService;
