//! WebDAV front-end for storegate.
//!
//! Serves any [`storegate_core::Storage`] as a WebDAV tree through
//! dav-server. The root collection lists buckets (or, in single-bucket
//! mode, the contents of one bucket); nested collections are virtual
//! directories derived from `/` in object keys.
//!
//! ```text
//! TCP ─► hyper ─► WebDavService (health, auth, read-only)
//!                     └─ dav-server + MemLs ─► StoreFs ─► VirtualFs ─► Storage
//! ```
//!
//! Uploads are buffered (spilling to disk past a threshold) and written to
//! the backend in one call when the request body ends.

pub mod auth;
pub mod config;
pub mod error;
pub mod file;
pub mod fs;
pub mod server;
pub mod service;

pub use auth::WebDavAuth;
pub use config::WebDavConfig;
pub use fs::StoreFs;
pub use server::serve;
pub use service::WebDavService;
