//! SFTP front-end for storegate.
//!
//! An SSH server that accepts password or public-key logins and serves the
//! `sftp` subsystem (protocol v3) over any [`storegate_core::Storage`].
//!
//! ```text
//! TCP ─► russh (SshSession: auth, channels)
//!          └─ "sftp" subsystem ─► russh-sftp ─► SftpHandler ─► VirtualFs ─► Storage
//! ```
//!
//! The root directory lists buckets; users with a home bucket are confined
//! to it and see its contents at `/`. Nested directories are virtual:
//! `mkdir` below the bucket level is a no-op and a directory disappears with
//! its last object. Symbolic links and hard links are not supported.

pub mod auth;
pub mod config;
pub mod error;
pub mod handler;
pub mod server;

pub use auth::{AuthorizedKey, SftpAuthenticator, StaticAuthenticator};
pub use config::SftpConfig;
pub use handler::SftpHandler;
pub use server::{SftpServer, load_host_key};
