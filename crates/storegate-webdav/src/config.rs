//! WebDAV front-end configuration.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use storegate_core::BufferConfig;
use storegate_core::buffer::DEFAULT_BUFFER_THRESHOLD;
use storegate_core::utils::{parse_bool, parse_list, parse_pairs};
use typed_builder::TypedBuilder;

/// WebDAV front-end configuration.
///
/// # Examples
///
/// ```
/// use storegate_webdav::config::WebDavConfig;
///
/// let config = WebDavConfig::builder()
///     .prefix("/dav")
///     .bucket("photos")
///     .build();
/// assert_eq!(config.prefix, "/dav");
/// assert_eq!(config.bucket.as_deref(), Some("photos"));
/// ```
#[derive(Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct WebDavConfig {
    /// Bind address.
    #[builder(default = String::from("0.0.0.0:8080"), setter(into))]
    pub listen: String,

    /// URL prefix the DAV tree is mounted under; empty for `/`.
    #[builder(default, setter(into))]
    pub prefix: String,

    /// Expose only this bucket, at `/`.
    #[builder(default, setter(strip_option, into))]
    pub bucket: Option<String>,

    /// Reject every mutating request with 403.
    #[builder(default = false)]
    pub read_only: bool,

    /// Leave names starting with `.` out of directory listings.
    #[builder(default = false)]
    pub hide_dot_files: bool,

    /// Content type for uploads whose extension is not recognized.
    #[builder(default = String::from("application/octet-stream"), setter(into))]
    pub default_content_type: String,

    /// Largest accepted upload in bytes; `0` means unlimited.
    #[builder(default = 0)]
    pub max_upload_size: u64,

    /// Bytes kept in memory per upload before spilling to disk.
    #[builder(default = DEFAULT_BUFFER_THRESHOLD)]
    pub buffer_threshold: usize,

    /// Directory for spill files.
    #[builder(default, setter(strip_option, into))]
    pub temp_dir: Option<PathBuf>,

    /// Basic-auth users by name.
    #[serde(skip_serializing)]
    #[builder(default)]
    pub users: HashMap<String, String>,

    /// Accepted bearer tokens.
    #[serde(skip_serializing)]
    #[builder(default)]
    pub bearer_tokens: Vec<String>,
}

impl std::fmt::Debug for WebDavConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebDavConfig")
            .field("listen", &self.listen)
            .field("prefix", &self.prefix)
            .field("bucket", &self.bucket)
            .field("read_only", &self.read_only)
            .field("hide_dot_files", &self.hide_dot_files)
            .field("max_upload_size", &self.max_upload_size)
            .field("users", &self.users.len())
            .field("bearer_tokens", &self.bearer_tokens.len())
            .finish_non_exhaustive()
    }
}

impl Default for WebDavConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl WebDavConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `WEBDAV_LISTEN` | `0.0.0.0:8080` |
    /// | `WEBDAV_PREFIX` | empty |
    /// | `WEBDAV_BUCKET` | unset (all buckets) |
    /// | `WEBDAV_READ_ONLY` | `false` |
    /// | `WEBDAV_HIDE_DOT_FILES` | `false` |
    /// | `WEBDAV_DEFAULT_CONTENT_TYPE` | `application/octet-stream` |
    /// | `WEBDAV_MAX_UPLOAD_SIZE` | `0` (unlimited) |
    /// | `WEBDAV_BUFFER_THRESHOLD` | `33554432` |
    /// | `WEBDAV_TEMP_DIR` | OS default |
    /// | `WEBDAV_USERS` | unset, `alice:secret,bob:hunter2` |
    /// | `WEBDAV_BEARER_TOKENS` | unset, comma separated |
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("WEBDAV_LISTEN") {
            config.listen = v;
        }
        if let Ok(v) = std::env::var("WEBDAV_PREFIX") {
            config.prefix = v;
        }
        if let Ok(v) = std::env::var("WEBDAV_BUCKET") {
            config.bucket = Some(v).filter(|s| !s.is_empty());
        }
        if let Ok(v) = std::env::var("WEBDAV_READ_ONLY") {
            config.read_only = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("WEBDAV_HIDE_DOT_FILES") {
            config.hide_dot_files = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("WEBDAV_DEFAULT_CONTENT_TYPE") {
            if !v.trim().is_empty() {
                config.default_content_type = v.trim().to_owned();
            }
        }
        if let Ok(v) = std::env::var("WEBDAV_MAX_UPLOAD_SIZE") {
            if let Ok(n) = v.trim().parse() {
                config.max_upload_size = n;
            }
        }
        if let Ok(v) = std::env::var("WEBDAV_BUFFER_THRESHOLD") {
            if let Ok(n) = v.trim().parse() {
                config.buffer_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("WEBDAV_TEMP_DIR") {
            config.temp_dir = Some(PathBuf::from(v)).filter(|p| !p.as_os_str().is_empty());
        }
        if let Ok(v) = std::env::var("WEBDAV_USERS") {
            config.users = parse_pairs(&v).into_iter().collect();
        }
        if let Ok(v) = std::env::var("WEBDAV_BEARER_TOKENS") {
            config.bearer_tokens = parse_list(&v);
        }

        config
    }

    /// The mount prefix without a trailing `/`, empty for the root.
    #[must_use]
    pub fn normalized_prefix(&self) -> String {
        let trimmed = self.prefix.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else if trimmed.starts_with('/') {
            trimmed.to_owned()
        } else {
            format!("/{trimmed}")
        }
    }

    /// Buffer limits for uploads.
    #[must_use]
    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig::builder()
            .threshold(self.buffer_threshold)
            .temp_dir(self.temp_dir.clone())
            .max_size((self.max_upload_size > 0).then_some(self.max_upload_size))
            .build()
    }
}
