//! S3 front-end configuration.

use serde::{Deserialize, Serialize};
use storegate_core::utils::parse_bool;
use typed_builder::TypedBuilder;

/// S3's single-request upload ceiling.
pub const DEFAULT_MAX_OBJECT_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// S3 front-end configuration.
///
/// # Examples
///
/// ```
/// use storegate_s3_http::config::S3Config;
///
/// let config = S3Config::default();
/// assert_eq!(config.listen, "0.0.0.0:9000");
/// assert!(config.credentials().is_none());
/// ```
#[derive(Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct S3Config {
    /// Bind address (e.g. `"0.0.0.0:9000"`).
    #[builder(default = String::from("0.0.0.0:9000"))]
    pub listen: String,

    /// Region reported to clients and expected in signatures.
    #[builder(default = String::from("us-east-1"))]
    pub region: String,

    /// Largest object accepted by PutObject and UploadPart. `0` disables
    /// the check.
    #[builder(default = DEFAULT_MAX_OBJECT_SIZE)]
    pub max_object_size: u64,

    /// Reject every mutating request with `AccessDenied`.
    #[builder(default = false)]
    pub read_only: bool,

    /// Access key id. Requests are not authenticated unless both keys are set.
    #[builder(default, setter(strip_option, into))]
    pub access_key: Option<String>,

    /// Secret key paired with `access_key`.
    #[serde(skip_serializing)]
    #[builder(default, setter(strip_option, into))]
    pub secret_key: Option<String>,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("listen", &self.listen)
            .field("region", &self.region)
            .field("max_object_size", &self.max_object_size)
            .field("read_only", &self.read_only)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl S3Config {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `S3_LISTEN` | `0.0.0.0:9000` |
    /// | `S3_REGION` | `us-east-1` |
    /// | `S3_MAX_OBJECT_SIZE` | `5368709120` |
    /// | `S3_READ_ONLY` | `false` |
    /// | `ACCESS_KEY` | unset |
    /// | `SECRET_KEY` | unset |
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("S3_LISTEN") {
            config.listen = v;
        }
        if let Ok(v) = std::env::var("S3_REGION") {
            config.region = v;
        }
        if let Ok(v) = std::env::var("S3_MAX_OBJECT_SIZE") {
            if let Ok(n) = v.trim().parse::<u64>() {
                config.max_object_size = n;
            }
        }
        if let Ok(v) = std::env::var("S3_READ_ONLY") {
            config.read_only = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("ACCESS_KEY") {
            config.access_key = Some(v).filter(|s| !s.is_empty());
        }
        if let Ok(v) = std::env::var("SECRET_KEY") {
            config.secret_key = Some(v).filter(|s| !s.is_empty());
        }

        config
    }

    /// `(access_key, secret_key)` when both are configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.access_key.as_deref(), self.secret_key.as_deref()) {
            (Some(ak), Some(sk)) if !ak.is_empty() && !sk.is_empty() => Some((ak, sk)),
            _ => None,
        }
    }

    /// Whether `size` exceeds the configured limit.
    #[must_use]
    pub fn exceeds_max_size(&self, size: u64) -> bool {
        self.max_object_size > 0 && size > self.max_object_size
    }
}
