//! Process configuration.

use std::fmt;

use serde::{Deserialize, Serialize};
use storegate_core::Dsn;
use storegate_s3_http::S3Config;
use storegate_sftp::SftpConfig;
use storegate_webdav::WebDavConfig;
use typed_builder::TypedBuilder;

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// `json` (any case) selects [`LogFormat::Json`]; anything else is text.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Gateway configuration: the backend DSN, logging, and one section per
/// transport. A transport whose listen address is empty is not started.
#[derive(Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Storage DSN opened through the driver registry.
    #[builder(default = String::from("mem://"), setter(into))]
    pub dsn: String,

    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[builder(default = String::from("info"), setter(into))]
    pub log_level: String,

    #[builder(default)]
    pub log_format: LogFormat,

    #[builder(default)]
    pub s3: S3Config,

    #[builder(default)]
    pub sftp: SftpConfig,

    #[builder(default)]
    pub webdav: WebDavConfig,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // DSNs may carry credentials.
        f.debug_struct("GatewayConfig")
            .field("dsn_scheme", &self.dsn_scheme())
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("s3", &self.s3)
            .field("sftp", &self.sftp)
            .field("webdav", &self.webdav)
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `STOREGATE_DSN` | `mem://` |
    /// | `LOG_LEVEL` | `info` |
    /// | `LOG_FORMAT` | `text` (`json` for structured output) |
    ///
    /// Transport sections read their own variables (`S3_*`, `SFTP_*`,
    /// `WEBDAV_*`, `ACCESS_KEY`, `SECRET_KEY`).
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::builder()
            .s3(S3Config::from_env())
            .sftp(SftpConfig::from_env())
            .webdav(WebDavConfig::from_env())
            .build();

        if let Ok(v) = std::env::var("STOREGATE_DSN") {
            if !v.trim().is_empty() {
                config.dsn = v.trim().to_owned();
            }
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            if !v.trim().is_empty() {
                config.log_level = v.trim().to_owned();
            }
        }
        if let Ok(v) = std::env::var("LOG_FORMAT") {
            config.log_format = LogFormat::parse(&v);
        }

        config
    }

    /// The DSN scheme, safe to log.
    #[must_use]
    pub fn dsn_scheme(&self) -> String {
        Dsn::parse(&self.dsn).map_or_else(|_| String::from("<invalid>"), |d| d.scheme().to_owned())
    }

    /// S3 bind address, `None` when disabled.
    #[must_use]
    pub fn s3_listen(&self) -> Option<&str> {
        enabled(&self.s3.listen)
    }

    /// SFTP bind address, `None` when disabled.
    #[must_use]
    pub fn sftp_listen(&self) -> Option<&str> {
        enabled(&self.sftp.listen)
    }

    /// WebDAV bind address, `None` when disabled.
    #[must_use]
    pub fn webdav_listen(&self) -> Option<&str> {
        enabled(&self.webdav.listen)
    }
}

fn enabled(listen: &str) -> Option<&str> {
    Some(listen.trim()).filter(|l| !l.is_empty())
}
