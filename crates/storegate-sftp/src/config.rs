//! SFTP front-end configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use storegate_core::BufferConfig;
use storegate_core::buffer::DEFAULT_BUFFER_THRESHOLD;
use storegate_core::utils::{parse_bool, parse_list, parse_pairs};
use typed_builder::TypedBuilder;

/// SFTP front-end configuration.
///
/// # Examples
///
/// ```
/// use storegate_sftp::config::SftpConfig;
///
/// let config = SftpConfig::builder()
///     .listen("127.0.0.1:2022")
///     .read_only(true)
///     .build();
/// assert!(config.read_only);
/// assert_eq!(config.idle_timeout_secs, 600);
/// ```
#[derive(Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct SftpConfig {
    /// Bind address.
    #[builder(default = String::from("0.0.0.0:2222"), setter(into))]
    pub listen: String,

    /// OpenSSH private host key. A random ed25519 key is generated when unset.
    #[builder(default, setter(strip_option, into))]
    pub host_key_path: Option<PathBuf>,

    /// `authorized_keys` file listing the accepted client keys.
    #[builder(default, setter(strip_option, into))]
    pub authorized_keys_path: Option<PathBuf>,

    /// Password users by name.
    #[serde(skip_serializing)]
    #[builder(default)]
    pub users: HashMap<String, String>,

    /// Accept any client without credentials. Only meant for local testing.
    #[builder(default = false)]
    pub allow_anonymous: bool,

    /// Reject every mutating operation with `PermissionDenied`.
    #[builder(default = false)]
    pub read_only: bool,

    /// Close connections idle for this many seconds. `0` disables the timer.
    #[builder(default = 600)]
    pub idle_timeout_secs: u64,

    /// Delay before answering a failed authentication attempt.
    #[builder(default = 1000)]
    pub auth_failure_delay_ms: u64,

    /// Bytes kept in memory per upload handle before spilling to disk.
    #[builder(default = DEFAULT_BUFFER_THRESHOLD)]
    pub buffer_threshold: usize,

    /// Directory for spill files.
    #[builder(default, setter(strip_option, into))]
    pub temp_dir: Option<PathBuf>,

    /// Bucket each user is confined to. Users without an entry see every
    /// bucket.
    #[builder(default)]
    pub home_buckets: HashMap<String, String>,

    /// Owner reported for every entry.
    #[builder(default = 0)]
    pub default_uid: u32,

    /// Group reported for every entry.
    #[builder(default = 0)]
    pub default_gid: u32,

    /// Allowed ciphers; the library defaults when empty.
    #[builder(default)]
    pub ciphers: Vec<String>,

    /// Allowed key exchange algorithms; the library defaults when empty.
    #[builder(default)]
    pub kex_algorithms: Vec<String>,

    /// Allowed MAC algorithms; the library defaults when empty.
    #[builder(default)]
    pub macs: Vec<String>,
}

impl std::fmt::Debug for SftpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut users: Vec<&str> = self.users.keys().map(String::as_str).collect();
        users.sort_unstable();
        f.debug_struct("SftpConfig")
            .field("listen", &self.listen)
            .field("host_key_path", &self.host_key_path)
            .field("authorized_keys_path", &self.authorized_keys_path)
            .field("users", &users)
            .field("allow_anonymous", &self.allow_anonymous)
            .field("read_only", &self.read_only)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .field("home_buckets", &self.home_buckets)
            .finish_non_exhaustive()
    }
}

impl Default for SftpConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SftpConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `SFTP_LISTEN` | `0.0.0.0:2222` |
    /// | `SFTP_HOST_KEY` | unset (random key) |
    /// | `SFTP_AUTHORIZED_KEYS` | unset |
    /// | `SFTP_USERS` | unset, `alice:secret,bob:hunter2` |
    /// | `SFTP_ALLOW_ANONYMOUS` | `false` |
    /// | `SFTP_READ_ONLY` | `false` |
    /// | `SFTP_IDLE_TIMEOUT` | `600` (seconds) |
    /// | `SFTP_AUTH_FAILURE_DELAY_MS` | `1000` |
    /// | `SFTP_BUFFER_THRESHOLD` | `33554432` |
    /// | `SFTP_TEMP_DIR` | OS default |
    /// | `SFTP_HOME_BUCKETS` | unset, `alice:alice-data` |
    /// | `SFTP_UID` / `SFTP_GID` | `0` |
    /// | `SFTP_CIPHERS` / `SFTP_KEX` / `SFTP_MACS` | library defaults |
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("SFTP_LISTEN") {
            config.listen = v;
        }
        if let Ok(v) = std::env::var("SFTP_HOST_KEY") {
            config.host_key_path = Some(PathBuf::from(v)).filter(|p| !p.as_os_str().is_empty());
        }
        if let Ok(v) = std::env::var("SFTP_AUTHORIZED_KEYS") {
            config.authorized_keys_path =
                Some(PathBuf::from(v)).filter(|p| !p.as_os_str().is_empty());
        }
        if let Ok(v) = std::env::var("SFTP_USERS") {
            config.users = parse_pairs(&v).into_iter().collect();
        }
        if let Ok(v) = std::env::var("SFTP_ALLOW_ANONYMOUS") {
            config.allow_anonymous = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("SFTP_READ_ONLY") {
            config.read_only = parse_bool(&v);
        }
        if let Some(n) = env_number("SFTP_IDLE_TIMEOUT") {
            config.idle_timeout_secs = n;
        }
        if let Some(n) = env_number("SFTP_AUTH_FAILURE_DELAY_MS") {
            config.auth_failure_delay_ms = n;
        }
        if let Some(n) = env_number("SFTP_BUFFER_THRESHOLD") {
            config.buffer_threshold = usize::try_from(n).unwrap_or(DEFAULT_BUFFER_THRESHOLD);
        }
        if let Ok(v) = std::env::var("SFTP_TEMP_DIR") {
            config.temp_dir = Some(PathBuf::from(v)).filter(|p| !p.as_os_str().is_empty());
        }
        if let Ok(v) = std::env::var("SFTP_HOME_BUCKETS") {
            config.home_buckets = parse_pairs(&v).into_iter().collect();
        }
        if let Some(n) = env_number("SFTP_UID") {
            config.default_uid = u32::try_from(n).unwrap_or_default();
        }
        if let Some(n) = env_number("SFTP_GID") {
            config.default_gid = u32::try_from(n).unwrap_or_default();
        }
        if let Ok(v) = std::env::var("SFTP_CIPHERS") {
            config.ciphers = parse_list(&v);
        }
        if let Ok(v) = std::env::var("SFTP_KEX") {
            config.kex_algorithms = parse_list(&v);
        }
        if let Ok(v) = std::env::var("SFTP_MACS") {
            config.macs = parse_list(&v);
        }

        config
    }

    /// Bucket `user` is confined to, if any.
    #[must_use]
    pub fn home_bucket(&self, user: &str) -> Option<&str> {
        self.home_buckets
            .get(user)
            .map(String::as_str)
            .filter(|b| !b.is_empty())
    }

    /// Idle timeout, `None` when disabled.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// Buffer limits for upload handles.
    #[must_use]
    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig::builder()
            .threshold(self.buffer_threshold)
            .temp_dir(self.temp_dir.clone())
            .build()
    }
}

fn env_number(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse().ok()
}
