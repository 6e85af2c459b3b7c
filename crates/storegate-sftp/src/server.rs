//! SSH server hosting the `sftp` subsystem.

use std::borrow::Cow;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use russh::keys::{Algorithm, HashAlg, PrivateKey, PublicKey};
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId};
use storegate_core::{Context, Storage, VirtualFs};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::{SftpAuthenticator, StaticAuthenticator};
use crate::config::SftpConfig;
use crate::handler::SftpHandler;

const SFTP_SUBSYSTEM: &str = "sftp";

/// Load the host key at `path`, or generate a throwaway ed25519 key.
///
/// # Errors
///
/// Fails when the key file cannot be read or decoded.
pub fn load_host_key(path: Option<&Path>) -> anyhow::Result<PrivateKey> {
    if let Some(path) = path {
        return russh::keys::load_secret_key(path, None)
            .with_context(|| format!("loading SFTP host key from {}", path.display()));
    }
    warn!("no SFTP host key configured, generating a random ed25519 key; clients will see a new fingerprint on every start");
    let mut rng = russh::keys::signature::rand_core::OsRng;
    PrivateKey::random(&mut rng, Algorithm::Ed25519).context("generating SFTP host key")
}

/// Narrow `list` to the names in `wanted`, keeping the library order.
fn restrict<T>(list: &mut Cow<'static, [T]>, wanted: &[String], what: &'static str)
where
    T: AsRef<str> + Clone,
{
    if wanted.is_empty() {
        return;
    }
    let kept: Vec<T> = list
        .iter()
        .filter(|name| {
            let name: &str = AsRef::<str>::as_ref(*name);
            wanted.iter().any(|w| w == name)
        })
        .cloned()
        .collect();
    if kept.is_empty() {
        warn!(what, ?wanted, "no configured algorithm is supported, keeping defaults");
        return;
    }
    *list = Cow::Owned(kept);
}

fn ssh_config(config: &SftpConfig, host_key: PrivateKey) -> russh::server::Config {
    let mut ssh = russh::server::Config::default();
    ssh.keys.push(host_key);
    ssh.inactivity_timeout = config.idle_timeout();
    ssh.auth_rejection_time = Duration::from_millis(config.auth_failure_delay_ms);
    ssh.auth_rejection_time_initial = Some(Duration::ZERO);
    ssh.preferred.key = Cow::Borrowed(&[
        Algorithm::Ed25519,
        Algorithm::Rsa {
            hash: Some(HashAlg::Sha512),
        },
        Algorithm::Rsa {
            hash: Some(HashAlg::Sha256),
        },
        Algorithm::Rsa { hash: None },
    ]);
    restrict(&mut ssh.preferred.cipher, &config.ciphers, "cipher");
    restrict(&mut ssh.preferred.kex, &config.kex_algorithms, "kex");
    restrict(&mut ssh.preferred.mac, &config.macs, "mac");
    ssh
}

/// State shared by every connection of one server.
#[derive(Debug)]
struct Shared {
    storage: Arc<dyn Storage>,
    config: SftpConfig,
    auth: Arc<dyn SftpAuthenticator>,
}

impl Shared {
    fn handler_for(&self, user: &str, ctx: Context) -> SftpHandler {
        let home = self.config.home_bucket(user).map(str::to_owned);
        let vfs = VirtualFs::new(Arc::clone(&self.storage), home, self.config.read_only);
        SftpHandler::new(vfs, ctx, self.config.buffer_config())
            .with_owner(self.config.default_uid, self.config.default_gid)
    }
}

/// SFTP server over a storage backend.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use storegate_core::driver::memory::MemoryStorage;
/// use storegate_sftp::{SftpConfig, SftpServer};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> anyhow::Result<()> {
/// let config = SftpConfig::builder().allow_anonymous(true).build();
/// let server = SftpServer::new(Arc::new(MemoryStorage::default()), config)?;
/// let listener = tokio::net::TcpListener::bind("127.0.0.1:2222").await?;
/// server.serve(listener, CancellationToken::new()).await?;
/// # Ok(())
/// # }
/// ```
pub struct SftpServer {
    shared: Arc<Shared>,
    ssh: Arc<russh::server::Config>,
}

impl std::fmt::Debug for SftpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpServer")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl SftpServer {
    /// Build a server, loading the host key and `authorized_keys` file.
    ///
    /// # Errors
    ///
    /// Fails when a configured key file cannot be loaded.
    pub fn new(storage: Arc<dyn Storage>, config: SftpConfig) -> anyhow::Result<Self> {
        let auth = StaticAuthenticator::from_config(&config)?;
        let host_key = load_host_key(config.host_key_path.as_deref())?;
        let ssh = ssh_config(&config, host_key);
        Ok(Self {
            shared: Arc::new(Shared {
                storage,
                config,
                auth: Arc::new(auth),
            }),
            ssh: Arc::new(ssh),
        })
    }

    /// Replace the configured credential check.
    #[must_use]
    pub fn with_authenticator(self, auth: Arc<dyn SftpAuthenticator>) -> Self {
        let shared = Shared {
            storage: Arc::clone(&self.shared.storage),
            config: self.shared.config.clone(),
            auth,
        };
        Self {
            shared: Arc::new(shared),
            ssh: self.ssh,
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &SftpConfig {
        &self.shared.config
    }

    /// Accept connections on `listener` until `shutdown` is cancelled.
    ///
    /// Sessions already running keep their SSH connection, but their storage
    /// calls observe the cancellation and fail.
    ///
    /// # Errors
    ///
    /// Currently always `Ok`; accept failures are logged and retried.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> anyhow::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "SFTP server listening");
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!(error = %e, "failed to accept SFTP connection");
                            continue;
                        }
                    };
                    let handler = SshSession::new(
                        Arc::clone(&self.shared),
                        Some(peer),
                        Context::with_token(shutdown.child_token()),
                    );
                    let ssh = Arc::clone(&self.ssh);
                    tokio::spawn(async move {
                        match russh::server::run_stream(ssh, stream, handler).await {
                            Ok(session) => {
                                if let Err(e) = session.await {
                                    debug!(%peer, error = %e, "SFTP session ended with error");
                                }
                            }
                            Err(e) => debug!(%peer, error = %e, "SSH handshake failed"),
                        }
                        debug!(%peer, "SFTP connection closed");
                    });
                }
                () = shutdown.cancelled() => {
                    info!("SFTP server shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}

/// One SSH connection.
struct SshSession {
    shared: Arc<Shared>,
    peer: Option<SocketAddr>,
    ctx: Context,
    user: Option<String>,
    channels: HashMap<ChannelId, Channel<Msg>>,
}

impl SshSession {
    fn new(shared: Arc<Shared>, peer: Option<SocketAddr>, ctx: Context) -> Self {
        Self {
            shared,
            peer,
            ctx,
            user: None,
            channels: HashMap::new(),
        }
    }

    fn accept(&mut self, user: &str, method: &'static str) -> Auth {
        info!(peer = ?self.peer, user, method, "SFTP login");
        self.user = Some(user.to_owned());
        Auth::Accept
    }

    fn reject(&self, user: &str, method: &'static str) -> Auth {
        warn!(peer = ?self.peer, user, method, "SFTP authentication failed");
        Auth::Reject {
            proceed_with_methods: None,
            partial_success: false,
        }
    }
}

impl russh::server::Handler for SshSession {
    type Error = anyhow::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        if self.shared.auth.allow_anonymous(user) {
            return Ok(self.accept(user, "none"));
        }
        // Clients probe with "none" first; not a failure worth logging.
        Ok(Auth::Reject {
            proceed_with_methods: None,
            partial_success: false,
        })
    }

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if self.shared.auth.check_password(user, password) {
            Ok(self.accept(user, "password"))
        } else {
            Ok(self.reject(user, "password"))
        }
    }

    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        if self.shared.auth.check_public_key(user, key) {
            Ok(self.accept(user, "publickey"))
        } else {
            Ok(self.reject(user, "publickey"))
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.channels.remove(&channel);
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.close(channel)?;
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if name != SFTP_SUBSYSTEM {
            debug!(peer = ?self.peer, subsystem = name, "rejecting subsystem");
            session.channel_failure(channel_id)?;
            return Ok(());
        }
        let (Some(user), Some(channel)) = (self.user.clone(), self.channels.remove(&channel_id))
        else {
            session.channel_failure(channel_id)?;
            return Ok(());
        };

        session.channel_success(channel_id)?;
        let handler = self.shared.handler_for(&user, self.ctx.child());
        debug!(peer = ?self.peer, user, "starting SFTP subsystem");
        russh_sftp::server::run(channel.into_stream(), handler).await;
        Ok(())
    }
}
