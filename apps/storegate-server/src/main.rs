//! storegate server: one storage backend behind S3, SFTP and WebDAV.
//!
//! The backend is chosen by DSN and opened through the driver registry.
//! Each enabled transport runs on its own task; Ctrl-C cancels a shared
//! token and the process exits once every transport has drained.
//!
//! # Usage
//!
//! ```text
//! STOREGATE_DSN=mem:// SFTP_USERS=alice:secret storegate-server
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `STOREGATE_DSN` | `mem://` | Storage backend |
//! | `S3_LISTEN` | `0.0.0.0:9000` | S3 bind address, empty disables |
//! | `SFTP_LISTEN` | `0.0.0.0:2222` | SFTP bind address, empty disables |
//! | `WEBDAV_LISTEN` | `0.0.0.0:8080` | WebDAV bind address, empty disables |
//! | `ACCESS_KEY` / `SECRET_KEY` | *(unset)* | S3 credentials; unset skips SigV4 checks |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `LOG_FORMAT` | `text` | `json` for one JSON object per line |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

mod config;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use storegate_core::{Context, Storage};
use storegate_s3_http::S3HttpService;
use storegate_sftp::SftpServer;
use storegate_webdav::WebDavService;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{GatewayConfig, LogFormat};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the `LOG_LEVEL` config value.
fn init_tracing(config: &GatewayConfig) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("invalid log level filter: {}", config.log_level))?
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }

    Ok(())
}

async fn bind(addr: &str, transport: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {transport} listener to {addr}"))?;
    if let Ok(local) = listener.local_addr() {
        info!(transport, addr = %local, "listening for connections");
    }
    Ok(listener)
}

/// Open the backend, start every enabled transport and wait for all of them
/// to stop. Cancelling `shutdown` stops them; so does one transport failing.
async fn run(config: GatewayConfig, shutdown: CancellationToken) -> Result<()> {
    storegate_core::register_builtin_drivers();

    let ctx = Context::with_token(shutdown.clone());
    let storage: Arc<dyn Storage> = storegate_core::registry::open(&ctx, &config.dsn)
        .await
        .with_context(|| format!("failed to open {} storage", config.dsn_scheme()))?;

    let mut tasks: JoinSet<(&'static str, Result<()>)> = JoinSet::new();

    if let Some(addr) = config.s3_listen() {
        let listener = bind(addr, "s3").await?;
        let service = S3HttpService::new(Arc::clone(&storage), config.s3.clone());
        let token = shutdown.clone();
        tasks.spawn(async move {
            storegate_s3_http::serve(listener, service, token).await;
            ("s3", Ok(()))
        });
    }

    if let Some(addr) = config.sftp_listen() {
        let listener = bind(addr, "sftp").await?;
        let server = SftpServer::new(Arc::clone(&storage), config.sftp.clone())
            .context("failed to configure SFTP server")?;
        let token = shutdown.clone();
        tasks.spawn(async move { ("sftp", server.serve(listener, token).await) });
    }

    if let Some(addr) = config.webdav_listen() {
        let listener = bind(addr, "webdav").await?;
        let service =
            WebDavService::with_context(Arc::clone(&storage), config.webdav.clone(), ctx.child());
        let token = shutdown.clone();
        tasks.spawn(async move {
            storegate_webdav::serve(listener, service, token).await;
            ("webdav", Ok(()))
        });
    }

    if tasks.is_empty() {
        anyhow::bail!("no transport enabled: set S3_LISTEN, SFTP_LISTEN or WEBDAV_LISTEN");
    }

    let mut failure = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((transport, Ok(()))) => info!(transport, "transport stopped"),
            Ok((transport, Err(e))) => {
                error!(transport, error = %e, "transport failed");
                shutdown.cancel();
                failure.get_or_insert(e.context(format!("{transport} transport failed")));
            }
            Err(e) => {
                error!(error = %e, "transport task panicked");
                shutdown.cancel();
                failure.get_or_insert(anyhow::Error::new(e));
            }
        }
    }

    if let Err(e) = storage.close().await {
        warn!(error = %e, "failed to close storage");
    }

    failure.map_or(Ok(()), Err)
}

/// Probe the first enabled HTTP transport's health endpoint.
async fn run_health_check(config: &GatewayConfig) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let addr = config
        .s3_listen()
        .or_else(|| config.webdav_listen())
        .context("no HTTP transport enabled")?
        .replace("0.0.0.0", "127.0.0.1");
    let path = if config.s3_listen().is_some() {
        String::from("/_health")
    } else {
        format!("{}/_health", config.webdav.normalized_prefix())
    };

    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("cannot connect to {addr}"))?;
    let (mut reader, mut writer) = stream.into_split();

    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    writer.write_all(request.as_bytes()).await?;
    writer.shutdown().await?;

    let mut response = String::new();
    reader.read_to_string(&mut response).await?;

    let body = response.split("\r\n\r\n").nth(1).unwrap_or_default();
    let status: serde_json::Value = serde_json::from_str(body.trim())
        .with_context(|| format!("malformed health response from {addr}"))?;
    if response.starts_with("HTTP/1.1 200") && status["status"] == "running" {
        Ok(())
    } else {
        anyhow::bail!("unhealthy response from {addr}")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::from_env();

    // Docker HEALTHCHECK entry point.
    if std::env::args().any(|a| a == "--health-check") {
        let healthy = run_health_check(&config).await.is_ok();
        std::process::exit(i32::from(!healthy));
    }

    init_tracing(&config)?;

    info!(
        dsn_scheme = %config.dsn_scheme(),
        s3_listen = config.s3_listen().unwrap_or("disabled"),
        sftp_listen = config.sftp_listen().unwrap_or("disabled"),
        webdav_listen = config.webdav_listen().unwrap_or("disabled"),
        version = VERSION,
        "starting storegate server",
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received shutdown signal, draining connections");
                signal.cancel();
            }
            Err(e) => warn!(error = %e, "cannot listen for shutdown signal"),
        }
    });

    run(config, shutdown).await?;
    info!("storegate server stopped");
    Ok(())
}
