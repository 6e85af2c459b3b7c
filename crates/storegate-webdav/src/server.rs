//! TCP accept loop with graceful shutdown.

use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::service::WebDavService;

/// Serve `service` on `listener` until `shutdown` is cancelled, then wait
/// for in-flight connections to drain.
pub async fn serve(listener: TcpListener, service: WebDavService, shutdown: CancellationToken) {
    let graceful = GracefulShutdown::new();
    let http = HttpConnBuilder::new(TokioExecutor::new());

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "failed to accept WebDAV connection");
                        continue;
                    }
                };

                let conn = http.serve_connection(TokioIo::new(stream), service.clone());
                let conn = graceful.watch(conn.into_owned());
                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        error!(peer_addr = %peer_addr, error = %e, "WebDAV connection error");
                    }
                });
            }

            () = shutdown.cancelled() => {
                info!("WebDAV listener shutting down");
                break;
            }
        }
    }

    graceful.shutdown().await;
    info!("WebDAV connections drained");
}
