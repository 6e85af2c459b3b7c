//! TCP accept loop with graceful shutdown.

use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::service::S3HttpService;

/// Serve `service` on `listener` until `shutdown` is cancelled, then wait
/// for in-flight connections to drain.
pub async fn serve(listener: TcpListener, service: S3HttpService, shutdown: CancellationToken) {
    let graceful = GracefulShutdown::new();
    let http = HttpConnBuilder::new(TokioExecutor::new());

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "failed to accept S3 connection");
                        continue;
                    }
                };

                let conn = http.serve_connection(TokioIo::new(stream), service.clone());
                let conn = graceful.watch(conn.into_owned());
                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        error!(peer_addr = %peer_addr, error = %e, "S3 connection error");
                    }
                });
            }

            () = shutdown.cancelled() => {
                info!("S3 listener shutting down");
                break;
            }
        }
    }

    graceful.shutdown().await;
    info!("S3 connections drained");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use storegate_core::driver::memory::MemoryStorage;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::config::S3Config;

    #[tokio::test]
    async fn test_should_serve_until_cancelled() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|e| panic!("bind: {e}"));
        let addr = listener
            .local_addr()
            .unwrap_or_else(|e| panic!("local addr: {e}"));
        let service = S3HttpService::new(Arc::new(MemoryStorage::default()), S3Config::default());
        let token = CancellationToken::new();
        let task = tokio::spawn(serve(listener, service, token.clone()));

        let mut stream = tokio::net::TcpStream::connect(addr)
            .await
            .unwrap_or_else(|e| panic!("connect: {e}"));
        stream
            .write_all(b"GET /_health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap_or_else(|e| panic!("write: {e}"));
        let mut response = String::new();
        stream
            .read_to_string(&mut response)
            .await
            .unwrap_or_else(|e| panic!("read: {e}"));
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains("running"), "{response}");

        token.cancel();
        task.await.unwrap_or_else(|e| panic!("join: {e}"));
    }
}
