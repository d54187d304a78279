//! TCP listener for DNS queries.
//!
//! Each client connection is handled independently: read a length-prefixed
//! query, route it, write the reply, and repeat until the client closes the
//! connection or stays idle too long.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Protocol, read_frame, write_frame};
use crate::error::ProxyError;
use crate::router::Router;
use crate::upstream::UpstreamTransport;

/// Idle connections are closed after this long without a new query.
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP side of the proxy.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr) -> Result<Self, ProxyError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind { addr, source })?;

        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` is cancelled.
    pub fn start<T: UpstreamTransport>(
        self,
        router: Arc<Router<T>>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(run_accept_loop(self.listener, router, shutdown))
    }
}

/// Accept loop - spawns a handler task for each incoming connection.
async fn run_accept_loop<T: UpstreamTransport>(
    listener: TcpListener,
    router: Arc<Router<T>>,
    shutdown: CancellationToken,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "TCP listener started");
    }

    loop {
        let stream = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = listener.accept() => match result {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!(error = %e, "TCP accept error");
                    continue;
                }
            },
        };

        let router = Arc::clone(&router);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = handle_connection(stream, router) => {}
            }
        });
    }

    info!("TCP listener stopped");
}

/// Serve queries on one connection until EOF, error or idle timeout.
async fn handle_connection<T: UpstreamTransport>(mut stream: TcpStream, router: Arc<Router<T>>) {
    let client = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(e) => {
            let err = ProxyError::ClientAddressUnresolvable(e);
            warn!(error = %err, "Dropping TCP connection");
            router.stats().record_dropped();
            return;
        }
    };

    loop {
        let query = match tokio::time::timeout(IDLE_TIMEOUT, read_frame(&mut stream)).await {
            Ok(Ok(Some(query))) => query,
            Ok(Ok(None)) => return,
            Ok(Err(e)) => {
                debug!(%client, error = %e, "TCP read error");
                return;
            }
            Err(_) => {
                debug!(%client, "Closing idle TCP connection");
                return;
            }
        };

        let Some(reply) = router.handle(&query, client, Protocol::Tcp).await else {
            continue;
        };
        if let Err(e) = write_frame(&mut stream, &reply).await {
            warn!(%client, error = %e, "TCP response error");
            return;
        }
    }
}
