//! UDP listener for DNS queries.
//!
//! Each datagram is answered by its own task, so a slow upstream race never
//! holds up other clients sharing the socket.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{MAX_DNS_PACKET_SIZE, Protocol};
use crate::error::ProxyError;
use crate::router::Router;
use crate::upstream::UpstreamTransport;

/// UDP side of the proxy.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr) -> Result<Self, ProxyError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind { addr, source })?;

        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve queries until `shutdown` is cancelled.
    pub fn start<T: UpstreamTransport>(
        self,
        router: Arc<Router<T>>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(run(self.socket, router, shutdown))
    }
}

async fn run<T: UpstreamTransport>(
    socket: Arc<UdpSocket>,
    router: Arc<Router<T>>,
    shutdown: CancellationToken,
) {
    if let Ok(addr) = socket.local_addr() {
        info!(%addr, "UDP listener started");
    }
    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

    loop {
        let (len, src) = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok(r) => r,
                Err(e) => {
                    // ICMP errors from earlier replies surface here on some platforms.
                    debug!(error = %e, "UDP recv error");
                    continue;
                }
            },
        };

        let packet = buf[..len].to_vec();
        let socket = Arc::clone(&socket);
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            let Some(reply) = router.handle(&packet, src, Protocol::Udp).await else {
                return;
            };
            if let Err(e) = socket.send_to(&reply, src).await {
                warn!(client = %src, error = %e, "UDP response error");
            }
        });
    }

    info!("UDP listener stopped");
}
