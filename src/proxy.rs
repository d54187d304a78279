//! DNS proxy orchestration.
//!
//! Builds the router from configuration, binds both listeners and runs them
//! until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::device::DeviceIndex;
use crate::error::ProxyError;
use crate::router::Router;
use crate::transport::{tcp::TcpTransport, udp::UdpTransport};
use crate::upstream::{ClassicTransport, DohConfig, DohTransport, ExchangeEngine, UpstreamTransport, Upstreams};

/// How often statistics are logged.
const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Build the production router for `config`.
pub fn build_router(config: &Config, doh: DohConfig) -> Result<Router, ProxyError> {
    let devices = DeviceIndex::new(&config.devices);
    let upstreams = Upstreams::new(ClassicTransport::new(), DohTransport::with_config(doh)?);

    info!(
        devices = config.devices.len(),
        device_ips = devices.len(),
        upstreams = %config.upstreams.join(", "),
        "Routing table built"
    );

    Ok(Router::new(
        devices,
        config.upstreams.clone(),
        ExchangeEngine::new(upstreams),
    ))
}

/// Bound UDP and TCP listeners sharing one router.
pub struct Proxy<T = Upstreams> {
    udp: UdpTransport,
    tcp: TcpTransport,
    router: Arc<Router<T>>,
}

impl<T: UpstreamTransport> Proxy<T> {
    /// Bind UDP and TCP on `addr`. A bind failure is fatal to startup.
    pub async fn bind(addr: SocketAddr, router: Router<T>) -> Result<Self, ProxyError> {
        Self::bind_split(addr, addr, router).await
    }

    /// Bind UDP and TCP on separate addresses.
    pub async fn bind_split(
        udp_addr: SocketAddr,
        tcp_addr: SocketAddr,
        router: Router<T>,
    ) -> Result<Self, ProxyError> {
        Ok(Self {
            udp: UdpTransport::bind(udp_addr).await?,
            tcp: TcpTransport::bind(tcp_addr).await?,
            router: Arc::new(router),
        })
    }

    pub fn udp_addr(&self) -> std::io::Result<SocketAddr> {
        self.udp.local_addr()
    }

    pub fn tcp_addr(&self) -> std::io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let udp = self.udp.start(Arc::clone(&self.router), shutdown.clone());
        let tcp = self.tcp.start(Arc::clone(&self.router), shutdown.clone());

        let router = Arc::clone(&self.router);
        let stats_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATS_INTERVAL);
            interval.tick().await; // Skip first immediate tick
            loop {
                tokio::select! {
                    _ = stats_shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let stats = router.stats().snapshot_and_reset();
                        info!(
                            requests = stats.requests,
                            resolved = stats.resolved,
                            failed = stats.failed,
                            dropped = stats.dropped,
                            avg_response_ms = stats.avg_response_ms,
                            "Stats"
                        );
                    }
                }
            }
        });

        shutdown.cancelled().await;
        let _ = tokio::join!(udp, tcp);
        info!("Proxy stopped");
    }
}
