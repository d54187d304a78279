//! Per-query routing.
//!
//! Handles the query processing pipeline shared by both listeners:
//! 1. Decode the query (drop runts, FORMERR on undecodable bodies)
//! 2. Pick the upstream set for the client's device, or the global set
//! 3. Race the upstreams and answer with the winner or SERVFAIL
//!
//! Listeners handle the actual I/O, the router handles decisions.

use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use hickory_proto::op::Message;
use tracing::{debug, error, warn};

use crate::device::DeviceIndex;
use crate::dns::{self, header_id, question_name};
use crate::stats::Stats;
use crate::transport::Protocol;
use crate::upstream::{
    ExchangeContext, ExchangeEngine, ExchangeRequest, UpstreamTransport, Upstreams,
};

/// Upstream selection for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route<'a> {
    /// Matching device, `None` for the global policy.
    pub device: Option<&'a str>,
    pub upstreams: &'a [String],
    pub tls_verify: bool,
}

/// Resolves client policy and drives the exchange for each query.
pub struct Router<T = Upstreams> {
    devices: DeviceIndex,
    default_upstreams: Vec<String>,
    engine: ExchangeEngine<T>,
    stats: Stats,
}

impl<T: UpstreamTransport> Router<T> {
    pub fn new(devices: DeviceIndex, default_upstreams: Vec<String>, engine: ExchangeEngine<T>) -> Self {
        Self {
            devices,
            default_upstreams,
            engine,
            stats: Stats::new(),
        }
    }

    /// Upstreams and TLS policy for a client address.
    pub fn route(&self, client: IpAddr) -> Route<'_> {
        match self.devices.get(client) {
            Some(device) => Route {
                device: Some(device.name.as_str()),
                upstreams: &device.upstreams,
                tls_verify: device.tls_verify,
            },
            None => Route {
                device: None,
                upstreams: &self.default_upstreams,
                tls_verify: true,
            },
        }
    }

    /// Answer one raw query from `client`.
    ///
    /// Returns the encoded reply, or `None` when the packet is dropped. The
    /// reply always carries the query's transaction ID.
    pub async fn handle(&self, packet: &[u8], client: SocketAddr, protocol: Protocol) -> Option<Vec<u8>> {
        let start = Instant::now();

        let Some(id) = header_id(packet) else {
            debug!(%client, %protocol, len = packet.len(), "Dropping runt packet");
            self.stats.record_dropped();
            return None;
        };

        let query = match Message::from_vec(packet) {
            Ok(query) => query,
            Err(e) => {
                debug!(%client, %protocol, id, error = %e, "Undecodable query");
                self.stats.record_failed(start.elapsed());
                return encode(&dns::format_error(id));
            }
        };

        let route = self.route(client.ip());
        let request = ExchangeRequest {
            query: &query,
            upstreams: route.upstreams,
            tls_verify: route.tls_verify,
        };

        let response = match self.engine.exchange(request, &ExchangeContext::background()).await {
            Ok(mut response) => {
                response.set_id(query.id());
                self.stats.record_resolved(start.elapsed());
                debug!(
                    %client,
                    %protocol,
                    device = route.device.unwrap_or("-"),
                    question = %question_name(&query),
                    rcode = %response.response_code(),
                    elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Query resolved"
                );
                response
            }
            Err(e) => {
                self.stats.record_failed(start.elapsed());
                warn!(
                    %client,
                    %protocol,
                    device = route.device.unwrap_or("-"),
                    question = %question_name(&query),
                    error = %e,
                    "Failed to exchange query"
                );
                dns::server_failure(&query)
            }
        };

        encode(&response).or_else(|| encode(&dns::server_failure(&query)))
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn devices(&self) -> &DeviceIndex {
        &self.devices
    }
}

fn encode(message: &Message) -> Option<Vec<u8>> {
    match message.to_vec() {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            error!(id = message.id(), error = %e, "Failed to encode response");
            None
        }
    }
}
