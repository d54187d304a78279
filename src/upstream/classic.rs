//! Classic DNS transport.
//!
//! Sends the query over UDP from an ephemeral socket. A truncated reply is
//! retried once over TCP with the standard 2-byte length prefix, within the
//! same time budget. If the retry fails the truncated reply is returned as
//! it is.

use std::net::SocketAddr;
use std::time::Duration;

use hickory_proto::op::Message;
use tokio::net::{TcpStream, UdpSocket, lookup_host};
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use super::{DEFAULT_TIMEOUT, ExchangeContext};
use crate::dns::header_id;
use crate::error::ExchangeError;
use crate::transport::{MAX_DNS_PACKET_SIZE, read_frame, write_frame};

/// DNS over UDP with TCP fallback.
#[derive(Debug, Clone)]
pub struct ClassicTransport {
    default_timeout: Duration,
}

impl ClassicTransport {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Use `timeout` for calls whose context carries no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            default_timeout: timeout,
        }
    }

    /// Exchange `query` with the server at `addr` (`host:port`).
    pub async fn query(
        &self,
        addr: &str,
        query: &[u8],
        ctx: &ExchangeContext,
    ) -> Result<Message, ExchangeError> {
        let budget = ctx.remaining().unwrap_or(self.default_timeout);
        let deadline = Instant::now() + budget;
        let id = header_id(query)
            .ok_or_else(|| ExchangeError::Protocol("query shorter than a DNS header".into()))?;

        let timed_out = || ExchangeError::transport(addr, format!("timed out after {budget:?}"));

        let server = timeout_at(deadline, resolve(addr))
            .await
            .map_err(|_| timed_out())??;

        let response = timeout_at(deadline, exchange_udp(addr, server, query, id))
            .await
            .map_err(|_| timed_out())??;

        if !response.truncated() {
            return Ok(response);
        }

        debug!(upstream = %addr, "Truncated UDP response, retrying over TCP");
        let fallback = timeout_at(deadline, exchange_tcp(addr, server, query, id))
            .await
            .map_err(|_| timed_out())
            .and_then(|result| result);

        match fallback {
            Ok(full) => Ok(full),
            Err(e) => {
                debug!(upstream = %addr, error = %e, "TCP retry failed, returning truncated response");
                Ok(response)
            }
        }
    }
}

impl Default for ClassicTransport {
    fn default() -> Self {
        Self::new()
    }
}

async fn resolve(addr: &str) -> Result<SocketAddr, ExchangeError> {
    lookup_host(addr)
        .await
        .map_err(|e| ExchangeError::transport(addr, e))?
        .next()
        .ok_or_else(|| ExchangeError::transport(addr, "host resolved to no addresses"))
}

async fn exchange_udp(
    addr: &str,
    server: SocketAddr,
    query: &[u8],
    id: u16,
) -> Result<Message, ExchangeError> {
    let bind_addr = if server.is_ipv4() {
        "0.0.0.0:0"
    } else {
        "[::]:0"
    };
    let socket = UdpSocket::bind(bind_addr)
        .await
        .map_err(|e| ExchangeError::transport(addr, e))?;

    // Connecting filters datagrams from other sources and surfaces ICMP errors.
    socket
        .connect(server)
        .await
        .map_err(|e| ExchangeError::transport(addr, e))?;
    socket
        .send(query)
        .await
        .map_err(|e| ExchangeError::transport(addr, e))?;

    let mut buf = vec![0u8; MAX_DNS_PACKET_SIZE];
    loop {
        let len = socket
            .recv(&mut buf)
            .await
            .map_err(|e| ExchangeError::transport(addr, e))?;

        match header_id(&buf[..len]) {
            Some(got) if got == id => return parse_response(addr, &buf[..len]),
            got => {
                debug!(upstream = %addr, expected = id, ?got, "Ignoring unmatched UDP response");
            }
        }
    }
}

async fn exchange_tcp(
    addr: &str,
    server: SocketAddr,
    query: &[u8],
    id: u16,
) -> Result<Message, ExchangeError> {
    let mut stream = TcpStream::connect(server)
        .await
        .map_err(|e| ExchangeError::transport(addr, e))?;
    stream
        .set_nodelay(true)
        .map_err(|e| ExchangeError::transport(addr, e))?;

    write_frame(&mut stream, query)
        .await
        .map_err(|e| ExchangeError::transport(addr, e))?;
    let frame = read_frame(&mut stream)
        .await
        .map_err(|e| ExchangeError::transport(addr, e))?
        .ok_or_else(|| ExchangeError::transport(addr, "connection closed before response"))?;

    if header_id(&frame) != Some(id) {
        return Err(ExchangeError::Protocol(format!(
            "TCP response from {addr} does not match query ID {id}"
        )));
    }
    parse_response(addr, &frame)
}

fn parse_response(addr: &str, bytes: &[u8]) -> Result<Message, ExchangeError> {
    Message::from_vec(bytes)
        .map_err(|e| ExchangeError::Protocol(format!("invalid response from {addr}: {e}")))
}
