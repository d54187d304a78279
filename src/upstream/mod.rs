//! Upstream resolvers.
//!
//! An upstream identifier is either a classic resolver address (`host` or
//! `host:port`, port 53 when absent) or an `http://`/`https://` URL for a
//! DNS-over-HTTPS endpoint. Identifiers are not validated when loaded; a
//! malformed one simply fails when a query is sent to it.

pub mod classic;
pub mod doh;
pub mod exchange;

use std::fmt;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use hickory_proto::op::Message;

use crate::error::ExchangeError;

pub use classic::ClassicTransport;
pub use doh::{DohConfig, DohTransport};
pub use exchange::{ExchangeContext, ExchangeEngine, ExchangeRequest};

/// Default port for classic DNS.
pub const DNS_PORT: u16 = 53;

/// Timeout applied to an upstream attempt when the caller sets no deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A parsed upstream identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upstream {
    /// Classic DNS server as `host:port`.
    Classic { addr: String },
    /// DNS-over-HTTPS endpoint.
    Doh { url: String },
}

impl Upstream {
    pub fn parse(identifier: &str) -> Self {
        if identifier.starts_with("https://") || identifier.starts_with("http://") {
            return Self::Doh {
                url: identifier.to_string(),
            };
        }
        Self::Classic {
            addr: with_default_port(identifier),
        }
    }

    pub fn is_doh(&self) -> bool {
        matches!(self, Self::Doh { .. })
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classic { addr } => f.write_str(addr),
            Self::Doh { url } => f.write_str(url),
        }
    }
}

/// Append the DNS port to an address that does not carry one.
fn with_default_port(addr: &str) -> String {
    if addr.parse::<SocketAddr>().is_ok() {
        return addr.to_string();
    }
    // Bare IPv6 literals contain colons but no port.
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return SocketAddr::new(ip, DNS_PORT).to_string();
    }
    if addr.starts_with('[') && addr.ends_with(']') {
        return format!("{addr}:{DNS_PORT}");
    }
    if addr.contains(':') {
        return addr.to_string();
    }
    format!("{addr}:{DNS_PORT}")
}

/// One DNS exchange against one upstream.
///
/// Implementations hold no per-query state; every call is independent and
/// may run concurrently with any number of others.
pub trait UpstreamTransport: Send + Sync + 'static {
    fn query(
        &self,
        upstream: &Upstream,
        query: &[u8],
        tls_verify: bool,
        ctx: &ExchangeContext,
    ) -> impl Future<Output = Result<Message, ExchangeError>> + Send;
}

/// Routes each upstream to the classic or DoH adapter.
pub struct Upstreams {
    classic: ClassicTransport,
    doh: DohTransport,
}

impl Upstreams {
    pub fn new(classic: ClassicTransport, doh: DohTransport) -> Self {
        Self { classic, doh }
    }
}

impl UpstreamTransport for Upstreams {
    async fn query(
        &self,
        upstream: &Upstream,
        query: &[u8],
        tls_verify: bool,
        ctx: &ExchangeContext,
    ) -> Result<Message, ExchangeError> {
        match upstream {
            Upstream::Classic { addr } => self.classic.query(addr, query, ctx).await,
            Upstream::Doh { url } => self.doh.query(url, query, tls_verify, ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classic(addr: &str) -> Upstream {
        Upstream::Classic {
            addr: addr.to_string(),
        }
    }

    #[test]
    fn parse_appends_default_port() {
        assert_eq!(Upstream::parse("9.9.9.9"), classic("9.9.9.9:53"));
        assert_eq!(Upstream::parse("dns.example"), classic("dns.example:53"));
    }

    #[test]
    fn parse_keeps_explicit_port() {
        assert_eq!(Upstream::parse("1.0.0.1:5353"), classic("1.0.0.1:5353"));
        assert_eq!(Upstream::parse("dns.example:853"), classic("dns.example:853"));
        assert_eq!(Upstream::parse("[2606:4700::1111]:53"), classic("[2606:4700::1111]:53"));
    }

    #[test]
    fn parse_handles_ipv6_literals() {
        assert_eq!(Upstream::parse("2606:4700::1111"), classic("[2606:4700::1111]:53"));
        assert_eq!(Upstream::parse("[::1]"), classic("[::1]:53"));
    }

    #[test]
    fn parse_recognises_doh_urls() {
        let https = Upstream::parse("https://dns.example/dns-query");
        let http = Upstream::parse("http://127.0.0.1:8053/dns-query");

        assert!(https.is_doh());
        assert!(http.is_doh());
        assert_eq!(https.to_string(), "https://dns.example/dns-query");
    }

    #[test]
    fn parse_keeps_surrounding_whitespace() {
        assert_eq!(Upstream::parse(" 8.8.8.8"), classic(" 8.8.8.8:53"));
        assert!(!Upstream::parse(" https://dns.example/dns-query").is_doh());
    }
}
