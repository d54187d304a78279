//! Error types for the proxy.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::ConfigError;

/// Failure of a single upstream attempt or of a whole exchange.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("no upstreams provided")]
    NoUpstreams,

    #[error("transport failure for {upstream}: {reason}")]
    Transport { upstream: String, reason: String },

    #[error("protocol failure: {0}")]
    Protocol(String),

    #[error("{upstream} returned HTTP status {status}")]
    UpstreamStatus { upstream: String, status: u16 },

    #[error("all upstreams failed{}", describe_last(.last))]
    AllUpstreamsFailed { last: Option<Box<ExchangeError>> },

    #[error("exchange cancelled before any upstream answered")]
    Cancelled,
}

impl ExchangeError {
    pub(crate) fn transport(upstream: &str, reason: impl ToString) -> Self {
        Self::Transport {
            upstream: upstream.to_string(),
            reason: reason.to_string(),
        }
    }
}

fn describe_last(last: &Option<Box<ExchangeError>>) -> String {
    match last {
        Some(err) => format!(", last error: {err}"),
        None => String::new(),
    }
}

/// Errors raised by the listening side of the proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("cannot determine client address: {0}")]
    ClientAddressUnresolvable(#[source] io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
