//! DNS-over-HTTPS transport (RFC 8484).
//!
//! Queries are sent as `POST` requests whose body is the wire-format DNS
//! message:
//!
//! ```text
//! POST /dns-query HTTP/2
//! Content-Type: application/dns-message
//! Accept: application/dns-message
//!
//! <raw DNS message bytes>
//! ```
//!
//! Two clients are built up front, one verifying TLS certificates and one
//! accepting any certificate. A query picks one by its `tls_verify` flag; the
//! clients themselves are never reconfigured.

use std::time::Duration;

use hickory_proto::op::Message;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::{DEFAULT_TIMEOUT, ExchangeContext};
use crate::error::ExchangeError;

const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";

/// Settings shared by both DoH clients.
#[derive(Debug, Clone)]
pub struct DohConfig {
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Honour `HTTP_PROXY`/`HTTPS_PROXY` from the environment.
    pub system_proxy: bool,
}

impl Default for DohConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            system_proxy: true,
        }
    }
}

/// DNS-over-HTTPS transport.
#[derive(Debug, Clone)]
pub struct DohTransport {
    verified: Client,
    insecure: Client,
}

impl DohTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_config(DohConfig::default())
    }

    pub fn with_config(config: DohConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            verified: build_client(&config, true)?,
            insecure: build_client(&config, false)?,
        })
    }

    fn client(&self, tls_verify: bool) -> &Client {
        if tls_verify {
            &self.verified
        } else {
            &self.insecure
        }
    }

    /// POST `query` to `url` and parse the response body.
    pub async fn query(
        &self,
        url: &str,
        query: &[u8],
        tls_verify: bool,
        ctx: &ExchangeContext,
    ) -> Result<Message, ExchangeError> {
        debug!(url = %url, message_len = query.len(), tls_verify, "Sending DoH query");

        let mut request = self
            .client(tls_verify)
            .post(url)
            .header(CONTENT_TYPE, DNS_MESSAGE_CONTENT_TYPE)
            .header(ACCEPT, DNS_MESSAGE_CONTENT_TYPE)
            .body(query.to_vec());
        if let Some(remaining) = ctx.remaining() {
            request = request.timeout(remaining);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExchangeError::transport(url, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ExchangeError::UpstreamStatus {
                upstream: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ExchangeError::transport(url, e))?;

        debug!(url = %url, response_len = body.len(), "DoH response received");

        Message::from_vec(&body)
            .map_err(|e| ExchangeError::Protocol(format!("invalid DoH response from {url}: {e}")))
    }
}

fn build_client(config: &DohConfig, tls_verify: bool) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .use_rustls_tls()
        .timeout(config.timeout)
        .danger_accept_invalid_certs(!tls_verify);
    if !config.system_proxy {
        builder = builder.no_proxy();
    }
    builder.build()
}
