//! Devroute - a device aware DNS proxy.
//!
//! Queries are routed by client IP to a per-device upstream set and raced
//! across every upstream in that set, classic DNS and DNS-over-HTTPS alike.

pub mod config;
pub mod device;
pub mod dns;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod router;
pub mod stats;
pub mod transport;
pub mod upstream;
