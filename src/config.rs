//! Configuration file handling.
//!
//! The configuration is a TOML document with a global `upstreams` list and an
//! optional list of `[[devices]]`, each binding client IPs to their own
//! upstream set. A missing file is replaced by [`DEFAULT_CONFIG_TEMPLATE`].

use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

/// Written to disk when the configuration file does not exist yet.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"upstreams = ["1.0.0.1", "8.8.8.8"]

# [[devices]]
# name = "example"
# ips = ["192.168.0.23", "192.168.2.11"]
# upstreams = ["1.0.0.2", "https://cloudflare-dns.com/dns-query"]
# tls-verify = true
"#;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to create default config file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Upstreams used for clients that match no device.
    #[serde(default)]
    pub upstreams: Vec<String>,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// A device entry as written in the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub ips: Vec<String>,

    #[serde(default)]
    pub upstreams: Vec<String>,

    /// Absent means verify.
    #[serde(default)]
    pub tls_verify: Option<bool>,
}

impl Config {
    /// Load the configuration at `path`, creating it from the default
    /// template first if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let shown = path.display().to_string();

        if !path.exists() {
            fs::write(path, DEFAULT_CONFIG_TEMPLATE).map_err(|source| ConfigError::Write {
                path: shown.clone(),
                source,
            })?;
            info!(path = %shown, "Created default configuration file");
        }

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: shown,
            source,
        })?;

        Self::parse(&contents)
    }

    /// Parse a configuration document.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }
}
