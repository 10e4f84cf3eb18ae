//! Server configuration
//!
//! Everything has a default, so an empty TOML file (or none at all) yields a
//! plain-text server on port 2525.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::smtp::error::SmtpLimits;

pub const DEFAULT_PORT: u16 = 2525;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unable to load {what} from {}: {reason}", path.display())]
    Certificate {
        what: &'static str,
        path: PathBuf,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name announced in the greeting and HELO/EHLO replies
    pub hostname: String,
    pub bind_address: IpAddr,
    pub port: u16,
    /// Seconds a session may sit idle before it is closed; 0 disables
    pub idle_timeout_secs: Option<u64>,
    /// Live sessions allowed at once; extra connections are turned away
    pub max_connections: Option<usize>,
    /// Largest accepted message body in bytes
    pub max_message_size: usize,
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "pigeonhole.local".to_string(),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            idle_timeout_secs: Some(300),
            max_connections: Some(100),
            max_message_size: SmtpLimits::MAX_DATA_SIZE,
            tls: None,
        }
    }
}

impl ServerConfig {
    /// Load a configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// When the TLS handshake happens
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Handshake as soon as the connection is accepted
    Implicit,
    /// Plain connection, upgraded when the client sends STARTTLS
    #[default]
    StartTls,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TlsConfig {
    /// PEM file holding the certificate chain
    pub certificate: PathBuf,
    /// PEM file holding the private key
    pub key: PathBuf,
    #[serde(default)]
    pub mode: TlsMode,
    /// Protocol versions that may be negotiated, e.g. `["TLSv1.2"]`.
    ///
    /// Leaving this empty enables every version the TLS library supports.
    /// That is the permissive choice, and it is logged as a warning when the
    /// server starts.
    #[serde(default)]
    pub protocols: Vec<String>,
}
