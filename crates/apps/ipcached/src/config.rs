use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ipcache_proto::duration::serde_text;
use serde::{Deserialize, Serialize};

use crate::state::ConnectionPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Server settings, read from TOML and then overridden by command-line flags.
///
/// Durations are written the way the server announces them, e.g. `"10m"` or
/// `"1m30s"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub db: PathBuf,
    #[serde(with = "serde_text")]
    pub handshake_timeout: Duration,
    #[serde(with = "serde_text")]
    pub ping_keepalive: Duration,
    #[serde(with = "serde_text")]
    pub store_timeout: Duration,
    pub tls: TlsPaths,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsPaths {
    /// PEM chain presented to daemons, leaf first.
    pub cert_chain: PathBuf,
    pub private_key: PathBuf,
    /// PEM bundle of CAs allowed to issue daemon certificates.
    pub client_ca: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let policy = ConnectionPolicy::default();
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 4430)),
            db: PathBuf::from("ipcache.db"),
            handshake_timeout: policy.handshake_timeout,
            ping_keepalive: policy.ping_keepalive,
            store_timeout: Duration::from_secs(5),
            tls: TlsPaths::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml(&contents)
    }

    /// Checks what serde cannot: required paths are set and every timeout is
    /// non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("tls.cert_chain", &self.tls.cert_chain),
            ("tls.private_key", &self.tls.private_key),
            ("tls.client_ca", &self.tls.client_ca),
            ("db", &self.db),
        ];
        for (name, path) in required {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!("{name} is required")));
            }
        }
        let timeouts = [
            ("handshake_timeout", self.handshake_timeout),
            ("ping_keepalive", self.ping_keepalive),
            ("store_timeout", self.store_timeout),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }

    pub fn policy(&self) -> ConnectionPolicy {
        ConnectionPolicy {
            handshake_timeout: self.handshake_timeout,
            ping_keepalive: self.ping_keepalive,
        }
    }
}
