use std::time::Duration;

use ipcache_registry::{ActiveDaemons, Registry};

/// Timeouts every connection runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionPolicy {
    /// Bounds the TLS handshake, and the wait for the first registration or
    /// ping once the peer is identified.
    pub handshake_timeout: Duration,
    /// Announced to registered peers; a registered connection silent for
    /// longer than this is closed.
    pub ping_keepalive: Duration,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            ping_keepalive: Duration::from_secs(10 * 60),
        }
    }
}

/// State shared by every connection of one server instance.
pub struct ServerState {
    pub registry: Registry,
    pub active: ActiveDaemons,
    pub policy: ConnectionPolicy,
}

impl ServerState {
    pub fn new(registry: Registry, policy: ConnectionPolicy) -> Self {
        Self { registry, active: ActiveDaemons::new(), policy }
    }
}
