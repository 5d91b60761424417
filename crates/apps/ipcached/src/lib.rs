//! The ipcache directory server.
//!
//! Daemons connect over mutual TLS, are identified by the subject key
//! identifier of their client certificate, register their current IP and
//! keep the registration alive with periodic pings. Each accepted connection
//! runs its own [`connection::Connection`] state machine; all of them share
//! one [`state::ServerState`].

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod identity;
pub mod state;
pub mod tls;

pub use config::{ConfigError, ServerConfig, TlsPaths};
pub use connection::{Connection, ConnectionError, ConnectionState, Phase};
pub use dispatch::DispatchServer;
pub use identity::{IdentityError, Principal};
pub use state::{ConnectionPolicy, ServerState};
