//! Client side of the ipcache protocol.
//!
//! A daemon connects with its client certificate, registers, and then pings
//! at three quarters of the interval the server announced. The same
//! connection can carry authorization changes and IP lookups.

pub mod error;
pub mod session;
pub mod tls;

pub use error::ClientError;
pub use session::{
    connect, grant_authorization, keepalive, lookup_ips, ping_period, register,
    revoke_authorization, run_session, say, ClientMessenger, DaemonOptions,
};
pub use tls::{build_client_config, ClientTlsPaths};
