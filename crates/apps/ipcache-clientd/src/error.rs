use std::io;

use ipcache_proto::{DurationError, MessengerError, ProtocolError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connecting to {addr} timed out")]
    ConnectTimeout { addr: String },

    #[error("invalid server name {0:?}")]
    InvalidServerName(String),

    #[error("tls handshake with {addr} failed: {source}")]
    Handshake {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Messenger(#[from] MessengerError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The server answered with an `Err` message.
    #[error("server rejected request: {0}")]
    Rejected(String),

    #[error("unexpected {0} reply")]
    UnexpectedReply(&'static str),

    #[error("server announced an unusable keepalive interval: {0}")]
    Interval(#[from] DurationError),

    #[error("server announced a zero keepalive interval")]
    ZeroInterval,
}

impl ClientError {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}
