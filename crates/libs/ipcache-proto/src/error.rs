use std::io;

/// A malformed or unrecognized message on the wire.
///
/// Always fatal to the connection that produced it.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProtocolError {
    #[error("unknown message type {0}")]
    UnknownKind(u8),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("incomplete frame: {0}")]
    Truncated(&'static str),

    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("failed to decode message: {0}")]
    Decode(String),

    #[error("payload of {kind} message is not valid UTF-8")]
    InvalidText { kind: &'static str },

    #[error("unexpected {0} message")]
    Unexpected(&'static str),
}

/// Errors surfaced by [`crate::Messenger`].
///
/// `Closed` and `Timeout` are kept apart: a peer hanging up is a normal
/// shutdown, an expired deadline is not.
#[derive(Debug, thiserror::Error)]
pub enum MessengerError {
    #[error("connection closed by peer")]
    Closed,

    #[error("{operation} deadline elapsed")]
    Timeout { operation: &'static str },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl MessengerError {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,

    #[error("negative duration {0:?}")]
    Negative(String),

    #[error("invalid duration {0:?}")]
    Invalid(String),

    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),

    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },

    #[error("duration {0:?} overflows")]
    Overflow(String),
}
