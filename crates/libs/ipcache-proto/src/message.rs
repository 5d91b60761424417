use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ProtocolError;

/// Message types understood by the protocol.
///
/// Discriminants are the on-wire type byte and must never be reused.
/// Daemons and interactive clients register with the same
/// [`MessageKind::ClientRegister`] type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Ok = 0,
    Err = 1,
    String = 2,
    Ping = 3,
    Pong = 4,
    ClientRegister = 5,
    ClientGetIps = 6,
    ClientGrantAuthorization = 7,
    ClientRevokeAuthorization = 8,
}

impl MessageKind {
    pub const ALL: [MessageKind; 9] = [
        Self::Ok,
        Self::Err,
        Self::String,
        Self::Ping,
        Self::Pong,
        Self::ClientRegister,
        Self::ClientGetIps,
        Self::ClientGrantAuthorization,
        Self::ClientRevokeAuthorization,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ok => "Ok",
            Self::Err => "Err",
            Self::String => "String",
            Self::Ping => "Ping",
            Self::Pong => "Pong",
            Self::ClientRegister => "ClientRegister",
            Self::ClientGetIps => "ClientGetIPs",
            Self::ClientGrantAuthorization => "ClientGrantAuthorization",
            Self::ClientRevokeAuthorization => "ClientRevokeAuthorization",
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_u8() == value)
            .ok_or(ProtocolError::UnknownKind(value))
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ProtocolVersion {
    V1_0_0 = 0,
}

impl ProtocolVersion {
    pub const CURRENT: ProtocolVersion = ProtocolVersion::V1_0_0;

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::V1_0_0),
            other => Err(ProtocolError::UnsupportedVersion(other)),
        }
    }
}

/// Width of the type, version and timestamp fields.
const FIXED_FIELDS_LEN: usize = 1 + 1 + 8;

/// The protocol envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageKind,
    version: ProtocolVersion,
    created_at_unix_utc: i64,
    payload: Vec<u8>,
}

impl Message {
    /// Builds a message stamped with the current UTC time.
    pub fn new(kind: MessageKind, payload: Vec<u8>) -> Self {
        Self::with_timestamp(kind, unix_now(), payload)
    }

    pub fn with_timestamp(kind: MessageKind, created_at_unix_utc: i64, payload: Vec<u8>) -> Self {
        Self { kind, version: ProtocolVersion::CURRENT, created_at_unix_utc, payload }
    }

    pub(crate) fn from_parts(
        kind: MessageKind,
        version: ProtocolVersion,
        created_at_unix_utc: i64,
        payload: Vec<u8>,
    ) -> Self {
        Self { kind, version, created_at_unix_utc, payload }
    }

    pub fn ok() -> Self {
        Self::new(MessageKind::Ok, Vec::new())
    }

    pub fn ok_with(payload: Vec<u8>) -> Self {
        Self::new(MessageKind::Ok, payload)
    }

    pub fn err(reason: impl Into<String>) -> Self {
        Self::new(MessageKind::Err, reason.into().into_bytes())
    }

    pub fn string(text: impl Into<String>) -> Self {
        Self::new(MessageKind::String, text.into().into_bytes())
    }

    pub fn ping() -> Self {
        Self::new(MessageKind::Ping, Vec::new())
    }

    pub fn pong() -> Self {
        Self::new(MessageKind::Pong, Vec::new())
    }

    pub fn client_register() -> Self {
        Self::new(MessageKind::ClientRegister, Vec::new())
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn created_at_unix_utc(&self) -> i64 {
        self.created_at_unix_utc
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Payload interpreted as UTF-8 text, for `String` and `Err` messages.
    pub fn text(&self) -> Result<&str, ProtocolError> {
        std::str::from_utf8(&self.payload)
            .map_err(|_| ProtocolError::InvalidText { kind: self.kind.name() })
    }

    /// Sum of the fixed field widths and the payload length.
    ///
    /// Diagnostic only; framing never relies on it.
    pub fn size(&self) -> usize {
        FIXED_FIELDS_LEN + self.payload.len()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (v{}, ts={}, {} payload bytes)",
            self.kind,
            self.version.as_u8(),
            self.created_at_unix_utc,
            self.payload.len()
        )
    }
}

pub(crate) fn unix_now() -> i64 {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    i64::try_from(secs).unwrap_or(i64::MAX)
}
