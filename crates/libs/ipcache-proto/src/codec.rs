//! Length-prefixed msgpack framing.
//!
//! A frame is a big-endian `u32` body length followed by the msgpack body.
//! The body is the envelope `[type, version, created_at, payload]`.

use rmp_serde::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::message::{Message, MessageKind, ProtocolVersion};

pub const FRAME_HEADER_LEN: usize = 4;

/// Largest accepted frame body.
pub const MAX_FRAME_LEN: usize = 1 << 20;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    kind: u8,
    version: u8,
    created_at: i64,
    #[serde(with = "serde_bytes")]
    payload: &'a [u8],
}

#[derive(Deserialize)]
struct Envelope {
    kind: u8,
    version: u8,
    created_at: i64,
    #[serde(with = "serde_bytes")]
    payload: Vec<u8>,
}

/// Encodes `msg` as one complete frame.
pub fn encode(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let envelope = EnvelopeRef {
        kind: msg.kind().as_u8(),
        version: msg.version().as_u8(),
        created_at: msg.created_at_unix_utc(),
        payload: msg.payload(),
    };
    // Reserve the length prefix and serialize straight into the frame.
    let mut framed = Vec::with_capacity(FRAME_HEADER_LEN + 16 + msg.payload().len());
    framed.extend_from_slice(&[0u8; FRAME_HEADER_LEN]);
    envelope
        .serialize(&mut Serializer::new(&mut framed))
        .map_err(|err| ProtocolError::Encode(err.to_string()))?;
    let body_len = framed.len() - FRAME_HEADER_LEN;
    if body_len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge { len: body_len, max: MAX_FRAME_LEN });
    }
    let len = u32::try_from(body_len)
        .map_err(|_| ProtocolError::FrameTooLarge { len: body_len, max: MAX_FRAME_LEN })?;
    framed[..FRAME_HEADER_LEN].copy_from_slice(&len.to_be_bytes());
    Ok(framed)
}

/// Decodes one complete frame produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Message, ProtocolError> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(ProtocolError::Truncated("missing frame header"));
    }
    let mut header = [0u8; FRAME_HEADER_LEN];
    header.copy_from_slice(&bytes[..FRAME_HEADER_LEN]);
    let len = body_len(header)?;
    let body = bytes
        .get(FRAME_HEADER_LEN..FRAME_HEADER_LEN + len)
        .ok_or(ProtocolError::Truncated("incomplete frame body"))?;
    decode_body(body)
}

/// Validates a frame header and returns the body length it announces.
pub fn body_len(header: [u8; FRAME_HEADER_LEN]) -> Result<usize, ProtocolError> {
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge { len, max: MAX_FRAME_LEN });
    }
    Ok(len)
}

/// Decodes a frame body, the bytes following the length prefix.
pub fn decode_body(body: &[u8]) -> Result<Message, ProtocolError> {
    let envelope: Envelope =
        rmp_serde::from_slice(body).map_err(|err| ProtocolError::Decode(err.to_string()))?;
    let kind = MessageKind::try_from(envelope.kind)?;
    let version = ProtocolVersion::try_from(envelope.version)?;
    Ok(Message::from_parts(kind, version, envelope.created_at, envelope.payload))
}
