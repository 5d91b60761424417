//! Typed payloads carried inside the opaque message payload.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::message::{Message, MessageKind};

/// Capability code letting the grantee look up the owner's IP.
pub const GET_IP_CAPABILITY: i64 = 0;

/// Body of `ClientGrantAuthorization` and `ClientRevokeAuthorization`.
///
/// The owner is always the sender; `capability` is the numeric
/// authorization type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub other: String,
    pub capability: i64,
}

/// Body of `ClientGetIPs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpLookupRequest {
    pub owners: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpLookupEntry {
    pub principal_id: String,
    pub ip: String,
}

/// Body of the `Ok` reply to `ClientGetIPs`. Owners the caller may not
/// see, or that never registered, are left out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpLookupReply {
    pub entries: Vec<IpLookupEntry>,
}

impl AuthorizationRequest {
    pub fn grant(self) -> Result<Message, ProtocolError> {
        Ok(Message::new(MessageKind::ClientGrantAuthorization, to_payload(&self)?))
    }

    pub fn revoke(self) -> Result<Message, ProtocolError> {
        Ok(Message::new(MessageKind::ClientRevokeAuthorization, to_payload(&self)?))
    }
}

impl IpLookupRequest {
    pub fn into_message(self) -> Result<Message, ProtocolError> {
        Ok(Message::new(MessageKind::ClientGetIps, to_payload(&self)?))
    }
}

impl IpLookupReply {
    pub fn into_message(self) -> Result<Message, ProtocolError> {
        Ok(Message::ok_with(to_payload(&self)?))
    }
}

pub fn to_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    rmp_serde::to_vec(value).map_err(|err| ProtocolError::Encode(err.to_string()))
}

pub fn from_payload<T: DeserializeOwned>(msg: &Message) -> Result<T, ProtocolError> {
    rmp_serde::from_slice(msg.payload()).map_err(|err| ProtocolError::Decode(err.to_string()))
}
