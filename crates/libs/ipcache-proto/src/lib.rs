//! Wire protocol for the ipcache directory service.
//!
//! Long-running daemons authenticate to the ipcache server with TLS client
//! certificates and exchange [`Message`] envelopes over the resulting stream.
//! This crate provides:
//!
//! - **[`Message`]** and the closed [`MessageKind`] registry
//! - **[`codec`]**: length-prefixed msgpack frames (`encode`/`decode`)
//! - **[`Messenger`]**: buffered framed transport with independent read and
//!   write deadlines
//! - **[`duration`]**: the text format used to announce keepalive intervals
//! - **[`tls`]**: PEM loading shared by the server and the client daemon

pub mod codec;
pub mod duration;
pub mod error;
pub mod message;
pub mod messenger;
pub mod payload;
pub mod tls;

pub use codec::{decode, encode, MAX_FRAME_LEN};
pub use duration::{format_duration, parse_duration};
pub use error::{DurationError, MessengerError, ProtocolError};
pub use message::{Message, MessageKind, ProtocolVersion};
pub use messenger::Messenger;
pub use payload::{
    AuthorizationRequest, IpLookupEntry, IpLookupReply, IpLookupRequest, GET_IP_CAPABILITY,
};
