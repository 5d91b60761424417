//! Per-connection state machine.
//!
//! ```text
//! Connecting -> Handshaking -> Identifying -> Dispatching -> Closed
//! ```
//!
//! Any failure jumps straight to `Closed`. Whatever the path, closing
//! releases the connection's active-set entry, but only if that entry still
//! points at this connection's IP.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use ipcache_proto::payload::from_payload;
use ipcache_proto::{
    format_duration, AuthorizationRequest, IpLookupEntry, IpLookupReply, IpLookupRequest, Message,
    MessageKind, Messenger, MessengerError, ProtocolError,
};
use ipcache_registry::{AuthorizationType, Claim, StoreError};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use crate::identity::{self, IdentityError, Principal};
use crate::state::ServerState;

/// Upper bound on the close_notify exchange once a connection is done.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

type ServerMessenger = Messenger<TlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Handshaking,
    Identifying,
    Dispatching,
    Closed,
}

/// Which deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Handshake,
    /// Waiting for the first message after identification.
    Registration,
    /// A registered peer stopped pinging.
    Keepalive,
    /// Writing a reply.
    Reply,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Handshake => "handshake",
            Self::Registration => "registration",
            Self::Keepalive => "keepalive",
            Self::Reply => "reply",
        })
    }
}

/// Why a connection ended abnormally. A peer hanging up is not an error.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("tls handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("{phase} deadline elapsed")]
    Timeout { phase: Phase },

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("principal {principal_id} is already registered from {ip}")]
    DuplicateRegistration { principal_id: String, ip: IpAddr },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("transport error: {0}")]
    Io(#[source] io::Error),
}

impl ConnectionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Holds a principal's active-set entry for as long as the connection that
/// claimed it is alive.
struct ActiveLease {
    shared: Arc<ServerState>,
    principal_id: String,
    ip: IpAddr,
}

impl Drop for ActiveLease {
    fn drop(&mut self) {
        if self.shared.active.release(&self.principal_id, self.ip) {
            debug!("released active entry for {} at {}", self.principal_id, self.ip);
        } else {
            debug!(
                "active entry for {} no longer points at {}; left in place",
                self.principal_id, self.ip
            );
        }
    }
}

pub struct Connection {
    shared: Arc<ServerState>,
    peer_addr: SocketAddr,
    state: ConnectionState,
    lease: Option<ActiveLease>,
}

impl Connection {
    pub fn new(shared: Arc<ServerState>, peer_addr: SocketAddr) -> Self {
        Self { shared, peer_addr, state: ConnectionState::Connecting, lease: None }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Drives the connection from handshake to close. `Ok` means the peer
    /// hung up cleanly.
    pub async fn serve(
        mut self,
        acceptor: &TlsAcceptor,
        tcp: TcpStream,
    ) -> Result<(), ConnectionError> {
        let result = self.drive(acceptor, tcp).await;
        self.close();
        result
    }

    async fn drive(
        &mut self,
        acceptor: &TlsAcceptor,
        tcp: TcpStream,
    ) -> Result<(), ConnectionError> {
        self.transition(ConnectionState::Handshaking);
        let handshake_timeout = self.shared.policy.handshake_timeout;
        let stream = match tokio::time::timeout(handshake_timeout, acceptor.accept(tcp)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(ConnectionError::Handshake(err)),
            Err(_) => return Err(ConnectionError::Timeout { phase: Phase::Handshake }),
        };

        self.transition(ConnectionState::Identifying);
        let principal = identity::resolve(&stream)?;
        info!("peer {} identified as {} ({})", self.peer_addr, principal.id, principal.ip);

        let mut messenger = Messenger::new(stream);
        messenger.set_read_timeout(handshake_timeout);
        self.transition(ConnectionState::Dispatching);
        let result = self.dispatch(&mut messenger, &principal).await;

        match tokio::time::timeout(SHUTDOWN_GRACE, messenger.shutdown()).await {
            Ok(Err(err)) => debug!("shutdown of {} failed: {err}", self.peer_addr),
            Err(_) => debug!("shutdown of {} timed out", self.peer_addr),
            Ok(Ok(())) => {}
        }
        result
    }

    async fn dispatch(
        &mut self,
        messenger: &mut ServerMessenger,
        principal: &Principal,
    ) -> Result<(), ConnectionError> {
        loop {
            let msg = match messenger.receive().await {
                Ok(msg) => msg,
                Err(MessengerError::Closed) => {
                    info!("{} ({}) disconnected", principal.id, principal.ip);
                    return Ok(());
                }
                Err(err) => return Err(self.messenger_error(err)),
            };
            debug!("{} sent {msg}", principal.id);

            match msg.kind() {
                MessageKind::String => {
                    info!("{} says: {}", principal.id, String::from_utf8_lossy(msg.payload()));
                }
                MessageKind::ClientRegister => self.register(messenger, principal, &msg).await?,
                MessageKind::Ping => {
                    messenger.set_read_timeout(self.shared.policy.ping_keepalive);
                }
                MessageKind::ClientGrantAuthorization => {
                    self.update_grant(messenger, principal, &msg, true).await?;
                }
                MessageKind::ClientRevokeAuthorization => {
                    self.update_grant(messenger, principal, &msg, false).await?;
                }
                MessageKind::ClientGetIps => self.lookup_ips(messenger, principal, &msg).await?,
                other => {
                    warn!("{} sent unhandled {} message", principal.id, other.name());
                    return Err(ProtocolError::Unexpected(other.name()).into());
                }
            }
        }
    }

    async fn register(
        &mut self,
        messenger: &mut ServerMessenger,
        principal: &Principal,
        msg: &Message,
    ) -> Result<(), ConnectionError> {
        if self.lease.is_some() {
            return Err(ProtocolError::Unexpected("repeated ClientRegister").into());
        }

        match self.shared.active.claim(&principal.id, principal.ip) {
            Claim::Duplicate => {
                warn!("{} is already registered from {}; rejecting", principal.id, principal.ip);
                let reason = format!(
                    "principal {} is already registered from {}",
                    principal.id, principal.ip
                );
                self.reply(messenger, &Message::err(reason)).await?;
                return Err(ConnectionError::DuplicateRegistration {
                    principal_id: principal.id.clone(),
                    ip: principal.ip,
                });
            }
            Claim::TookOver { previous } => {
                info!("{} moved from {previous} to {}", principal.id, principal.ip);
            }
            Claim::Registered => {}
        }
        self.lease = Some(ActiveLease {
            shared: Arc::clone(&self.shared),
            principal_id: principal.id.clone(),
            ip: principal.ip,
        });

        let outcome = self
            .shared
            .registry
            .record_registration(&principal.id, msg.created_at_unix_utc(), principal.ip)
            .await?;
        if !outcome.applied {
            warn!(
                "registration of {} at {} is older than the stored one ({} at {})",
                principal.id,
                msg.created_at_unix_utc(),
                outcome.stored.ip,
                outcome.stored.last_seen_unix_utc
            );
        }

        let keepalive = self.shared.policy.ping_keepalive;
        self.reply(messenger, &Message::string(format_duration(keepalive))).await?;
        messenger.set_read_timeout(keepalive);
        info!(
            "{} registered from {}; keepalive {}",
            principal.id,
            principal.ip,
            format_duration(keepalive)
        );
        Ok(())
    }

    async fn update_grant(
        &mut self,
        messenger: &mut ServerMessenger,
        principal: &Principal,
        msg: &Message,
        grant: bool,
    ) -> Result<(), ConnectionError> {
        let request: AuthorizationRequest = from_payload(msg)?;
        let capability = match AuthorizationType::try_from(request.capability) {
            Ok(capability) => capability,
            Err(err) => {
                warn!("{} sent {}: {err}", principal.id, msg.kind().name());
                return self.reply(messenger, &Message::err(err.to_string())).await;
            }
        };

        let registry = &self.shared.registry;
        if grant {
            registry.grant_authorization(&principal.id, &request.other, capability).await?;
            info!("{} granted {capability} to {}", principal.id, request.other);
        } else {
            let removed =
                registry.revoke_authorization(&principal.id, &request.other, capability).await?;
            info!(
                "{} revoked {capability} from {}{}",
                principal.id,
                request.other,
                if removed { "" } else { " (no grant existed)" }
            );
        }
        self.reply(messenger, &Message::ok()).await
    }

    async fn lookup_ips(
        &mut self,
        messenger: &mut ServerMessenger,
        principal: &Principal,
        msg: &Message,
    ) -> Result<(), ConnectionError> {
        let request: IpLookupRequest = from_payload(msg)?;
        let mut reply = IpLookupReply::default();
        for owner in request.owners {
            if let Some(ip) = self.shared.registry.lookup_authorized(&principal.id, &owner).await? {
                reply.entries.push(IpLookupEntry { principal_id: owner, ip: ip.to_string() });
            }
        }
        debug!("{} looked up {} visible owners", principal.id, reply.entries.len());
        self.reply(messenger, &reply.into_message()?).await
    }

    /// Sends `msg` under a fresh write deadline. A peer that stops reading
    /// gets no more time than a silent one.
    async fn reply(
        &self,
        messenger: &mut ServerMessenger,
        msg: &Message,
    ) -> Result<(), ConnectionError> {
        messenger.set_write_timeout(self.reply_timeout());
        messenger.send(msg).await.map_err(|err| self.messenger_error(err))
    }

    fn reply_timeout(&self) -> Duration {
        if self.lease.is_some() {
            self.shared.policy.ping_keepalive
        } else {
            self.shared.policy.handshake_timeout
        }
    }

    fn messenger_error(&self, err: MessengerError) -> ConnectionError {
        match err {
            MessengerError::Timeout { operation: "write" } => {
                ConnectionError::Timeout { phase: Phase::Reply }
            }
            MessengerError::Timeout { .. } if self.lease.is_some() => {
                ConnectionError::Timeout { phase: Phase::Keepalive }
            }
            MessengerError::Timeout { .. } => {
                ConnectionError::Timeout { phase: Phase::Registration }
            }
            MessengerError::Protocol(err) => ConnectionError::Protocol(err),
            MessengerError::Io(err) => ConnectionError::Io(err),
            MessengerError::Closed => {
                ConnectionError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed"))
            }
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!("{}: {:?} -> {:?}", self.peer_addr, self.state, next);
        self.state = next;
    }

    fn close(&mut self) {
        self.lease.take();
        self.transition(ConnectionState::Closed);
    }
}
