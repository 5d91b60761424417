use std::sync::Arc;
use std::time::Duration;

use ipcache_proto::payload::from_payload;
use ipcache_proto::{
    format_duration, parse_duration, AuthorizationRequest, IpLookupEntry, IpLookupReply,
    IpLookupRequest, Message, MessageKind, Messenger, MessengerError,
};
use log::{debug, info};
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::ClientError;

pub type ClientMessenger = Messenger<TlsStream<TcpStream>>;

/// Everything a daemon needs to hold one session with the server.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    /// `host:port` of the server.
    pub server_addr: String,
    /// Name checked against the server certificate.
    pub server_name: String,
    pub tls: Arc<rustls::ClientConfig>,
    /// Bounds connecting, and each request's wait for its reply.
    pub request_timeout: Duration,
}

/// Opens a TCP connection and completes the TLS handshake, each step bounded
/// by `timeout`.
pub async fn connect(
    addr: &str,
    server_name: &str,
    tls: Arc<rustls::ClientConfig>,
    timeout: Duration,
) -> Result<ClientMessenger, ClientError> {
    let name = ServerName::try_from(server_name.to_string())
        .map_err(|_| ClientError::InvalidServerName(server_name.to_string()))?;

    let tcp = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ClientError::ConnectTimeout { addr: addr.to_string() })?
        .map_err(|source| ClientError::Connect { addr: addr.to_string(), source })?;
    if let Err(err) = tcp.set_nodelay(true) {
        debug!("set_nodelay failed: {err}");
    }

    let stream = tokio::time::timeout(timeout, TlsConnector::from(tls).connect(name, tcp))
        .await
        .map_err(|_| ClientError::ConnectTimeout { addr: addr.to_string() })?
        .map_err(|source| ClientError::Handshake { addr: addr.to_string(), source })?;
    Ok(Messenger::new(stream))
}

/// Registers this daemon and returns the keepalive interval the server
/// announced.
pub async fn register<S>(
    messenger: &mut Messenger<S>,
    reply_timeout: Duration,
) -> Result<Duration, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let reply = request(messenger, &Message::client_register(), reply_timeout).await?;
    if reply.kind() != MessageKind::String {
        return Err(ClientError::UnexpectedReply(reply.kind().name()));
    }
    let interval = parse_duration(reply.text()?)?;
    if interval.is_zero() {
        return Err(ClientError::ZeroInterval);
    }
    Ok(interval)
}

/// How long to wait between pings for a given keepalive interval.
pub fn ping_period(interval: Duration) -> Duration {
    interval * 3 / 4
}

/// Pings until the connection fails. Each ping must be written within
/// `interval`.
///
/// The server sends nothing unsolicited once registered, so the read side is
/// only watched for the server hanging up, which ends the loop with `Ok`.
pub async fn keepalive<S>(
    messenger: &mut Messenger<S>,
    interval: Duration,
) -> Result<(), ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let period = ping_period(interval);
    messenger.set_read_deadline(None);
    loop {
        messenger.set_write_timeout(interval);
        messenger.send(&Message::ping()).await?;
        debug!("ping sent; next in {}", format_duration(period));

        tokio::select! {
            () = tokio::time::sleep(period) => {}
            received = messenger.receive() => {
                return match received {
                    Err(MessengerError::Closed) => Ok(()),
                    Err(err) => Err(err.into()),
                    Ok(msg) => Err(ClientError::UnexpectedReply(msg.kind().name())),
                };
            }
        }
    }
}

/// Grants `other` the capability `capability` over this daemon's data.
pub async fn grant_authorization<S>(
    messenger: &mut Messenger<S>,
    other: &str,
    capability: i64,
    reply_timeout: Duration,
) -> Result<(), ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let msg = AuthorizationRequest { other: other.to_string(), capability }.grant()?;
    expect_ok(request(messenger, &msg, reply_timeout).await?)
}

pub async fn revoke_authorization<S>(
    messenger: &mut Messenger<S>,
    other: &str,
    capability: i64,
    reply_timeout: Duration,
) -> Result<(), ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let msg = AuthorizationRequest { other: other.to_string(), capability }.revoke()?;
    expect_ok(request(messenger, &msg, reply_timeout).await?)
}

/// IPs of the requested owners that this daemon is allowed to see.
pub async fn lookup_ips<S>(
    messenger: &mut Messenger<S>,
    owners: Vec<String>,
    reply_timeout: Duration,
) -> Result<Vec<IpLookupEntry>, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let msg = IpLookupRequest { owners }.into_message()?;
    let reply = request(messenger, &msg, reply_timeout).await?;
    if reply.kind() != MessageKind::Ok {
        return Err(ClientError::UnexpectedReply(reply.kind().name()));
    }
    let body: IpLookupReply = from_payload(&reply)?;
    Ok(body.entries)
}

/// Sends a line of text for the server to log. There is no reply.
pub async fn say<S>(messenger: &mut Messenger<S>, text: &str) -> Result<(), ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    messenger.send(&Message::string(text)).await?;
    Ok(())
}

/// One daemon session: connect, register, ping until the connection ends.
///
/// `Ok` means the server closed the connection; the caller decides whether
/// to start a new session.
pub async fn run_session(options: &DaemonOptions) -> Result<(), ClientError> {
    let mut messenger = connect(
        &options.server_addr,
        &options.server_name,
        Arc::clone(&options.tls),
        options.request_timeout,
    )
    .await?;
    let interval = register(&mut messenger, options.request_timeout).await?;
    info!(
        "registered with {}; pinging every {}",
        options.server_addr,
        format_duration(ping_period(interval))
    );
    keepalive(&mut messenger, interval).await
}

/// Sends `msg` and waits for one reply, with both directions bounded by
/// `reply_timeout`. Deadlines are cleared again whatever the outcome.
async fn request<S>(
    messenger: &mut Messenger<S>,
    msg: &Message,
    reply_timeout: Duration,
) -> Result<Message, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    messenger.set_timeout(reply_timeout);
    let result = match messenger.send(msg).await {
        Ok(()) => messenger.receive().await,
        Err(err) => Err(err),
    };
    messenger.set_read_deadline(None);
    messenger.set_write_deadline(None);

    let reply = result?;
    if reply.kind() == MessageKind::Err {
        return Err(ClientError::Rejected(String::from_utf8_lossy(reply.payload()).into_owned()));
    }
    Ok(reply)
}

fn expect_ok(reply: Message) -> Result<(), ClientError> {
    match reply.kind() {
        MessageKind::Ok => Ok(()),
        other => Err(ClientError::UnexpectedReply(other.name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipcache_proto::payload::to_payload;
    use tokio::io::DuplexStream;
    use tokio::time::Instant;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn pair() -> (Messenger<DuplexStream>, Messenger<DuplexStream>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        (Messenger::new(client), Messenger::new(server))
    }

    #[tokio::test]
    async fn register_parses_announced_interval_and_clears_deadlines() {
        let (mut client, mut server) = pair();
        let fake = tokio::spawn(async move {
            let msg = server.receive().await.expect("register");
            assert_eq!(msg.kind(), MessageKind::ClientRegister);
            server.send(&Message::string("10m0s")).await.expect("reply");
            server
        });

        let interval = register(&mut client, TIMEOUT).await.expect("register");
        assert_eq!(interval, Duration::from_secs(600));
        assert_eq!(client.read_deadline(), None);
        assert_eq!(client.write_deadline(), None);
        fake.await.expect("join");
    }

    #[tokio::test]
    async fn register_surfaces_err_reply_as_rejection() {
        let (mut client, mut server) = pair();
        let fake = tokio::spawn(async move {
            server.receive().await.expect("register");
            server.send(&Message::err("already registered")).await.expect("reply");
            server
        });

        let err = register(&mut client, TIMEOUT).await.expect_err("rejected");
        assert!(err.is_rejected());
        assert!(err.to_string().contains("already registered"));
        fake.await.expect("join");
    }

    #[tokio::test]
    async fn register_rejects_unparsable_or_zero_interval() {
        for (announced, zero) in [("soon", false), ("0s", true)] {
            let (mut client, mut server) = pair();
            let fake = tokio::spawn(async move {
                server.receive().await.expect("register");
                server.send(&Message::string(announced)).await.expect("reply");
                server
            });
            let err = register(&mut client, TIMEOUT).await.expect_err("bad interval");
            assert_eq!(matches!(err, ClientError::ZeroInterval), zero, "{err}");
            assert_eq!(matches!(err, ClientError::Interval(_)), !zero, "{err}");
            fake.await.expect("join");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn register_times_out_when_server_is_silent() {
        let (mut client, mut server) = pair();
        let fake = tokio::spawn(async move {
            server.receive().await.expect("register");
            server
        });
        let err = register(&mut client, Duration::from_millis(200)).await.expect_err("silent");
        assert!(matches!(err, ClientError::Messenger(ref inner) if inner.is_timeout()), "{err}");
        fake.await.expect("join");
    }

    #[test]
    fn pings_at_three_quarters_of_the_interval() {
        assert_eq!(ping_period(Duration::from_secs(600)), Duration::from_secs(450));
        assert_eq!(ping_period(Duration::from_millis(200)), Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_pings_on_schedule_and_stops_when_server_hangs_up() {
        let (mut client, mut server) = pair();
        let interval = Duration::from_secs(4);
        let started = Instant::now();
        let fake = tokio::spawn(async move {
            let mut arrivals = Vec::new();
            for _ in 0..3 {
                let msg = server.receive().await.expect("ping");
                assert_eq!(msg.kind(), MessageKind::Ping);
                arrivals.push(started.elapsed());
            }
            drop(server);
            arrivals
        });

        keepalive(&mut client, interval).await.expect("clean close");
        let arrivals = fake.await.expect("join");
        assert_eq!(
            arrivals,
            vec![Duration::ZERO, Duration::from_secs(3), Duration::from_secs(6)]
        );
    }

    #[tokio::test]
    async fn keepalive_treats_unsolicited_message_as_error() {
        let (mut client, mut server) = pair();
        let fake = tokio::spawn(async move {
            server.receive().await.expect("ping");
            server.send(&Message::pong()).await.expect("pong");
            server
        });

        let err = keepalive(&mut client, Duration::from_secs(60)).await.expect_err("pong");
        assert!(matches!(err, ClientError::UnexpectedReply("Pong")), "{err}");
        fake.await.expect("join");
    }

    #[tokio::test]
    async fn grant_revoke_and_lookup_round_trip_through_server() {
        let (mut client, mut server) = pair();
        let fake = tokio::spawn(async move {
            let grant = server.receive().await.expect("grant");
            assert_eq!(grant.kind(), MessageKind::ClientGrantAuthorization);
            let body: AuthorizationRequest = from_payload(&grant).expect("grant body");
            assert_eq!(body, AuthorizationRequest { other: "bob".into(), capability: 0 });
            server.send(&Message::ok()).await.expect("ok");

            let revoke = server.receive().await.expect("revoke");
            assert_eq!(revoke.kind(), MessageKind::ClientRevokeAuthorization);
            server.send(&Message::err("unknown authorization type 7")).await.expect("err");

            let lookup = server.receive().await.expect("lookup");
            let body: IpLookupRequest = from_payload(&lookup).expect("lookup body");
            assert_eq!(body.owners, vec!["alice".to_string(), "carol".to_string()]);
            let entry = IpLookupEntry { principal_id: "alice".into(), ip: "192.0.2.1".into() };
            let reply = IpLookupReply { entries: vec![entry] };
            let payload = to_payload(&reply).expect("encode");
            server.send(&Message::ok_with(payload)).await.expect("reply");
            server
        });

        grant_authorization(&mut client, "bob", 0, TIMEOUT).await.expect("grant");
        let err = revoke_authorization(&mut client, "bob", 7, TIMEOUT).await.expect_err("revoke");
        assert!(err.is_rejected());
        let entries = lookup_ips(&mut client, vec!["alice".into(), "carol".into()], TIMEOUT)
            .await
            .expect("lookup");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ip, "192.0.2.1");
        fake.await.expect("join");
    }

    #[tokio::test]
    async fn say_sends_text_without_waiting() {
        let (mut client, mut server) = pair();
        say(&mut client, "hello from the daemon").await.expect("say");
        let msg = server.receive().await.expect("text");
        assert_eq!(msg.kind(), MessageKind::String);
        assert_eq!(msg.text().expect("utf-8"), "hello from the daemon");
    }
}
