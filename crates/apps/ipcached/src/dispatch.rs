use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::connection::Connection;
use crate::state::ServerState;

/// Pause after a failed accept so descriptor exhaustion does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts TCP connections and runs each one as an independent task.
pub struct DispatchServer {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    shared: Arc<ServerState>,
}

impl DispatchServer {
    pub async fn bind(
        addr: SocketAddr,
        tls: Arc<rustls::ServerConfig>,
        shared: Arc<ServerState>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, acceptor: TlsAcceptor::from(tls), shared })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.shared
    }

    /// Accepts forever. A failed accept is logged and never stops the loop.
    pub async fn run(self) {
        loop {
            let (tcp, peer_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!("accept failed: {err}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            if let Err(err) = tcp.set_nodelay(true) {
                debug!("set_nodelay for {peer_addr} failed: {err}");
            }

            let acceptor = self.acceptor.clone();
            let connection = Connection::new(Arc::clone(&self.shared), peer_addr);
            tokio::spawn(async move {
                match connection.serve(&acceptor, tcp).await {
                    Ok(()) => debug!("connection from {peer_addr} finished"),
                    Err(err) if err.is_timeout() => info!("connection from {peer_addr}: {err}"),
                    Err(err) => warn!("connection from {peer_addr} closed: {err}"),
                }
            });
        }
    }

    /// Runs until `shutdown` resolves. Connections still open are dropped
    /// with the runtime.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            () = self.run() => {}
            () = shutdown => info!("shutdown requested"),
        }
    }
}
