#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ipcache_client::{build_client_config, connect, ClientMessenger, ClientTlsPaths};
use ipcache_registry::{Registry, SqliteStore};
use ipcache_server::identity::principal_id_from_der;
use ipcache_server::tls::build_server_config;
use ipcache_server::{ConnectionPolicy, DispatchServer, ServerState, TlsPaths};
use ipcache_test_support::{IssuedIdentity, TestPki, SERVER_NAME};
use tokio::task::JoinHandle;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub pki: TestPki,
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(policy: ConnectionPolicy) -> Self {
        Self::start_with_store(policy, SqliteStore::in_memory().expect("store")).await
    }

    pub async fn start_with_store(policy: ConnectionPolicy, store: SqliteStore) -> Self {
        let pki = TestPki::new();
        let registry = Registry::hydrate(store, REQUEST_TIMEOUT).await.expect("hydrate");
        let tls = build_server_config(&TlsPaths {
            cert_chain: pki.server().cert_path.clone(),
            private_key: pki.server().key_path.clone(),
            client_ca: pki.ca_path().to_path_buf(),
        })
        .expect("server tls");
        let state = Arc::new(ServerState::new(registry, policy));
        let server = DispatchServer::bind(
            SocketAddr::from(([127, 0, 0, 1], 0)),
            tls,
            Arc::clone(&state),
        )
        .await
        .expect("bind");
        let addr = server.local_addr().expect("local addr");
        let task = tokio::spawn(server.run());
        Self { pki, addr, state, task }
    }

    pub async fn start_default() -> Self {
        Self::start(ConnectionPolicy::default()).await
    }

    pub fn issue(&self, name: &str) -> Daemon {
        Daemon::new(self.pki.issue_client(name), self.pki.ca_path())
    }

    pub async fn connect(&self, daemon: &Daemon) -> ClientMessenger {
        connect(&self.addr.to_string(), SERVER_NAME, Arc::clone(&daemon.tls), REQUEST_TIMEOUT)
            .await
            .expect("connect")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A client identity together with its TLS config.
pub struct Daemon {
    pub identity: IssuedIdentity,
    pub principal_id: String,
    pub tls: Arc<rustls::ClientConfig>,
}

impl Daemon {
    pub fn new(identity: IssuedIdentity, server_ca: &std::path::Path) -> Self {
        let tls = build_client_config(&ClientTlsPaths {
            cert_chain: identity.cert_path.clone(),
            private_key: identity.key_path.clone(),
            server_root_ca: server_ca.to_path_buf(),
        })
        .expect("client tls");
        let principal_id = principal_id_from_der(identity.cert_der.as_ref()).expect("principal id");
        Self { identity, principal_id, tls }
    }
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn eventually(condition: impl FnMut() -> bool) -> bool {
    eventually_within(Duration::from_secs(2), condition).await
}

pub async fn eventually_within(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
