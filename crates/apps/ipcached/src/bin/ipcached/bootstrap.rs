use super::Args;
use anyhow::Context;
use ipcache_registry::{Registry, SqliteStore};
use ipcache_server::tls::build_server_config;
use ipcache_server::{DispatchServer, ServerConfig, ServerState};
use log::info;
use std::sync::Arc;

pub(super) fn load_config(args: Args) -> anyhow::Result<ServerConfig> {
    let mut config = match args.config.as_ref() {
        Some(path) => ServerConfig::from_path(path)?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(db) = args.db {
        config.db = db;
    }
    if let Some(cert) = args.cert {
        config.tls.cert_chain = cert;
    }
    if let Some(key) = args.key {
        config.tls.private_key = key;
    }
    if let Some(client_ca) = args.client_ca {
        config.tls.client_ca = client_ca;
    }
    config.validate()?;
    Ok(config)
}

pub(super) async fn bootstrap(args: Args) -> anyhow::Result<DispatchServer> {
    let config = load_config(args)?;

    let store = SqliteStore::open(&config.db)
        .with_context(|| format!("open registry database {}", config.db.display()))?;
    let registry = Registry::hydrate(store, config.store_timeout).await.context("load registry")?;
    info!("registry holds {} principals", registry.mirrored_len());

    let tls = build_server_config(&config.tls).context("build tls server config")?;
    let shared = Arc::new(ServerState::new(registry, config.policy()));
    let server = DispatchServer::bind(config.listen, tls, shared)
        .await
        .with_context(|| format!("bind {}", config.listen))?;
    Ok(server)
}
