use super::{Args, Command};
use anyhow::Context;
use ipcache_client::{
    build_client_config, connect, grant_authorization, lookup_ips, revoke_authorization,
    run_session, say, ClientTlsPaths, DaemonOptions,
};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

pub(super) fn daemon_options(args: &Args) -> anyhow::Result<DaemonOptions> {
    let tls = build_client_config(&ClientTlsPaths {
        cert_chain: args.cert.clone(),
        private_key: args.privatekey.clone(),
        server_root_ca: args.server_root_ca_cert.clone(),
    })
    .context("build tls client config")?;
    Ok(DaemonOptions {
        server_addr: server_addr(&args.server, args.port),
        server_name: args.server_name.clone().unwrap_or_else(|| args.server.clone()),
        tls,
        request_timeout: args.registration_timeout,
    })
}

/// `host:port`, bracketing bare IPv6 literals.
pub(super) fn server_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Holds a registration until ctrl-c, starting a new session whenever one ends.
pub(super) async fn run(options: &DaemonOptions, reconnect_delay: Duration) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            result = run_session(options) => match result {
                Ok(()) => info!("server closed the connection"),
                Err(err) => warn!("session with {} ended: {err}", options.server_addr),
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
        info!("reconnecting in {}", ipcache_proto::format_duration(reconnect_delay));
        tokio::select! {
            () = tokio::time::sleep(reconnect_delay) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

pub(super) async fn one_shot(options: &DaemonOptions, command: Command) -> anyhow::Result<()> {
    let timeout = options.request_timeout;
    let mut messenger =
        connect(&options.server_addr, &options.server_name, Arc::clone(&options.tls), timeout)
            .await?;
    match command {
        Command::Run => anyhow::bail!("run is not a one-shot command"),
        Command::Grant { other, capability } => {
            grant_authorization(&mut messenger, &other, capability, timeout).await?;
            println!("granted {capability} to {other}");
        }
        Command::Revoke { other, capability } => {
            revoke_authorization(&mut messenger, &other, capability, timeout).await?;
            println!("revoked {capability} from {other}");
        }
        Command::Lookup { owners } => {
            for entry in lookup_ips(&mut messenger, owners, timeout).await? {
                println!("{}\t{}", entry.principal_id, entry.ip);
            }
        }
        Command::Say { text } => say(&mut messenger, &text).await?,
    }
    messenger.shutdown().await.context("close connection")?;
    Ok(())
}
