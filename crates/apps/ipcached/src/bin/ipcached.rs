#[path = "ipcached/bootstrap.rs"]
mod bootstrap;

use clap::Parser;
use log::info;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ipcached", about = "Directory of daemon IP addresses over mutual TLS")]
pub(crate) struct Args {
    /// TOML config file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    listen: Option<SocketAddr>,
    #[arg(long)]
    db: Option<PathBuf>,
    /// PEM chain presented to daemons.
    #[arg(long)]
    cert: Option<PathBuf>,
    #[arg(long)]
    key: Option<PathBuf>,
    /// PEM bundle of CAs trusted to issue daemon certificates.
    #[arg(long)]
    client_ca: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let server = bootstrap::bootstrap(args).await?;
    info!("ipcached listening on {}", server.local_addr()?);

    server
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                log::error!("failed to listen for ctrl-c: {err}");
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}
