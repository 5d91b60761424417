#[path = "ipcache-clientd/commands.rs"]
mod commands;
#[cfg(test)]
#[path = "ipcache-clientd/tests.rs"]
mod tests;

use clap::{Parser, Subcommand};
use ipcache_proto::{parse_duration, GET_IP_CAPABILITY};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "ipcache-clientd", about = "Keeps this host registered with an ipcache server")]
pub(crate) struct Args {
    #[arg(long, default_value = "localhost")]
    server: String,
    #[arg(long, default_value_t = 4430)]
    port: u16,
    /// PEM certificate identifying this daemon.
    #[arg(long)]
    cert: PathBuf,
    #[arg(long)]
    privatekey: PathBuf,
    /// PEM bundle used to verify the server certificate.
    #[arg(long)]
    server_root_ca_cert: PathBuf,
    /// Name to verify in the server certificate; defaults to --server.
    #[arg(long)]
    server_name: Option<String>,
    /// Bounds connecting and every request/reply exchange.
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    registration_timeout: Duration,
    /// Pause before reconnecting after a session ends.
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    reconnect_delay: Duration,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    /// Register and keep the registration alive (the default).
    Run,
    /// Allow another principal to look up this daemon's IP.
    Grant {
        other: String,
        #[arg(long, default_value_t = GET_IP_CAPABILITY)]
        capability: i64,
    },
    /// Withdraw a grant.
    Revoke {
        other: String,
        #[arg(long, default_value_t = GET_IP_CAPABILITY)]
        capability: i64,
    },
    /// Print the IPs of the given principals that this daemon may see.
    Lookup {
        #[arg(required = true)]
        owners: Vec<String>,
    },
    /// Send a line of text to the server log.
    Say { text: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let options = commands::daemon_options(&args)?;
    match args.command.clone().unwrap_or(Command::Run) {
        Command::Run => commands::run(&options, args.reconnect_delay).await,
        command => commands::one_shot(&options, command).await,
    }
}
