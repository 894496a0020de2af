#![forbid(unsafe_code)]

//! The `pierced` binary: loads config, starts the [`Supervisor`], and serves
//! its HTTP/metrics surface until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use pierce_core::Config;

#[derive(Parser, Debug)]
#[command(author, version, about = "pierce overlay gateway daemon", long_about = None)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short = 'c', long, default_value = "pierce.toml")]
    config: PathBuf,

    /// Run as a portmap gateway (accepts inbound resource/socks5 requests)
    /// rather than an agent-only node.
    #[arg(long)]
    gateway: bool,

    /// Address the HTTP/metrics API binds to.
    #[arg(long, default_value = "127.0.0.1:9443")]
    api_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(config.log_level.clone()))
        .init();

    info!(config = %cli.config.display(), gateway = cli.gateway, "starting pierce daemon");

    pierce_daemon::run(config, cli.gateway, cli.api_addr).await?;
    Ok(())
}
