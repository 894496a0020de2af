#![forbid(unsafe_code)]

//! Agent/gateway CLI front-end. `install`/`uninstall`/`restart`/
//! `stop` are stubs over the external service-manager collaborator (systemd,
//! `sc.exe`, ...); `start` is the one subcommand that actually runs the
//! node, calling [`pierce_daemon::run`] — the same run loop the standalone
//! `pierced` binary drives from `pierce-daemon/src/main.rs` — rather than
//! reimplementing it here.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use pierce_core::Config;

#[derive(Parser, Debug)]
#[command(author, version, about = "pierce overlay agent/gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to the TOML config file.
    #[arg(short = 'c', long, default_value = "pierce.toml")]
    config: PathBuf,

    /// Run detached from the controlling terminal.
    #[arg(short = 'd')]
    daemon: bool,

    /// Log to the console instead of the configured sink.
    #[arg(short = 'v')]
    verbose: bool,

    /// Tracing verbosity: 0=error, 1=warn, 2=info, 3=debug, 4=trace.
    #[arg(long, default_value_t = 2)]
    log_level: u8,

    /// Force trial mode regardless of the config file's `trial` flag.
    #[arg(long)]
    trial: bool,

    /// Address the HTTP/metrics API binds to.
    #[arg(long, default_value = "127.0.0.1:9443")]
    api_addr: SocketAddr,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register pierce as a system service (external service-manager boundary).
    Install,
    /// Remove the registered system service.
    Uninstall,
    /// Start the node and block until interrupted.
    Start,
    /// Stop then start the running service.
    Restart,
    /// Stop the running service.
    Stop,
}

fn level_filter(level: u8) -> &'static str {
    match level {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

fn init_tracing(cli: &Cli) {
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        level_filter(cli.log_level).to_string()
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    let result = match cli.command {
        Command::Install => install(),
        Command::Uninstall => uninstall(),
        Command::Start => start(&cli).await,
        Command::Restart => {
            stop();
            start(&cli).await
        }
        Command::Stop => {
            stop();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(%e, "initialization failed");
            ExitCode::FAILURE
        }
    }
}

/// Service registration is an external collaborator; this only
/// documents the boundary rather than touching `systemd`/`sc.exe` directly.
fn install() -> Result<(), Box<dyn std::error::Error>> {
    info!("service installation is managed by the host's service manager, not pierce itself");
    Ok(())
}

fn uninstall() -> Result<(), Box<dyn std::error::Error>> {
    info!("service removal is managed by the host's service manager, not pierce itself");
    Ok(())
}

fn stop() {
    info!("service stop is managed by the host's service manager, not pierce itself");
}

async fn start(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load(&cli.config)?;
    if cli.trial {
        config.trial = true;
    }

    info!(
        config = %cli.config.display(),
        daemon = cli.daemon,
        "starting pierce node"
    );

    pierce_daemon::run(config, true, cli.api_addr).await?;
    Ok(())
}
