//! The node's run loop: start the [`Supervisor`], serve its HTTP/metrics
//! surface, and block until interrupted. Shared by both binaries in this
//! workspace (`pierced` and `pierce`'s `start` subcommand) so the two never
//! drift into independently-reimplemented copies of the same sequence.

use std::net::SocketAddr;

use tracing::{error, info};

use pierce_core::{Config, Result};

use crate::http;
use crate::supervisor::Supervisor;

/// Start the node and serve its API until `Ctrl-C`, then shut down cleanly.
pub async fn run(config: Config, with_portmap: bool, api_addr: SocketAddr) -> Result<()> {
    let supervisor = Supervisor::start(config, with_portmap).await?;
    let app = http::router(supervisor.clone());

    let listener = tokio::net::TcpListener::bind(api_addr).await?;
    info!(addr = %api_addr, "http api listening");

    tokio::select! {
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                error!(%e, "http server exited");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    supervisor.close();
    Ok(())
}
