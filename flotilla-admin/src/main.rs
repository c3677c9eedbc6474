//! Flotilla admin - per-node command server
//!
//! - `GET /status` reports uptime, command counters and host metrics
//! - `POST /command` runs echo, status, shutdown, reboot and execute
//! - `execute` runs arbitrary shell commands unless `admin.execute` restricts it;
//!   the server assumes a trusted private network (no authentication)

mod execution;
mod fleet;
mod http;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use execution::OsHost;
use fleet::FleetNode;
use flotilla_common::{logging, FleetConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "flotilla-admin", about = "Status and command server for a fleet node")]
struct Args {
    /// Port to listen on (overrides `admin.port`)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("info");
    let args = Args::parse();
    let cfg = FleetConfig::load();

    let ship_name = cfg.resolved_ship_name();
    let node = Arc::new(FleetNode::new(ship_name.clone(), &cfg.admin, OsHost));
    let app = http::build_router(node);

    let port = args.port.unwrap_or(cfg.admin.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("command server listening on http://{addr}");
    info!("ship name: {ship_name}");

    let exec = &cfg.admin.execute;
    if !exec.enabled {
        info!("execute command disabled");
    } else if exec.allow_list.is_empty() {
        warn!("execute command accepts any shell command");
    } else {
        info!("execute command limited to {:?}", exec.allow_list);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutting down");
        })
        .await
        .context("Command server failed")?;

    info!("server stopped");
    Ok(())
}
