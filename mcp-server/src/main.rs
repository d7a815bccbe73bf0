use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod mcp_server;

use analyst_engine::DataEngine;
use mcp_server::ToolServer;

struct ServerConfig {
    port: u16,
    data_dir: PathBuf,
}

fn load_config() -> Result<ServerConfig> {
    let port = std::env::var("ANALYST_PORT")
        .unwrap_or_else(|_| "8050".to_string())
        .parse()
        .map_err(|_| anyhow!("ANALYST_PORT must be a port number"))?;
    let data_dir =
        PathBuf::from(std::env::var("ANALYST_DATA_DIR").unwrap_or_else(|_| "data".to_string()));
    Ok(ServerConfig { port, data_dir })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "analyst_mcp_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config()?;
    info!(
        port = config.port,
        data_dir = %config.data_dir.display(),
        "starting analyst tool server"
    );

    let engine = DataEngine::new()?;
    let server = ToolServer::new(engine, config.data_dir);
    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.start(addr).await {
            error!("tool server error: {}", e);
        }
    });

    info!("tool server listening on {}", addr);

    if let Err(e) = signal::ctrl_c().await {
        error!("unable to listen for shutdown signal: {}", e);
    }
    info!("shutting down");
    server_handle.abort();

    Ok(())
}
