//! Voidstream Server
//!
//! Binds the WebSocket listener and runs until Ctrl-C.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use voidstream::{GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env().context("Failed to load server config")?;

    info!("Voidstream Server v{}", VERSION);
    info!("Tick Rate: {} Hz", config.sim.tick_rate);
    info!(
        "Playfield: {}x{}",
        config.sim.playfield.width, config.sim.playfield.height
    );

    let server = GameServer::new(config);

    tokio::select! {
        result = server.run() => {
            result.context("Server stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            server.shutdown();
        }
    }

    Ok(())
}
