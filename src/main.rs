use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use arena_relay_engine::config::EngineConfig;
use arena_relay_engine::logging::init_tracing;
use arena_relay_engine::server::RelayServer;
use arena_relay_engine::RelayEngine;

const CONFIG_ENV: &str = "ARENA_RELAY_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok());
    let config = match config_path {
        Some(path) => {
            info!("loading config from {}", path);
            EngineConfig::load(&path)?
        }
        None => {
            info!("no config given, using defaults");
            EngineConfig::default()
        }
    };

    let listen = config.server.listen.clone();
    let engine = Arc::new(RelayEngine::new(config).context("failed to build relay engine")?);
    let server = RelayServer::start(engine.clone(), &listen).await?;
    info!("relay ready at {}", server.url("/v1/chat/completions"));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down, dispatch stats: {:?}", engine.stats());
    server.shutdown();
    Ok(())
}
