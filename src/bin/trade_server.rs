//! Trade service: owns exchange connectivity, executes order intents from
//! the bus and republishes fills and positions.

use anyhow::Result;
use opustrade::application::trade::TradeServer;
use opustrade::config::Config;
use opustrade::infrastructure::RedisBus;
use opustrade::infrastructure::okx::{OkxPrivateWs, OkxRestClient};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Trade server {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(instruments = ?config.instruments, flag = %config.exchange.flag, "Configuration loaded");

    let bus = Arc::new(RedisBus::connect(&config.store.redis_url, "trade_server", "trade-1").await?);
    let exchange = Arc::new(OkxRestClient::new(config.exchange.clone(), config.max_retries)?);

    let (private_tx, private_rx) = mpsc::channel(1024);
    let private_ws = OkxPrivateWs::new(config.exchange.clone(), "SWAP", private_tx);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ws_task = tokio::spawn(private_ws.run(shutdown_rx.clone()));

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let server = Arc::new(TradeServer::new(config, bus, exchange));
    server.run(private_rx, shutdown_rx).await;

    let _ = ws_task.await;
    info!("Shutdown complete");
    Ok(())
}
