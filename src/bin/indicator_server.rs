//! Indicator service: ingests live market data and publishes periodic
//! market snapshots to the bus.

use anyhow::Result;
use opustrade::application::indicator::{CandleStore, IndicatorServer};
use opustrade::config::Config;
use opustrade::infrastructure::okx::{OkxPublicWs, OkxRestClient};
use opustrade::infrastructure::persistence::repositories::PgCandleRepository;
use opustrade::infrastructure::{Database, RedisBus};
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

    info!("Indicator server {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        instruments = ?config.instruments,
        timeframes = ?config.timeframes,
        "Configuration loaded"
    );

    // Infrastructure failures here abort startup with a nonzero exit.
    let bus = Arc::new(
        RedisBus::connect(&config.store.redis_url, "indicator_server", "indicator-1").await?,
    );
    let database = Database::new(&config.store).await?;
    let candle_repo = Arc::new(PgCandleRepository::new(database.clone()));
    let exchange = Arc::new(OkxRestClient::new(config.exchange.clone(), config.max_retries)?);

    let store = Arc::new(CandleStore::new(candle_repo, config.candle_history_limit));
    let server = IndicatorServer::new(
        config.clone(),
        bus,
        exchange,
        Arc::clone(&store),
    );

    info!("Backfilling candle history...");
    server.backfill().await?;

    let (feed_tx, feed_rx) = mpsc::channel(1024);
    let mut public_ws = OkxPublicWs::new(config.exchange.ws_public_url.clone(), feed_tx);
    public_ws.subscribe_candles(&config.instruments, &config.timeframes);
    public_ws.subscribe_tickers(&config.instruments);
    public_ws.subscribe_orderbook(&config.instruments);
    public_ws.subscribe_funding(&config.instruments);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ws_task = tokio::spawn(public_ws.run(shutdown_rx.clone()));

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.run(feed_rx, shutdown_rx).await;

    let _ = ws_task.await;
    database.pool.close().await;
    info!("Shutdown complete");
    Ok(())
}
