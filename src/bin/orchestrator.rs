//! Orchestrator service: consumes snapshots, drives the decision state
//! machine and is the only writer of trade intent.

use anyhow::Result;
use opustrade::application::orchestrator::{Orchestrator, SnapshotScheduler};
use opustrade::config::Config;
use opustrade::domain::ports::{Analyst, ResearchProvider, Screener};
use opustrade::infrastructure::llm::{AnthropicClient, PerplexityClient};
use opustrade::infrastructure::persistence::repositories::{
    PgPerformanceSnapshotRepository, PgPlaybookRepository, PgReflectionRepository,
    PgResearchCacheRepository, PgRiskRejectionRepository, PgScreenerLogRepository,
    PgTradeRepository,
};
use opustrade::infrastructure::{Database, RedisBus};
use std::sync::Arc;
use tokio::sync::watch;
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

    info!("Orchestrator {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        instruments = ?config.instruments,
        cycle_secs = config.decision_cycle_secs,
        "Configuration loaded"
    );

    let bus = Arc::new(RedisBus::connect(&config.store.redis_url, "orchestrator", "orch-1").await?);
    let database = Database::new(&config.store).await?;

    let trade_repo = Arc::new(PgTradeRepository::new(database.clone()));
    let playbook_repo = Arc::new(PgPlaybookRepository::new(database.clone()));
    let reflection_repo = Arc::new(PgReflectionRepository::new(database.clone()));
    let screener_log_repo = Arc::new(PgScreenerLogRepository::new(database.clone()));
    let research_cache_repo = Arc::new(PgResearchCacheRepository::new(database.clone()));
    let risk_rejection_repo = Arc::new(PgRiskRejectionRepository::new(database.clone()));
    let performance_repo = Arc::new(PgPerformanceSnapshotRepository::new(database.clone()));

    let anthropic = Arc::new(AnthropicClient::new(config.llm.clone())?);
    let perplexity = Arc::new(PerplexityClient::new(
        config.llm.clone(),
        research_cache_repo,
    )?);

    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        bus,
        Arc::clone(&anthropic) as Arc<dyn Screener>,
        Arc::clone(&anthropic) as Arc<dyn Analyst>,
        perplexity as Arc<dyn ResearchProvider>,
        Arc::clone(&trade_repo) as _,
        playbook_repo,
        reflection_repo,
        screener_log_repo,
        risk_rejection_repo,
    ));

    let scheduler = SnapshotScheduler::new(
        trade_repo,
        performance_repo,
        Arc::clone(&orchestrator.risk_gate),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_shutdown = shutdown_rx.clone();
    let scheduler_task = tokio::spawn(async move {
        scheduler.run(scheduler_shutdown).await;
    });

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    orchestrator.run(shutdown_rx).await;

    let _ = scheduler_task.await;
    database.pool.close().await;
    info!("Shutdown complete");
    Ok(())
}
