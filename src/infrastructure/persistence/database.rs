use crate::config::StoreConfig;
use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Shared Postgres pool wrapper.
#[derive(Clone)]
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(store: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(store.db_pool_size + store.db_max_overflow)
            .min_connections(store.db_pool_size.min(2))
            .acquire_timeout(Duration::from_secs(store.db_pool_timeout_secs))
            .max_lifetime(Duration::from_secs(store.db_pool_recycle_secs))
            .test_before_acquire(true)
            .connect(&store.database_url)
            .await
            .context("Failed to connect to Postgres")?;

        info!("Connected to database");

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// Initialize schema. Candles are expected to be converted to a
    /// TimescaleDB hypertable with a 6-month retention policy by migration
    /// tooling; plain tables work for development.
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candles (
                time        TIMESTAMPTZ NOT NULL,
                symbol      TEXT NOT NULL,
                timeframe   TEXT NOT NULL,
                open        NUMERIC(30, 8) NOT NULL,
                high        NUMERIC(30, 8) NOT NULL,
                low         NUMERIC(30, 8) NOT NULL,
                close       NUMERIC(30, 8) NOT NULL,
                volume      NUMERIC(30, 8) NOT NULL,
                PRIMARY KEY (time, symbol, timeframe)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create candles table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_candles_symbol_tf_time
            ON candles (symbol, timeframe, time DESC);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create candle index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                trade_id            UUID PRIMARY KEY,
                opened_at           TIMESTAMPTZ,
                closed_at           TIMESTAMPTZ,
                duration_seconds    BIGINT,
                symbol              TEXT NOT NULL,
                direction           TEXT NOT NULL,
                entry_price         NUMERIC(30, 8) NOT NULL DEFAULT 0,
                exit_price          NUMERIC(30, 8),
                stop_loss           NUMERIC(30, 8) NOT NULL DEFAULT 0,
                take_profit         NUMERIC(30, 8),
                size                NUMERIC(30, 8) NOT NULL DEFAULT 0,
                size_pct            DOUBLE PRECISION,
                leverage            DOUBLE PRECISION NOT NULL DEFAULT 1,
                pnl_usd             DOUBLE PRECISION,
                pnl_pct             DOUBLE PRECISION,
                fees_usd            DOUBLE PRECISION,
                strategy_used       TEXT NOT NULL DEFAULT '',
                confidence_at_entry DOUBLE PRECISION NOT NULL DEFAULT 0,
                market_regime       TEXT NOT NULL DEFAULT '',
                opus_reasoning      TEXT NOT NULL DEFAULT '',
                indicators_entry    JSONB,
                indicators_exit     JSONB,
                research_context    JSONB,
                self_review         JSONB,
                exit_reason         TEXT,
                status              TEXT NOT NULL DEFAULT 'open',
                okx_order_id        TEXT,
                okx_algo_id         TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_trades_status_closed
            ON trades (status, closed_at DESC);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create trades table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS playbook_versions (
                version        INTEGER PRIMARY KEY,
                data           JSONB NOT NULL,
                change_summary TEXT NOT NULL DEFAULT '',
                triggered_by   TEXT NOT NULL DEFAULT '',
                created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create playbook_versions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reflections (
                id              BIGSERIAL PRIMARY KEY,
                reflection_type TEXT NOT NULL,
                trade_id        UUID,
                content         JSONB NOT NULL,
                created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create reflections table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS screener_logs (
                id          BIGSERIAL PRIMARY KEY,
                symbol      TEXT NOT NULL,
                signal      BOOLEAN NOT NULL,
                reason      TEXT NOT NULL DEFAULT '',
                tokens_used BIGINT NOT NULL DEFAULT 0,
                opus_action TEXT,
                opus_agreed BOOLEAN,
                created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create screener_logs table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS research_cache (
                id         BIGSERIAL PRIMARY KEY,
                query      TEXT NOT NULL,
                response   JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX IF NOT EXISTS idx_research_cache_query
            ON research_cache (query, created_at DESC);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create research_cache table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS risk_rejections (
                id           BIGSERIAL PRIMARY KEY,
                decision     JSONB NOT NULL,
                failed_rules JSONB NOT NULL,
                account      JSONB NOT NULL,
                created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create risk_rejections table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS performance_snapshots (
                id            BIGSERIAL PRIMARY KEY,
                snapshot_type TEXT NOT NULL,
                metrics       JSONB NOT NULL,
                created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create performance_snapshots table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
