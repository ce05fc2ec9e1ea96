use crate::domain::repositories::{TradePatch, TradeRepository};
use crate::domain::trading::{Direction, TradeRecord, TradeStatus};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

pub struct PgTradeRepository {
    database: Database,
}

impl PgTradeRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

pub(crate) fn map_trade_row(row: &PgRow) -> Result<TradeRecord> {
    let direction_raw: String = row.try_get("direction")?;
    let direction = match direction_raw.as_str() {
        "LONG" => Direction::Long,
        "SHORT" => Direction::Short,
        other => anyhow::bail!("Unknown trade direction '{}'", other),
    };
    let status_raw: String = row.try_get("status")?;
    let status = match status_raw.as_str() {
        "open" => TradeStatus::Open,
        "closed" => TradeStatus::Closed,
        "cancelled" => TradeStatus::Cancelled,
        other => anyhow::bail!("Unknown trade status '{}'", other),
    };

    Ok(TradeRecord {
        trade_id: row.try_get::<Uuid, _>("trade_id")?,
        opened_at: row.try_get::<Option<DateTime<Utc>>, _>("opened_at")?,
        closed_at: row.try_get::<Option<DateTime<Utc>>, _>("closed_at")?,
        duration_seconds: row.try_get::<Option<i64>, _>("duration_seconds")?,
        symbol: row.try_get("symbol")?,
        direction,
        entry_price: row.try_get::<Decimal, _>("entry_price")?,
        exit_price: row.try_get::<Option<Decimal>, _>("exit_price")?,
        stop_loss: row.try_get::<Decimal, _>("stop_loss")?,
        take_profit: row.try_get::<Option<Decimal>, _>("take_profit")?,
        size: row.try_get::<Decimal, _>("size")?,
        size_pct: row.try_get::<Option<f64>, _>("size_pct")?,
        leverage: row.try_get::<f64, _>("leverage")?,
        pnl_usd: row.try_get::<Option<f64>, _>("pnl_usd")?,
        pnl_pct: row.try_get::<Option<f64>, _>("pnl_pct")?,
        fees_usd: row.try_get::<Option<f64>, _>("fees_usd")?,
        strategy_used: row.try_get("strategy_used")?,
        confidence_at_entry: row.try_get::<f64, _>("confidence_at_entry")?,
        market_regime: row.try_get("market_regime")?,
        opus_reasoning: row.try_get("opus_reasoning")?,
        indicators_entry: row.try_get::<Option<Value>, _>("indicators_entry")?,
        indicators_exit: row.try_get::<Option<Value>, _>("indicators_exit")?,
        research_context: row.try_get::<Option<Value>, _>("research_context")?,
        self_review: row.try_get::<Option<Value>, _>("self_review")?,
        exit_reason: row.try_get::<Option<String>, _>("exit_reason")?,
        status,
        okx_order_id: row.try_get::<Option<String>, _>("okx_order_id")?,
        okx_algo_id: row.try_get::<Option<String>, _>("okx_algo_id")?,
    })
}

const SELECT_COLUMNS: &str = r#"
    trade_id, opened_at, closed_at, duration_seconds, symbol, direction,
    entry_price, exit_price, stop_loss, take_profit, size, size_pct, leverage,
    pnl_usd, pnl_pct, fees_usd, strategy_used, confidence_at_entry,
    market_regime, opus_reasoning, indicators_entry, indicators_exit,
    research_context, self_review, exit_reason, status, okx_order_id, okx_algo_id
"#;

#[async_trait]
impl TradeRepository for PgTradeRepository {
    async fn create(&self, trade: &TradeRecord) -> Result<Uuid> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                trade_id, opened_at, closed_at, duration_seconds, symbol, direction,
                entry_price, exit_price, stop_loss, take_profit, size, size_pct, leverage,
                pnl_usd, pnl_pct, fees_usd, strategy_used, confidence_at_entry,
                market_regime, opus_reasoning, indicators_entry, indicators_exit,
                research_context, self_review, exit_reason, status, okx_order_id, okx_algo_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28)
            "#,
        )
        .bind(trade.trade_id)
        .bind(trade.opened_at)
        .bind(trade.closed_at)
        .bind(trade.duration_seconds)
        .bind(&trade.symbol)
        .bind(trade.direction.as_str())
        .bind(trade.entry_price)
        .bind(trade.exit_price)
        .bind(trade.stop_loss)
        .bind(trade.take_profit)
        .bind(trade.size)
        .bind(trade.size_pct)
        .bind(trade.leverage)
        .bind(trade.pnl_usd)
        .bind(trade.pnl_pct)
        .bind(trade.fees_usd)
        .bind(&trade.strategy_used)
        .bind(trade.confidence_at_entry)
        .bind(&trade.market_regime)
        .bind(&trade.opus_reasoning)
        .bind(trade.indicators_entry.clone())
        .bind(trade.indicators_exit.clone())
        .bind(trade.research_context.clone())
        .bind(trade.self_review.clone())
        .bind(trade.exit_reason.clone())
        .bind(trade.status.as_str())
        .bind(trade.okx_order_id.clone())
        .bind(trade.okx_algo_id.clone())
        .execute(&self.database.pool)
        .await
        .context("Failed to create trade record")?;

        Ok(trade.trade_id)
    }

    async fn update(&self, trade_id: Uuid, patch: TradePatch) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trades SET
                closed_at        = COALESCE($2, closed_at),
                duration_seconds = COALESCE($3, duration_seconds),
                exit_price       = COALESCE($4, exit_price),
                pnl_usd          = COALESCE($5, pnl_usd),
                pnl_pct          = COALESCE($6, pnl_pct),
                fees_usd         = COALESCE($7, fees_usd),
                exit_reason      = COALESCE($8, exit_reason),
                status           = COALESCE($9, status),
                self_review      = COALESCE($10, self_review),
                indicators_exit  = COALESCE($11, indicators_exit),
                okx_order_id     = COALESCE($12, okx_order_id),
                okx_algo_id      = COALESCE($13, okx_algo_id)
            WHERE trade_id = $1
            "#,
        )
        .bind(trade_id)
        .bind(patch.closed_at)
        .bind(patch.duration_seconds)
        .bind(patch.exit_price)
        .bind(patch.pnl_usd)
        .bind(patch.pnl_pct)
        .bind(patch.fees_usd)
        .bind(patch.exit_reason)
        .bind(patch.status.map(|s| s.as_str().to_string()))
        .bind(patch.self_review)
        .bind(patch.indicators_exit)
        .bind(patch.okx_order_id)
        .bind(patch.okx_algo_id)
        .execute(&self.database.pool)
        .await
        .context("Failed to update trade record")?;

        Ok(())
    }

    async fn get(&self, trade_id: Uuid) -> Result<Option<TradeRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM trades WHERE trade_id = $1",
            SELECT_COLUMNS
        ))
        .bind(trade_id)
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load trade")?;

        row.as_ref().map(map_trade_row).transpose()
    }

    async fn get_open(&self) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM trades WHERE status = 'open' ORDER BY opened_at DESC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load open trades")?;

        rows.iter().map(map_trade_row).collect()
    }

    async fn get_recent_closed(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM trades WHERE status = 'closed' ORDER BY closed_at DESC LIMIT $1",
            SELECT_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load closed trades")?;

        rows.iter().map(map_trade_row).collect()
    }

    async fn get_trades_since(&self, since: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM trades WHERE closed_at > $1 ORDER BY closed_at ASC",
            SELECT_COLUMNS
        ))
        .bind(since)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load trades since timestamp")?;

        rows.iter().map(map_trade_row).collect()
    }
}
