use crate::domain::repositories::ReflectionRepository;
use crate::domain::trading::TradeRecord;
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::trade_repository::map_trade_row;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

pub struct PgReflectionRepository {
    database: Database,
}

impl PgReflectionRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl ReflectionRepository for PgReflectionRepository {
    async fn save(
        &self,
        reflection_type: &str,
        trade_id: Option<Uuid>,
        content: Value,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO reflections (reflection_type, trade_id, content)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(reflection_type)
        .bind(trade_id)
        .bind(content)
        .fetch_one(&self.database.pool)
        .await
        .context("Failed to save reflection")?;

        Ok(id)
    }

    async fn get_last_time(&self) -> Result<Option<DateTime<Utc>>> {
        let last: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MAX(created_at) FROM reflections WHERE reflection_type = 'deep'",
        )
        .fetch_one(&self.database.pool)
        .await
        .context("Failed to read last reflection time")?;

        Ok(last)
    }

    async fn get_trades_since_last(&self) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT trade_id, opened_at, closed_at, duration_seconds, symbol, direction,
                   entry_price, exit_price, stop_loss, take_profit, size, size_pct, leverage,
                   pnl_usd, pnl_pct, fees_usd, strategy_used, confidence_at_entry,
                   market_regime, opus_reasoning, indicators_entry, indicators_exit,
                   research_context, self_review, exit_reason, status, okx_order_id, okx_algo_id
            FROM trades
            WHERE status = 'closed'
              AND closed_at > COALESCE(
                  (SELECT MAX(created_at) FROM reflections WHERE reflection_type = 'deep'),
                  'epoch'::timestamptz)
            ORDER BY closed_at ASC
            "#,
        )
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load trades since last reflection")?;

        rows.iter().map(map_trade_row).collect()
    }
}
