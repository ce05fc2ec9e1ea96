use crate::domain::repositories::ScreenerLogRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;

pub struct PgScreenerLogRepository {
    database: Database,
}

impl PgScreenerLogRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl ScreenerLogRepository for PgScreenerLogRepository {
    async fn log(&self, symbol: &str, signal: bool, reason: &str, tokens_used: u64) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO screener_logs (symbol, signal, reason, tokens_used)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(symbol)
        .bind(signal)
        .bind(reason)
        .bind(tokens_used as i64)
        .fetch_one(&self.database.pool)
        .await
        .context("Failed to log screen result")?;

        Ok(id)
    }

    async fn update_opus_agreement(
        &self,
        log_id: i64,
        opus_action: &str,
        agreed: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE screener_logs
            SET opus_action = $2, opus_agreed = $3
            WHERE id = $1
            "#,
        )
        .bind(log_id)
        .bind(opus_action)
        .bind(agreed)
        .execute(&self.database.pool)
        .await
        .context("Failed to update screener agreement")?;

        Ok(())
    }
}
