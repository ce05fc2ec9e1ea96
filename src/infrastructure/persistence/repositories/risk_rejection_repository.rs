use crate::domain::repositories::RiskRejectionRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

pub struct PgRiskRejectionRepository {
    database: Database,
}

impl PgRiskRejectionRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl RiskRejectionRepository for PgRiskRejectionRepository {
    async fn log(&self, decision: Value, failed_rules: &[String], account: Value) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO risk_rejections (decision, failed_rules, account)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(decision)
        .bind(serde_json::to_value(failed_rules)?)
        .bind(account)
        .fetch_one(&self.database.pool)
        .await
        .context("Failed to log risk rejection")?;

        Ok(id)
    }
}
