use crate::domain::repositories::PerformanceSnapshotRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

pub struct PgPerformanceSnapshotRepository {
    database: Database,
}

impl PgPerformanceSnapshotRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl PerformanceSnapshotRepository for PgPerformanceSnapshotRepository {
    async fn save(&self, snapshot_type: &str, metrics: Value) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO performance_snapshots (snapshot_type, metrics)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(snapshot_type)
        .bind(metrics)
        .fetch_one(&self.database.pool)
        .await
        .context("Failed to save performance snapshot")?;

        Ok(id)
    }
}
