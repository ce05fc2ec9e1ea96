use crate::domain::playbook::Playbook;
use crate::domain::repositories::{PlaybookRepository, PlaybookVersion};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use sqlx::postgres::PgRow;

pub struct PgPlaybookRepository {
    database: Database,
}

impl PgPlaybookRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

fn map_version_row(row: &PgRow) -> Result<PlaybookVersion> {
    let data: Value = row.try_get("data")?;
    Ok(PlaybookVersion {
        version: row.try_get::<i32, _>("version")?,
        data: serde_json::from_value(data).context("Malformed playbook document")?,
        change_summary: row.try_get("change_summary")?,
        triggered_by: row.try_get("triggered_by")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

#[async_trait]
impl PlaybookRepository for PgPlaybookRepository {
    async fn get_latest(&self) -> Result<Option<PlaybookVersion>> {
        let row = sqlx::query(
            r#"
            SELECT version, data, change_summary, triggered_by, created_at
            FROM playbook_versions
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load latest playbook")?;

        row.as_ref().map(map_version_row).transpose()
    }

    async fn save_version(
        &self,
        data: &Playbook,
        change_summary: &str,
        triggered_by: &str,
    ) -> Result<i32> {
        // Version assignment and insert happen in one statement so two
        // concurrent reflections cannot claim the same number.
        let version: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO playbook_versions (version, data, change_summary, triggered_by)
            SELECT COALESCE(MAX(version), 0) + 1, $1, $2, $3
            FROM playbook_versions
            RETURNING version
            "#,
        )
        .bind(serde_json::to_value(data)?)
        .bind(change_summary)
        .bind(triggered_by)
        .fetch_one(&self.database.pool)
        .await
        .context("Failed to save playbook version")?;

        Ok(version)
    }

    async fn get_history(&self, limit: usize) -> Result<Vec<PlaybookVersion>> {
        let rows = sqlx::query(
            r#"
            SELECT version, data, change_summary, triggered_by, created_at
            FROM playbook_versions
            ORDER BY version DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load playbook history")?;

        rows.iter().map(map_version_row).collect()
    }
}
