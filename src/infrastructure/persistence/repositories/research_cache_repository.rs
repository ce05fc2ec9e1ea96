use crate::domain::repositories::ResearchCacheRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

pub struct PgResearchCacheRepository {
    database: Database,
}

impl PgResearchCacheRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl ResearchCacheRepository for PgResearchCacheRepository {
    async fn get_cached(&self, query: &str, ttl_seconds: i64) -> Result<Option<Value>> {
        // Exact-string keying; semantically equivalent phrasings do not collapse.
        let cached: Option<Value> = sqlx::query_scalar(
            r#"
            SELECT response
            FROM research_cache
            WHERE query = $1
              AND created_at > NOW() - ($2 * INTERVAL '1 second')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(query)
        .bind(ttl_seconds)
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to read research cache")?;

        Ok(cached)
    }

    async fn save(&self, query: &str, response: Value) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO research_cache (query, response)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(query)
        .bind(response)
        .fetch_one(&self.database.pool)
        .await
        .context("Failed to save research cache entry")?;

        Ok(id)
    }
}
