use crate::domain::market::{Candle, Timeframe};
use crate::domain::repositories::CandleRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use std::str::FromStr;

pub struct PgCandleRepository {
    database: Database,
}

impl PgCandleRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl CandleRepository for PgCandleRepository {
    async fn upsert(&self, candle: &Candle) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO candles (time, symbol, timeframe, open, high, low, close, volume)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (time, symbol, timeframe)
            DO UPDATE SET open = EXCLUDED.open, high = EXCLUDED.high,
                          low = EXCLUDED.low, close = EXCLUDED.close,
                          volume = EXCLUDED.volume
            "#,
        )
        .bind(candle.time)
        .bind(&candle.symbol)
        .bind(candle.timeframe.as_str())
        .bind(candle.open)
        .bind(candle.high)
        .bind(candle.low)
        .bind(candle.close)
        .bind(candle.volume)
        .execute(&self.database.pool)
        .await
        .context("Failed to upsert candle")?;

        Ok(())
    }

    async fn bulk_insert(&self, candles: &[Candle]) -> Result<()> {
        let mut tx = self.database.pool.begin().await?;
        for candle in candles {
            sqlx::query(
                r#"
                INSERT INTO candles (time, symbol, timeframe, open, high, low, close, volume)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (time, symbol, timeframe) DO NOTHING
                "#,
            )
            .bind(candle.time)
            .bind(&candle.symbol)
            .bind(candle.timeframe.as_str())
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.volume)
            .execute(&mut *tx)
            .await
            .context("Failed to bulk insert candle")?;
        }
        tx.commit().await.context("Failed to commit candle batch")?;
        Ok(())
    }

    async fn get_recent(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            r#"
            SELECT time, symbol, timeframe, open, high, low, close, volume
            FROM candles
            WHERE symbol = $1 AND timeframe = $2
            ORDER BY time DESC
            LIMIT $3
            "#,
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load recent candles")?;

        rows.into_iter()
            .map(|row| {
                let tf_raw: String = row.try_get("timeframe")?;
                Ok(Candle {
                    time: row.try_get::<DateTime<Utc>, _>("time")?,
                    symbol: row.try_get("symbol")?,
                    timeframe: Timeframe::from_str(&tf_raw)?,
                    open: row.try_get::<Decimal, _>("open")?,
                    high: row.try_get::<Decimal, _>("high")?,
                    low: row.try_get::<Decimal, _>("low")?,
                    close: row.try_get::<Decimal, _>("close")?,
                    volume: row.try_get::<Decimal, _>("volume")?,
                })
            })
            .collect()
    }
}
