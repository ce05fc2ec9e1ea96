//! Repository traits: the sole durable-store surface.
//!
//! Postgres implementations live in `infrastructure::persistence`; the
//! scenario tests use the in-memory doubles from `infrastructure::mock`.

use crate::domain::market::{Candle, Timeframe};
use crate::domain::playbook::Playbook;
use crate::domain::trading::{TradeRecord, TradeStatus};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// Insert or update on the (time, symbol, timeframe) key.
    async fn upsert(&self, candle: &Candle) -> Result<()>;

    /// Bulk insert, ignoring conflicts.
    async fn bulk_insert(&self, candles: &[Candle]) -> Result<()>;

    /// Most recent candles, newest first.
    async fn get_recent(&self, symbol: &str, timeframe: Timeframe, limit: usize)
    -> Result<Vec<Candle>>;
}

/// Partial update applied to an existing trade record. `None` leaves the
/// column untouched.
#[derive(Debug, Clone, Default)]
pub struct TradePatch {
    pub closed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub exit_price: Option<Decimal>,
    pub pnl_usd: Option<f64>,
    pub pnl_pct: Option<f64>,
    pub fees_usd: Option<f64>,
    pub exit_reason: Option<String>,
    pub status: Option<TradeStatus>,
    pub self_review: Option<Value>,
    pub indicators_exit: Option<Value>,
    pub okx_order_id: Option<String>,
    pub okx_algo_id: Option<String>,
}

#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn create(&self, trade: &TradeRecord) -> Result<Uuid>;

    async fn update(&self, trade_id: Uuid, patch: TradePatch) -> Result<()>;

    async fn get(&self, trade_id: Uuid) -> Result<Option<TradeRecord>>;

    async fn get_open(&self) -> Result<Vec<TradeRecord>>;

    async fn get_recent_closed(&self, limit: usize) -> Result<Vec<TradeRecord>>;

    async fn get_trades_since(&self, since: DateTime<Utc>) -> Result<Vec<TradeRecord>>;
}

/// One immutable playbook version as stored.
#[derive(Debug, Clone)]
pub struct PlaybookVersion {
    pub version: i32,
    pub data: Playbook,
    pub change_summary: String,
    pub triggered_by: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait PlaybookRepository: Send + Sync {
    async fn get_latest(&self) -> Result<Option<PlaybookVersion>>;

    /// Append a new version; the stored version number is max(existing) + 1
    /// and is returned.
    async fn save_version(
        &self,
        data: &Playbook,
        change_summary: &str,
        triggered_by: &str,
    ) -> Result<i32>;

    async fn get_history(&self, limit: usize) -> Result<Vec<PlaybookVersion>>;
}

#[async_trait]
pub trait ReflectionRepository: Send + Sync {
    /// Persist a reflection log row ("post_trade" or "deep").
    async fn save(&self, reflection_type: &str, trade_id: Option<Uuid>, content: Value)
    -> Result<i64>;

    /// Time of the last deep reflection, if any.
    async fn get_last_time(&self) -> Result<Option<DateTime<Utc>>>;

    /// Closed trades since the last deep reflection (all closed trades when
    /// none has run yet).
    async fn get_trades_since_last(&self) -> Result<Vec<TradeRecord>>;
}

#[async_trait]
pub trait ScreenerLogRepository: Send + Sync {
    async fn log(&self, symbol: &str, signal: bool, reason: &str, tokens_used: u64)
    -> Result<i64>;

    /// Record whether the analysis adapter agreed with a pass signal.
    async fn update_opus_agreement(&self, log_id: i64, opus_action: &str, agreed: bool)
    -> Result<()>;
}

#[async_trait]
pub trait ResearchCacheRepository: Send + Sync {
    /// Cached response for the exact query string, if newer than the TTL.
    async fn get_cached(&self, query: &str, ttl_seconds: i64) -> Result<Option<Value>>;

    async fn save(&self, query: &str, response: Value) -> Result<i64>;
}

#[async_trait]
pub trait RiskRejectionRepository: Send + Sync {
    async fn log(&self, decision: Value, failed_rules: &[String], account: Value) -> Result<i64>;
}

#[async_trait]
pub trait PerformanceSnapshotRepository: Send + Sync {
    /// `snapshot_type` is one of "hourly", "daily", "weekly".
    async fn save(&self, snapshot_type: &str, metrics: Value) -> Result<i64>;
}
