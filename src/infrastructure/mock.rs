//! In-memory doubles for the bus, the exchange, the LLM adapters and the
//! repositories. Used by the scenario tests and handy for running a service
//! offline.

use crate::domain::decision::{DeepReflectionResult, OpusDecision, ResearchResult, ScreenResult, TradeReview};
use crate::domain::market::{Candle, FundingRate, MarketSnapshot, OpenInterest, OrderBook, Ticker, Timeframe};
use crate::domain::messages::StreamMessage;
use crate::domain::playbook::Playbook;
use crate::domain::ports::{
    Analyst, BusCallback, ExchangeClient, MessageBus, ResearchProvider, Screener,
};
use crate::domain::repositories::{
    CandleRepository, PerformanceSnapshotRepository, PlaybookRepository, PlaybookVersion,
    ReflectionRepository, ResearchCacheRepository, RiskRejectionRepository, ScreenerLogRepository,
    TradePatch, TradeRepository,
};
use crate::domain::trading::{
    AccountState, OrderIntent, OrderResult, PosSide, Position, TradeRecord, TradeStatus,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// In-memory stream store with `>`-cursor subscription semantics.
#[derive(Default)]
pub struct InMemoryBus {
    streams: Arc<RwLock<HashMap<String, Vec<StreamMessage>>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published to a stream, for assertions.
    pub async fn published(&self, stream: &str) -> Vec<StreamMessage> {
        self.streams
            .read()
            .await
            .get(stream)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, stream: &str, message: &StreamMessage) -> Result<String> {
        let mut streams = self.streams.write().await;
        let entries = streams.entry(stream.to_string()).or_default();
        entries.push(message.clone());
        Ok(format!("{}-{}", stream, entries.len()))
    }

    async fn subscribe(
        &self,
        streams: Vec<String>,
        callback: BusCallback,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        // New-messages-only cursor per stream.
        let mut cursors: HashMap<String, usize> = HashMap::new();
        {
            let store = self.streams.read().await;
            for stream in &streams {
                cursors.insert(
                    stream.clone(),
                    store.get(stream).map(Vec::len).unwrap_or(0),
                );
            }
        }

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            let mut pending = Vec::new();
            {
                let store = self.streams.read().await;
                for stream in &streams {
                    let cursor = cursors.get_mut(stream).expect("cursor initialized above");
                    if let Some(entries) = store.get(stream) {
                        for message in entries.iter().skip(*cursor) {
                            pending.push((stream.clone(), message.clone()));
                        }
                        *cursor = entries.len();
                    }
                }
            }
            for (stream, message) in pending {
                let _ = callback(stream, message).await;
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(5)) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    async fn read_latest(&self, stream: &str) -> Result<Option<StreamMessage>> {
        Ok(self
            .streams
            .read()
            .await
            .get(stream)
            .and_then(|entries| entries.last().cloned()))
    }

    async fn ensure_group(&self, _stream: &str) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// Recording exchange double. Orders succeed unless `fail_main_order` is set.
pub struct MockExchange {
    pub placed_orders: RwLock<Vec<OrderIntent>>,
    pub algo_orders: RwLock<Vec<(String, Option<String>)>>,
    pub closed: RwLock<Vec<(String, PosSide)>>,
    pub leverage_calls: RwLock<Vec<(String, String)>>,
    pub fail_main_order: AtomicBool,
    pub fail_leverage: AtomicBool,
    pub positions: RwLock<Vec<Position>>,
    pub balance: RwLock<AccountState>,
    pub candles: RwLock<HashMap<(String, Timeframe), Vec<Candle>>>,
    order_seq: AtomicU64,
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            placed_orders: RwLock::new(Vec::new()),
            algo_orders: RwLock::new(Vec::new()),
            closed: RwLock::new(Vec::new()),
            leverage_calls: RwLock::new(Vec::new()),
            fail_main_order: AtomicBool::new(false),
            fail_leverage: AtomicBool::new(false),
            positions: RwLock::new(Vec::new()),
            balance: RwLock::new(AccountState::default()),
            candles: RwLock::new(HashMap::new()),
            order_seq: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    async fn place_order(&self, intent: &OrderIntent) -> OrderResult {
        self.placed_orders.write().await.push(intent.clone());
        if self.fail_main_order.load(Ordering::SeqCst) {
            return OrderResult::failure("mock main order failure");
        }
        let seq = self.order_seq.fetch_add(1, Ordering::SeqCst);
        OrderResult {
            success: true,
            ord_id: Some(format!("mock-ord-{}", seq)),
            algo_id: None,
            status: "submitted".to_string(),
            error_code: None,
            error_message: None,
            fill_price: None,
            fill_size: None,
            timestamp: Utc::now(),
        }
    }

    async fn place_algo_order(
        &self,
        _inst_id: &str,
        _side: &str,
        _pos_side: PosSide,
        _size: &str,
        sl_trigger_px: &str,
        tp_trigger_px: Option<&str>,
    ) -> OrderResult {
        self.algo_orders
            .write()
            .await
            .push((sl_trigger_px.to_string(), tp_trigger_px.map(str::to_string)));
        let seq = self.order_seq.fetch_add(1, Ordering::SeqCst);
        OrderResult {
            success: true,
            ord_id: None,
            algo_id: Some(format!("mock-algo-{}", seq)),
            status: "submitted".to_string(),
            error_code: None,
            error_message: None,
            fill_price: None,
            fill_size: None,
            timestamp: Utc::now(),
        }
    }

    async fn cancel_order(&self, _inst_id: &str, _ord_id: &str) -> OrderResult {
        OrderResult {
            success: true,
            ord_id: None,
            algo_id: None,
            status: "cancelled".to_string(),
            error_code: None,
            error_message: None,
            fill_price: None,
            fill_size: None,
            timestamp: Utc::now(),
        }
    }

    async fn close_position(
        &self,
        inst_id: &str,
        _mgn_mode: &str,
        pos_side: PosSide,
    ) -> OrderResult {
        self.closed
            .write()
            .await
            .push((inst_id.to_string(), pos_side));
        OrderResult {
            success: true,
            ord_id: None,
            algo_id: None,
            status: "closed".to_string(),
            error_code: None,
            error_message: None,
            fill_price: None,
            fill_size: None,
            timestamp: Utc::now(),
        }
    }

    async fn get_balance(&self) -> AccountState {
        self.balance.read().await.clone()
    }

    async fn get_positions(&self, inst_id: Option<&str>) -> Vec<Position> {
        let positions = self.positions.read().await;
        match inst_id {
            Some(id) => positions.iter().filter(|p| p.inst_id == id).cloned().collect(),
            None => positions.clone(),
        }
    }

    async fn set_leverage(&self, inst_id: &str, leverage: &str) -> Result<()> {
        self.leverage_calls
            .write()
            .await
            .push((inst_id.to_string(), leverage.to_string()));
        if self.fail_leverage.load(Ordering::SeqCst) {
            anyhow::bail!("mock leverage failure");
        }
        Ok(())
    }

    async fn get_candles(&self, inst_id: &str, timeframe: Timeframe, limit: usize) -> Vec<Candle> {
        let candles = self.candles.read().await;
        candles
            .get(&(inst_id.to_string(), timeframe))
            .map(|series| {
                let start = series.len().saturating_sub(limit);
                series[start..].to_vec()
            })
            .unwrap_or_default()
    }

    async fn get_ticker(&self, inst_id: &str) -> Ticker {
        Ticker {
            symbol: inst_id.to_string(),
            last: 50000.0,
            bid: 49999.0,
            ask: 50001.0,
            volume_24h: 10000.0,
            change_24h: 0.01,
        }
    }

    async fn get_orderbook(&self, _inst_id: &str, _depth: usize) -> OrderBook {
        OrderBook::default()
    }

    async fn get_funding_rate(&self, _inst_id: &str) -> FundingRate {
        FundingRate::default()
    }

    async fn get_open_interest(&self, _inst_id: &str) -> OpenInterest {
        OpenInterest::default()
    }

    async fn get_long_short_ratio(&self, _inst_id: &str) -> f64 {
        1.0
    }

    async fn get_taker_volume(&self, _inst_id: &str) -> f64 {
        1.0
    }
}

// ---------------------------------------------------------------------------
// LLM adapters
// ---------------------------------------------------------------------------

pub struct MockScreener {
    pub result: RwLock<ScreenResult>,
    pub calls: AtomicUsize,
}

impl MockScreener {
    pub fn returning(signal: bool, reason: &str) -> Self {
        Self {
            result: RwLock::new(ScreenResult {
                signal,
                reason: reason.to_string(),
                tokens_used: 0,
                latency_ms: 0.0,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Screener for MockScreener {
    async fn screen(&self, _snapshot: &MarketSnapshot) -> ScreenResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.read().await.clone()
    }
}

pub struct MockAnalyst {
    pub decision: RwLock<OpusDecision>,
    pub review: RwLock<TradeReview>,
    pub deep: RwLock<DeepReflectionResult>,
    pub analyze_calls: AtomicUsize,
}

impl MockAnalyst {
    pub fn returning(decision: OpusDecision) -> Self {
        Self {
            decision: RwLock::new(decision),
            review: RwLock::new(TradeReview::default()),
            deep: RwLock::new(DeepReflectionResult::default()),
            analyze_calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Analyst for MockAnalyst {
    async fn analyze(&self, _prompt: &str) -> OpusDecision {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        self.decision.read().await.clone()
    }

    async fn reflect_trade(&self, _prompt: &str) -> TradeReview {
        self.review.read().await.clone()
    }

    async fn deep_reflect(&self, _prompt: &str) -> DeepReflectionResult {
        self.deep.read().await.clone()
    }
}

#[derive(Default)]
pub struct MockResearch {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ResearchProvider for MockResearch {
    async fn research(&self, query: &str) -> ResearchResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ResearchResult::empty(query)
    }
}

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryTradeRepository {
    trades: RwLock<HashMap<Uuid, TradeRecord>>,
}

impl InMemoryTradeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TradeRepository for InMemoryTradeRepository {
    async fn create(&self, trade: &TradeRecord) -> Result<Uuid> {
        self.trades
            .write()
            .await
            .insert(trade.trade_id, trade.clone());
        Ok(trade.trade_id)
    }

    async fn update(&self, trade_id: Uuid, patch: TradePatch) -> Result<()> {
        let mut trades = self.trades.write().await;
        let Some(trade) = trades.get_mut(&trade_id) else {
            anyhow::bail!("Trade {} not found", trade_id);
        };
        if let Some(v) = patch.closed_at {
            trade.closed_at = Some(v);
        }
        if let Some(v) = patch.duration_seconds {
            trade.duration_seconds = Some(v);
        }
        if let Some(v) = patch.exit_price {
            trade.exit_price = Some(v);
        }
        if let Some(v) = patch.pnl_usd {
            trade.pnl_usd = Some(v);
        }
        if let Some(v) = patch.pnl_pct {
            trade.pnl_pct = Some(v);
        }
        if let Some(v) = patch.fees_usd {
            trade.fees_usd = Some(v);
        }
        if let Some(v) = patch.exit_reason {
            trade.exit_reason = Some(v);
        }
        if let Some(v) = patch.status {
            trade.status = v;
        }
        if let Some(v) = patch.self_review {
            trade.self_review = Some(v);
        }
        if let Some(v) = patch.indicators_exit {
            trade.indicators_exit = Some(v);
        }
        if let Some(v) = patch.okx_order_id {
            trade.okx_order_id = Some(v);
        }
        if let Some(v) = patch.okx_algo_id {
            trade.okx_algo_id = Some(v);
        }
        Ok(())
    }

    async fn get(&self, trade_id: Uuid) -> Result<Option<TradeRecord>> {
        Ok(self.trades.read().await.get(&trade_id).cloned())
    }

    async fn get_open(&self) -> Result<Vec<TradeRecord>> {
        Ok(self
            .trades
            .read()
            .await
            .values()
            .filter(|t| t.status == TradeStatus::Open)
            .cloned()
            .collect())
    }

    async fn get_recent_closed(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        let mut closed: Vec<TradeRecord> = self
            .trades
            .read()
            .await
            .values()
            .filter(|t| t.status == TradeStatus::Closed)
            .cloned()
            .collect();
        closed.sort_by_key(|t| std::cmp::Reverse(t.closed_at));
        closed.truncate(limit);
        Ok(closed)
    }

    async fn get_trades_since(&self, since: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        Ok(self
            .trades
            .read()
            .await
            .values()
            .filter(|t| t.closed_at.is_some_and(|c| c > since))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryPlaybookRepository {
    versions: RwLock<Vec<PlaybookVersion>>,
}

impl InMemoryPlaybookRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlaybookRepository for InMemoryPlaybookRepository {
    async fn get_latest(&self) -> Result<Option<PlaybookVersion>> {
        Ok(self
            .versions
            .read()
            .await
            .iter()
            .max_by_key(|v| v.version)
            .cloned())
    }

    async fn save_version(
        &self,
        data: &Playbook,
        change_summary: &str,
        triggered_by: &str,
    ) -> Result<i32> {
        let mut versions = self.versions.write().await;
        let version = versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;
        versions.push(PlaybookVersion {
            version,
            data: data.clone(),
            change_summary: change_summary.to_string(),
            triggered_by: triggered_by.to_string(),
            created_at: Utc::now(),
        });
        Ok(version)
    }

    async fn get_history(&self, limit: usize) -> Result<Vec<PlaybookVersion>> {
        let mut versions = self.versions.read().await.clone();
        versions.sort_by_key(|v| std::cmp::Reverse(v.version));
        versions.truncate(limit);
        Ok(versions)
    }
}

pub struct InMemoryReflectionRepository {
    rows: RwLock<Vec<(i64, String, Option<Uuid>, Value, DateTime<Utc>)>>,
    trades: Arc<InMemoryTradeRepository>,
    next_id: AtomicU64,
}

impl InMemoryReflectionRepository {
    pub fn new(trades: Arc<InMemoryTradeRepository>) -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            trades,
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl ReflectionRepository for InMemoryReflectionRepository {
    async fn save(
        &self,
        reflection_type: &str,
        trade_id: Option<Uuid>,
        content: Value,
    ) -> Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64;
        self.rows.write().await.push((
            id,
            reflection_type.to_string(),
            trade_id,
            content,
            Utc::now(),
        ));
        Ok(id)
    }

    async fn get_last_time(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|(_, kind, _, _, _)| kind == "deep")
            .map(|(_, _, _, _, at)| *at)
            .max())
    }

    async fn get_trades_since_last(&self) -> Result<Vec<TradeRecord>> {
        let since = self
            .get_last_time()
            .await?
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.trades.get_trades_since(since).await
    }
}

#[derive(Default)]
pub struct InMemoryScreenerLogRepository {
    pub rows: RwLock<Vec<(i64, String, bool, String, Option<String>, Option<bool>)>>,
    next_id: AtomicU64,
}

impl InMemoryScreenerLogRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScreenerLogRepository for InMemoryScreenerLogRepository {
    async fn log(&self, symbol: &str, signal: bool, reason: &str, _tokens_used: u64) -> Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1;
        self.rows.write().await.push((
            id,
            symbol.to_string(),
            signal,
            reason.to_string(),
            None,
            None,
        ));
        Ok(id)
    }

    async fn update_opus_agreement(
        &self,
        log_id: i64,
        opus_action: &str,
        agreed: bool,
    ) -> Result<()> {
        let mut rows = self.rows.write().await;
        if let Some(row) = rows.iter_mut().find(|(id, ..)| *id == log_id) {
            row.4 = Some(opus_action.to_string());
            row.5 = Some(agreed);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryResearchCacheRepository {
    entries: RwLock<HashMap<String, (Value, DateTime<Utc>)>>,
}

impl InMemoryResearchCacheRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResearchCacheRepository for InMemoryResearchCacheRepository {
    async fn get_cached(&self, query: &str, ttl_seconds: i64) -> Result<Option<Value>> {
        let entries = self.entries.read().await;
        Ok(entries.get(query).and_then(|(value, at)| {
            let age = (Utc::now() - *at).num_seconds();
            (age < ttl_seconds).then(|| value.clone())
        }))
    }

    async fn save(&self, query: &str, response: Value) -> Result<i64> {
        self.entries
            .write()
            .await
            .insert(query.to_string(), (response, Utc::now()));
        Ok(1)
    }
}

#[derive(Default)]
pub struct InMemoryRiskRejectionRepository {
    pub rows: RwLock<Vec<(Value, Vec<String>, Value)>>,
}

impl InMemoryRiskRejectionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RiskRejectionRepository for InMemoryRiskRejectionRepository {
    async fn log(&self, decision: Value, failed_rules: &[String], account: Value) -> Result<i64> {
        let mut rows = self.rows.write().await;
        rows.push((decision, failed_rules.to_vec(), account));
        Ok(rows.len() as i64)
    }
}

#[derive(Default)]
pub struct InMemoryCandleRepository {
    pub rows: RwLock<Vec<Candle>>,
}

impl InMemoryCandleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CandleRepository for InMemoryCandleRepository {
    async fn upsert(&self, candle: &Candle) -> Result<()> {
        let mut rows = self.rows.write().await;
        if let Some(existing) = rows.iter_mut().find(|c| {
            c.time == candle.time && c.symbol == candle.symbol && c.timeframe == candle.timeframe
        }) {
            *existing = candle.clone();
        } else {
            rows.push(candle.clone());
        }
        Ok(())
    }

    async fn bulk_insert(&self, candles: &[Candle]) -> Result<()> {
        let mut rows = self.rows.write().await;
        for candle in candles {
            let exists = rows.iter().any(|c| {
                c.time == candle.time
                    && c.symbol == candle.symbol
                    && c.timeframe == candle.timeframe
            });
            if !exists {
                rows.push(candle.clone());
            }
        }
        Ok(())
    }

    async fn get_recent(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let mut matching: Vec<Candle> = self
            .rows
            .read()
            .await
            .iter()
            .filter(|c| c.symbol == symbol && c.timeframe == timeframe)
            .cloned()
            .collect();
        matching.sort_by_key(|c| std::cmp::Reverse(c.time));
        matching.truncate(limit);
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryPerformanceSnapshotRepository {
    pub rows: RwLock<Vec<(String, Value)>>,
}

impl InMemoryPerformanceSnapshotRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PerformanceSnapshotRepository for InMemoryPerformanceSnapshotRepository {
    async fn save(&self, snapshot_type: &str, metrics: Value) -> Result<i64> {
        let mut rows = self.rows.write().await;
        rows.push((snapshot_type.to_string(), metrics));
        Ok(rows.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_bus_publish_and_read_latest() {
        let bus = InMemoryBus::new();
        let first = StreamMessage::market_alert(json!({"n": 1}));
        let second = StreamMessage::market_alert(json!({"n": 2}));
        bus.publish("market:alerts", &first).await.unwrap();
        bus.publish("market:alerts", &second).await.unwrap();

        let latest = bus.read_latest("market:alerts").await.unwrap().unwrap();
        assert_eq!(latest.msg_id, second.msg_id);
        assert_eq!(bus.published("market:alerts").await.len(), 2);
    }

    #[tokio::test]
    async fn test_playbook_versions_are_monotonic() {
        let repo = InMemoryPlaybookRepository::new();
        let playbook = Playbook::default();
        assert_eq!(repo.save_version(&playbook, "a", "test").await.unwrap(), 1);
        assert_eq!(repo.save_version(&playbook, "b", "test").await.unwrap(), 2);
        assert_eq!(repo.save_version(&playbook, "c", "test").await.unwrap(), 3);
        let latest = repo.get_latest().await.unwrap().unwrap();
        assert_eq!(latest.version, 3);
        assert_eq!(latest.change_summary, "c");
    }

    #[tokio::test]
    async fn test_research_cache_ttl() {
        let cache = InMemoryResearchCacheRepository::new();
        cache.save("query", json!({"a": 1})).await.unwrap();
        assert!(cache.get_cached("query", 3600).await.unwrap().is_some());
        assert!(cache.get_cached("other", 3600).await.unwrap().is_none());
        // TTL of zero seconds rejects everything
        assert!(cache.get_cached("query", 0).await.unwrap().is_none());
    }
}
