//! Ports to external collaborators: the message bus, the exchange, and the
//! LLM-backed screening / analysis / research adapters.
//!
//! Everything is an object-safe async trait so services can be wired against
//! the real infrastructure or the in-memory doubles in `infrastructure::mock`.

use crate::domain::decision::{DeepReflectionResult, OpusDecision, ResearchResult, ScreenResult, TradeReview};
use crate::domain::market::{Candle, FundingRate, MarketSnapshot, OpenInterest, OrderBook, Ticker, Timeframe};
use crate::domain::messages::StreamMessage;
use crate::domain::trading::{AccountState, OrderIntent, OrderResult, PosSide, Position};
use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::watch;

/// Callback invoked per delivered stream entry. Returning an error leaves the
/// entry unacknowledged so it is redelivered on the next poll.
pub type BusCallback =
    Arc<dyn Fn(String, StreamMessage) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Reliable fan-out/fan-in between services (Redis Streams model).
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Append a message to a stream; returns the bus-assigned entry id.
    async fn publish(&self, stream: &str, message: &StreamMessage) -> Result<String>;

    /// Blocking consumer-group read loop. Exits cleanly when `shutdown`
    /// flips to true.
    async fn subscribe(
        &self,
        streams: Vec<String>,
        callback: BusCallback,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()>;

    /// Non-destructive peek at the newest entry of a stream.
    async fn read_latest(&self, stream: &str) -> Result<Option<StreamMessage>>;

    /// Idempotent consumer-group creation.
    async fn ensure_group(&self, stream: &str) -> Result<()>;
}

/// Exchange adapter surface (REST). Read methods return neutral defaults on
/// persistent failure; write methods surface errors and are never retried.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn place_order(&self, intent: &OrderIntent) -> OrderResult;

    /// OCO TP/SL algo order attached to an open position.
    async fn place_algo_order(
        &self,
        inst_id: &str,
        side: &str,
        pos_side: PosSide,
        size: &str,
        sl_trigger_px: &str,
        tp_trigger_px: Option<&str>,
    ) -> OrderResult;

    async fn cancel_order(&self, inst_id: &str, ord_id: &str) -> OrderResult;

    async fn close_position(&self, inst_id: &str, mgn_mode: &str, pos_side: PosSide)
    -> OrderResult;

    async fn get_balance(&self) -> AccountState;

    async fn get_positions(&self, inst_id: Option<&str>) -> Vec<Position>;

    async fn set_leverage(&self, inst_id: &str, leverage: &str) -> Result<()>;

    async fn get_candles(&self, inst_id: &str, timeframe: Timeframe, limit: usize) -> Vec<Candle>;

    async fn get_ticker(&self, inst_id: &str) -> Ticker;

    async fn get_orderbook(&self, inst_id: &str, depth: usize) -> OrderBook;

    async fn get_funding_rate(&self, inst_id: &str) -> FundingRate;

    async fn get_open_interest(&self, inst_id: &str) -> OpenInterest;

    async fn get_long_short_ratio(&self, inst_id: &str) -> f64;

    async fn get_taker_volume(&self, inst_id: &str) -> f64;
}

/// Fast market screener. Fail-open: adapter failures return `signal = true`.
#[async_trait]
pub trait Screener: Send + Sync {
    async fn screen(&self, snapshot: &MarketSnapshot) -> ScreenResult;
}

/// Full analysis + reflection adapter. All methods degrade to neutral
/// defaults (HOLD / empty review) on timeout or malformed output.
#[async_trait]
pub trait Analyst: Send + Sync {
    async fn analyze(&self, prompt: &str) -> OpusDecision;

    async fn reflect_trade(&self, prompt: &str) -> TradeReview;

    async fn deep_reflect(&self, prompt: &str) -> DeepReflectionResult;
}

/// External research provider with caching semantics behind the adapter.
#[async_trait]
pub trait ResearchProvider: Send + Sync {
    async fn research(&self, query: &str) -> ResearchResult;
}
