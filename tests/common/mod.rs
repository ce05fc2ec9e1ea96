//! Shared fixture: an orchestrator wired entirely against in-memory doubles.

use opustrade::application::orchestrator::{NewsScheduler, Orchestrator};
use opustrade::config::Config;
use opustrade::domain::decision::{Decision, OpusDecision};
use opustrade::domain::market::{MarketSnapshot, Regime, Ticker};
use opustrade::domain::messages::StreamMessage;
use opustrade::domain::ports::{Analyst, MessageBus, ResearchProvider, Screener};
use opustrade::domain::trading::OrderAction;
use opustrade::infrastructure::mock::{
    InMemoryBus, InMemoryPlaybookRepository, InMemoryReflectionRepository,
    InMemoryRiskRejectionRepository, InMemoryScreenerLogRepository, InMemoryTradeRepository,
    MockAnalyst, MockResearch, MockScreener,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub bus: Arc<InMemoryBus>,
    pub screener: Arc<MockScreener>,
    pub analyst: Arc<MockAnalyst>,
    pub research: Arc<MockResearch>,
    pub trade_repo: Arc<InMemoryTradeRepository>,
    pub playbook_repo: Arc<InMemoryPlaybookRepository>,
    pub risk_rejections: Arc<InMemoryRiskRejectionRepository>,
}

pub fn open_long_decision() -> OpusDecision {
    OpusDecision {
        decision: Decision {
            action: OrderAction::OpenLong,
            symbol: "BTC-USDT-SWAP".to_string(),
            size_pct: 0.02,
            entry_price: Some(50000.0),
            stop_loss: 49500.0,
            take_profit: 51500.0,
            leverage: 2.0,
            ..Default::default()
        },
        confidence: 0.85,
        strategy_used: "trend_follow".to_string(),
        reasoning: "clean breakout".to_string(),
        ..Default::default()
    }
}

pub fn harness(decision: OpusDecision, screen_signal: bool) -> Harness {
    let mut config = Config::from_env().unwrap();
    config.instruments = vec!["BTC-USDT-SWAP".to_string()];
    config.order_timeout_secs = 0;

    let bus = Arc::new(InMemoryBus::new());
    let screener = Arc::new(MockScreener::returning(screen_signal, "setup detected"));
    let analyst = Arc::new(MockAnalyst::returning(decision));
    let research = Arc::new(MockResearch::default());
    let trade_repo = Arc::new(InMemoryTradeRepository::new());
    let playbook_repo = Arc::new(InMemoryPlaybookRepository::new());
    let reflection_repo = Arc::new(InMemoryReflectionRepository::new(Arc::clone(&trade_repo)));
    let screener_log_repo = Arc::new(InMemoryScreenerLogRepository::new());
    let risk_rejections = Arc::new(InMemoryRiskRejectionRepository::new());

    let mut orchestrator = Orchestrator::new(
        config,
        Arc::clone(&bus) as Arc<dyn MessageBus>,
        Arc::clone(&screener) as Arc<dyn Screener>,
        Arc::clone(&analyst) as Arc<dyn Analyst>,
        Arc::clone(&research) as Arc<dyn ResearchProvider>,
        Arc::clone(&trade_repo) as _,
        Arc::clone(&playbook_repo) as _,
        reflection_repo as _,
        screener_log_repo as _,
        Arc::clone(&risk_rejections) as _,
    );
    // A live macro calendar would make the bypass tests date-dependent.
    orchestrator.news = NewsScheduler::with_events(Vec::new());

    Harness {
        orchestrator: Arc::new(orchestrator),
        bus,
        screener,
        analyst,
        research,
        trade_repo,
        playbook_repo,
        risk_rejections,
    }
}

pub fn snapshot(regime: Regime, price: f64, price_change_1h: f64, funding: f64) -> MarketSnapshot {
    MarketSnapshot {
        ticker: Ticker {
            symbol: "BTC-USDT-SWAP".to_string(),
            last: price,
            bid: price - 1.0,
            ask: price + 1.0,
            volume_24h: 10000.0,
            change_24h: 0.0,
        },
        indicators: HashMap::new(),
        orderbook: Default::default(),
        funding_rate: opustrade::domain::market::FundingRate {
            current: funding,
            predicted: funding,
            next_funding_time: None,
        },
        open_interest: Default::default(),
        long_short_ratio: 1.0,
        taker_buy_sell_ratio: 1.0,
        market_regime: regime,
        price_change_1h,
        oi_change_4h: 0.0,
        timestamp: chrono::Utc::now(),
    }
}

/// Push a snapshot onto the in-memory bus as the indicator service would.
pub async fn publish_snapshot(harness: &Harness, snapshot: &MarketSnapshot) {
    let payload = serde_json::to_value(snapshot).unwrap();
    harness
        .bus
        .publish(
            opustrade::domain::messages::streams::MARKET_SNAPSHOTS,
            &StreamMessage::market_snapshot(payload),
        )
        .await
        .unwrap();
}

/// Feed an account-state event through the orchestrator's mirror.
pub async fn set_equity(harness: &Harness, equity: f64) {
    let message = StreamMessage::position_update(json!({
        "event": "account",
        "account": {
            "equity": equity,
            "available_balance": equity,
            "total_pnl": 0.0,
            "daily_pnl": 0.0,
            "max_drawdown_today": 0.0,
            "timestamp": chrono::Utc::now(),
        },
    }));
    harness
        .orchestrator
        .handle_stream_event(
            opustrade::domain::messages::streams::TRADE_POSITIONS.to_string(),
            message,
        )
        .await
        .unwrap();
}

/// Feed a position close event (as the trade service publishes them).
pub async fn close_position(harness: &Harness, symbol: &str, pnl: f64) {
    let message = StreamMessage::position_update(json!({
        "event": "closed",
        "symbol": symbol,
        "pos_side": "long",
        "pnl_usd": pnl,
        "exit_price": 50100.0,
    }));
    harness
        .orchestrator
        .handle_stream_event(
            opustrade::domain::messages::streams::TRADE_POSITIONS.to_string(),
            message,
        )
        .await
        .unwrap();
}
