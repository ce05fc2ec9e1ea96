//! Orchestrator decision state machine.
//!
//! One cycle per instrument every `DECISION_CYCLE_SECONDS`:
//! collect → screen → research → analyze → risk gate → execute → confirm →
//! journal → reflect. A background subscriber mirrors fills, positions and
//! account state and drives the closing side-channel. Errors inside a cycle
//! are contained; the cycle logs and returns to IDLE.

use crate::application::orchestrator::news::NewsScheduler;
use crate::application::orchestrator::playbook_manager::PlaybookManager;
use crate::application::orchestrator::prompt_builder::PromptBuilder;
use crate::application::orchestrator::reflection::ReflectionEngine;
use crate::application::orchestrator::risk_gate::RiskGate;
use crate::config::Config;
use crate::domain::decision::OpusDecision;
use crate::domain::market::MarketSnapshot;
use crate::domain::messages::{StreamMessage, message_types, sources, streams};
use crate::domain::ports::{
    Analyst, BusCallback, MessageBus, ResearchProvider, Screener,
};
use crate::domain::repositories::{
    PlaybookRepository, ReflectionRepository, RiskRejectionRepository, ScreenerLogRepository,
    TradePatch, TradeRepository,
};
use crate::domain::trading::{
    AccountState, Direction, OrderAction, OrderIntent, OrderSide, OrderType, PosSide, Position,
    TradeRecord, TradeStatus,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const PRICE_CHANGE_BYPASS: f64 = 0.03;
const FUNDING_RATE_BYPASS: f64 = 0.0005;
const OI_CHANGE_RESEARCH: f64 = 0.10;
const NEWS_WINDOW_MINUTES: i64 = 30;
const RECENT_TRADES_IN_PROMPT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Collecting,
    Screening,
    Researching,
    Analyzing,
    RiskCheck,
    Executing,
    Confirming,
    Journaling,
    Reflecting,
    Halted,
    Cooldown,
}

pub struct Orchestrator {
    config: Config,
    bus: Arc<dyn MessageBus>,
    screener: Arc<dyn Screener>,
    analyst: Arc<dyn Analyst>,
    research: Arc<dyn ResearchProvider>,
    trade_repo: Arc<dyn TradeRepository>,
    screener_log_repo: Arc<dyn ScreenerLogRepository>,
    risk_rejection_repo: Arc<dyn RiskRejectionRepository>,
    playbook_manager: Arc<PlaybookManager>,
    pub reflection: Arc<ReflectionEngine>,
    pub news: NewsScheduler,
    prompts: PromptBuilder,
    pub risk_gate: Arc<RwLock<RiskGate>>,

    state: RwLock<OrchestratorState>,
    positions: RwLock<HashMap<(String, PosSide), Position>>,
    account: RwLock<AccountState>,
    decision_trades: RwLock<HashMap<String, Uuid>>,
    pending_fills: Mutex<HashMap<String, oneshot::Sender<Map<String, Value>>>>,
    trades_since_reflection: AtomicU32,
    last_reflection: RwLock<Option<DateTime<Utc>>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        bus: Arc<dyn MessageBus>,
        screener: Arc<dyn Screener>,
        analyst: Arc<dyn Analyst>,
        research: Arc<dyn ResearchProvider>,
        trade_repo: Arc<dyn TradeRepository>,
        playbook_repo: Arc<dyn PlaybookRepository>,
        reflection_repo: Arc<dyn ReflectionRepository>,
        screener_log_repo: Arc<dyn ScreenerLogRepository>,
        risk_rejection_repo: Arc<dyn RiskRejectionRepository>,
    ) -> Self {
        let playbook_manager = Arc::new(PlaybookManager::new(playbook_repo));
        let reflection = Arc::new(ReflectionEngine::new(
            Arc::clone(&analyst),
            Arc::clone(&playbook_manager),
            Arc::clone(&trade_repo),
            reflection_repo,
            Arc::clone(&bus),
        ));
        let risk_gate = Arc::new(RwLock::new(RiskGate::new(config.risk.clone())));
        Self {
            config,
            bus,
            screener,
            analyst,
            research,
            trade_repo,
            screener_log_repo,
            risk_rejection_repo,
            playbook_manager,
            reflection,
            news: NewsScheduler::new(),
            prompts: PromptBuilder::new(),
            risk_gate,
            state: RwLock::new(OrchestratorState::Idle),
            positions: RwLock::new(HashMap::new()),
            account: RwLock::new(AccountState::default()),
            decision_trades: RwLock::new(HashMap::new()),
            pending_fills: Mutex::new(HashMap::new()),
            trades_since_reflection: AtomicU32::new(0),
            last_reflection: RwLock::new(None),
        }
    }

    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    async fn set_state(&self, next: OrchestratorState) {
        let mut state = self.state.write().await;
        if *state != next {
            debug!(from = ?*state, to = ?next, "State transition");
            *state = next;
        }
    }

    pub async fn account(&self) -> AccountState {
        self.account.read().await.clone()
    }

    pub async fn open_positions(&self) -> Vec<Position> {
        self.positions.read().await.values().cloned().collect()
    }

    /// Main loop: background fill/position subscriber plus the periodic
    /// per-instrument decision cycle.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        {
            let mut last = self.last_reflection.write().await;
            if last.is_none() {
                *last = Some(Utc::now());
            }
        }

        let subscriber = Arc::clone(&self);
        let callback: BusCallback = Arc::new(move |stream, message| {
            let orchestrator = Arc::clone(&subscriber);
            Box::pin(async move { orchestrator.handle_stream_event(stream, message).await })
        });
        let bus = Arc::clone(&self.bus);
        let sub_shutdown = shutdown.clone();
        let subscription = tokio::spawn(async move {
            if let Err(e) = bus
                .subscribe(
                    vec![
                        streams::TRADE_FILLS.to_string(),
                        streams::TRADE_POSITIONS.to_string(),
                    ],
                    callback,
                    sub_shutdown,
                )
                .await
            {
                error!(error = %e, "Fill/position subscription ended with error");
            }
        });

        let mut cycle = tokio::time::interval(Duration::from_secs(self.config.decision_cycle_secs));
        cycle.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        cycle.tick().await;

        let mut shutdown_rx = shutdown;
        info!(instruments = ?self.config.instruments, "Orchestrator running");
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = cycle.tick() => {
                    for instrument in self.config.instruments.clone() {
                        if let Err(e) = self.run_cycle(&instrument).await {
                            error!(instrument, error = %e, "Decision cycle failed");
                            self.set_state(OrchestratorState::Idle).await;
                        }
                    }
                }
            }
        }
        subscription.abort();
        info!("Orchestrator stopped");
    }

    /// One decision cycle for one instrument.
    pub async fn run_cycle(&self, instrument: &str) -> Result<()> {
        match self.state().await {
            OrchestratorState::Halted => {
                debug!(instrument, "Halted; skipping cycle");
                return Ok(());
            }
            OrchestratorState::Cooldown => {
                let cleared = self.risk_gate.write().await.clear_expired_cooldown();
                if !cleared {
                    debug!(instrument, "Cooling down; skipping cycle");
                    return Ok(());
                }
                self.set_state(OrchestratorState::Idle).await;
            }
            _ => {}
        }

        // COLLECTING
        self.set_state(OrchestratorState::Collecting).await;
        let Some(snapshot) = self.latest_snapshot(instrument).await? else {
            debug!(instrument, "No snapshot available");
            self.set_state(OrchestratorState::Idle).await;
            return Ok(());
        };
        let all_positions = self.open_positions().await;
        let instrument_positions: Vec<Position> = all_positions
            .iter()
            .filter(|p| p.inst_id == instrument)
            .cloned()
            .collect();
        let account = self.account().await;

        // SCREENING
        let mut screen_log_id = None;
        if self.config.screener_enabled
            && !self.should_bypass_screener(&snapshot, &instrument_positions)
        {
            self.set_state(OrchestratorState::Screening).await;
            let screen = self.screener.screen(&snapshot).await;
            match self
                .screener_log_repo
                .log(instrument, screen.signal, &screen.reason, screen.tokens_used)
                .await
            {
                Ok(id) => screen_log_id = Some(id),
                Err(e) => warn!(error = %e, "Screen log write failed"),
            }
            info!(instrument, signal = screen.signal, reason = %screen.reason, "Screen complete");
            if !screen.signal {
                self.set_state(OrchestratorState::Idle).await;
                return Ok(());
            }
        }

        // RESEARCHING
        let research = if self.should_research(&snapshot) {
            self.set_state(OrchestratorState::Researching).await;
            let query = self.prompts.build_research_query(&snapshot);
            let result = self.research.research(&query).await;
            Some(serde_json::to_value(&result)?)
        } else {
            None
        };

        // ANALYZING
        self.set_state(OrchestratorState::Analyzing).await;
        let recent_trades = self
            .trade_repo
            .get_recent_closed(RECENT_TRADES_IN_PROMPT)
            .await
            .unwrap_or_default();
        let playbook = self.playbook_manager.get_latest().await?;
        let prompt = self.prompts.build_analysis_prompt(
            &snapshot,
            &instrument_positions,
            &account,
            research.as_ref(),
            &playbook,
            &recent_trades,
        );
        let decision = self.analyst.analyze(&prompt).await;
        let decision_id = Uuid::new_v4().to_string();

        if let Some(log_id) = screen_log_id {
            let agreed = !decision.is_hold();
            if let Err(e) = self
                .screener_log_repo
                .update_opus_agreement(log_id, decision.decision.action.as_str(), agreed)
                .await
            {
                warn!(error = %e, "Screen agreement update failed");
            }
        }

        if decision.is_hold() {
            info!(instrument, "Decision: HOLD");
            self.publish_decision(&decision_id, instrument, &decision).await?;
            self.set_state(OrchestratorState::Idle).await;
            return Ok(());
        }

        // RISK_CHECK
        self.set_state(OrchestratorState::RiskCheck).await;
        let risk_result = self
            .risk_gate
            .write()
            .await
            .validate(&decision, &account, &all_positions);
        if !risk_result.approved {
            let failed = risk_result.failed_rules();
            warn!(instrument, ?failed, "Risk gate rejected decision");
            if let Err(e) = self
                .risk_rejection_repo
                .log(
                    serde_json::to_value(&decision)?,
                    &failed,
                    serde_json::to_value(&account)?,
                )
                .await
            {
                warn!(error = %e, "Risk rejection log failed");
            }
            if risk_result.requires_halt() {
                self.halt(&format!("risk gate: {}", failed.join(", "))).await;
            } else {
                self.set_state(OrchestratorState::Idle).await;
            }
            return Ok(());
        }

        // EXECUTING
        self.set_state(OrchestratorState::Executing).await;
        let intent = self
            .build_intent(&decision, &snapshot, &account, instrument, &decision_id)
            .await;
        let fill_rx = self.register_fill_waiter(&decision_id).await;
        self.bus
            .publish(
                streams::TRADE_ORDERS,
                &StreamMessage::trade_order(serde_json::to_value(&intent)?),
            )
            .await?;
        self.publish_decision(&decision_id, instrument, &decision).await?;
        info!(
            instrument,
            action = %intent.action,
            size = %intent.size,
            decision_id,
            "Order intent published"
        );

        // CONFIRMING
        self.set_state(OrchestratorState::Confirming).await;
        let fill = match tokio::time::timeout(
            Duration::from_secs(self.config.order_timeout_secs),
            fill_rx,
        )
        .await
        {
            Ok(Ok(fill)) => Some(fill),
            _ => {
                warn!(instrument, decision_id, "No fill within timeout; journaling from intent");
                self.pending_fills.lock().await.remove(&decision_id);
                None
            }
        };

        // JOURNALING (open actions start a trade lifecycle; close/adjust
        // outcomes reconcile through the position side-channel)
        if intent.action.is_open() {
            self.set_state(OrchestratorState::Journaling).await;
            let record =
                self.build_trade_record(&decision, &snapshot, &intent, research, fill.as_ref());
            let trade_id = self.trade_repo.create(&record).await?;
            self.decision_trades
                .write()
                .await
                .insert(decision_id.clone(), trade_id);
            info!(instrument, %trade_id, "Trade journaled");
        }

        // REFLECTING
        if self.should_reflect().await {
            self.set_state(OrchestratorState::Reflecting).await;
            if let Err(e) = self.reflection.periodic_deep_reflection().await {
                warn!(error = %e, "Deep reflection failed");
            }
            self.trades_since_reflection.store(0, Ordering::SeqCst);
            *self.last_reflection.write().await = Some(Utc::now());
        }

        self.set_state(OrchestratorState::Idle).await;
        Ok(())
    }

    /// Freshest snapshot for this instrument, if the head of the stream
    /// belongs to it.
    async fn latest_snapshot(&self, instrument: &str) -> Result<Option<MarketSnapshot>> {
        let Some(message) = self.bus.read_latest(streams::MARKET_SNAPSHOTS).await? else {
            return Ok(None);
        };
        if message.message_type != message_types::MARKET_SNAPSHOT {
            return Ok(None);
        }
        let snapshot: MarketSnapshot =
            serde_json::from_value(Value::Object(message.payload.clone()))
                .context("Malformed market snapshot")?;
        if snapshot.ticker.symbol != instrument {
            return Ok(None);
        }
        Ok(Some(snapshot))
    }

    fn should_bypass_screener(&self, snapshot: &MarketSnapshot, positions: &[Position]) -> bool {
        if self.config.screener_bypass_on_position && !positions.is_empty() {
            info!("Screener bypass: open position");
            return true;
        }
        if self.config.screener_bypass_on_news && self.news.is_news_window(NEWS_WINDOW_MINUTES) {
            info!("Screener bypass: news window");
            return true;
        }
        if snapshot.price_change_1h.abs() > PRICE_CHANGE_BYPASS {
            info!(change = snapshot.price_change_1h, "Screener bypass: price move");
            return true;
        }
        if snapshot.funding_rate.current.abs() > FUNDING_RATE_BYPASS {
            info!(funding = snapshot.funding_rate.current, "Screener bypass: funding rate");
            return true;
        }
        false
    }

    fn should_research(&self, snapshot: &MarketSnapshot) -> bool {
        self.news.is_news_window(NEWS_WINDOW_MINUTES)
            || snapshot.price_change_1h.abs() > PRICE_CHANGE_BYPASS
            || snapshot.funding_rate.current.abs() > FUNDING_RATE_BYPASS
            || snapshot.oi_change_4h.abs() > OI_CHANGE_RESEARCH
    }

    async fn publish_decision(
        &self,
        decision_id: &str,
        instrument: &str,
        decision: &OpusDecision,
    ) -> Result<()> {
        let message = StreamMessage::opus_decision(json!({
            "decision_id": decision_id,
            "symbol": instrument,
            "action": decision.decision.action.as_str(),
            "confidence": decision.confidence,
            "strategy_used": decision.strategy_used,
            "reasoning": decision.reasoning,
            "analysis": serde_json::to_value(&decision.analysis)?,
            "decision": serde_json::to_value(&decision.decision)?,
        }));
        self.bus.publish(streams::OPUS_DECISIONS, &message).await?;
        Ok(())
    }

    /// Map an approved decision onto a concrete order intent.
    async fn build_intent(
        &self,
        decision: &OpusDecision,
        snapshot: &MarketSnapshot,
        account: &AccountState,
        instrument: &str,
        decision_id: &str,
    ) -> OrderIntent {
        let action = decision.decision.action;
        let entry_price = decision
            .decision
            .entry_price
            .filter(|p| *p > 0.0)
            .unwrap_or(snapshot.ticker.last);
        let leverage = decision.decision.leverage.max(1.0);

        // Position side follows the action for opens, the held side for
        // close/adjust.
        let held_side = self
            .positions
            .read()
            .await
            .values()
            .find(|p| p.inst_id == instrument)
            .map(|p| p.pos_side)
            .unwrap_or(PosSide::Long);
        let (side, pos_side) = match action {
            OrderAction::OpenLong => (OrderSide::Buy, PosSide::Long),
            OrderAction::OpenShort => (OrderSide::Sell, PosSide::Short),
            OrderAction::Add => match held_side {
                PosSide::Long => (OrderSide::Buy, PosSide::Long),
                PosSide::Short => (OrderSide::Sell, PosSide::Short),
            },
            OrderAction::Close | OrderAction::Reduce | OrderAction::Hold => match held_side {
                PosSide::Long => (OrderSide::Sell, PosSide::Long),
                PosSide::Short => (OrderSide::Buy, PosSide::Short),
            },
        };

        // Margin fraction of equity, scaled by leverage, converted to
        // contract size at the entry price.
        let notional = account.equity * decision.decision.size_pct * leverage;
        let size = if entry_price > 0.0 {
            notional / entry_price
        } else {
            0.0
        };

        let order_type = if decision.decision.order_type == "limit" {
            OrderType::Limit
        } else {
            OrderType::Market
        };
        let price_str = |v: f64| (v > 0.0).then(|| format!("{}", v));

        OrderIntent {
            action,
            symbol: instrument.to_string(),
            side,
            pos_side,
            order_type,
            size: format!("{:.6}", size),
            limit_price: decision.decision.limit_price.and_then(price_str),
            stop_loss: price_str(decision.decision.stop_loss),
            take_profit: price_str(decision.decision.take_profit),
            leverage: format!("{}", leverage),
            strategy_used: decision.strategy_used.clone(),
            confidence: decision.confidence,
            reasoning: decision.reasoning.clone(),
            decision_id: decision_id.to_string(),
        }
    }

    async fn register_fill_waiter(
        &self,
        decision_id: &str,
    ) -> oneshot::Receiver<Map<String, Value>> {
        let (tx, rx) = oneshot::channel();
        self.pending_fills
            .lock()
            .await
            .insert(decision_id.to_string(), tx);
        rx
    }

    fn build_trade_record(
        &self,
        decision: &OpusDecision,
        snapshot: &MarketSnapshot,
        intent: &OrderIntent,
        research: Option<Value>,
        fill: Option<&Map<String, Value>>,
    ) -> TradeRecord {
        let direction = if intent.action == OrderAction::OpenShort {
            Direction::Short
        } else {
            Direction::Long
        };
        let mut record = TradeRecord::open(intent.symbol.clone(), direction);

        let fill_price = fill
            .and_then(|f| f.get("fill_price"))
            .and_then(Value::as_f64);
        let entry = fill_price
            .or(decision.decision.entry_price)
            .filter(|p| *p > 0.0)
            .unwrap_or(snapshot.ticker.last);
        record.entry_price = Decimal::from_f64(entry).unwrap_or(Decimal::ZERO);
        record.stop_loss = Decimal::from_f64(decision.decision.stop_loss).unwrap_or(Decimal::ZERO);
        record.take_profit = Decimal::from_f64(decision.decision.take_profit);
        record.size = Decimal::from_str(&intent.size).unwrap_or(Decimal::ZERO);
        record.size_pct = Some(decision.decision.size_pct);
        record.leverage = decision.decision.leverage.max(1.0);
        record.strategy_used = decision.strategy_used.clone();
        record.confidence_at_entry = decision.confidence;
        record.market_regime = snapshot.market_regime.to_string();
        record.opus_reasoning = decision.reasoning.clone();
        record.indicators_entry = serde_json::to_value(&snapshot.indicators).ok();
        record.research_context = research;
        record.okx_order_id = fill
            .and_then(|f| f.get("ord_id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        record.okx_algo_id = fill
            .and_then(|f| f.get("algo_id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        record
    }

    async fn should_reflect(&self) -> bool {
        let trades = self.trades_since_reflection.load(Ordering::SeqCst);
        if trades >= self.config.reflection_interval_trades {
            return true;
        }
        if trades == 0 {
            return false;
        }
        let last = *self.last_reflection.read().await;
        match last {
            Some(at) => {
                (Utc::now() - at).num_hours() >= self.config.reflection_interval_hours
            }
            None => false,
        }
    }

    /// Terminal stop. Only operator intervention resumes trading.
    pub async fn halt(&self, reason: &str) {
        error!(reason, "HALTING trading");
        self.set_state(OrchestratorState::Halted).await;
        let alert = StreamMessage::system_alert(
            sources::ORCHESTRATOR,
            json!({
                "severity": "CRITICAL",
                "reason": reason,
                "halted": true,
            }),
        );
        if let Err(e) = self.bus.publish(streams::SYSTEM_ALERTS, &alert).await {
            error!(error = %e, "Halt alert publish failed");
        }
    }

    /// Background subscriber callback for `trade:fills` / `trade:positions`.
    pub async fn handle_stream_event(&self, stream: String, message: StreamMessage) -> Result<()> {
        match stream.as_str() {
            streams::TRADE_FILLS => self.handle_fill(message).await,
            streams::TRADE_POSITIONS => self.handle_position_event(message).await,
            other => {
                debug!(stream = other, "Ignoring stream event");
                Ok(())
            }
        }
    }

    async fn handle_fill(&self, message: StreamMessage) -> Result<()> {
        let Some(decision_id) = message.payload_str("decision_id").map(str::to_string) else {
            return Ok(());
        };

        if let Some(waiter) = self.pending_fills.lock().await.remove(&decision_id) {
            let _ = waiter.send(message.payload.clone());
            return Ok(());
        }

        // Duplicate delivery after the cycle finished: update the existing
        // record rather than creating anything new.
        let trade_id = self
            .decision_trades
            .read()
            .await
            .get(&decision_id)
            .copied();
        if let Some(trade_id) = trade_id {
            let patch = TradePatch {
                okx_order_id: message
                    .payload
                    .get("ord_id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                okx_algo_id: message
                    .payload
                    .get("algo_id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                ..Default::default()
            };
            self.trade_repo.update(trade_id, patch).await?;
            debug!(decision_id, %trade_id, "Duplicate fill reconciled");
        }
        Ok(())
    }

    async fn handle_position_event(&self, message: StreamMessage) -> Result<()> {
        match message.payload_str("event") {
            Some("account") => {
                if let Some(raw) = message.payload.get("account") {
                    if let Ok(account) = serde_json::from_value::<AccountState>(raw.clone()) {
                        self.risk_gate.write().await.observe_equity(account.equity);
                        *self.account.write().await = account;
                    }
                }
                Ok(())
            }
            Some("update") => {
                if let Some(raw) = message.payload.get("position") {
                    if let Ok(position) = serde_json::from_value::<Position>(raw.clone()) {
                        self.positions
                            .write()
                            .await
                            .insert((position.inst_id.clone(), position.pos_side), position);
                    }
                }
                Ok(())
            }
            Some("closed") => self.on_position_closed(&message.payload).await,
            _ => Ok(()),
        }
    }

    /// Closing side-channel: journal the close, update the risk gate,
    /// enter cooldown when the loss streak trips, run post-trade reflection.
    async fn on_position_closed(&self, payload: &Map<String, Value>) -> Result<()> {
        let symbol = payload.get("symbol").and_then(Value::as_str).unwrap_or("");
        let pos_side = payload
            .get("pos_side")
            .and_then(Value::as_str)
            .and_then(|s| PosSide::from_str(s).ok())
            .unwrap_or(PosSide::Long);
        let pnl = payload.get("pnl_usd").and_then(Value::as_f64).unwrap_or(0.0);
        let exit_price = payload.get("exit_price").and_then(Value::as_f64);

        self.positions
            .write()
            .await
            .remove(&(symbol.to_string(), pos_side));

        let direction = match pos_side {
            PosSide::Long => Direction::Long,
            PosSide::Short => Direction::Short,
        };
        let open_trade = self
            .trade_repo
            .get_open()
            .await?
            .into_iter()
            .find(|t| t.symbol == symbol && t.direction == direction);

        if let Some(trade) = open_trade {
            let now = Utc::now();
            let entry_notional = (trade.entry_price * trade.size)
                .abs()
                .to_f64()
                .unwrap_or(0.0);
            let patch = TradePatch {
                closed_at: Some(now),
                duration_seconds: trade.opened_at.map(|at| (now - at).num_seconds()),
                exit_price: exit_price.and_then(Decimal::from_f64),
                pnl_usd: Some(pnl),
                pnl_pct: (entry_notional > 0.0).then(|| pnl / entry_notional),
                exit_reason: Some("position_closed".to_string()),
                status: Some(TradeStatus::Closed),
                ..Default::default()
            };
            self.trade_repo.update(trade.trade_id, patch).await?;
            info!(symbol, pnl, trade_id = %trade.trade_id, "Trade closed");

            {
                let mut gate = self.risk_gate.write().await;
                gate.update_on_trade_close(pnl);
                if gate.in_cooldown() {
                    drop(gate);
                    self.set_state(OrchestratorState::Cooldown).await;
                }
            }
            self.trades_since_reflection.fetch_add(1, Ordering::SeqCst);

            if let Ok(Some(updated)) = self.trade_repo.get(trade.trade_id).await {
                if let Err(e) = self.reflection.post_trade_reflection(&updated).await {
                    warn!(error = %e, "Post-trade reflection failed");
                }
            }
        } else {
            // A close with no journal entry: the risk counters still move.
            let mut gate = self.risk_gate.write().await;
            gate.update_on_trade_close(pnl);
            if gate.in_cooldown() {
                drop(gate);
                self.set_state(OrchestratorState::Cooldown).await;
            }
            warn!(symbol, pnl, "Position closed with no open trade record");
        }
        Ok(())
    }
}
