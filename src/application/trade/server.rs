//! Trade service: consumes `trade:orders`, drives the execution pipeline,
//! mirrors private-WS state and publishes fills/positions back to the bus.

use crate::application::trade::executor::OrderExecutor;
use crate::application::trade::position_manager::PositionManager;
use crate::config::Config;
use crate::domain::messages::{StreamMessage, streams};
use crate::domain::ports::{BusCallback, ExchangeClient, MessageBus};
use crate::domain::trading::{AccountState, OrderIntent};
use crate::infrastructure::okx::PrivateFeedEvent;
use crate::infrastructure::okx::rest::{field_f64, field_str};
use anyhow::Result;
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{error, info, warn};

pub struct TradeServer {
    config: Config,
    bus: Arc<dyn MessageBus>,
    exchange: Arc<dyn ExchangeClient>,
    executor: OrderExecutor,
    pub position_manager: Arc<PositionManager>,
    account: RwLock<AccountState>,
    seen_decisions: RwLock<HashSet<String>>,
}

impl TradeServer {
    pub fn new(config: Config, bus: Arc<dyn MessageBus>, exchange: Arc<dyn ExchangeClient>) -> Self {
        let executor = OrderExecutor::new(Arc::clone(&exchange));
        let position_manager = Arc::new(PositionManager::new(Arc::clone(&bus)));
        Self {
            config,
            bus,
            exchange,
            executor,
            position_manager,
            account: RwLock::new(AccountState::default()),
            seen_decisions: RwLock::new(HashSet::new()),
        }
    }

    pub async fn account(&self) -> AccountState {
        self.account.read().await.clone()
    }

    /// Startup + main loop. The private feed channel is wired to the
    /// authenticated WebSocket by the binary.
    pub async fn run(
        self: Arc<Self>,
        mut private_rx: mpsc::Receiver<PrivateFeedEvent>,
        shutdown: watch::Receiver<bool>,
    ) {
        // Baseline leverage for every configured instrument; per-order
        // leverage is set again by the executor.
        let default_leverage = self.config.risk.max_leverage.to_string();
        for instrument in &self.config.instruments {
            if let Err(e) = self
                .exchange
                .set_leverage(instrument, &default_leverage)
                .await
            {
                warn!(instrument, error = %e, "Startup leverage set failed");
            }
        }

        // Order-intent subscription runs as its own task.
        let subscriber = Arc::clone(&self);
        let sub_shutdown = shutdown.clone();
        let callback: BusCallback = Arc::new(move |stream, message| {
            let server = Arc::clone(&subscriber);
            Box::pin(async move { server.handle_trade_order(stream, message).await })
        });
        let bus = Arc::clone(&self.bus);
        let subscription = tokio::spawn(async move {
            if let Err(e) = bus
                .subscribe(vec![streams::TRADE_ORDERS.to_string()], callback, sub_shutdown)
                .await
            {
                error!(error = %e, "Order subscription ended with error");
            }
        });

        let mut shutdown_rx = shutdown;
        info!("Trade server running");
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                event = private_rx.recv() => {
                    match event {
                        Some(event) => self.handle_private_event(event).await,
                        None => {
                            warn!("Private feed channel closed");
                            break;
                        }
                    }
                }
            }
        }
        subscription.abort();
        info!("Trade server stopped");
    }

    /// `trade:orders` callback: validate, execute, always answer with a
    /// `trade_fill` so the orchestrator can reconcile. A decision_id that
    /// was already executed is acknowledged without re-execution.
    pub async fn handle_trade_order(&self, _stream: String, message: StreamMessage) -> Result<()> {
        let intent: OrderIntent =
            match serde_json::from_value(Value::Object(message.payload.clone())) {
                Ok(intent) => intent,
                Err(e) => {
                    warn!(error = %e, msg_id = %message.msg_id, "Malformed trade order, dropping");
                    return Ok(());
                }
            };

        if !intent.decision_id.is_empty() {
            let mut seen = self.seen_decisions.write().await;
            if !seen.insert(intent.decision_id.clone()) {
                info!(decision_id = %intent.decision_id, "Duplicate trade order, skipping");
                return Ok(());
            }
        }

        info!(
            symbol = %intent.symbol,
            action = %intent.action,
            decision_id = %intent.decision_id,
            "Executing trade order"
        );
        let result = self.executor.execute(&intent).await;

        let fill = StreamMessage::trade_fill(json!({
            "decision_id": intent.decision_id,
            "symbol": intent.symbol,
            "action": intent.action.as_str(),
            "success": result.success,
            "ord_id": result.ord_id,
            "algo_id": result.algo_id,
            "status": result.status,
            "error_code": result.error_code,
            "error_message": result.error_message,
            "fill_price": result.fill_price,
            "fill_size": result.fill_size,
        }));
        // A failed fill publish leaves the order unacked for redelivery;
        // the decision-id set keeps the retry from double-executing.
        self.bus.publish(streams::TRADE_FILLS, &fill).await?;
        Ok(())
    }

    async fn handle_private_event(&self, event: PrivateFeedEvent) {
        match event {
            PrivateFeedEvent::Order(raw) => {
                info!(
                    ord_id = field_str(&raw, "ordId").unwrap_or(""),
                    state = field_str(&raw, "state").unwrap_or(""),
                    "Order update"
                );
            }
            PrivateFeedEvent::Position(raw) => {
                if let Err(e) = self.position_manager.update(&raw).await {
                    warn!(error = %e, "Position update failed");
                }
            }
            PrivateFeedEvent::Account(raw) => self.handle_account_update(&raw).await,
        }
    }

    /// Maintain the in-memory account cache (equity + first USDT available
    /// balance) and forward it so the orchestrator's mirror stays live.
    pub async fn handle_account_update(&self, raw: &Value) {
        let equity = field_f64(raw, "totalEq");
        let available = raw
            .get("details")
            .and_then(Value::as_array)
            .and_then(|details| {
                details
                    .iter()
                    .find(|d| field_str(d, "ccy") == Some("USDT"))
                    .map(|d| field_f64(d, "availBal"))
            })
            .unwrap_or(0.0);

        let state = {
            let mut account = self.account.write().await;
            account.equity = equity;
            account.available_balance = available;
            account.timestamp = Utc::now();
            account.clone()
        };

        let message = StreamMessage::position_update(json!({
            "event": "account",
            "account": serde_json::to_value(&state).unwrap_or(Value::Null),
        }));
        if let Err(e) = self.bus.publish(streams::TRADE_POSITIONS, &message).await {
            warn!(error = %e, "Account forward failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::{InMemoryBus, MockExchange};

    fn server() -> (Arc<TradeServer>, Arc<InMemoryBus>, Arc<MockExchange>) {
        let bus = Arc::new(InMemoryBus::new());
        let exchange = Arc::new(MockExchange::new());
        let mut config = Config::from_env().unwrap();
        config.instruments = vec!["BTC-USDT-SWAP".to_string()];
        let server = Arc::new(TradeServer::new(
            config,
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            Arc::clone(&exchange) as Arc<dyn ExchangeClient>,
        ));
        (server, bus, exchange)
    }

    fn order_message(decision_id: &str) -> StreamMessage {
        StreamMessage::trade_order(json!({
            "action": "OPEN_LONG",
            "symbol": "BTC-USDT-SWAP",
            "side": "buy",
            "pos_side": "long",
            "order_type": "market",
            "size": "0.01",
            "stop_loss": "49500",
            "take_profit": "51500",
            "leverage": "2",
            "decision_id": decision_id,
        }))
    }

    #[tokio::test]
    async fn test_order_message_produces_fill() {
        let (server, bus, exchange) = server();
        server
            .handle_trade_order("trade:orders".to_string(), order_message("d-1"))
            .await
            .unwrap();

        assert_eq!(exchange.placed_orders.read().await.len(), 1);
        let fills = bus.published(streams::TRADE_FILLS).await;
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].payload_str("decision_id"), Some("d-1"));
        assert_eq!(fills[0].payload["success"], true);
    }

    #[tokio::test]
    async fn test_duplicate_decision_id_executes_once() {
        let (server, bus, exchange) = server();
        server
            .handle_trade_order("trade:orders".to_string(), order_message("d-1"))
            .await
            .unwrap();
        server
            .handle_trade_order("trade:orders".to_string(), order_message("d-1"))
            .await
            .unwrap();

        assert_eq!(exchange.placed_orders.read().await.len(), 1);
        assert_eq!(bus.published(streams::TRADE_FILLS).await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_execution_still_publishes_fill() {
        let (server, bus, exchange) = server();
        exchange
            .fail_main_order
            .store(true, std::sync::atomic::Ordering::SeqCst);

        server
            .handle_trade_order("trade:orders".to_string(), order_message("d-2"))
            .await
            .unwrap();

        let fills = bus.published(streams::TRADE_FILLS).await;
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].payload["success"], false);
        assert!(fills[0].payload["error_message"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_account_update_caches_and_forwards() {
        let (server, bus, _) = server();
        server
            .handle_account_update(&json!({
                "totalEq": "10250.5",
                "details": [
                    {"ccy": "BTC", "availBal": "0.1"},
                    {"ccy": "USDT", "availBal": "8000"},
                ],
            }))
            .await;

        let account = server.account().await;
        assert_eq!(account.equity, 10250.5);
        assert_eq!(account.available_balance, 8000.0);

        let published = bus.published(streams::TRADE_POSITIONS).await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload_str("event"), Some("account"));
    }

    #[tokio::test]
    async fn test_malformed_order_is_dropped_not_errored() {
        let (server, bus, exchange) = server();
        let message = StreamMessage::trade_order(json!({"garbage": true}));
        server
            .handle_trade_order("trade:orders".to_string(), message)
            .await
            .unwrap();
        assert!(exchange.placed_orders.read().await.is_empty());
        assert!(bus.published(streams::TRADE_FILLS).await.is_empty());
    }
}
