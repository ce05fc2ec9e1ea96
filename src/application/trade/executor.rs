//! Order execution pipeline: validate, set leverage, place the main order,
//! attach the TP/SL algo order.

use crate::application::trade::validator::OrderValidator;
use crate::domain::ports::ExchangeClient;
use crate::domain::trading::{OrderAction, OrderIntent, OrderResult};
use std::sync::Arc;
use tracing::{info, warn};

pub struct OrderExecutor {
    exchange: Arc<dyn ExchangeClient>,
    validator: OrderValidator,
}

impl OrderExecutor {
    pub fn new(exchange: Arc<dyn ExchangeClient>) -> Self {
        Self {
            exchange,
            validator: OrderValidator::new(),
        }
    }

    pub async fn execute(&self, intent: &OrderIntent) -> OrderResult {
        let validation = self.validator.validate(intent);
        if !validation.valid {
            return OrderResult {
                status: "rejected".to_string(),
                ..OrderResult::failure(validation.errors.join("; "))
            };
        }

        match intent.action {
            OrderAction::OpenLong | OrderAction::OpenShort => self.execute_open(intent).await,
            OrderAction::Close => {
                self.exchange
                    .close_position(&intent.symbol, "cross", intent.pos_side)
                    .await
            }
            OrderAction::Add | OrderAction::Reduce => self.exchange.place_order(intent).await,
            OrderAction::Hold => OrderResult::failure("HOLD is not executable"),
        }
    }

    async fn execute_open(&self, intent: &OrderIntent) -> OrderResult {
        // Leverage is best-effort: a failure is logged but does not abort
        // the order.
        if let Err(e) = self
            .exchange
            .set_leverage(&intent.symbol, &intent.leverage)
            .await
        {
            warn!(symbol = %intent.symbol, error = %e, "Leverage set failed, continuing");
        }

        let mut result = self.exchange.place_order(intent).await;
        if !result.success {
            return result;
        }

        // Attach OCO TP/SL only when both levels are present. The algo
        // closes the position, so its side is opposite the entry side.
        if let (Some(stop_loss), Some(take_profit)) = (&intent.stop_loss, &intent.take_profit) {
            let close_side = match intent.action {
                OrderAction::OpenLong => "sell",
                _ => "buy",
            };
            let algo = self
                .exchange
                .place_algo_order(
                    &intent.symbol,
                    close_side,
                    intent.pos_side,
                    &intent.size,
                    stop_loss,
                    Some(take_profit.as_str()),
                )
                .await;
            if algo.success {
                result.algo_id = algo.algo_id;
            } else {
                warn!(
                    symbol = %intent.symbol,
                    error = ?algo.error_message,
                    "TP/SL algo attach failed; main order stands"
                );
            }
        }

        info!(
            symbol = %intent.symbol,
            action = %intent.action,
            ord_id = ?result.ord_id,
            algo_id = ?result.algo_id,
            "Order executed"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::{OrderSide, OrderType, PosSide};
    use crate::infrastructure::mock::MockExchange;
    use std::sync::atomic::Ordering;

    fn intent(action: OrderAction) -> OrderIntent {
        OrderIntent {
            action,
            symbol: "BTC-USDT-SWAP".to_string(),
            side: OrderSide::Buy,
            pos_side: PosSide::Long,
            order_type: OrderType::Market,
            size: "0.01".to_string(),
            limit_price: None,
            stop_loss: Some("49500".to_string()),
            take_profit: Some("51500".to_string()),
            leverage: "2".to_string(),
            strategy_used: String::new(),
            confidence: 0.8,
            reasoning: String::new(),
            decision_id: "d-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_open_long_sets_leverage_places_main_and_algo() {
        let exchange = Arc::new(MockExchange::new());
        let executor = OrderExecutor::new(exchange.clone());

        let result = executor.execute(&intent(OrderAction::OpenLong)).await;

        assert!(result.success);
        assert!(result.ord_id.is_some());
        assert!(result.algo_id.is_some());
        assert_eq!(exchange.leverage_calls.read().await.len(), 1);
        assert_eq!(exchange.placed_orders.read().await.len(), 1);
        let algos = exchange.algo_orders.read().await;
        assert_eq!(algos.len(), 1);
        assert_eq!(algos[0].0, "49500");
        assert_eq!(algos[0].1.as_deref(), Some("51500"));
    }

    #[tokio::test]
    async fn test_open_without_both_levels_skips_algo() {
        let exchange = Arc::new(MockExchange::new());
        let executor = OrderExecutor::new(exchange.clone());
        let mut open = intent(OrderAction::OpenLong);
        open.take_profit = None;

        let result = executor.execute(&open).await;

        assert!(result.success);
        assert!(exchange.algo_orders.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_main_order_failure_skips_algo() {
        let exchange = Arc::new(MockExchange::new());
        exchange.fail_main_order.store(true, Ordering::SeqCst);
        let executor = OrderExecutor::new(exchange.clone());

        let result = executor.execute(&intent(OrderAction::OpenLong)).await;

        assert!(!result.success);
        assert!(exchange.algo_orders.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_leverage_failure_does_not_abort() {
        let exchange = Arc::new(MockExchange::new());
        exchange.fail_leverage.store(true, Ordering::SeqCst);
        let executor = OrderExecutor::new(exchange.clone());

        let result = executor.execute(&intent(OrderAction::OpenLong)).await;

        assert!(result.success);
        assert_eq!(exchange.placed_orders.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_close_goes_through_close_position() {
        let exchange = Arc::new(MockExchange::new());
        let executor = OrderExecutor::new(exchange.clone());
        let mut close = intent(OrderAction::Close);
        close.stop_loss = None;
        close.take_profit = None;

        let result = executor.execute(&close).await;

        assert!(result.success);
        assert!(exchange.placed_orders.read().await.is_empty());
        assert!(exchange.leverage_calls.read().await.is_empty());
        assert_eq!(
            *exchange.closed.read().await,
            vec![("BTC-USDT-SWAP".to_string(), PosSide::Long)]
        );
    }

    #[tokio::test]
    async fn test_add_reduce_place_main_only() {
        let exchange = Arc::new(MockExchange::new());
        let executor = OrderExecutor::new(exchange.clone());

        for action in [OrderAction::Add, OrderAction::Reduce] {
            let result = executor.execute(&intent(action)).await;
            assert!(result.success);
        }
        assert_eq!(exchange.placed_orders.read().await.len(), 2);
        assert!(exchange.leverage_calls.read().await.is_empty());
        assert!(exchange.algo_orders.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_intent_never_reaches_exchange() {
        let exchange = Arc::new(MockExchange::new());
        let executor = OrderExecutor::new(exchange.clone());
        let mut bad = intent(OrderAction::OpenLong);
        bad.size = "-5".to_string();

        let result = executor.execute(&bad).await;

        assert!(!result.success);
        assert_eq!(result.status, "rejected");
        assert!(exchange.placed_orders.read().await.is_empty());
        assert!(exchange.leverage_calls.read().await.is_empty());
    }
}
