//! Pre-execution intent validation. Technical validation only; risk policy
//! lives in the orchestrator's risk gate.
//!
//! Fail-closed: every violation is collected and an intent with any error
//! never reaches the exchange.

use crate::domain::trading::{OrderAction, OrderIntent, OrderType, PosSide};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Default)]
pub struct OrderValidator;

impl OrderValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, intent: &OrderIntent) -> ValidationResult {
        let mut errors = Vec::new();

        self.validate_action(intent, &mut errors);
        self.validate_size(intent, &mut errors);
        self.validate_leverage(intent, &mut errors);
        self.validate_limit_price(intent, &mut errors);
        self.validate_sl_tp(intent, &mut errors);

        let valid = errors.is_empty();
        if !valid {
            warn!(symbol = %intent.symbol, ?errors, "Order validation failed");
        }
        ValidationResult { valid, errors }
    }

    fn validate_action(&self, intent: &OrderIntent, errors: &mut Vec<String>) {
        if intent.action == OrderAction::Hold {
            errors.push("action HOLD is not executable".to_string());
        }
    }

    fn validate_size(&self, intent: &OrderIntent, errors: &mut Vec<String>) {
        if intent.size.is_empty() {
            errors.push("size is required and cannot be empty".to_string());
            return;
        }
        match Decimal::from_str(&intent.size) {
            Ok(size) if size > Decimal::ZERO => {}
            Ok(_) => errors.push(format!("size must be > 0, got {}", intent.size)),
            Err(_) => errors.push(format!("size must be a valid number, got '{}'", intent.size)),
        }
    }

    fn validate_leverage(&self, intent: &OrderIntent, errors: &mut Vec<String>) {
        match Decimal::from_str(&intent.leverage) {
            Ok(leverage) if leverage > Decimal::ZERO => {}
            Ok(_) => errors.push(format!("leverage must be > 0, got {}", intent.leverage)),
            Err(_) => errors.push(format!(
                "leverage must be a valid number, got '{}'",
                intent.leverage
            )),
        }
    }

    fn validate_limit_price(&self, intent: &OrderIntent, errors: &mut Vec<String>) {
        if intent.order_type != OrderType::Limit {
            return;
        }
        let Some(raw) = &intent.limit_price else {
            errors.push("limit_price is required for limit orders".to_string());
            return;
        };
        match Decimal::from_str(raw) {
            Ok(price) if price > Decimal::ZERO => {}
            Ok(_) => errors.push(format!("limit_price must be > 0, got {}", raw)),
            Err(_) => errors.push(format!("limit_price must be a valid number, got '{}'", raw)),
        }
    }

    /// SL/TP ordering against the entry price. Only checked when a limit
    /// price provides the entry reference; equality fails.
    fn validate_sl_tp(&self, intent: &OrderIntent, errors: &mut Vec<String>) {
        let Some(entry) = intent
            .limit_price
            .as_deref()
            .and_then(|raw| Decimal::from_str(raw).ok())
        else {
            return;
        };
        let is_long = intent.pos_side == PosSide::Long;

        if let Some(raw) = &intent.stop_loss {
            match Decimal::from_str(raw) {
                Ok(sl) => {
                    if is_long && sl >= entry {
                        errors.push(format!(
                            "stop_loss ({}) must be < entry ({}) for long positions",
                            sl, entry
                        ));
                    } else if !is_long && sl <= entry {
                        errors.push(format!(
                            "stop_loss ({}) must be > entry ({}) for short positions",
                            sl, entry
                        ));
                    }
                }
                Err(_) => errors.push(format!("stop_loss must be a valid number, got '{}'", raw)),
            }
        }

        if let Some(raw) = &intent.take_profit {
            match Decimal::from_str(raw) {
                Ok(tp) => {
                    if is_long && tp <= entry {
                        errors.push(format!(
                            "take_profit ({}) must be > entry ({}) for long positions",
                            tp, entry
                        ));
                    } else if !is_long && tp >= entry {
                        errors.push(format!(
                            "take_profit ({}) must be < entry ({}) for short positions",
                            tp, entry
                        ));
                    }
                }
                Err(_) => errors.push(format!("take_profit must be a valid number, got '{}'", raw)),
            }
        }
    }
}
