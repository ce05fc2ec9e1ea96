//! Hardcoded circuit breakers. The analysis adapter cannot override these
//! rules; every check runs independently and all failures accumulate.

use crate::config::RiskConfig;
use crate::domain::decision::OpusDecision;
use crate::domain::trading::{AccountState, OrderAction, Position};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

pub const RULE_DAILY_LOSS: &str = "daily_loss";
pub const RULE_MAX_DRAWDOWN: &str = "max_drawdown";
pub const RULE_POSITION_COUNT: &str = "position_count";
pub const RULE_TOTAL_EXPOSURE: &str = "total_exposure";
pub const RULE_TRADE_SIZE: &str = "trade_size";
pub const RULE_LEVERAGE: &str = "leverage";
pub const RULE_STOP_LOSS: &str = "stop_loss";
pub const RULE_SL_DISTANCE: &str = "sl_distance";
pub const RULE_RR_RATIO: &str = "rr_ratio";
pub const RULE_COOLDOWN: &str = "cooldown";
pub const RULE_CORRELATION: &str = "correlation";

#[derive(Debug, Clone, Serialize)]
pub struct RiskCheck {
    pub passed: bool,
    pub rule: String,
    pub reason: String,
}

impl RiskCheck {
    fn passed(rule: &str) -> Self {
        Self {
            passed: true,
            rule: rule.to_string(),
            reason: String::new(),
        }
    }

    fn failed(rule: &str, reason: String) -> Self {
        Self {
            passed: false,
            rule: rule.to_string(),
            reason,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskResult {
    pub approved: bool,
    pub failures: Vec<RiskCheck>,
    pub warnings: Vec<RiskCheck>,
}

impl RiskResult {
    pub fn failed_rules(&self) -> Vec<String> {
        self.failures.iter().map(|c| c.rule.clone()).collect()
    }

    /// Daily-loss and drawdown breaches stop the whole system, not just
    /// this order.
    pub fn requires_halt(&self) -> bool {
        self.failures
            .iter()
            .any(|c| c.rule == RULE_DAILY_LOSS || c.rule == RULE_MAX_DRAWDOWN)
    }
}

pub struct RiskGate {
    config: RiskConfig,
    pub consecutive_losses: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub peak_equity: f64,
    pub daily_start_equity: f64,
    last_equity: f64,
}

impl RiskGate {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            consecutive_losses: 0,
            cooldown_until: None,
            peak_equity: 0.0,
            daily_start_equity: 0.0,
            last_equity: 0.0,
        }
    }

    /// Track equity for peak/daily baselines. Called on every account
    /// update and at the start of validation.
    pub fn observe_equity(&mut self, equity: f64) {
        if equity <= 0.0 {
            return;
        }
        self.last_equity = equity;
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        if self.daily_start_equity <= 0.0 {
            self.daily_start_equity = equity;
        }
    }

    /// Reset the daily baseline; driven by the 00:00 UTC scheduler tick.
    pub fn reset_daily(&mut self) {
        self.daily_start_equity = self.last_equity;
        info!(daily_start_equity = self.daily_start_equity, "Daily risk baseline reset");
    }

    /// Loss-streak accounting on every position close.
    pub fn update_on_trade_close(&mut self, pnl: f64) {
        if pnl < 0.0 {
            self.consecutive_losses += 1;
            if self.consecutive_losses >= self.config.max_consecutive_losses {
                let until =
                    Utc::now() + Duration::seconds(self.config.cooldown_after_loss_streak_secs as i64);
                self.cooldown_until = Some(until);
                warn!(
                    losses = self.consecutive_losses,
                    cooldown_until = %until,
                    "Loss streak cooldown engaged"
                );
            }
        } else {
            self.consecutive_losses = 0;
        }
    }

    pub fn in_cooldown(&self) -> bool {
        self.cooldown_until.is_some_and(|until| Utc::now() < until)
    }

    /// Clear an expired cooldown; returns true if trading may resume.
    pub fn clear_expired_cooldown(&mut self) -> bool {
        match self.cooldown_until {
            Some(until) if Utc::now() >= until => {
                self.cooldown_until = None;
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    pub fn validate(
        &mut self,
        decision: &OpusDecision,
        account: &AccountState,
        positions: &[Position],
    ) -> RiskResult {
        self.observe_equity(account.equity);

        let mut checks = vec![
            self.check_daily_loss(account),
            self.check_max_drawdown(account),
            self.check_position_count(positions),
            self.check_total_exposure(positions, account),
            self.check_cooldown(),
        ];

        // HOLD and CLOSE touch no new exposure; the per-order sizing rules
        // do not apply to them.
        let order_checks_apply = !matches!(
            decision.decision.action,
            OrderAction::Hold | OrderAction::Close
        );
        if order_checks_apply {
            checks.push(self.check_trade_size(decision));
            checks.push(self.check_leverage(decision));
            checks.push(self.check_stop_loss(decision));
            checks.push(self.check_sl_distance(decision));
            checks.push(self.check_rr_ratio(decision));
        }

        let failures: Vec<RiskCheck> = checks.into_iter().filter(|c| !c.passed).collect();
        let warnings: Vec<RiskCheck> = [self.check_correlation(decision, positions)]
            .into_iter()
            .filter(|c| !c.passed)
            .collect();

        let approved = failures.is_empty();
        if !approved {
            warn!(failed = ?failures.iter().map(|c| &c.rule).collect::<Vec<_>>(), "Risk gate rejected");
        }
        RiskResult {
            approved,
            failures,
            warnings,
        }
    }

    fn check_daily_loss(&self, account: &AccountState) -> RiskCheck {
        if self.daily_start_equity <= 0.0 {
            return RiskCheck::passed(RULE_DAILY_LOSS);
        }
        let loss_pct = (self.daily_start_equity - account.equity) / self.daily_start_equity;
        if loss_pct >= self.config.max_daily_loss_pct {
            RiskCheck::failed(
                RULE_DAILY_LOSS,
                format!(
                    "daily loss {:.2}% >= {:.2}% limit",
                    loss_pct * 100.0,
                    self.config.max_daily_loss_pct * 100.0
                ),
            )
        } else {
            RiskCheck::passed(RULE_DAILY_LOSS)
        }
    }

    fn check_max_drawdown(&self, account: &AccountState) -> RiskCheck {
        if self.peak_equity <= 0.0 {
            return RiskCheck::passed(RULE_MAX_DRAWDOWN);
        }
        let drawdown_pct = (self.peak_equity - account.equity) / self.peak_equity;
        if drawdown_pct >= self.config.max_drawdown_pct {
            RiskCheck::failed(
                RULE_MAX_DRAWDOWN,
                format!(
                    "drawdown {:.2}% >= {:.2}% limit from peak {:.2}",
                    drawdown_pct * 100.0,
                    self.config.max_drawdown_pct * 100.0,
                    self.peak_equity
                ),
            )
        } else {
            RiskCheck::passed(RULE_MAX_DRAWDOWN)
        }
    }

    fn check_position_count(&self, positions: &[Position]) -> RiskCheck {
        let open = positions.iter().filter(|p| p.size != 0.0).count();
        if open >= self.config.max_concurrent_positions {
            RiskCheck::failed(
                RULE_POSITION_COUNT,
                format!(
                    "{} open positions >= {} limit",
                    open, self.config.max_concurrent_positions
                ),
            )
        } else {
            RiskCheck::passed(RULE_POSITION_COUNT)
        }
    }

    fn check_total_exposure(&self, positions: &[Position], account: &AccountState) -> RiskCheck {
        if account.equity <= 0.0 {
            return RiskCheck::passed(RULE_TOTAL_EXPOSURE);
        }
        let notional: f64 = positions
            .iter()
            .map(|p| (p.size * p.avg_price).abs())
            .sum();
        let exposure_pct = notional / account.equity;
        if exposure_pct >= self.config.max_total_exposure_pct {
            RiskCheck::failed(
                RULE_TOTAL_EXPOSURE,
                format!(
                    "exposure {:.2}% >= {:.2}% limit",
                    exposure_pct * 100.0,
                    self.config.max_total_exposure_pct * 100.0
                ),
            )
        } else {
            RiskCheck::passed(RULE_TOTAL_EXPOSURE)
        }
    }

    fn check_trade_size(&self, decision: &OpusDecision) -> RiskCheck {
        let size_pct = decision.decision.size_pct;
        if size_pct >= self.config.max_single_trade_pct {
            RiskCheck::failed(
                RULE_TRADE_SIZE,
                format!(
                    "trade size {:.2}% >= {:.2}% limit",
                    size_pct * 100.0,
                    self.config.max_single_trade_pct * 100.0
                ),
            )
        } else {
            RiskCheck::passed(RULE_TRADE_SIZE)
        }
    }

    fn check_leverage(&self, decision: &OpusDecision) -> RiskCheck {
        let leverage = decision.decision.leverage;
        if leverage >= self.config.max_leverage {
            RiskCheck::failed(
                RULE_LEVERAGE,
                format!(
                    "leverage {:.1}x >= {:.1}x limit",
                    leverage, self.config.max_leverage
                ),
            )
        } else {
            RiskCheck::passed(RULE_LEVERAGE)
        }
    }

    fn check_stop_loss(&self, decision: &OpusDecision) -> RiskCheck {
        if decision.decision.stop_loss > 0.0 {
            RiskCheck::passed(RULE_STOP_LOSS)
        } else {
            RiskCheck::failed(RULE_STOP_LOSS, "stop loss is required".to_string())
        }
    }

    fn check_sl_distance(&self, decision: &OpusDecision) -> RiskCheck {
        let entry = decision.decision.entry_price.unwrap_or(0.0);
        let stop_loss = decision.decision.stop_loss;
        if entry <= 0.0 || stop_loss <= 0.0 {
            return RiskCheck::passed(RULE_SL_DISTANCE);
        }
        let distance_pct = (stop_loss - entry).abs() / entry;
        if distance_pct >= self.config.max_sl_distance_pct {
            RiskCheck::failed(
                RULE_SL_DISTANCE,
                format!(
                    "SL distance {:.2}% >= {:.2}% limit",
                    distance_pct * 100.0,
                    self.config.max_sl_distance_pct * 100.0
                ),
            )
        } else {
            RiskCheck::passed(RULE_SL_DISTANCE)
        }
    }

    fn check_rr_ratio(&self, decision: &OpusDecision) -> RiskCheck {
        let entry = decision.decision.entry_price.unwrap_or(0.0);
        let stop_loss = decision.decision.stop_loss;
        let take_profit = decision.decision.take_profit;
        if entry <= 0.0 || stop_loss <= 0.0 || take_profit <= 0.0 {
            return RiskCheck::passed(RULE_RR_RATIO);
        }
        let risk = (entry - stop_loss).abs();
        if risk <= f64::EPSILON {
            return RiskCheck::failed(RULE_RR_RATIO, "zero stop distance".to_string());
        }
        let rr = (take_profit - entry).abs() / risk;
        if rr < self.config.min_rr_ratio {
            RiskCheck::failed(
                RULE_RR_RATIO,
                format!("R:R {:.2} < {:.2} minimum", rr, self.config.min_rr_ratio),
            )
        } else {
            RiskCheck::passed(RULE_RR_RATIO)
        }
    }

    fn check_cooldown(&self) -> RiskCheck {
        if self.in_cooldown() {
            RiskCheck::failed(
                RULE_COOLDOWN,
                format!(
                    "cooling down until {}",
                    self.cooldown_until.map(|t| t.to_rfc3339()).unwrap_or_default()
                ),
            )
        } else {
            RiskCheck::passed(RULE_COOLDOWN)
        }
    }

    /// Same-instrument overlap is a warning, never a rejection.
    fn check_correlation(&self, decision: &OpusDecision, positions: &[Position]) -> RiskCheck {
        let symbol = &decision.decision.symbol;
        let held = !symbol.is_empty()
            && positions
                .iter()
                .any(|p| &p.inst_id == symbol && p.size != 0.0);
        if held {
            RiskCheck::failed(
                RULE_CORRELATION,
                format!("already holding a position on {}", symbol),
            )
        } else {
            RiskCheck::passed(RULE_CORRELATION)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::Decision;
    use crate::domain::trading::PosSide;

    fn gate() -> RiskGate {
        RiskGate::new(RiskConfig::default())
    }

    fn account(equity: f64) -> AccountState {
        AccountState {
            equity,
            available_balance: equity,
            ..Default::default()
        }
    }

    fn decision(action: OrderAction) -> OpusDecision {
        OpusDecision {
            decision: Decision {
                action,
                symbol: "BTC-USDT-SWAP".to_string(),
                size_pct: 0.02,
                entry_price: Some(50000.0),
                stop_loss: 49500.0,
                take_profit: 51500.0,
                leverage: 2.0,
                ..Default::default()
            },
            confidence: 0.8,
            ..Default::default()
        }
    }

    fn position(symbol: &str, size: f64) -> Position {
        Position {
            inst_id: symbol.to_string(),
            pos_side: PosSide::Long,
            size,
            avg_price: 50000.0,
            unrealized_pnl: 0.0,
            pnl_ratio: 0.0,
            leverage: 2.0,
            liquidation_price: 0.0,
            margin: 0.0,
            margin_ratio: 0.0,
            updated_at: None,
        }
    }

    #[test]
    fn test_healthy_trade_approved() {
        let mut gate = gate();
        let result = gate.validate(&decision(OrderAction::OpenLong), &account(10000.0), &[]);
        assert!(result.approved, "failures: {:?}", result.failures);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_trade_size_rejected_at_threshold() {
        let mut gate = gate();
        let mut big = decision(OrderAction::OpenLong);
        big.decision.size_pct = 0.05;
        let result = gate.validate(&big, &account(10000.0), &[]);
        assert!(!result.approved);
        assert!(result.failed_rules().contains(&RULE_TRADE_SIZE.to_string()));
    }

    #[test]
    fn test_missing_stop_loss_always_rejected() {
        let mut gate = gate();
        let mut no_sl = decision(OrderAction::OpenLong);
        no_sl.decision.stop_loss = 0.0;
        let result = gate.validate(&no_sl, &account(10000.0), &[]);
        assert!(!result.approved);
        assert!(result.failed_rules().contains(&RULE_STOP_LOSS.to_string()));
    }

    #[test]
    fn test_leverage_at_limit_rejected() {
        let mut gate = gate();
        let mut levered = decision(OrderAction::OpenLong);
        levered.decision.leverage = 3.0;
        let result = gate.validate(&levered, &account(10000.0), &[]);
        assert!(result.failed_rules().contains(&RULE_LEVERAGE.to_string()));
    }

    #[test]
    fn test_sl_distance_rejected() {
        let mut gate = gate();
        let mut wide = decision(OrderAction::OpenLong);
        wide.decision.stop_loss = 48000.0; // 4% away
        wide.decision.take_profit = 53000.0;
        let result = gate.validate(&wide, &account(10000.0), &[]);
        assert!(result.failed_rules().contains(&RULE_SL_DISTANCE.to_string()));
    }

    #[test]
    fn test_rr_ratio_below_minimum_rejected() {
        let mut gate = gate();
        let mut poor = decision(OrderAction::OpenLong);
        poor.decision.take_profit = 50500.0; // 1:1 against 500 risk
        let result = gate.validate(&poor, &account(10000.0), &[]);
        assert!(result.failed_rules().contains(&RULE_RR_RATIO.to_string()));
    }

    #[test]
    fn test_hold_and_close_bypass_order_rules() {
        let mut gate = gate();
        for action in [OrderAction::Hold, OrderAction::Close] {
            let mut bare = decision(action);
            bare.decision.stop_loss = 0.0;
            bare.decision.take_profit = 0.0;
            bare.decision.size_pct = 0.5;
            bare.decision.leverage = 10.0;
            let result = gate.validate(&bare, &account(10000.0), &[]);
            assert!(result.approved, "{:?} should bypass order rules", action);
        }
    }

    #[test]
    fn test_daily_loss_halts() {
        let mut gate = gate();
        gate.observe_equity(10000.0);
        let result = gate.validate(&decision(OrderAction::OpenLong), &account(9600.0), &[]);
        assert!(!result.approved);
        assert!(result.failed_rules().contains(&RULE_DAILY_LOSS.to_string()));
        assert!(result.requires_halt());
    }

    #[test]
    fn test_drawdown_from_peak_halts() {
        let mut gate = gate();
        gate.observe_equity(10000.0);
        gate.observe_equity(12000.0);
        // 12000 -> 10700 is a 10.8% drawdown but only a daily gain
        gate.daily_start_equity = 10000.0;
        let result = gate.validate(&decision(OrderAction::OpenLong), &account(10700.0), &[]);
        assert!(result.failed_rules().contains(&RULE_MAX_DRAWDOWN.to_string()));
        assert!(result.requires_halt());
    }

    #[test]
    fn test_position_count_limit() {
        let mut gate = gate();
        let positions = vec![
            position("BTC-USDT-SWAP", 1.0),
            position("ETH-USDT-SWAP", 1.0),
            position("SOL-USDT-SWAP", 1.0),
        ];
        let result = gate.validate(
            &decision(OrderAction::OpenLong),
            &account(1_000_000.0),
            &positions,
        );
        assert!(result.failed_rules().contains(&RULE_POSITION_COUNT.to_string()));
    }

    #[test]
    fn test_total_exposure_limit_uses_full_notional() {
        let mut gate = gate();
        // One leveraged position: 1.0 x 50000 notional against 100k equity
        // is 50% exposure, far past the 15% limit regardless of leverage.
        let positions = vec![position("ETH-USDT-SWAP", 1.0)];
        let result = gate.validate(
            &decision(OrderAction::OpenLong),
            &account(100_000.0),
            &positions,
        );
        assert!(!result.approved);
        assert!(result.failed_rules().contains(&RULE_TOTAL_EXPOSURE.to_string()));
    }

    #[test]
    fn test_total_exposure_below_limit_passes() {
        let mut gate = gate();
        // 50000 notional against 1M equity is 5% exposure.
        let positions = vec![position("ETH-USDT-SWAP", 1.0)];
        let result = gate.validate(
            &decision(OrderAction::OpenLong),
            &account(1_000_000.0),
            &positions,
        );
        assert!(result.approved, "failures: {:?}", result.failures);
        assert!(!result.failed_rules().contains(&RULE_TOTAL_EXPOSURE.to_string()));
    }

    #[test]
    fn test_correlation_is_warning_not_failure() {
        let mut gate = gate();
        let positions = vec![position("BTC-USDT-SWAP", 1.0)];
        let result = gate.validate(
            &decision(OrderAction::OpenLong),
            &account(10_000_000.0),
            &positions,
        );
        assert!(result.approved, "failures: {:?}", result.failures);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].rule, RULE_CORRELATION);
    }

    #[test]
    fn test_loss_streak_sets_cooldown() {
        let mut gate = gate();
        gate.update_on_trade_close(-50.0);
        gate.update_on_trade_close(-30.0);
        assert!(gate.cooldown_until.is_none());
        gate.update_on_trade_close(-20.0);
        assert!(gate.cooldown_until.is_some());
        assert!(gate.in_cooldown());
        let until = gate.cooldown_until.unwrap();
        let expected = Utc::now() + Duration::seconds(1800);
        assert!((expected - until).num_seconds().abs() <= 1);

        let result = gate.validate(&decision(OrderAction::OpenLong), &account(10000.0), &[]);
        assert!(result.failed_rules().contains(&RULE_COOLDOWN.to_string()));
    }

    #[test]
    fn test_win_resets_loss_streak() {
        let mut gate = gate();
        gate.update_on_trade_close(-50.0);
        gate.update_on_trade_close(-30.0);
        gate.update_on_trade_close(10.0);
        assert_eq!(gate.consecutive_losses, 0);
        gate.update_on_trade_close(-5.0);
        assert_eq!(gate.consecutive_losses, 1);
        assert!(gate.cooldown_until.is_none());
    }

    #[test]
    fn test_expired_cooldown_clears() {
        let mut gate = gate();
        gate.cooldown_until = Some(Utc::now() - Duration::seconds(1));
        assert!(!gate.in_cooldown());
        assert!(gate.clear_expired_cooldown());
        assert!(gate.cooldown_until.is_none());
    }

    #[test]
    fn test_all_failures_accumulate() {
        let mut gate = gate();
        let mut awful = decision(OrderAction::OpenLong);
        awful.decision.size_pct = 0.2;
        awful.decision.leverage = 5.0;
        awful.decision.stop_loss = 0.0;
        let result = gate.validate(&awful, &account(10000.0), &[]);
        let rules = result.failed_rules();
        assert!(rules.contains(&RULE_TRADE_SIZE.to_string()));
        assert!(rules.contains(&RULE_LEVERAGE.to_string()));
        assert!(rules.contains(&RULE_STOP_LOSS.to_string()));
    }
}
