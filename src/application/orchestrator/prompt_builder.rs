//! XML-tagged prompt assembly for the analysis and reflection calls.
//!
//! Pure string building; every section is the JSON rendering of the typed
//! state so the adapter sees exactly what the orchestrator saw.

use crate::domain::market::MarketSnapshot;
use crate::domain::playbook::Playbook;
use crate::domain::trading::{AccountState, Position, TradeRecord};
use serde_json::{Value, json};

pub struct PromptBuilder;

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self
    }

    fn tag(name: &str, body: &Value) -> String {
        format!(
            "<{name}>\n{}\n</{name}>",
            serde_json::to_string_pretty(body).unwrap_or_else(|_| "{}".to_string())
        )
    }

    pub fn build_analysis_prompt(
        &self,
        snapshot: &MarketSnapshot,
        positions: &[Position],
        account: &AccountState,
        research: Option<&Value>,
        playbook: &Playbook,
        recent_trades: &[TradeRecord],
    ) -> String {
        let mut sections = vec![
            Self::tag(
                "market_snapshot",
                &serde_json::to_value(snapshot).unwrap_or(Value::Null),
            ),
            Self::tag(
                "positions",
                &serde_json::to_value(positions).unwrap_or(Value::Null),
            ),
            Self::tag(
                "account",
                &serde_json::to_value(account).unwrap_or(Value::Null),
            ),
        ];
        if let Some(research) = research {
            sections.push(Self::tag("research", research));
        }
        sections.push(Self::tag(
            "playbook",
            &serde_json::to_value(playbook).unwrap_or(Value::Null),
        ));
        let trades_brief: Vec<Value> = recent_trades
            .iter()
            .map(|t| {
                json!({
                    "symbol": t.symbol,
                    "direction": t.direction.as_str(),
                    "strategy_used": t.strategy_used,
                    "pnl_usd": t.pnl_usd,
                    "market_regime": t.market_regime,
                    "exit_reason": t.exit_reason,
                })
            })
            .collect();
        sections.push(Self::tag("recent_trades", &Value::Array(trades_brief)));
        sections.push(Self::tag(
            "output_format",
            &json!({
                "analysis": {
                    "market_regime": "string",
                    "bias": "bullish|bearish|neutral",
                    "key_observations": ["string"],
                    "risk_factors": ["string"],
                },
                "decision": {
                    "action": "OPEN_LONG|OPEN_SHORT|CLOSE|ADD|REDUCE|HOLD",
                    "symbol": "string",
                    "size_pct": "float, fraction of equity",
                    "entry_price": "float or null",
                    "stop_loss": "float, required for opens",
                    "take_profit": "float",
                    "order_type": "market|limit",
                    "limit_price": "float or null",
                    "leverage": "float",
                },
                "confidence": "float 0-1",
                "strategy_used": "string",
                "reasoning": "string",
            }),
        ));
        sections.join("\n\n")
    }

    pub fn build_post_trade_prompt(&self, trade: &TradeRecord) -> String {
        let mut sections = vec![Self::tag(
            "trade",
            &serde_json::to_value(trade).unwrap_or(Value::Null),
        )];
        if let Some(entry) = &trade.indicators_entry {
            sections.push(Self::tag("indicators_entry", entry));
        }
        if let Some(exit) = &trade.indicators_exit {
            sections.push(Self::tag("indicators_exit", exit));
        }
        sections.push(Self::tag(
            "output_format",
            &json!({
                "outcome": "win|loss|breakeven",
                "execution_quality": "string",
                "entry_timing": "string",
                "exit_timing": "string",
                "what_went_right": ["string"],
                "what_went_wrong": ["string"],
                "lesson": "string",
                "should_update_playbook": "bool",
                "playbook_suggestion": "string or null",
            }),
        ));
        sections.join("\n\n")
    }

    pub fn build_deep_reflection_prompt(
        &self,
        trades: &[TradeRecord],
        playbook: &Playbook,
        performance: &Value,
    ) -> String {
        [
            Self::tag("performance", performance),
            Self::tag(
                "trades",
                &serde_json::to_value(trades).unwrap_or(Value::Null),
            ),
            Self::tag(
                "current_playbook",
                &serde_json::to_value(playbook).unwrap_or(Value::Null),
            ),
            Self::tag(
                "output_format",
                &json!({
                    "updated_playbook": "full playbook document",
                    "pattern_insights": ["string"],
                    "bias_findings": ["string"],
                    "discipline_score": "int 0-100",
                    "summary": "string",
                }),
            ),
        ]
        .join("\n\n")
    }

    /// Deterministic research query; the cache is keyed on this exact string.
    pub fn build_research_query(&self, snapshot: &MarketSnapshot) -> String {
        format!(
            "Latest {} market-moving news and catalysts. Price {:.1}, 1h change {:.2}%, \
             funding rate {:.4}%, regime {}.",
            snapshot.ticker.symbol,
            snapshot.ticker.last,
            snapshot.price_change_1h * 100.0,
            snapshot.funding_rate.current * 100.0,
            snapshot.market_regime,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::{Regime, Ticker};
    use crate::domain::trading::Direction;
    use chrono::Utc;
    use std::collections::HashMap;

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot {
            ticker: Ticker {
                symbol: "BTC-USDT-SWAP".to_string(),
                last: 50000.0,
                ..Default::default()
            },
            indicators: HashMap::new(),
            orderbook: Default::default(),
            funding_rate: Default::default(),
            open_interest: Default::default(),
            long_short_ratio: 1.0,
            taker_buy_sell_ratio: 1.0,
            market_regime: Regime::TrendingUp,
            price_change_1h: 0.01,
            oi_change_4h: 0.0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_analysis_prompt_has_all_sections() {
        let builder = PromptBuilder::new();
        let prompt = builder.build_analysis_prompt(
            &snapshot(),
            &[],
            &AccountState::default(),
            Some(&json!({"summary": "quiet market"})),
            &Playbook::default(),
            &[],
        );
        for section in [
            "<market_snapshot>",
            "<positions>",
            "<account>",
            "<research>",
            "<playbook>",
            "<recent_trades>",
            "<output_format>",
        ] {
            assert!(prompt.contains(section), "missing {}", section);
        }
        assert!(prompt.contains("quiet market"));
    }

    #[test]
    fn test_analysis_prompt_research_optional() {
        let builder = PromptBuilder::new();
        let prompt = builder.build_analysis_prompt(
            &snapshot(),
            &[],
            &AccountState::default(),
            None,
            &Playbook::default(),
            &[],
        );
        assert!(!prompt.contains("<research>"));
    }

    #[test]
    fn test_post_trade_prompt_includes_indicator_snapshots() {
        let mut trade = TradeRecord::open("BTC-USDT-SWAP".to_string(), Direction::Long);
        trade.indicators_entry = Some(json!({"rsi": 60.0}));
        trade.indicators_exit = Some(json!({"rsi": 45.0}));
        let prompt = PromptBuilder::new().build_post_trade_prompt(&trade);
        assert!(prompt.contains("<indicators_entry>"));
        assert!(prompt.contains("<indicators_exit>"));
        assert!(prompt.contains("<output_format>"));
    }

    #[test]
    fn test_research_query_is_deterministic() {
        let builder = PromptBuilder::new();
        let a = builder.build_research_query(&snapshot());
        let b = builder.build_research_query(&snapshot());
        assert_eq!(a, b);
        assert!(a.contains("BTC-USDT-SWAP"));
        assert!(a.contains("trending_up"));
    }
}
