//! Typed results returned by the screening, research, analysis and
//! reflection adapters. All of them deserialize leniently: a missing field
//! falls back to a neutral default so a partially-formed model response never
//! aborts a decision cycle.

use crate::domain::playbook::Playbook;
use crate::domain::trading::OrderAction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Screener verdict. Fail-open: adapter errors yield `signal = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenResult {
    #[serde(default)]
    pub signal: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub latency_ms: f64,
}

impl ScreenResult {
    pub fn fail_open(reason: impl Into<String>) -> Self {
        Self {
            signal: true,
            reason: reason.into(),
            tokens_used: 0,
            latency_ms: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub market_regime: String,
    #[serde(default)]
    pub bias: String,
    #[serde(default)]
    pub key_observations: Vec<String>,
    #[serde(default)]
    pub risk_factors: Vec<String>,
}

/// The order parameters part of an analysis response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    #[serde(default = "default_action")]
    pub action: OrderAction,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub size_pct: f64,
    #[serde(default)]
    pub entry_price: Option<f64>,
    #[serde(default)]
    pub stop_loss: f64,
    #[serde(default)]
    pub take_profit: f64,
    #[serde(default = "default_order_type")]
    pub order_type: String,
    #[serde(default)]
    pub limit_price: Option<f64>,
    #[serde(default = "default_decision_leverage")]
    pub leverage: f64,
}

fn default_decision_leverage() -> f64 {
    1.0
}

fn default_action() -> OrderAction {
    OrderAction::Hold
}

fn default_order_type() -> String {
    "market".to_string()
}

impl Default for Decision {
    fn default() -> Self {
        Self {
            action: OrderAction::Hold,
            symbol: String::new(),
            size_pct: 0.0,
            entry_price: None,
            stop_loss: 0.0,
            take_profit: 0.0,
            order_type: "market".to_string(),
            limit_price: None,
            leverage: 1.0,
        }
    }
}

/// Full analysis-adapter response. `Default` is a HOLD.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpusDecision {
    #[serde(default)]
    pub analysis: AnalysisResult,
    #[serde(default)]
    pub decision: Decision,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub strategy_used: String,
    #[serde(default)]
    pub reasoning: String,
}

impl OpusDecision {
    pub fn is_hold(&self) -> bool {
        self.decision.action == OrderAction::Hold
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchResult {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default = "default_sentiment")]
    pub sentiment: String,
    #[serde(default = "default_low")]
    pub impact_level: String,
    #[serde(default = "default_medium")]
    pub time_horizon: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub trading_implication: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn default_sentiment() -> String {
    "neutral".to_string()
}

fn default_low() -> String {
    "low".to_string()
}

fn default_medium() -> String {
    "medium".to_string()
}

impl ResearchResult {
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            summary: String::new(),
            sentiment: default_sentiment(),
            impact_level: default_low(),
            time_horizon: default_medium(),
            key_points: Vec::new(),
            trading_implication: String::new(),
            confidence: 0.0,
            sources: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Post-trade self-review.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeReview {
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub execution_quality: String,
    #[serde(default)]
    pub entry_timing: String,
    #[serde(default)]
    pub exit_timing: String,
    #[serde(default)]
    pub what_went_right: Vec<String>,
    #[serde(default)]
    pub what_went_wrong: Vec<String>,
    #[serde(default)]
    pub lesson: String,
    #[serde(default)]
    pub should_update_playbook: bool,
    #[serde(default)]
    pub playbook_suggestion: Option<String>,
}

/// Periodic deep-reflection response: an updated playbook plus findings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeepReflectionResult {
    #[serde(default)]
    pub updated_playbook: Playbook,
    #[serde(default)]
    pub pattern_insights: Vec<String>,
    #[serde(default)]
    pub bias_findings: Vec<String>,
    #[serde(default)]
    pub discipline_score: i32,
    #[serde(default)]
    pub summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_decision_is_hold() {
        let decision = OpusDecision::default();
        assert!(decision.is_hold());
        assert_eq!(decision.confidence, 0.0);
    }

    #[test]
    fn test_lenient_parse_of_partial_response() {
        let decision: OpusDecision = serde_json::from_str(
            r#"{"decision": {"action": "OPEN_LONG", "size_pct": 0.02,
                "stop_loss": 49500.0, "take_profit": 51500.0},
                "confidence": 0.8}"#,
        )
        .unwrap();
        assert!(!decision.is_hold());
        assert_eq!(decision.decision.size_pct, 0.02);
        assert_eq!(decision.decision.order_type, "market");
        assert!(decision.strategy_used.is_empty());
    }

    #[test]
    fn test_screen_result_fail_open() {
        let result = ScreenResult::fail_open("Screener error: timeout");
        assert!(result.signal);
        assert!(result.reason.contains("timeout"));
    }
}
