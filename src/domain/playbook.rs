//! Versioned trading playbook. Versions are append-only and immutable once
//! written; the reflection subsystem proposes updates, the playbook manager
//! assigns the next version number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeRule {
    #[serde(default)]
    pub preferred_strategies: Vec<String>,
    #[serde(default)]
    pub avoid_strategies: Vec<String>,
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: f64,
    #[serde(default = "default_timeframe")]
    pub preferred_timeframe: String,
}

fn default_max_position_pct() -> f64 {
    0.05
}

fn default_timeframe() -> String {
    "1H".to_string()
}

impl Default for RegimeRule {
    fn default() -> Self {
        Self {
            preferred_strategies: Vec::new(),
            avoid_strategies: Vec::new(),
            max_position_pct: default_max_position_pct(),
            preferred_timeframe: default_timeframe(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyDef {
    #[serde(default)]
    pub entry: String,
    #[serde(default)]
    pub exit: String,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub historical_winrate: f64,
    #[serde(default)]
    pub avg_rr: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Lesson {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub lesson: String,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub impact: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeFilter {
    #[serde(default)]
    pub avoid_hours_utc: Vec<u8>,
    #[serde(default)]
    pub preferred_hours_utc: Vec<u8>,
}

/// Stated-confidence bucket vs realized win rate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalibrationEntry {
    #[serde(default)]
    pub stated_confidence: f64,
    #[serde(default)]
    pub actual_winrate: f64,
    #[serde(default)]
    pub sample_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    #[serde(default = "default_version")]
    pub version: i32,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub market_regime_rules: BTreeMap<String, RegimeRule>,
    #[serde(default)]
    pub strategy_definitions: BTreeMap<String, StrategyDef>,
    #[serde(default)]
    pub lessons_learned: Vec<Lesson>,
    #[serde(default)]
    pub confidence_calibration: BTreeMap<String, CalibrationEntry>,
    #[serde(default)]
    pub time_filters: TimeFilter,
}

fn default_version() -> i32 {
    1
}

impl Default for Playbook {
    fn default() -> Self {
        Self {
            version: 1,
            last_updated: Utc::now(),
            market_regime_rules: BTreeMap::new(),
            strategy_definitions: BTreeMap::new(),
            lessons_learned: Vec::new(),
            confidence_calibration: BTreeMap::new(),
            time_filters: TimeFilter::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_playbook_version_one() {
        let playbook = Playbook::default();
        assert_eq!(playbook.version, 1);
        assert!(playbook.market_regime_rules.is_empty());
    }

    #[test]
    fn test_playbook_roundtrip() {
        let mut playbook = Playbook::default();
        playbook.market_regime_rules.insert(
            "trending_up".to_string(),
            RegimeRule {
                preferred_strategies: vec!["trend_follow".to_string()],
                ..Default::default()
            },
        );
        let json = serde_json::to_value(&playbook).unwrap();
        let back: Playbook = serde_json::from_value(json).unwrap();
        assert_eq!(back.version, 1);
        assert_eq!(
            back.market_regime_rules["trending_up"].preferred_strategies,
            vec!["trend_follow"]
        );
    }
}
