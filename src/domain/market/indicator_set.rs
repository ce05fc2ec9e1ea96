use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdValues {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerValues {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StochRsiValues {
    pub k: f64,
    pub d: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IchimokuValues {
    pub tenkan: f64,
    pub kijun: f64,
    pub senkou_a: f64,
    pub senkou_b: f64,
    pub chikou: f64,
}

/// Indicator values for one (instrument, timeframe) window.
///
/// Any field may be absent when the input window was too short to compute it;
/// consumers must tolerate absence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub rsi: Option<f64>,
    pub macd: Option<MacdValues>,
    pub bollinger: Option<BollingerValues>,
    /// EMA by period (20, 50, 200).
    #[serde(default)]
    pub ema: BTreeMap<u32, f64>,
    pub atr: Option<f64>,
    pub vwap: Option<f64>,
    pub adx: Option<f64>,
    pub stoch_rsi: Option<StochRsiValues>,
    pub obv: Option<f64>,
    pub ichimoku: Option<IchimokuValues>,
    #[serde(default)]
    pub support_levels: Vec<f64>,
    #[serde(default)]
    pub resistance_levels: Vec<f64>,
    pub volume_ratio: f64,
    pub bb_position: String,
    pub ema_alignment: String,
    pub macd_signal: String,
}

impl Default for IndicatorSet {
    fn default() -> Self {
        Self {
            rsi: None,
            macd: None,
            bollinger: None,
            ema: BTreeMap::new(),
            atr: None,
            vwap: None,
            adx: None,
            stoch_rsi: None,
            obv: None,
            ichimoku: None,
            support_levels: Vec::new(),
            resistance_levels: Vec::new(),
            volume_ratio: 1.0,
            bb_position: "middle".to_string(),
            ema_alignment: "neutral".to_string(),
            macd_signal: "neutral".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tolerates_absence() {
        let set = IndicatorSet::default();
        assert!(set.rsi.is_none());
        assert!(set.ema.is_empty());
        assert_eq!(set.volume_ratio, 1.0);
        assert_eq!(set.ema_alignment, "neutral");
    }

    #[test]
    fn test_partial_deserialization() {
        // A producer that only computed RSI must still parse on consumers.
        let set: IndicatorSet = serde_json::from_str(
            r#"{"rsi": 55.2, "volume_ratio": 1.0, "bb_position": "middle",
                "ema_alignment": "neutral", "macd_signal": "neutral",
                "macd": null, "bollinger": null, "atr": null, "vwap": null,
                "adx": null, "stoch_rsi": null, "obv": null, "ichimoku": null}"#,
        )
        .unwrap();
        assert_eq!(set.rsi, Some(55.2));
        assert!(set.adx.is_none());
    }
}
