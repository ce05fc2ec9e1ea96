use crate::domain::market::{Candle, IndicatorSet};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorical label for the 4H market condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
}

impl Regime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::TrendingUp => "trending_up",
            Regime::TrendingDown => "trending_down",
            Regime::Ranging => "ranging",
            Regime::Volatile => "volatile",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const ADX_TREND_THRESHOLD: f64 = 25.0;
const EMA_SLOPE_THRESHOLD: f64 = 0.002;
const ATR_RATIO_THRESHOLD: f64 = 1.5;
const ATR_AVG_WINDOW: usize = 20;

/// Classifies the 4H market regime from ADX, ATR expansion and EMA20 slope.
///
/// All threshold comparisons are strict; trending takes precedence over
/// volatile when both conditions hold.
#[derive(Debug, Default)]
pub struct RegimeDetector;

impl RegimeDetector {
    pub fn new() -> Self {
        Self
    }

    /// Pure classification. Callers that lack a value pass 0.0, which can
    /// never cross a strict threshold.
    pub fn classify(&self, adx: f64, atr_ratio: f64, ema_slope: f64) -> Regime {
        if adx > ADX_TREND_THRESHOLD {
            if ema_slope > EMA_SLOPE_THRESHOLD {
                return Regime::TrendingUp;
            }
            if ema_slope < -EMA_SLOPE_THRESHOLD {
                return Regime::TrendingDown;
            }
        }
        if atr_ratio > ATR_RATIO_THRESHOLD {
            return Regime::Volatile;
        }
        Regime::Ranging
    }

    /// Classify from the 4H candle series plus its computed indicators.
    pub fn detect(&self, candles_4h: &[Candle], indicators: &IndicatorSet) -> Regime {
        let adx = indicators.adx.unwrap_or(0.0);
        let atr_ratio = match indicators.atr {
            Some(atr) => self.atr_ratio(candles_4h, atr),
            None => 0.0,
        };
        let ema_slope = self.ema20_slope(candles_4h);
        self.classify(adx, atr_ratio, ema_slope)
    }

    /// Relative change of EMA20 between the last two candles.
    fn ema20_slope(&self, candles: &[Candle]) -> f64 {
        let closes: Vec<f64> = candles
            .iter()
            .filter_map(|c| c.close.to_f64())
            .collect();
        if closes.len() < 21 {
            return 0.0;
        }
        let series = ema_series(&closes, 20);
        let last = series[series.len() - 1];
        let prev = series[series.len() - 2];
        if prev.abs() < f64::EPSILON {
            return 0.0;
        }
        (last - prev) / prev
    }

    /// Current ATR14 relative to its own 20-period average.
    fn atr_ratio(&self, candles: &[Candle], current_atr: f64) -> f64 {
        let series = atr_series(candles, 14);
        if series.is_empty() {
            return 0.0;
        }
        let tail = &series[series.len().saturating_sub(ATR_AVG_WINDOW)..];
        let avg: f64 = tail.iter().sum::<f64>() / tail.len() as f64;
        if avg.abs() < f64::EPSILON {
            return 0.0;
        }
        current_atr / avg
    }
}

fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut ema = values[0];
    for &v in values {
        ema = alpha * v + (1.0 - alpha) * ema;
        out.push(ema);
    }
    out
}

/// Wilder-smoothed average true range over the candle series.
fn atr_series(candles: &[Candle], period: usize) -> Vec<f64> {
    if candles.len() < period + 1 {
        return Vec::new();
    }
    let mut trs = Vec::with_capacity(candles.len() - 1);
    for i in 1..candles.len() {
        let high = candles[i].high.to_f64().unwrap_or(0.0);
        let low = candles[i].low.to_f64().unwrap_or(0.0);
        let prev_close = candles[i - 1].close.to_f64().unwrap_or(0.0);
        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        trs.push(tr);
    }
    let mut out = Vec::new();
    let mut atr: f64 = trs[..period].iter().sum::<f64>() / period as f64;
    out.push(atr);
    for &tr in &trs[period..] {
        atr = (atr * (period as f64 - 1.0) + tr) / period as f64;
        out.push(atr);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> RegimeDetector {
        RegimeDetector::new()
    }

    #[test]
    fn test_trending_up() {
        assert_eq!(detector().classify(30.0, 1.0, 0.003), Regime::TrendingUp);
    }

    #[test]
    fn test_trending_down() {
        assert_eq!(detector().classify(30.0, 1.0, -0.003), Regime::TrendingDown);
    }

    #[test]
    fn test_volatile_when_not_trending() {
        assert_eq!(detector().classify(20.0, 2.0, 0.0), Regime::Volatile);
    }

    #[test]
    fn test_ranging_default() {
        assert_eq!(detector().classify(20.0, 1.0, 0.0), Regime::Ranging);
    }

    #[test]
    fn test_adx_boundary_is_strict() {
        // ADX == 25 is NOT > 25
        assert_eq!(detector().classify(25.0, 1.0, 0.003), Regime::Ranging);
        assert_eq!(detector().classify(25.01, 1.0, 0.003), Regime::TrendingUp);
        assert_ne!(detector().classify(24.99, 1.0, 0.003), Regime::TrendingUp);
    }

    #[test]
    fn test_slope_boundary_is_strict() {
        assert_ne!(detector().classify(30.0, 1.0, 0.002), Regime::TrendingUp);
        assert_eq!(detector().classify(30.0, 1.0, 0.0021), Regime::TrendingUp);
        assert_ne!(detector().classify(30.0, 1.0, -0.002), Regime::TrendingDown);
        assert_eq!(
            detector().classify(30.0, 1.0, -0.0021),
            Regime::TrendingDown
        );
    }

    #[test]
    fn test_atr_ratio_boundary_is_strict() {
        assert_eq!(detector().classify(20.0, 1.5, 0.0), Regime::Ranging);
        assert_eq!(detector().classify(20.0, 1.51, 0.0), Regime::Volatile);
    }

    #[test]
    fn test_trending_beats_volatile() {
        assert_eq!(detector().classify(30.0, 2.0, 0.003), Regime::TrendingUp);
    }

    #[test]
    fn test_regime_wire_strings() {
        assert_eq!(
            serde_json::to_string(&Regime::TrendingUp).unwrap(),
            "\"trending_up\""
        );
        let back: Regime = serde_json::from_str("\"volatile\"").unwrap();
        assert_eq!(back, Regime::Volatile);
    }
}
