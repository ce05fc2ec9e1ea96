// Market data domain
pub mod indicator_set;
pub mod regime;
pub mod timeframe;

pub use indicator_set::IndicatorSet;
pub use regime::{Regime, RegimeDetector};
pub use timeframe::Timeframe;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Immutable OHLCV bar at an aligned time bucket.
///
/// (time, symbol, timeframe) is the unique key in both the in-memory ring
/// and the durable store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Latest trade price + top of book for one instrument.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: f64,
    pub bid: f64,
    pub ask: f64,
    pub volume_24h: f64,
    pub change_24h: f64,
}

/// Top-N order book levels with derived depth totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
    pub spread: f64,
    pub bid_depth: f64,
    pub ask_depth: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundingRate {
    pub current: f64,
    pub predicted: f64,
    pub next_funding_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenInterest {
    pub oi: f64,
    pub oi_change_24h: f64,
}

/// Atomic, self-contained view of one instrument at a moment in time.
///
/// Produced by the indicator service, consumed by the orchestrator and any
/// dashboards; never mutated after publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub ticker: Ticker,
    #[serde(default)]
    pub indicators: HashMap<String, IndicatorSet>,
    #[serde(default)]
    pub orderbook: OrderBook,
    #[serde(default)]
    pub funding_rate: FundingRate,
    #[serde(default)]
    pub open_interest: OpenInterest,
    pub long_short_ratio: f64,
    pub taker_buy_sell_ratio: f64,
    pub market_regime: Regime,
    pub price_change_1h: f64,
    pub oi_change_4h: f64,
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    /// IndicatorSet for a timeframe, if that window was long enough to compute.
    pub fn indicators_for(&self, timeframe: Timeframe) -> Option<&IndicatorSet> {
        self.indicators.get(timeframe.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_candle_serde_roundtrip() {
        let candle = Candle {
            time: Utc::now(),
            symbol: "BTC-USDT-SWAP".to_string(),
            timeframe: Timeframe::FourHour,
            open: dec!(50000.12345678),
            high: dec!(50100),
            low: dec!(49900),
            close: dec!(50050),
            volume: dec!(1234.5678),
        };
        let json = serde_json::to_string(&candle).unwrap();
        let back: Candle = serde_json::from_str(&json).unwrap();
        assert_eq!(back, candle);
        // Decimal survives as an exact string, not a float
        assert!(json.contains("50000.12345678"));
    }
}
