//! Assembles a [`MarketSnapshot`] from the candle rings and live REST reads.

use crate::application::indicator::candle_store::CandleStore;
use crate::application::indicator::indicators::TechnicalIndicators;
use crate::domain::market::{
    FundingRate, MarketSnapshot, OpenInterest, OrderBook, Regime, RegimeDetector, Ticker,
    Timeframe,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

const INDICATOR_WINDOW: usize = 200;
const OI_HISTORY_WINDOW: Duration = Duration::hours(4);

pub struct SnapshotBuilder {
    candle_store: Arc<CandleStore>,
    indicators: TechnicalIndicators,
    regime_detector: RegimeDetector,
    timeframes: Vec<Timeframe>,
    oi_history: RwLock<HashMap<String, VecDeque<(DateTime<Utc>, f64)>>>,
}

impl SnapshotBuilder {
    pub fn new(candle_store: Arc<CandleStore>, timeframes: Vec<Timeframe>) -> Self {
        Self {
            candle_store,
            indicators: TechnicalIndicators::new(),
            regime_detector: RegimeDetector::new(),
            timeframes,
            oi_history: RwLock::new(HashMap::new()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn build(
        &self,
        instrument: &str,
        ticker: Ticker,
        orderbook: OrderBook,
        funding_rate: FundingRate,
        open_interest: OpenInterest,
        long_short_ratio: f64,
        taker_buy_sell_ratio: f64,
    ) -> MarketSnapshot {
        let mut indicator_sets = HashMap::new();
        let mut regime = Regime::Ranging;

        for timeframe in &self.timeframes {
            let candles = self
                .candle_store
                .get(instrument, *timeframe, INDICATOR_WINDOW)
                .await;
            if candles.is_empty() {
                continue;
            }
            let set = self.indicators.compute(&candles);
            if *timeframe == Timeframe::FourHour {
                regime = self.regime_detector.detect(&candles, &set);
            }
            indicator_sets.insert(timeframe.as_str().to_string(), set);
        }

        let price_change_1h = self.price_change_1h(instrument).await;
        let oi_change_4h = self.oi_change_4h(instrument, open_interest.oi).await;

        MarketSnapshot {
            ticker,
            indicators: indicator_sets,
            orderbook,
            funding_rate,
            open_interest,
            long_short_ratio,
            taker_buy_sell_ratio,
            market_regime: regime,
            price_change_1h,
            oi_change_4h,
            timestamp: Utc::now(),
        }
    }

    /// Relative change between the last two 1H closes.
    async fn price_change_1h(&self, instrument: &str) -> f64 {
        let candles = self.candle_store.get(instrument, Timeframe::OneHour, 2).await;
        if candles.len() < 2 {
            return 0.0;
        }
        let prev = candles[0].close.to_f64().unwrap_or(0.0);
        let last = candles[1].close.to_f64().unwrap_or(0.0);
        if prev.abs() < f64::EPSILON {
            return 0.0;
        }
        (last - prev) / prev
    }

    /// Change of open interest against the oldest sample within the last
    /// four hours of this builder's own observations.
    async fn oi_change_4h(&self, instrument: &str, current_oi: f64) -> f64 {
        let now = Utc::now();
        let mut history = self.oi_history.write().await;
        let ring = history.entry(instrument.to_string()).or_default();

        ring.push_back((now, current_oi));
        while let Some(&(at, _)) = ring.front() {
            if now - at > OI_HISTORY_WINDOW && ring.len() > 1 {
                ring.pop_front();
            } else {
                break;
            }
        }

        let Some(&(_, baseline)) = ring.front() else {
            return 0.0;
        };
        if baseline.abs() < f64::EPSILON {
            return 0.0;
        }
        (current_oi - baseline) / baseline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Candle;
    use crate::infrastructure::mock::InMemoryCandleRepository;
    use rust_decimal::Decimal;
    use rust_decimal::prelude::FromPrimitive;

    fn candle(tf: Timeframe, offset: i64, close: f64) -> Candle {
        Candle {
            time: Utc::now() + Duration::seconds(offset * tf.to_seconds()),
            symbol: "BTC-USDT-SWAP".to_string(),
            timeframe: tf,
            open: Decimal::from_f64(close - 0.5).unwrap(),
            high: Decimal::from_f64(close + 1.0).unwrap(),
            low: Decimal::from_f64(close - 1.0).unwrap(),
            close: Decimal::from_f64(close).unwrap(),
            volume: Decimal::from_f64(1000.0).unwrap(),
        }
    }

    async fn builder_with_candles() -> SnapshotBuilder {
        let store = Arc::new(CandleStore::new(
            Arc::new(InMemoryCandleRepository::new()),
            200,
        ));
        let hourly: Vec<Candle> = vec![
            candle(Timeframe::OneHour, 0, 50000.0),
            candle(Timeframe::OneHour, 1, 51000.0),
        ];
        store
            .backfill("BTC-USDT-SWAP", Timeframe::OneHour, hourly)
            .await
            .unwrap();
        let four_hour: Vec<Candle> = (0..60)
            .map(|i| candle(Timeframe::FourHour, i, 49000.0 + i as f64 * 10.0))
            .collect();
        store
            .backfill("BTC-USDT-SWAP", Timeframe::FourHour, four_hour)
            .await
            .unwrap();
        SnapshotBuilder::new(store, vec![Timeframe::OneHour, Timeframe::FourHour])
    }

    #[tokio::test]
    async fn test_build_populates_indicators_and_price_change() {
        let builder = builder_with_candles().await;
        let snapshot = builder
            .build(
                "BTC-USDT-SWAP",
                Ticker {
                    symbol: "BTC-USDT-SWAP".to_string(),
                    last: 51000.0,
                    ..Default::default()
                },
                OrderBook::default(),
                FundingRate::default(),
                OpenInterest { oi: 1000.0, oi_change_24h: 0.0 },
                1.1,
                0.95,
            )
            .await;

        assert!(snapshot.indicators.contains_key("1H"));
        assert!(snapshot.indicators.contains_key("4H"));
        // 50000 -> 51000 over the last hour
        assert!((snapshot.price_change_1h - 0.02).abs() < 1e-9);
        assert_eq!(snapshot.long_short_ratio, 1.1);
    }

    #[tokio::test]
    async fn test_oi_change_uses_oldest_sample_in_window() {
        let builder = builder_with_candles().await;
        let first = builder.oi_change_4h("BTC-USDT-SWAP", 1000.0).await;
        assert_eq!(first, 0.0);
        let second = builder.oi_change_4h("BTC-USDT-SWAP", 1100.0).await;
        assert!((second - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_store_yields_defaults() {
        let store = Arc::new(CandleStore::new(
            Arc::new(InMemoryCandleRepository::new()),
            200,
        ));
        let builder = SnapshotBuilder::new(store, vec![Timeframe::FourHour]);
        let snapshot = builder
            .build(
                "BTC-USDT-SWAP",
                Ticker::default(),
                OrderBook::default(),
                FundingRate::default(),
                OpenInterest::default(),
                1.0,
                1.0,
            )
            .await;
        assert!(snapshot.indicators.is_empty());
        assert_eq!(snapshot.market_regime, Regime::Ranging);
        assert_eq!(snapshot.price_change_1h, 0.0);
    }
}
