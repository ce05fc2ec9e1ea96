//! Indicator service run loop: backfill, live candle feed, periodic snapshot
//! publication and anomaly alerting.

use crate::application::indicator::candle_store::CandleStore;
use crate::application::indicator::snapshot_builder::SnapshotBuilder;
use crate::config::Config;
use crate::domain::messages::{StreamMessage, streams};
use crate::domain::ports::{ExchangeClient, MessageBus};
use crate::infrastructure::okx::PublicFeedEvent;
use anyhow::Result;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

const PRICE_CHANGE_ALERT: f64 = 0.03;
const FUNDING_RATE_ALERT: f64 = 0.0005;

pub struct IndicatorServer {
    config: Config,
    bus: Arc<dyn MessageBus>,
    exchange: Arc<dyn ExchangeClient>,
    store: Arc<CandleStore>,
    builder: SnapshotBuilder,
}

impl IndicatorServer {
    pub fn new(
        config: Config,
        bus: Arc<dyn MessageBus>,
        exchange: Arc<dyn ExchangeClient>,
        store: Arc<CandleStore>,
    ) -> Self {
        let builder = SnapshotBuilder::new(Arc::clone(&store), config.timeframes.clone());
        Self {
            config,
            bus,
            exchange,
            store,
            builder,
        }
    }

    /// Load `CANDLE_HISTORY_LIMIT` candles per (instrument, timeframe) from
    /// REST before going live.
    pub async fn backfill(&self) -> Result<()> {
        for instrument in &self.config.instruments {
            for timeframe in &self.config.timeframes {
                let candles = self
                    .exchange
                    .get_candles(instrument, *timeframe, self.config.candle_history_limit)
                    .await;
                if candles.is_empty() {
                    warn!(instrument, timeframe = %timeframe, "Backfill returned no candles");
                    continue;
                }
                self.store
                    .backfill(instrument, *timeframe, candles)
                    .await?;
            }
        }
        Ok(())
    }

    /// Main loop: drain the public feed and publish a snapshot per
    /// instrument every `SNAPSHOT_INTERVAL_SECONDS`.
    pub async fn run(
        &self,
        mut feed_rx: mpsc::Receiver<PublicFeedEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut snapshot_tick =
            tokio::time::interval(Duration::from_secs(self.config.snapshot_interval_secs));
        snapshot_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so the feed can warm up.
        snapshot_tick.tick().await;

        info!(instruments = ?self.config.instruments, "Indicator server running");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                event = feed_rx.recv() => {
                    match event {
                        Some(event) => self.handle_feed_event(event).await,
                        None => {
                            warn!("Public feed channel closed");
                            break;
                        }
                    }
                }
                _ = snapshot_tick.tick() => {
                    for instrument in &self.config.instruments {
                        if let Err(e) = self.publish_snapshot(instrument).await {
                            error!(instrument, error = %e, "Snapshot publication failed");
                        }
                    }
                }
            }
        }
        info!("Indicator server stopped");
    }

    async fn handle_feed_event(&self, event: PublicFeedEvent) {
        match event {
            PublicFeedEvent::Candle {
                candle, confirmed, ..
            } => {
                // Only completed bars enter the ring; in-progress updates
                // would skew the indicator window.
                if !confirmed {
                    return;
                }
                if let Err(e) = self.store.add(candle).await {
                    warn!(error = %e, "Candle persistence failed");
                }
            }
            // Tickers/books/funding arrive fresh over REST at snapshot time.
            PublicFeedEvent::Ticker { .. }
            | PublicFeedEvent::OrderBook { .. }
            | PublicFeedEvent::FundingRate { .. } => {}
        }
    }

    pub async fn publish_snapshot(&self, instrument: &str) -> Result<()> {
        let ticker = self.exchange.get_ticker(instrument).await;
        let orderbook = self
            .exchange
            .get_orderbook(instrument, self.config.orderbook_depth)
            .await;
        let funding_rate = self.exchange.get_funding_rate(instrument).await;
        let open_interest = self.exchange.get_open_interest(instrument).await;
        let long_short_ratio = self.exchange.get_long_short_ratio(instrument).await;
        let taker_ratio = self.exchange.get_taker_volume(instrument).await;

        let snapshot = self
            .builder
            .build(
                instrument,
                ticker,
                orderbook,
                funding_rate,
                open_interest,
                long_short_ratio,
                taker_ratio,
            )
            .await;

        let mut payload = serde_json::to_value(&snapshot)?;
        if let Value::Object(map) = &mut payload {
            map.insert("symbol".to_string(), json!(instrument));
        }
        let published = self
            .bus
            .publish(
                streams::MARKET_SNAPSHOTS,
                &StreamMessage::market_snapshot(payload),
            )
            .await;
        if published.is_ok() {
            info!(
                instrument,
                regime = %snapshot.market_regime,
                price = snapshot.ticker.last,
                "Snapshot published"
            );
        }

        // Alerting is independent of whether the snapshot made it out.
        self.check_anomalies(instrument, &snapshot).await;
        published.map(|_| ())
    }

    /// Independent of the snapshot publish: raise `market:alerts` on a >3%
    /// hourly move or a funding rate beyond ±0.05%.
    async fn check_anomalies(
        &self,
        instrument: &str,
        snapshot: &crate::domain::market::MarketSnapshot,
    ) {
        let mut reasons = Vec::new();
        if snapshot.price_change_1h.abs() > PRICE_CHANGE_ALERT {
            reasons.push(format!(
                "1h price change {:+.2}%",
                snapshot.price_change_1h * 100.0
            ));
        }
        if snapshot.funding_rate.current.abs() > FUNDING_RATE_ALERT {
            reasons.push(format!(
                "funding rate {:+.4}%",
                snapshot.funding_rate.current * 100.0
            ));
        }
        if reasons.is_empty() {
            return;
        }

        let alert = StreamMessage::market_alert(json!({
            "symbol": instrument,
            "severity": "WARNING",
            "reason": reasons.join("; "),
            "price_change_1h": snapshot.price_change_1h,
            "funding_rate": snapshot.funding_rate.current,
        }));
        if let Err(e) = self.bus.publish(streams::MARKET_ALERTS, &alert).await {
            warn!(error = %e, "Alert publication failed");
        } else {
            warn!(instrument, reasons = ?reasons, "Market anomaly alert published");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Timeframe;
    use crate::infrastructure::mock::{InMemoryBus, InMemoryCandleRepository, MockExchange};
    use chrono::{Duration as ChronoDuration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal::prelude::FromPrimitive;

    fn test_config() -> Config {
        let mut config = Config::from_env().unwrap();
        config.instruments = vec!["BTC-USDT-SWAP".to_string()];
        config.timeframes = vec![Timeframe::OneHour, Timeframe::FourHour];
        config
    }

    fn candles(tf: Timeframe, count: usize) -> Vec<crate::domain::market::Candle> {
        (0..count)
            .map(|i| crate::domain::market::Candle {
                time: Utc::now() + ChronoDuration::seconds(i as i64 * tf.to_seconds()),
                symbol: "BTC-USDT-SWAP".to_string(),
                timeframe: tf,
                open: Decimal::from_f64(100.0).unwrap(),
                high: Decimal::from_f64(101.0).unwrap(),
                low: Decimal::from_f64(99.0).unwrap(),
                close: Decimal::from_f64(100.0 + i as f64 * 0.1).unwrap(),
                volume: Decimal::from_f64(500.0).unwrap(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_backfill_loads_all_pairs() {
        let exchange = Arc::new(MockExchange::new());
        {
            let mut seeded = exchange.candles.write().await;
            seeded.insert(
                ("BTC-USDT-SWAP".to_string(), Timeframe::OneHour),
                candles(Timeframe::OneHour, 50),
            );
            seeded.insert(
                ("BTC-USDT-SWAP".to_string(), Timeframe::FourHour),
                candles(Timeframe::FourHour, 50),
            );
        }
        let store = Arc::new(CandleStore::new(
            Arc::new(InMemoryCandleRepository::new()),
            200,
        ));
        let server = IndicatorServer::new(
            test_config(),
            Arc::new(InMemoryBus::new()),
            exchange,
            Arc::clone(&store),
        );
        server.backfill().await.unwrap();
        assert_eq!(store.len("BTC-USDT-SWAP", Timeframe::OneHour).await, 50);
        assert_eq!(store.len("BTC-USDT-SWAP", Timeframe::FourHour).await, 50);
    }

    #[tokio::test]
    async fn test_publish_snapshot_emits_stream_message() {
        let bus = Arc::new(InMemoryBus::new());
        let store = Arc::new(CandleStore::new(
            Arc::new(InMemoryCandleRepository::new()),
            200,
        ));
        store
            .backfill("BTC-USDT-SWAP", Timeframe::OneHour, candles(Timeframe::OneHour, 10))
            .await
            .unwrap();
        let server = IndicatorServer::new(
            test_config(),
            Arc::clone(&bus) as Arc<dyn MessageBus>,
            Arc::new(MockExchange::new()),
            store,
        );

        server.publish_snapshot("BTC-USDT-SWAP").await.unwrap();

        let published = bus.published(streams::MARKET_SNAPSHOTS).await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].message_type, "market_snapshot");
        assert_eq!(published[0].payload_str("symbol"), Some("BTC-USDT-SWAP"));
        // Calm market, no alerts
        assert!(bus.published(streams::MARKET_ALERTS).await.is_empty());
    }
}
