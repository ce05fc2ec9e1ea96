//! Bounded in-memory candle history per (instrument, timeframe), backed by
//! the durable candle repository.

use crate::domain::market::{Candle, Timeframe};
use crate::domain::repositories::CandleRepository;
use anyhow::Result;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub struct CandleStore {
    repo: Arc<dyn CandleRepository>,
    max_candles: usize,
    rings: RwLock<HashMap<(String, Timeframe), VecDeque<Candle>>>,
}

impl CandleStore {
    pub fn new(repo: Arc<dyn CandleRepository>, max_candles: usize) -> Self {
        Self {
            repo,
            max_candles,
            rings: RwLock::new(HashMap::new()),
        }
    }

    /// Append to the ring (evicting from the front at capacity) and persist.
    /// Re-delivery of the same time bucket overwrites in place.
    pub async fn add(&self, candle: Candle) -> Result<()> {
        {
            let mut rings = self.rings.write().await;
            let ring = rings
                .entry((candle.symbol.clone(), candle.timeframe))
                .or_default();
            match ring.back_mut() {
                Some(last) if last.time == candle.time => *last = candle.clone(),
                _ => {
                    ring.push_back(candle.clone());
                    while ring.len() > self.max_candles {
                        ring.pop_front();
                    }
                }
            }
        }
        self.repo.upsert(&candle).await?;
        debug!(
            symbol = %candle.symbol,
            timeframe = %candle.timeframe,
            time = %candle.time,
            "Candle added"
        );
        Ok(())
    }

    /// Bulk-load history into the ring and the store (conflicts ignored).
    pub async fn backfill(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        candles: Vec<Candle>,
    ) -> Result<()> {
        {
            let mut rings = self.rings.write().await;
            let ring = rings.entry((instrument.to_string(), timeframe)).or_default();
            for candle in &candles {
                ring.push_back(candle.clone());
                while ring.len() > self.max_candles {
                    ring.pop_front();
                }
            }
        }
        self.repo.bulk_insert(&candles).await?;
        info!(
            instrument,
            timeframe = %timeframe,
            count = candles.len(),
            "Candles backfilled"
        );
        Ok(())
    }

    /// Last `limit` candles in chronological order.
    pub async fn get(&self, instrument: &str, timeframe: Timeframe, limit: usize) -> Vec<Candle> {
        let rings = self.rings.read().await;
        let Some(ring) = rings.get(&(instrument.to_string(), timeframe)) else {
            return Vec::new();
        };
        let start = ring.len().saturating_sub(limit);
        ring.iter().skip(start).cloned().collect()
    }

    pub async fn get_latest(&self, instrument: &str, timeframe: Timeframe) -> Option<Candle> {
        let rings = self.rings.read().await;
        rings
            .get(&(instrument.to_string(), timeframe))
            .and_then(|ring| ring.back().cloned())
    }

    pub async fn len(&self, instrument: &str, timeframe: Timeframe) -> usize {
        let rings = self.rings.read().await;
        rings
            .get(&(instrument.to_string(), timeframe))
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::InMemoryCandleRepository;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn candle(offset_min: i64) -> Candle {
        Candle {
            time: Utc::now() + Duration::minutes(offset_min),
            symbol: "BTC-USDT-SWAP".to_string(),
            timeframe: Timeframe::FiveMin,
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100.5),
            volume: dec!(10),
        }
    }

    #[tokio::test]
    async fn test_ring_evicts_from_front_at_capacity() {
        let store = CandleStore::new(Arc::new(InMemoryCandleRepository::new()), 5);
        for i in 0..12 {
            store.add(candle(i * 5)).await.unwrap();
        }
        assert_eq!(store.len("BTC-USDT-SWAP", Timeframe::FiveMin).await, 5);

        let candles = store.get("BTC-USDT-SWAP", Timeframe::FiveMin, 100).await;
        // Most recent append is at the back.
        assert_eq!(candles.last().unwrap().time, candles.iter().map(|c| c.time).max().unwrap());
    }

    #[tokio::test]
    async fn test_same_bucket_overwrites_in_place() {
        let store = CandleStore::new(Arc::new(InMemoryCandleRepository::new()), 5);
        let mut first = candle(0);
        store.add(first.clone()).await.unwrap();
        first.close = dec!(111);
        store.add(first.clone()).await.unwrap();

        assert_eq!(store.len("BTC-USDT-SWAP", Timeframe::FiveMin).await, 1);
        let latest = store
            .get_latest("BTC-USDT-SWAP", Timeframe::FiveMin)
            .await
            .unwrap();
        assert_eq!(latest.close, dec!(111));
    }

    #[tokio::test]
    async fn test_backfill_fills_ring_and_store() {
        let repo = Arc::new(InMemoryCandleRepository::new());
        let store = CandleStore::new(repo.clone(), 200);
        let candles: Vec<Candle> = (0..50).map(|i| candle(i * 5)).collect();
        store
            .backfill("BTC-USDT-SWAP", Timeframe::FiveMin, candles)
            .await
            .unwrap();
        assert_eq!(store.len("BTC-USDT-SWAP", Timeframe::FiveMin).await, 50);
        assert_eq!(repo.rows.read().await.len(), 50);
    }

    #[tokio::test]
    async fn test_get_on_unknown_key_is_empty() {
        let store = CandleStore::new(Arc::new(InMemoryCandleRepository::new()), 5);
        assert!(store.get("ETH-USDT-SWAP", Timeframe::OneHour, 10).await.is_empty());
        assert!(store.get_latest("ETH-USDT-SWAP", Timeframe::OneHour).await.is_none());
    }
}
