//! In-memory mirror of exchange position state, fed by the private
//! WebSocket and republished on `trade:positions`.

use crate::domain::messages::{StreamMessage, streams};
use crate::domain::ports::MessageBus;
use crate::domain::trading::{PosSide, Position};
use crate::infrastructure::okx::rest::parse_position;
use anyhow::Result;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct PositionManager {
    bus: Arc<dyn MessageBus>,
    positions: RwLock<HashMap<(String, PosSide), Position>>,
}

impl PositionManager {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            positions: RwLock::new(HashMap::new()),
        }
    }

    /// True iff the raw update reports a flat position (`pos` of "0" or "").
    pub fn is_position_closed(raw: &Value) -> bool {
        match raw.get("pos") {
            Some(Value::String(s)) => s.is_empty() || s == "0",
            Some(Value::Number(n)) => n.as_f64() == Some(0.0),
            _ => false,
        }
    }

    /// Apply a raw private-WS position event: replace the entry, or remove
    /// it and publish a close when size reaches zero.
    pub async fn update(&self, raw: &Value) -> Result<()> {
        let Some(parsed) = parse_position(raw) else {
            warn!(raw = %raw, "Unparseable position update");
            return Ok(());
        };
        let key = (parsed.inst_id.clone(), parsed.pos_side);

        if Self::is_position_closed(raw) {
            let previous = self.positions.write().await.remove(&key);
            // The terminal frame reports size 0 with empty value fields, so
            // the realized PnL estimate comes from the last cached state.
            let (pnl_usd, exit_price) = previous
                .map(|p| (p.unrealized_pnl, p.avg_price))
                .unwrap_or((parsed.unrealized_pnl, parsed.avg_price));
            let message = StreamMessage::position_update(json!({
                "event": "closed",
                "symbol": parsed.inst_id,
                "pos_side": parsed.pos_side.as_str(),
                "pnl_usd": pnl_usd,
                "exit_price": exit_price,
            }));
            self.bus.publish(streams::TRADE_POSITIONS, &message).await?;
            info!(symbol = %key.0, pos_side = %key.1, pnl_usd, "Position closed");
        } else {
            self.positions.write().await.insert(key, parsed.clone());
            let message = StreamMessage::position_update(json!({
                "event": "update",
                "symbol": parsed.inst_id,
                "pos_side": parsed.pos_side.as_str(),
                "position": serde_json::to_value(&parsed)?,
            }));
            self.bus.publish(streams::TRADE_POSITIONS, &message).await?;
        }
        Ok(())
    }

    pub async fn get_all(&self) -> Vec<Position> {
        self.positions.read().await.values().cloned().collect()
    }

    pub async fn get(&self, inst_id: &str, pos_side: PosSide) -> Option<Position> {
        self.positions
            .read()
            .await
            .get(&(inst_id.to_string(), pos_side))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::InMemoryBus;

    fn raw_position(pos: &str, upl: f64) -> Value {
        json!({
            "instId": "BTC-USDT-SWAP",
            "posSide": "long",
            "pos": pos,
            "avgPx": "50000",
            "upl": upl,
            "lever": "2",
        })
    }

    #[test]
    fn test_is_position_closed() {
        assert!(PositionManager::is_position_closed(&raw_position("0", 0.0)));
        assert!(PositionManager::is_position_closed(&raw_position("", 0.0)));
        assert!(!PositionManager::is_position_closed(&raw_position("1.5", 0.0)));
        assert!(!PositionManager::is_position_closed(&json!({"instId": "X"})));
    }

    #[tokio::test]
    async fn test_update_then_close_removes_and_publishes() {
        let bus = Arc::new(InMemoryBus::new());
        let manager = PositionManager::new(bus.clone());

        manager.update(&raw_position("1.5", 25.0)).await.unwrap();
        assert_eq!(manager.get_all().await.len(), 1);
        assert!(manager.get("BTC-USDT-SWAP", PosSide::Long).await.is_some());

        manager.update(&raw_position("0", 0.0)).await.unwrap();
        assert!(manager.get_all().await.is_empty());

        let published = bus.published(streams::TRADE_POSITIONS).await;
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].payload_str("event"), Some("update"));
        assert_eq!(published[1].payload_str("event"), Some("closed"));
        // Close event carries the last cached uPL as the realized estimate.
        assert_eq!(published[1].payload["pnl_usd"].as_f64(), Some(25.0));
    }

    #[tokio::test]
    async fn test_update_replaces_entry() {
        let bus = Arc::new(InMemoryBus::new());
        let manager = PositionManager::new(bus);

        manager.update(&raw_position("1.0", 5.0)).await.unwrap();
        manager.update(&raw_position("2.0", 9.0)).await.unwrap();

        let positions = manager.get_all().await;
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].size, 2.0);
        assert_eq!(positions[0].unrealized_pnl, 9.0);
    }
}
