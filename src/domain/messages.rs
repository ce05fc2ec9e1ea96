//! Stream message envelope shared by all three services.
//!
//! Every stream entry carries a single `data` field whose value is the JSON
//! encoding of a [`StreamMessage`]. The bus assigns its own entry ids;
//! `msg_id` is independent and used for application-level deduplication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub mod streams {
    pub const MARKET_SNAPSHOTS: &str = "market:snapshots";
    pub const MARKET_ALERTS: &str = "market:alerts";
    pub const TRADE_ORDERS: &str = "trade:orders";
    pub const TRADE_FILLS: &str = "trade:fills";
    pub const TRADE_POSITIONS: &str = "trade:positions";
    pub const OPUS_DECISIONS: &str = "opus:decisions";
    pub const SYSTEM_ALERTS: &str = "system:alerts";

    /// Every stream a service may need a consumer group on.
    pub const ALL: &[&str] = &[
        MARKET_SNAPSHOTS,
        MARKET_ALERTS,
        TRADE_ORDERS,
        TRADE_FILLS,
        TRADE_POSITIONS,
        OPUS_DECISIONS,
        SYSTEM_ALERTS,
    ];
}

pub mod sources {
    pub const INDICATOR_SERVER: &str = "indicator_server";
    pub const TRADE_SERVER: &str = "trade_server";
    pub const ORCHESTRATOR: &str = "orchestrator";
}

pub mod message_types {
    pub const MARKET_SNAPSHOT: &str = "market_snapshot";
    pub const MARKET_ALERT: &str = "market_alert";
    pub const TRADE_FILL: &str = "trade_fill";
    pub const POSITION_UPDATE: &str = "position_update";
    pub const TRADE_ORDER: &str = "trade_order";
    pub const OPUS_DECISION: &str = "opus_decision";
    pub const SYSTEM_ALERT: &str = "system_alert";
}

/// Envelope for every event crossing the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub msg_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl StreamMessage {
    pub fn new(source: &str, message_type: &str, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            msg_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.to_string(),
            message_type: message_type.to_string(),
            payload,
            metadata: Map::new(),
        }
    }

    pub fn market_snapshot(payload: Value) -> Self {
        Self::new(sources::INDICATOR_SERVER, message_types::MARKET_SNAPSHOT, payload)
    }

    pub fn market_alert(payload: Value) -> Self {
        Self::new(sources::INDICATOR_SERVER, message_types::MARKET_ALERT, payload)
    }

    pub fn trade_fill(payload: Value) -> Self {
        Self::new(sources::TRADE_SERVER, message_types::TRADE_FILL, payload)
    }

    pub fn position_update(payload: Value) -> Self {
        Self::new(sources::TRADE_SERVER, message_types::POSITION_UPDATE, payload)
    }

    pub fn trade_order(payload: Value) -> Self {
        Self::new(sources::ORCHESTRATOR, message_types::TRADE_ORDER, payload)
    }

    pub fn opus_decision(payload: Value) -> Self {
        Self::new(sources::ORCHESTRATOR, message_types::OPUS_DECISION, payload)
    }

    pub fn system_alert(source: &str, payload: Value) -> Self {
        Self::new(source, message_types::SYSTEM_ALERT, payload)
    }

    /// Serialize for XADD: a single `data` field holding the JSON envelope.
    pub fn to_entry(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the `data` field of a stream entry.
    pub fn from_entry(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Convenience accessor into the payload.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}
