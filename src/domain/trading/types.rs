use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Requested trade operation. `Hold` never reaches the trade service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderAction {
    OpenLong,
    OpenShort,
    Close,
    Add,
    Reduce,
    Hold,
}

impl OrderAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderAction::OpenLong => "OPEN_LONG",
            OrderAction::OpenShort => "OPEN_SHORT",
            OrderAction::Close => "CLOSE",
            OrderAction::Add => "ADD",
            OrderAction::Reduce => "REDUCE",
            OrderAction::Hold => "HOLD",
        }
    }

    /// Actions that open new exposure and therefore set leverage first.
    pub fn is_open(&self) -> bool {
        matches!(self, OrderAction::OpenLong | OrderAction::OpenShort)
    }
}

impl FromStr for OrderAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN_LONG" => Ok(OrderAction::OpenLong),
            "OPEN_SHORT" => Ok(OrderAction::OpenShort),
            "CLOSE" => Ok(OrderAction::Close),
            "ADD" => Ok(OrderAction::Add),
            "REDUCE" => Ok(OrderAction::Reduce),
            "HOLD" => Ok(OrderAction::Hold),
            _ => anyhow::bail!("Invalid order action: '{}'", s),
        }
    }
}

impl fmt::Display for OrderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PosSide {
    Long,
    Short,
}

impl PosSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PosSide::Long => "long",
            PosSide::Short => "short",
        }
    }
}

impl FromStr for PosSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "long" => Ok(PosSide::Long),
            "short" => Ok(PosSide::Short),
            _ => anyhow::bail!("Invalid position side: '{}'", s),
        }
    }
}

impl fmt::Display for PosSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The orchestrator's request to trade.
///
/// Monetary quantities are string-decimals so the exact values cross the bus
/// and the exchange boundary without float rounding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub action: OrderAction,
    pub symbol: String,
    pub side: OrderSide,
    pub pos_side: PosSide,
    pub order_type: OrderType,
    pub size: String,
    #[serde(default)]
    pub limit_price: Option<String>,
    #[serde(default)]
    pub stop_loss: Option<String>,
    #[serde(default)]
    pub take_profit: Option<String>,
    #[serde(default = "default_leverage")]
    pub leverage: String,
    #[serde(default)]
    pub strategy_used: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub decision_id: String,
}

fn default_leverage() -> String {
    "1".to_string()
}

/// Exchange acknowledgement for one executed intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    #[serde(default)]
    pub ord_id: Option<String>,
    #[serde(default)]
    pub algo_id: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub fill_price: Option<f64>,
    #[serde(default)]
    pub fill_size: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl OrderResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            ord_id: None,
            algo_id: None,
            status: "failed".to_string(),
            error_code: None,
            error_message: Some(message.into()),
            fill_price: None,
            fill_size: None,
            timestamp: Utc::now(),
        }
    }
}

/// Per-(instrument, side) mirror of exchange position state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "instId")]
    pub inst_id: String,
    #[serde(rename = "posSide")]
    pub pos_side: PosSide,
    #[serde(rename = "pos")]
    pub size: f64,
    #[serde(rename = "avgPx")]
    pub avg_price: f64,
    #[serde(rename = "upl")]
    pub unrealized_pnl: f64,
    #[serde(rename = "uplRatio")]
    pub pnl_ratio: f64,
    #[serde(rename = "lever")]
    pub leverage: f64,
    #[serde(rename = "liqPx")]
    pub liquidation_price: f64,
    pub margin: f64,
    #[serde(rename = "mgnRatio")]
    pub margin_ratio: f64,
    #[serde(rename = "uTime")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Trading account equity snapshot, maintained from the private WS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountState {
    pub equity: f64,
    pub available_balance: f64,
    pub total_pnl: f64,
    pub daily_pnl: f64,
    pub max_drawdown_today: f64,
    pub timestamp: DateTime<Utc>,
}

impl Default for AccountState {
    fn default() -> Self {
        Self {
            equity: 0.0,
            available_balance: 0.0,
            total_pnl: 0.0,
            daily_pnl: 0.0,
            max_drawdown_today: 0.0,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    pub fn pos_side(&self) -> PosSide {
        match self {
            Direction::Long => PosSide::Long,
            Direction::Short => PosSide::Short,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Closed,
    Cancelled,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Closed => "closed",
            TradeStatus::Cancelled => "cancelled",
        }
    }
}

/// Durable journal entry for one open → close trade lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: Uuid,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub stop_loss: Decimal,
    pub take_profit: Option<Decimal>,
    pub size: Decimal,
    pub size_pct: Option<f64>,
    pub leverage: f64,
    pub pnl_usd: Option<f64>,
    pub pnl_pct: Option<f64>,
    pub fees_usd: Option<f64>,
    pub strategy_used: String,
    pub confidence_at_entry: f64,
    pub market_regime: String,
    pub opus_reasoning: String,
    pub indicators_entry: Option<Value>,
    pub indicators_exit: Option<Value>,
    pub research_context: Option<Value>,
    pub self_review: Option<Value>,
    pub exit_reason: Option<String>,
    pub status: TradeStatus,
    pub okx_order_id: Option<String>,
    pub okx_algo_id: Option<String>,
}

impl TradeRecord {
    /// Fresh open record with entry provenance; exit fields are filled by the
    /// close side-channel.
    pub fn open(symbol: String, direction: Direction) -> Self {
        Self {
            trade_id: Uuid::new_v4(),
            opened_at: Some(Utc::now()),
            closed_at: None,
            duration_seconds: None,
            symbol,
            direction,
            entry_price: Decimal::ZERO,
            exit_price: None,
            stop_loss: Decimal::ZERO,
            take_profit: None,
            size: Decimal::ZERO,
            size_pct: None,
            leverage: 1.0,
            pnl_usd: None,
            pnl_pct: None,
            fees_usd: None,
            strategy_used: String::new(),
            confidence_at_entry: 0.0,
            market_regime: String::new(),
            opus_reasoning: String::new(),
            indicators_entry: None,
            indicators_exit: None,
            research_context: None,
            self_review: None,
            exit_reason: None,
            status: TradeStatus::Open,
            okx_order_id: None,
            okx_algo_id: None,
        }
    }
}
