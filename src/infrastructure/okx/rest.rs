//! OKX v5 REST adapter.
//!
//! Read methods retry on transient errors and fall back to neutral defaults
//! when retries are exhausted, so a flaky endpoint degrades a snapshot
//! instead of failing it. Write methods (order, algo, cancel, close,
//! leverage) are NOT idempotent and are issued exactly once.

use crate::config::ExchangeConfig;
use crate::domain::errors::ExchangeError;
use crate::domain::market::{Candle, FundingRate, OpenInterest, OrderBook, Ticker, Timeframe};
use crate::domain::ports::ExchangeClient;
use crate::domain::trading::{AccountState, OrderIntent, OrderResult, OrderType, PosSide, Position};
use crate::infrastructure::core::with_retry;
use crate::infrastructure::okx::sign;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info, warn};

const BASE_URL: &str = "https://www.okx.com";

#[derive(Debug, Deserialize)]
struct OkxResponse {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<Value>,
}

impl OkxResponse {
    fn ok(&self) -> bool {
        self.code == "0"
    }

    fn first(&self) -> Option<&Value> {
        self.data.first()
    }
}

pub struct OkxRestClient {
    http: reqwest::Client,
    config: ExchangeConfig,
    max_retries: u32,
}

impl OkxRestClient {
    pub fn new(config: ExchangeConfig, max_retries: u32) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            config,
            max_retries,
        })
    }

    fn auth_headers(&self, method: &str, path: &str, body: &str) -> Vec<(&'static str, String)> {
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
        let prehash = format!("{}{}{}{}", timestamp, method, path, body);
        let mut headers = vec![
            ("OK-ACCESS-KEY", self.config.api_key.clone()),
            ("OK-ACCESS-SIGN", sign(&self.config.secret_key, &prehash)),
            ("OK-ACCESS-TIMESTAMP", timestamp),
            ("OK-ACCESS-PASSPHRASE", self.config.passphrase.clone()),
        ];
        if self.config.flag == "1" {
            headers.push(("x-simulated-trading", "1".to_string()));
        }
        headers
    }

    async fn get(&self, path: &str, private: bool) -> Result<OkxResponse, ExchangeError> {
        let mut request = self.http.get(format!("{}{}", BASE_URL, path));
        if private {
            for (name, value) in self.auth_headers("GET", path, "") {
                request = request.header(name, value);
            }
        }
        let response = request.send().await.map_err(|e| ExchangeError::Transport {
            reason: e.to_string(),
        })?;
        let parsed: OkxResponse =
            response.json().await.map_err(|e| ExchangeError::Transport {
                reason: e.to_string(),
            })?;
        if !parsed.ok() {
            return Err(ExchangeError::Api {
                code: parsed.code,
                message: parsed.msg,
            });
        }
        Ok(parsed)
    }

    /// Retried GET for idempotent reads.
    async fn get_retry(&self, path: &str, private: bool) -> Result<OkxResponse, ExchangeError> {
        with_retry(path, self.max_retries, || self.get(path, private)).await
    }

    /// Single-attempt POST for non-idempotent writes.
    async fn post(&self, path: &str, body: Value) -> Result<OkxResponse, ExchangeError> {
        let body_raw = body.to_string();
        let mut request = self
            .http
            .post(format!("{}{}", BASE_URL, path))
            .header("Content-Type", "application/json")
            .body(body_raw.clone());
        for (name, value) in self.auth_headers("POST", path, &body_raw) {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|e| ExchangeError::Transport {
            reason: e.to_string(),
        })?;
        response.json().await.map_err(|e| ExchangeError::Transport {
            reason: e.to_string(),
        })
    }

    /// Currency prefix of an instrument id ("BTC-USDT-SWAP" → "BTC").
    fn ccy(inst_id: &str) -> &str {
        inst_id.split('-').next().unwrap_or(inst_id)
    }
}

pub(crate) fn field_f64(value: &Value, key: &str) -> f64 {
    match value.get(key) {
        Some(Value::String(s)) => s.parse().unwrap_or(0.0),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

pub(crate) fn field_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn row_f64(row: &Value, index: usize) -> f64 {
    match row.get(index) {
        Some(Value::String(s)) => s.parse().unwrap_or(0.0),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn millis_ts(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    let ms = field_str(value, key)?.parse::<i64>().ok()?;
    Utc.timestamp_millis_opt(ms).single()
}

/// Map an order/algo/cancel/close response into an [`OrderResult`].
fn order_result(response: Result<OkxResponse, ExchangeError>, id_key: &str) -> OrderResult {
    match response {
        Ok(parsed) => {
            let data = parsed.first().cloned().unwrap_or(Value::Null);
            let s_code = field_str(&data, "sCode").unwrap_or(if parsed.ok() { "0" } else { "1" });
            if parsed.ok() && s_code == "0" {
                OrderResult {
                    success: true,
                    ord_id: if id_key == "ordId" {
                        field_str(&data, "ordId").map(str::to_string)
                    } else {
                        None
                    },
                    algo_id: if id_key == "algoId" {
                        field_str(&data, "algoId").map(str::to_string)
                    } else {
                        None
                    },
                    status: "submitted".to_string(),
                    error_code: None,
                    error_message: None,
                    fill_price: None,
                    fill_size: None,
                    timestamp: Utc::now(),
                }
            } else {
                OrderResult {
                    success: false,
                    ord_id: None,
                    algo_id: None,
                    status: "rejected".to_string(),
                    error_code: field_str(&data, "sCode")
                        .map(str::to_string)
                        .or(Some(parsed.code)),
                    error_message: field_str(&data, "sMsg")
                        .map(str::to_string)
                        .or(Some(parsed.msg)),
                    fill_price: None,
                    fill_size: None,
                    timestamp: Utc::now(),
                }
            }
        }
        Err(e) => OrderResult::failure(e.to_string()),
    }
}

pub(crate) fn parse_position(data: &Value) -> Option<Position> {
    let inst_id = field_str(data, "instId")?.to_string();
    let pos_side = PosSide::from_str(field_str(data, "posSide").unwrap_or("long")).ok()?;
    Some(Position {
        inst_id,
        pos_side,
        size: field_f64(data, "pos"),
        avg_price: field_f64(data, "avgPx"),
        unrealized_pnl: field_f64(data, "upl"),
        pnl_ratio: field_f64(data, "uplRatio"),
        leverage: {
            let lever = field_f64(data, "lever");
            if lever > 0.0 { lever } else { 1.0 }
        },
        liquidation_price: field_f64(data, "liqPx"),
        margin: field_f64(data, "margin"),
        margin_ratio: field_f64(data, "mgnRatio"),
        updated_at: millis_ts(data, "uTime"),
    })
}

#[async_trait]
impl ExchangeClient for OkxRestClient {
    async fn place_order(&self, intent: &OrderIntent) -> OrderResult {
        let mut body = json!({
            "instId": intent.symbol,
            "tdMode": "cross",
            "side": intent.side.as_str(),
            "posSide": intent.pos_side.as_str(),
            "ordType": intent.order_type.as_str(),
            "sz": intent.size,
        });
        if intent.order_type == OrderType::Limit {
            if let Some(px) = &intent.limit_price {
                body["px"] = json!(px);
            }
        }
        order_result(self.post("/api/v5/trade/order", body).await, "ordId")
    }

    async fn place_algo_order(
        &self,
        inst_id: &str,
        side: &str,
        pos_side: PosSide,
        size: &str,
        sl_trigger_px: &str,
        tp_trigger_px: Option<&str>,
    ) -> OrderResult {
        let mut body = json!({
            "instId": inst_id,
            "tdMode": "cross",
            "side": side,
            "posSide": pos_side.as_str(),
            "sz": size,
            "ordType": "oco",
            "slTriggerPx": sl_trigger_px,
            "slOrdPx": "-1",
        });
        if let Some(tp) = tp_trigger_px {
            body["tpTriggerPx"] = json!(tp);
            body["tpOrdPx"] = json!("-1");
        }
        order_result(self.post("/api/v5/trade/order-algo", body).await, "algoId")
    }

    async fn cancel_order(&self, inst_id: &str, ord_id: &str) -> OrderResult {
        let body = json!({ "instId": inst_id, "ordId": ord_id });
        order_result(self.post("/api/v5/trade/cancel-order", body).await, "ordId")
    }

    async fn close_position(
        &self,
        inst_id: &str,
        mgn_mode: &str,
        pos_side: PosSide,
    ) -> OrderResult {
        let body = json!({
            "instId": inst_id,
            "mgnMode": mgn_mode,
            "posSide": pos_side.as_str(),
        });
        order_result(self.post("/api/v5/trade/close-position", body).await, "ordId")
    }

    async fn get_balance(&self) -> AccountState {
        match self.get_retry("/api/v5/account/balance", true).await {
            Ok(parsed) => {
                let Some(data) = parsed.first() else {
                    return AccountState::default();
                };
                let equity = field_f64(data, "totalEq");
                let available = data
                    .get("details")
                    .and_then(Value::as_array)
                    .and_then(|details| {
                        details
                            .iter()
                            .find(|d| field_str(d, "ccy") == Some("USDT"))
                            .map(|d| field_f64(d, "availBal"))
                    })
                    .unwrap_or(0.0);
                AccountState {
                    equity,
                    available_balance: available,
                    ..Default::default()
                }
            }
            Err(e) => {
                warn!(error = %e, "get_balance failed, returning default");
                AccountState::default()
            }
        }
    }

    async fn get_positions(&self, inst_id: Option<&str>) -> Vec<Position> {
        let path = match inst_id {
            Some(id) => format!("/api/v5/account/positions?instId={}", id),
            None => "/api/v5/account/positions".to_string(),
        };
        match self.get_retry(&path, true).await {
            Ok(parsed) => parsed.data.iter().filter_map(parse_position).collect(),
            Err(e) => {
                warn!(error = %e, "get_positions failed, returning empty");
                Vec::new()
            }
        }
    }

    async fn set_leverage(&self, inst_id: &str, leverage: &str) -> Result<()> {
        let body = json!({
            "instId": inst_id,
            "lever": leverage,
            "mgnMode": "cross",
        });
        let parsed = self
            .post("/api/v5/account/set-leverage", body)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        if !parsed.ok() {
            anyhow::bail!("set_leverage rejected: {} {}", parsed.code, parsed.msg);
        }
        info!(inst_id, leverage, "Leverage set");
        Ok(())
    }

    async fn get_candles(&self, inst_id: &str, timeframe: Timeframe, limit: usize) -> Vec<Candle> {
        let path = format!(
            "/api/v5/market/candles?instId={}&bar={}&limit={}",
            inst_id,
            timeframe.as_str(),
            limit
        );
        let parsed = match self.get_retry(&path, false).await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, inst_id, "get_candles failed, returning empty");
                return Vec::new();
            }
        };

        // OKX returns newest first; flip to chronological order.
        let mut candles: Vec<Candle> = parsed
            .data
            .iter()
            .filter_map(|row| {
                let ts = row.get(0)?.as_str()?.parse::<i64>().ok()?;
                Some(Candle {
                    time: Utc.timestamp_millis_opt(ts).single()?,
                    symbol: inst_id.to_string(),
                    timeframe,
                    open: Decimal::from_str(row.get(1)?.as_str()?).ok()?,
                    high: Decimal::from_str(row.get(2)?.as_str()?).ok()?,
                    low: Decimal::from_str(row.get(3)?.as_str()?).ok()?,
                    close: Decimal::from_str(row.get(4)?.as_str()?).ok()?,
                    volume: Decimal::from_str(row.get(5)?.as_str()?).ok()?,
                })
            })
            .collect();
        candles.reverse();
        candles
    }

    async fn get_ticker(&self, inst_id: &str) -> Ticker {
        let path = format!("/api/v5/market/ticker?instId={}", inst_id);
        match self.get_retry(&path, false).await {
            Ok(parsed) => {
                let Some(data) = parsed.first() else {
                    return Ticker {
                        symbol: inst_id.to_string(),
                        ..Default::default()
                    };
                };
                Ticker {
                    symbol: inst_id.to_string(),
                    last: field_f64(data, "last"),
                    bid: field_f64(data, "bidPx"),
                    ask: field_f64(data, "askPx"),
                    volume_24h: field_f64(data, "vol24h"),
                    change_24h: field_f64(data, "sodUtc8"),
                }
            }
            Err(e) => {
                warn!(error = %e, inst_id, "get_ticker failed, returning default");
                Ticker {
                    symbol: inst_id.to_string(),
                    ..Default::default()
                }
            }
        }
    }

    async fn get_orderbook(&self, inst_id: &str, depth: usize) -> OrderBook {
        let path = format!("/api/v5/market/books?instId={}&sz={}", inst_id, depth);
        match self.get_retry(&path, false).await {
            Ok(parsed) => {
                let Some(data) = parsed.first() else {
                    return OrderBook::default();
                };
                let levels = |key: &str| -> Vec<(f64, f64)> {
                    data.get(key)
                        .and_then(Value::as_array)
                        .map(|rows| {
                            rows.iter()
                                .map(|row| (row_f64(row, 0), row_f64(row, 1)))
                                .collect()
                        })
                        .unwrap_or_default()
                };
                let bids = levels("bids");
                let asks = levels("asks");
                let spread = match (bids.first(), asks.first()) {
                    (Some(bid), Some(ask)) => ask.0 - bid.0,
                    _ => 0.0,
                };
                OrderBook {
                    spread,
                    bid_depth: bids.iter().map(|l| l.1).sum(),
                    ask_depth: asks.iter().map(|l| l.1).sum(),
                    bids,
                    asks,
                }
            }
            Err(e) => {
                error!(error = %e, inst_id, "get_orderbook failed, returning default");
                OrderBook::default()
            }
        }
    }

    async fn get_funding_rate(&self, inst_id: &str) -> FundingRate {
        let path = format!("/api/v5/public/funding-rate?instId={}", inst_id);
        match self.get_retry(&path, false).await {
            Ok(parsed) => {
                let Some(data) = parsed.first() else {
                    return FundingRate::default();
                };
                FundingRate {
                    current: field_f64(data, "fundingRate"),
                    predicted: field_f64(data, "nextFundingRate"),
                    next_funding_time: millis_ts(data, "fundingTime"),
                }
            }
            Err(e) => {
                warn!(error = %e, inst_id, "get_funding_rate failed, returning default");
                FundingRate::default()
            }
        }
    }

    async fn get_open_interest(&self, inst_id: &str) -> OpenInterest {
        let path = format!(
            "/api/v5/public/open-interest?instType=SWAP&instId={}",
            inst_id
        );
        match self.get_retry(&path, false).await {
            Ok(parsed) => {
                let Some(data) = parsed.first() else {
                    return OpenInterest::default();
                };
                OpenInterest {
                    oi: field_f64(data, "oi"),
                    oi_change_24h: 0.0,
                }
            }
            Err(e) => {
                warn!(error = %e, inst_id, "get_open_interest failed, returning default");
                OpenInterest::default()
            }
        }
    }

    async fn get_long_short_ratio(&self, inst_id: &str) -> f64 {
        let path = format!(
            "/api/v5/rubik/stat/contracts/long-short-account-ratio?ccy={}&period=5m",
            Self::ccy(inst_id)
        );
        match self.get_retry(&path, false).await {
            Ok(parsed) => parsed
                .first()
                .map(|row| {
                    let ratio = row_f64(row, 1);
                    if ratio > 0.0 { ratio } else { 1.0 }
                })
                .unwrap_or(1.0),
            Err(e) => {
                warn!(error = %e, inst_id, "get_long_short_ratio failed, returning neutral");
                1.0
            }
        }
    }

    async fn get_taker_volume(&self, inst_id: &str) -> f64 {
        let path = format!(
            "/api/v5/rubik/stat/taker-volume?ccy={}&instType=CONTRACTS&period=5m",
            Self::ccy(inst_id)
        );
        match self.get_retry(&path, false).await {
            Ok(parsed) => parsed
                .first()
                .map(|row| {
                    let sell = row_f64(row, 1);
                    let buy = row_f64(row, 2);
                    if sell > 0.0 && buy > 0.0 { buy / sell } else { 1.0 }
                })
                .unwrap_or(1.0),
            Err(e) => {
                warn!(error = %e, inst_id, "get_taker_volume failed, returning neutral");
                1.0
            }
        }
    }
}
