//! OKX public WebSocket feed.
//!
//! A single connection task reads frames, parses data events and pushes them
//! into a bounded channel consumed by the indicator service. Reconnects use
//! exponential backoff capped at 60s and replay every prior subscription.

use crate::infrastructure::core::truncate_utf8;
use crate::domain::market::{Candle, Timeframe};
use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const MAX_BACKOFF_SECS: u64 = 60;
const PING_INTERVAL: Duration = Duration::from_secs(20);

/// Parsed event from the public feed, routed by channel name.
#[derive(Debug, Clone)]
pub enum PublicFeedEvent {
    Candle {
        inst_id: String,
        timeframe: Timeframe,
        candle: Candle,
        /// OKX marks the final update of a bar with confirm = "1".
        confirmed: bool,
    },
    Ticker {
        inst_id: String,
        data: Value,
    },
    OrderBook {
        inst_id: String,
        data: Value,
    },
    FundingRate {
        inst_id: String,
        data: Value,
    },
}

pub struct OkxPublicWs {
    url: String,
    subscriptions: Vec<Value>,
    event_tx: mpsc::Sender<PublicFeedEvent>,
}

impl OkxPublicWs {
    pub fn new(url: String, event_tx: mpsc::Sender<PublicFeedEvent>) -> Self {
        Self {
            url,
            subscriptions: Vec::new(),
            event_tx,
        }
    }

    /// Register candle channels for every (instrument, timeframe) pair.
    pub fn subscribe_candles(&mut self, instruments: &[String], timeframes: &[Timeframe]) {
        for timeframe in timeframes {
            for inst in instruments {
                self.subscriptions
                    .push(json!({"channel": timeframe.ws_channel(), "instId": inst}));
            }
        }
    }

    pub fn subscribe_tickers(&mut self, instruments: &[String]) {
        for inst in instruments {
            self.subscriptions
                .push(json!({"channel": "tickers", "instId": inst}));
        }
    }

    pub fn subscribe_orderbook(&mut self, instruments: &[String]) {
        for inst in instruments {
            self.subscriptions
                .push(json!({"channel": "books5", "instId": inst}));
        }
    }

    pub fn subscribe_funding(&mut self, instruments: &[String]) {
        for inst in instruments {
            self.subscriptions
                .push(json!({"channel": "funding-rate", "instId": inst}));
        }
    }

    /// Connection supervisor: runs until shutdown flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.connect_and_stream(&mut shutdown).await {
                Ok(()) => {
                    info!("Public WebSocket closed");
                    if *shutdown.borrow() {
                        break;
                    }
                    attempt = 0;
                }
                Err(e) => {
                    let delay = 2u64.saturating_pow(attempt).min(MAX_BACKOFF_SECS);
                    error!(error = %e, delay, "Public WebSocket error, reconnecting");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                        _ = shutdown.changed() => {}
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }
        info!("Public WebSocket supervisor stopped");
    }

    async fn connect_and_stream(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let (ws, _) = connect_async(&self.url)
            .await
            .context("Failed to connect public WebSocket")?;
        info!(url = %self.url, "Public WebSocket connected");

        let (mut write, mut read) = ws.split();

        if !self.subscriptions.is_empty() {
            let frame = json!({"op": "subscribe", "args": self.subscriptions});
            write
                .send(Message::Text(frame.to_string().into()))
                .await
                .context("Failed to send subscribe frame")?;
            info!(count = self.subscriptions.len(), "Public subscriptions sent");
        }

        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = ping.tick() => {
                    write
                        .send(Message::Text("ping".into()))
                        .await
                        .context("Ping failed")?;
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => self.route_frame(&text).await,
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e).context("Public WebSocket read failed"),
                    }
                }
            }
        }
    }

    async fn route_frame(&self, text: &str) {
        if text == "pong" {
            return;
        }
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => {
                warn!(frame = truncate_utf8(&text, 200), "Dropping malformed frame");
                return;
            }
        };

        // Subscribe confirmations and errors have an "event" field.
        if value.get("event").is_some() {
            debug!(frame = %value, "Control frame");
            return;
        }
        let (Some(arg), Some(rows)) = (value.get("arg"), value.get("data").and_then(Value::as_array))
        else {
            return;
        };
        let channel = arg.get("channel").and_then(Value::as_str).unwrap_or("");
        let inst_id = arg
            .get("instId")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        for row in rows {
            let event = if let Some(timeframe) = Timeframe::from_ws_channel(channel) {
                match parse_candle_row(row, &inst_id, timeframe) {
                    Some((candle, confirmed)) => PublicFeedEvent::Candle {
                        inst_id: inst_id.clone(),
                        timeframe,
                        candle,
                        confirmed,
                    },
                    None => {
                        warn!(channel, "Dropping malformed candle row");
                        continue;
                    }
                }
            } else {
                match channel {
                    "tickers" => PublicFeedEvent::Ticker {
                        inst_id: inst_id.clone(),
                        data: row.clone(),
                    },
                    "books5" => PublicFeedEvent::OrderBook {
                        inst_id: inst_id.clone(),
                        data: row.clone(),
                    },
                    "funding-rate" => PublicFeedEvent::FundingRate {
                        inst_id: inst_id.clone(),
                        data: row.clone(),
                    },
                    other => {
                        debug!(channel = other, "Unhandled channel");
                        continue;
                    }
                }
            };

            if self.event_tx.send(event).await.is_err() {
                // Consumer gone; the supervisor will exit on shutdown.
                return;
            }
        }
    }
}

/// OKX candle row: [ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm].
fn parse_candle_row(row: &Value, inst_id: &str, timeframe: Timeframe) -> Option<(Candle, bool)> {
    let ts = row.get(0)?.as_str()?.parse::<i64>().ok()?;
    let candle = Candle {
        time: Utc.timestamp_millis_opt(ts).single()?,
        symbol: inst_id.to_string(),
        timeframe,
        open: Decimal::from_str(row.get(1)?.as_str()?).ok()?,
        high: Decimal::from_str(row.get(2)?.as_str()?).ok()?,
        low: Decimal::from_str(row.get(3)?.as_str()?).ok()?,
        close: Decimal::from_str(row.get(4)?.as_str()?).ok()?,
        volume: Decimal::from_str(row.get(5)?.as_str()?).ok()?,
    };
    let confirmed = row.get(8).and_then(Value::as_str) == Some("1");
    Some((candle, confirmed))
}
