//! OKX private WebSocket: authenticated order/position/account updates.

use crate::infrastructure::core::truncate_utf8;
use crate::config::ExchangeConfig;
use crate::infrastructure::okx::sign;
use anyhow::{Context, Result, bail};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const MAX_BACKOFF_SECS: u64 = 60;
const PING_INTERVAL: Duration = Duration::from_secs(20);
const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw event from a private channel; handlers parse the payload.
#[derive(Debug, Clone)]
pub enum PrivateFeedEvent {
    Order(Value),
    Position(Value),
    Account(Value),
}

pub struct OkxPrivateWs {
    config: ExchangeConfig,
    inst_type: String,
    event_tx: mpsc::Sender<PrivateFeedEvent>,
}

impl OkxPrivateWs {
    pub fn new(
        config: ExchangeConfig,
        inst_type: &str,
        event_tx: mpsc::Sender<PrivateFeedEvent>,
    ) -> Self {
        Self {
            config,
            inst_type: inst_type.to_string(),
            event_tx,
        }
    }

    fn login_frame(&self) -> Value {
        let timestamp = Utc::now().timestamp().to_string();
        let prehash = format!("{}GET/users/self/verify", timestamp);
        json!({
            "op": "login",
            "args": [{
                "apiKey": self.config.api_key,
                "passphrase": self.config.passphrase,
                "timestamp": timestamp,
                "sign": sign(&self.config.secret_key, &prehash),
            }]
        })
    }

    fn subscribe_frame(&self) -> Value {
        json!({
            "op": "subscribe",
            "args": [
                {"channel": "orders", "instType": self.inst_type},
                {"channel": "positions", "instType": self.inst_type},
                {"channel": "account"},
            ]
        })
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.connect_and_stream(&mut shutdown).await {
                Ok(()) => {
                    info!("Private WebSocket closed");
                    if *shutdown.borrow() {
                        break;
                    }
                    attempt = 0;
                }
                Err(e) => {
                    let delay = 2u64.saturating_pow(attempt).min(MAX_BACKOFF_SECS);
                    error!(error = %e, delay, "Private WebSocket error, reconnecting");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                        _ = shutdown.changed() => {}
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }
        info!("Private WebSocket supervisor stopped");
    }

    async fn connect_and_stream(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let (ws, _) = connect_async(&self.config.ws_private_url)
            .await
            .context("Failed to connect private WebSocket")?;
        info!(url = %self.config.ws_private_url, "Private WebSocket connected");

        let (mut write, mut read) = ws.split();

        write
            .send(Message::Text(self.login_frame().to_string().into()))
            .await
            .context("Failed to send login frame")?;

        // Wait for the login ack before subscribing.
        let login_ack = tokio::time::timeout(LOGIN_TIMEOUT, async {
            while let Some(frame) = read.next().await {
                if let Ok(Message::Text(text)) = frame {
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        if value.get("event").and_then(Value::as_str) == Some("login") {
                            return Some(value);
                        }
                        if value.get("event").and_then(Value::as_str) == Some("error") {
                            return Some(value);
                        }
                    }
                }
            }
            None
        })
        .await
        .context("Login ack timed out")?;

        match login_ack {
            Some(ack) if ack.get("code").and_then(Value::as_str) == Some("0") => {
                info!("Private WebSocket authenticated");
            }
            Some(ack) => bail!("Private WebSocket login rejected: {}", ack),
            None => bail!("Private WebSocket closed during login"),
        }

        write
            .send(Message::Text(self.subscribe_frame().to_string().into()))
            .await
            .context("Failed to send subscribe frame")?;

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
                        Some(Err(e)) => return Err(e).context("Private WebSocket read failed"),
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
        if value.get("event").is_some() {
            debug!(frame = %value, "Control frame");
            return;
        }
        let (Some(arg), Some(rows)) = (value.get("arg"), value.get("data").and_then(Value::as_array))
        else {
            return;
        };
        let channel = arg.get("channel").and_then(Value::as_str).unwrap_or("");

        for row in rows {
            let event = match channel {
                "orders" => PrivateFeedEvent::Order(row.clone()),
                "positions" => PrivateFeedEvent::Position(row.clone()),
                "account" => PrivateFeedEvent::Account(row.clone()),
                other => {
                    debug!(channel = other, "Unhandled private channel");
                    continue;
                }
            };
            if self.event_tx.send(event).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ws() -> OkxPrivateWs {
        let (tx, _rx) = mpsc::channel(8);
        OkxPrivateWs::new(
            ExchangeConfig {
                api_key: "key".to_string(),
                secret_key: "secret".to_string(),
                passphrase: "pass".to_string(),
                flag: "1".to_string(),
                ws_public_url: String::new(),
                ws_private_url: "wss://example".to_string(),
            },
            "SWAP",
            tx,
        )
    }

    #[test]
    fn test_login_frame_shape() {
        let frame = test_ws().login_frame();
        assert_eq!(frame["op"], "login");
        let arg = &frame["args"][0];
        assert_eq!(arg["apiKey"], "key");
        assert!(arg["sign"].as_str().unwrap().len() > 20);
    }

    #[test]
    fn test_subscribe_frame_covers_all_channels() {
        let frame = test_ws().subscribe_frame();
        let args = frame["args"].as_array().unwrap();
        let channels: Vec<&str> = args
            .iter()
            .map(|a| a["channel"].as_str().unwrap())
            .collect();
        assert_eq!(channels, vec!["orders", "positions", "account"]);
        assert_eq!(args[0]["instType"], "SWAP");
    }
}
