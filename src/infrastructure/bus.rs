//! Redis Streams message bus.
//!
//! One consumer group per service. Delivery is at-least-once: an entry is
//! acknowledged only after the subscriber callback returns Ok, so a failed
//! callback leaves it pending for redelivery on the next poll.

use crate::domain::errors::BusError;
use crate::domain::messages::{StreamMessage, streams};
use crate::domain::ports::{BusCallback, MessageBus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply, StreamRangeReply};
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const READ_BLOCK_MS: usize = 5000;
const READ_BATCH: usize = 10;
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct RedisBus {
    conn: ConnectionManager,
    group: String,
    consumer: String,
}

impl RedisBus {
    /// Connect, verify with PING, and ensure this service's consumer group
    /// exists on every stream it may read.
    pub async fn connect(redis_url: &str, group: &str, consumer: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Invalid REDIS_URL")?;
        let mut conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .context("Redis PING failed")?;

        let bus = Self {
            conn,
            group: group.to_string(),
            consumer: consumer.to_string(),
        };

        for stream in streams::ALL {
            bus.ensure_group(stream).await?;
        }

        info!(url = redis_url, group, "Redis bus connected");
        Ok(bus)
    }

    async fn ack(&self, stream: &str, entry_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(stream, &self.group, &[entry_id])
            .await
            .with_context(|| format!("XACK failed on {}", stream))?;
        Ok(())
    }

    async fn read_batch(&self, streams: &[String]) -> redis::RedisResult<StreamReadReply> {
        let mut conn = self.conn.clone();
        let keys: Vec<&str> = streams.iter().map(String::as_str).collect();
        let cursors = vec![">"; keys.len()];
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(READ_BATCH)
            .block(READ_BLOCK_MS);
        conn.xread_options(&keys, &cursors, &options).await
    }

    async fn dispatch_batch(&self, reply: StreamReadReply, callback: &BusCallback) {
        for stream_key in reply.keys {
            let stream = stream_key.key;
            for entry in stream_key.ids {
                let raw: Option<String> = entry.get("data");
                let message = match raw.as_deref().map(StreamMessage::from_entry) {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        // Poisoned entry: ack so it does not loop forever.
                        let error = BusError::Malformed {
                            stream: stream.clone(),
                            reason: e.to_string(),
                        };
                        warn!(entry_id = %entry.id, %error, "Dropping stream entry");
                        let _ = self.ack(&stream, &entry.id).await;
                        continue;
                    }
                    None => {
                        let error = BusError::Malformed {
                            stream: stream.clone(),
                            reason: "missing data field".to_string(),
                        };
                        warn!(entry_id = %entry.id, %error, "Dropping stream entry");
                        let _ = self.ack(&stream, &entry.id).await;
                        continue;
                    }
                };

                match callback(stream.clone(), message).await {
                    Ok(()) => {
                        if let Err(e) = self.ack(&stream, &entry.id).await {
                            warn!(stream, entry_id = %entry.id, error = %e, "Ack failed");
                        }
                    }
                    Err(e) => {
                        // No ack: the entry stays pending and is redelivered.
                        error!(stream, entry_id = %entry.id, error = %e, "Subscriber callback failed");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, stream: &str, message: &StreamMessage) -> Result<String> {
        let data = message.to_entry()?;
        let mut conn = self.conn.clone();
        let entry_id: String = conn
            .xadd(stream, "*", &[("data", data.as_str())])
            .await
            .with_context(|| format!("XADD failed on {}", stream))?;
        debug!(stream, entry_id, message_type = %message.message_type, "Published");
        Ok(entry_id)
    }

    async fn subscribe(
        &self,
        streams: Vec<String>,
        callback: BusCallback,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        info!(?streams, group = %self.group, "Subscribing");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let reply = tokio::select! {
                result = self.read_batch(&streams) => result,
                _ = shutdown.changed() => continue,
            };

            match reply {
                Ok(reply) => {
                    if reply.keys.is_empty() {
                        continue;
                    }
                    self.dispatch_batch(reply, &callback).await;
                }
                Err(e) if e.code() == Some("NOGROUP") => {
                    warn!(group = %self.group, "Consumer group missing, recreating");
                    for stream in &streams {
                        if let Err(e) = self.ensure_group(stream).await {
                            error!(stream, error = %e, "Group recreation failed");
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Bus read failed, backing off");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }
        info!(group = %self.group, "Subscription loop stopped");
        Ok(())
    }

    async fn read_latest(&self, stream: &str) -> Result<Option<StreamMessage>> {
        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn
            .xrevrange_count(stream, "+", "-", 1)
            .await
            .with_context(|| format!("XREVRANGE failed on {}", stream))?;

        let Some(entry) = reply.ids.into_iter().next() else {
            return Ok(None);
        };
        let raw: Option<String> = entry.get("data");
        let raw = raw.with_context(|| format!("Entry {} missing data field", entry.id))?;
        Ok(Some(StreamMessage::from_entry(&raw)?))
    }

    async fn ensure_group(&self, stream: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                debug!(stream, group = %self.group, "Consumer group created");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e).with_context(|| format!("XGROUP CREATE failed on {}", stream)),
        }
    }
}
