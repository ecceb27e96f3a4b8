//! Redis Streams queue.
//!
//! # Key layout
//!
//! - `{topic}`: the stream itself
//! - `{topic}:dedup:{key}`: entry ID of a deduplicated publish, with a TTL
//!   of the dedup window

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tracing::debug;

use super::{dedup_storage_key, Delivery, MessageQueue, PublishReceipt, QueueError, ReadFrom};

const PAYLOAD_FIELD: &str = "payload";

/// Message queue backed by Redis Streams and consumer groups.
pub struct RedisStreamQueue {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    dedup_window: Duration,
}

impl RedisStreamQueue {
    /// Connects to Redis (e.g. "redis://localhost:6379").
    pub async fn connect(redis_url: &str, dedup_window: Duration) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, dedup_window))
    }

    pub fn from_connection(redis: ConnectionManager, dedup_window: Duration) -> Self {
        Self {
            redis,
            dedup_window,
        }
    }
}

/// Maps a missing-group reply onto [`QueueError::StreamNotFound`].
fn classify(topic: &str, err: redis::RedisError) -> QueueError {
    if err.code() == Some("NOGROUP") {
        QueueError::StreamNotFound(topic.to_string())
    } else {
        QueueError::RedisError(err)
    }
}

#[async_trait]
impl MessageQueue for RedisStreamQueue {
    async fn ensure_stream(&self, topic: &str, group: &str) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let created: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(topic)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(()) => {
                debug!(topic, group, "Created stream consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        dedup_key: &str,
    ) -> Result<PublishReceipt, QueueError> {
        let mut conn = self.redis.clone();
        let dedup = dedup_storage_key(topic, dedup_key);

        let existing: Option<String> = conn.get(&dedup).await?;
        if let Some(sequence) = existing {
            debug!(topic, dedup_key, sequence = %sequence, "Duplicate publish suppressed");
            return Ok(PublishReceipt {
                sequence,
                duplicate: true,
            });
        }

        // NOMKSTREAM: a missing stream replies nil instead of creating it.
        let sequence: Option<String> = redis::cmd("XADD")
            .arg(topic)
            .arg("NOMKSTREAM")
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        let sequence = sequence.ok_or_else(|| QueueError::StreamNotFound(topic.to_string()))?;

        redis::cmd("SET")
            .arg(&dedup)
            .arg(&sequence)
            .arg("NX")
            .arg("EX")
            .arg(self.dedup_window.as_secs().max(1))
            .query_async::<_, Option<String>>(&mut conn)
            .await?;

        Ok(PublishReceipt {
            sequence,
            duplicate: false,
        })
    }

    async fn receive(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        from: ReadFrom,
        max: usize,
        block: Duration,
    ) -> Result<Vec<Delivery>, QueueError> {
        let mut conn = self.redis.clone();

        let mut options = StreamReadOptions::default()
            .group(group, consumer)
            .count(max.max(1));
        let start = match from {
            ReadFrom::Pending => "0",
            ReadFrom::New => {
                options = options.block(block.as_millis() as usize);
                ">"
            }
        };

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[topic], &[start], &options)
            .await
            .map_err(|e| classify(topic, e))?;

        let mut deliveries = Vec::new();
        let mut trimmed = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in key.ids {
                // Pending reads return trimmed entries without fields.
                match entry.get::<String>(PAYLOAD_FIELD) {
                    Some(payload) => deliveries.push(Delivery {
                        id: entry.id,
                        payload,
                    }),
                    None => trimmed.push(entry.id),
                }
            }
        }

        if !trimmed.is_empty() {
            debug!(topic, count = trimmed.len(), "Acknowledging trimmed pending entries");
            conn.xack::<_, _, _, i64>(topic, group, &trimmed)
                .await
                .map_err(|e| classify(topic, e))?;
        }
        Ok(deliveries)
    }

    async fn ack(&self, topic: &str, group: &str, id: &str) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        conn.xack::<_, _, _, i64>(topic, group, &[id])
            .await
            .map_err(|e| classify(topic, e))?;
        Ok(())
    }
}
