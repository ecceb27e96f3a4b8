//! Message queue used to dispatch runner work and receive results.
//!
//! # Streams
//!
//! Each topic is an append-only stream read through consumer groups:
//!
//! - work topics (scheduled and manual) are read by the runner workers
//! - result topics (runner results and job summaries) are read by this
//!   service's consumers
//!
//! Delivery is at-least-once. An entry stays pending for the consumer that
//! received it until it is acknowledged, and a restarted consumer re-reads
//! its pending entries before taking new ones.
//!
//! Publishing is idempotent within a dedup window: a second publish with
//! the same dedup key returns the original entry ID without appending.

pub mod memory;
pub mod redis_streams;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::InMemoryQueue;
pub use redis_streams::RedisStreamQueue;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// The stream or consumer group has not been provisioned.
    #[error("Stream '{0}' or its consumer group does not exist")]
    StreamNotFound(String),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

impl QueueError {
    pub fn is_stream_not_found(&self) -> bool {
        matches!(self, QueueError::StreamNotFound(_))
    }
}

/// Result of a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Stream entry ID; the runner's queue sequence number.
    pub sequence: String,
    /// The dedup key was already recorded and nothing was appended.
    pub duplicate: bool,
}

/// Where a group read starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFrom {
    /// Entries already delivered to this consumer but not acknowledged.
    Pending,
    /// Entries never delivered to the group.
    New,
}

/// One received entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: String,
    pub payload: String,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Creates the stream and consumer group if missing. Idempotent.
    async fn ensure_stream(&self, topic: &str, group: &str) -> Result<(), QueueError>;

    /// Appends `payload` to an existing stream.
    ///
    /// Fails with [`QueueError::StreamNotFound`] if the stream was never
    /// provisioned.
    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        dedup_key: &str,
    ) -> Result<PublishReceipt, QueueError>;

    /// Reads up to `max` entries for `consumer` in `group`. New reads wait
    /// up to `block` for an entry to arrive; pending reads never block.
    async fn receive(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        from: ReadFrom,
        max: usize,
        block: Duration,
    ) -> Result<Vec<Delivery>, QueueError>;

    async fn ack(&self, topic: &str, group: &str, id: &str) -> Result<(), QueueError>;
}

/// Redis key holding the entry ID recorded for a dedup key.
pub fn dedup_storage_key(topic: &str, dedup_key: &str) -> String {
    format!("{}:dedup:{}", topic, dedup_key)
}
