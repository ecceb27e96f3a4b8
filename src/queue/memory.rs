//! In-process queue with consumer-group semantics.
//!
//! Streams must be provisioned before publishing, entries stay pending per
//! consumer until acknowledged, and publishes are deduplicated within the
//! window. Time is read from `tokio::time`, so tests can pause it.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

use super::{Delivery, MessageQueue, PublishReceipt, QueueError, ReadFrom};

#[derive(Debug, Default)]
struct Group {
    /// Index of the next entry never delivered to this group.
    cursor: usize,
    /// Delivered but unacknowledged: (entry id, consumer).
    pending: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Stream {
    entries: Vec<Delivery>,
    groups: HashMap<String, Group>,
    dedup: HashMap<String, (String, Instant)>,
}

#[derive(Debug, Default)]
struct State {
    next_sequence: u64,
    streams: HashMap<String, Stream>,
}

/// Message queue held in process memory.
#[derive(Debug)]
pub struct InMemoryQueue {
    state: Mutex<State>,
    dedup_window: Duration,
    appended: watch::Sender<u64>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

impl InMemoryQueue {
    pub fn new(dedup_window: Duration) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            state: Mutex::new(State::default()),
            dedup_window,
            appended,
        }
    }

    /// Every payload appended to `topic`, in order.
    pub async fn payloads(&self, topic: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .streams
            .get(topic)
            .map(|s| s.entries.iter().map(|d| d.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of unacknowledged entries in a group.
    pub async fn pending_count(&self, topic: &str, group: &str) -> usize {
        let state = self.state.lock().await;
        state
            .streams
            .get(topic)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }

    /// Removes a stream with its groups.
    pub async fn drop_stream(&self, topic: &str) {
        self.state.lock().await.streams.remove(topic);
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn ensure_stream(&self, topic: &str, group: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let stream = state.streams.entry(topic.to_string()).or_default();
        let end = stream.entries.len();
        stream.groups.entry(group.to_string()).or_insert_with(|| Group {
            cursor: end,
            pending: Vec::new(),
        });
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        dedup_key: &str,
    ) -> Result<PublishReceipt, QueueError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.next_sequence += 1;
        let sequence = format!("{}-0", state.next_sequence);

        let stream = state
            .streams
            .get_mut(topic)
            .ok_or_else(|| QueueError::StreamNotFound(topic.to_string()))?;

        stream.dedup.retain(|_, (_, expires)| *expires > now);
        if let Some((recorded, _)) = stream.dedup.get(dedup_key) {
            return Ok(PublishReceipt {
                sequence: recorded.clone(),
                duplicate: true,
            });
        }

        stream.entries.push(Delivery {
            id: sequence.clone(),
            payload: payload.to_string(),
        });
        stream.dedup.insert(
            dedup_key.to_string(),
            (sequence.clone(), now + self.dedup_window),
        );
        let total = stream.entries.len() as u64;
        drop(state);

        self.appended.send_replace(total);
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
        let deadline = Instant::now() + block;
        // Subscribe before checking so an append in between is not missed.
        let mut appended = self.appended.subscribe();

        loop {
            {
                let mut state = self.state.lock().await;
                let stream = state
                    .streams
                    .get_mut(topic)
                    .ok_or_else(|| QueueError::StreamNotFound(topic.to_string()))?;
                let Stream {
                    entries, groups, ..
                } = stream;
                let group_state = groups
                    .get_mut(group)
                    .ok_or_else(|| QueueError::StreamNotFound(topic.to_string()))?;

                match from {
                    ReadFrom::Pending => {
                        return Ok(group_state
                            .pending
                            .iter()
                            .filter(|(_, owner)| owner == consumer)
                            .filter_map(|(id, _)| entries.iter().find(|e| &e.id == id).cloned())
                            .take(max)
                            .collect());
                    }
                    ReadFrom::New => {
                        let available = entries.len().saturating_sub(group_state.cursor);
                        if available > 0 {
                            let end = group_state.cursor + available.min(max.max(1));
                            let batch: Vec<Delivery> = entries[group_state.cursor..end].to_vec();
                            group_state.cursor = end;
                            group_state.pending.extend(
                                batch.iter().map(|d| (d.id.clone(), consumer.to_string())),
                            );
                            return Ok(batch);
                        }
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            if tokio::time::timeout(deadline - now, appended.changed())
                .await
                .is_err()
            {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, topic: &str, group: &str, id: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let group_state = state
            .streams
            .get_mut(topic)
            .and_then(|s| s.groups.get_mut(group))
            .ok_or_else(|| QueueError::StreamNotFound(topic.to_string()))?;
        group_state.pending.retain(|(pending_id, _)| pending_id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "runner-jobs";
    const GROUP: &str = "workers";

    #[tokio::test]
    async fn test_publish_requires_provisioned_stream() {
        let queue = InMemoryQueue::default();
        let err = queue.publish(TOPIC, "{}", "job-1-0").await.unwrap_err();
        assert!(err.is_stream_not_found());

        queue.ensure_stream(TOPIC, GROUP).await.unwrap();
        queue.ensure_stream(TOPIC, GROUP).await.unwrap();
        assert!(queue.publish(TOPIC, "{}", "job-1-0").await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_publish_returns_original_sequence() {
        let queue = InMemoryQueue::default();
        queue.ensure_stream(TOPIC, GROUP).await.unwrap();

        let first = queue.publish(TOPIC, "a", "job-1-0").await.unwrap();
        let second = queue.publish(TOPIC, "a", "job-1-0").await.unwrap();
        let retry = queue.publish(TOPIC, "a", "job-1-1").await.unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.sequence, second.sequence);
        assert_ne!(first.sequence, retry.sequence);
        assert_eq!(queue.payloads(TOPIC).await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedup_window_expires() {
        let queue = InMemoryQueue::new(Duration::from_secs(60));
        queue.ensure_stream(TOPIC, GROUP).await.unwrap();

        queue.publish(TOPIC, "a", "job-1-0").await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        let again = queue.publish(TOPIC, "a", "job-1-0").await.unwrap();

        assert!(!again.duplicate);
        assert_eq!(queue.payloads(TOPIC).await.len(), 2);
    }

    #[tokio::test]
    async fn test_unacked_entries_are_replayed_as_pending() {
        let queue = InMemoryQueue::default();
        queue.ensure_stream(TOPIC, GROUP).await.unwrap();
        queue.publish(TOPIC, "one", "k1").await.unwrap();
        queue.publish(TOPIC, "two", "k2").await.unwrap();

        let batch = queue
            .receive(TOPIC, GROUP, "c1", ReadFrom::New, 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
        queue.ack(TOPIC, GROUP, &batch[0].id).await.unwrap();

        let pending = queue
            .receive(TOPIC, GROUP, "c1", ReadFrom::Pending, 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload, "two");

        let other = queue
            .receive(TOPIC, GROUP, "c2", ReadFrom::Pending, 10, Duration::ZERO)
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_receive_wakes_on_publish() {
        let queue = std::sync::Arc::new(InMemoryQueue::default());
        queue.ensure_stream(TOPIC, GROUP).await.unwrap();

        let reader = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .receive(TOPIC, GROUP, "c1", ReadFrom::New, 10, Duration::from_secs(5))
                    .await
            })
        };
        tokio::task::yield_now().await;
        queue.publish(TOPIC, "late", "k1").await.unwrap();

        let batch = reader.await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, "late");
    }

    #[tokio::test]
    async fn test_group_created_late_skips_history() {
        let queue = InMemoryQueue::default();
        queue.ensure_stream(TOPIC, GROUP).await.unwrap();
        queue.publish(TOPIC, "old", "k1").await.unwrap();

        queue.ensure_stream(TOPIC, "late-group").await.unwrap();
        let batch = queue
            .receive(TOPIC, "late-group", "c1", ReadFrom::New, 10, Duration::ZERO)
            .await
            .unwrap();
        assert!(batch.is_empty());
    }
}
