//! Result consumers: runner results and job summaries.
//!
//! Both read from a consumer group on their own stream and apply what they
//! receive to the store. Each has an [`AckPolicy`]; in every case a message
//! is acknowledged exactly once, even when it cannot be decoded or applied.
//! Redelivery is left to messages that were never acknowledged at all,
//! which a restarted consumer picks up from its pending list.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::{Clock, Collaborators};
use crate::config::{AckPolicy, SchedulerConfig};
use crate::error::SchedulerError;
use crate::metrics::MetricsCollector;
use crate::model::{JobSummaryMessage, RunnerResultMessage};
use crate::queue::{Delivery, MessageQueue, QueueError, ReadFrom};
use crate::store::JobStore;

/// Applies one decoded message to the store.
#[async_trait]
pub trait ResultHandler: Send + Sync {
    type Message: DeserializeOwned + Send + Sync;

    fn name(&self) -> &'static str;

    async fn apply(&self, message: &Self::Message) -> Result<(), SchedulerError>;
}

pub struct RunnerResultHandler {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    metrics: MetricsCollector,
}

impl RunnerResultHandler {
    pub fn new(deps: &Collaborators) -> Self {
        Self {
            store: deps.store.clone(),
            clock: deps.clock.clone(),
            metrics: MetricsCollector::new(),
        }
    }
}

#[async_trait]
impl ResultHandler for RunnerResultHandler {
    type Message = RunnerResultMessage;

    fn name(&self) -> &'static str {
        "runner-result"
    }

    async fn apply(&self, message: &RunnerResultMessage) -> Result<(), SchedulerError> {
        let updated = self
            .store
            .apply_runner_result(message, self.clock.now())
            .await?;
        self.metrics.record_runner_result(message.status);

        if updated {
            debug!(runner_id = message.runner_id, status = %message.status, "Applied runner result");
        } else {
            warn!(
                runner_id = message.runner_id,
                status = %message.status,
                "Runner result ignored; runner missing or already succeeded"
            );
        }
        Ok(())
    }
}

pub struct JobSummaryHandler {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    metrics: MetricsCollector,
}

impl JobSummaryHandler {
    pub fn new(deps: &Collaborators) -> Self {
        Self {
            store: deps.store.clone(),
            clock: deps.clock.clone(),
            metrics: MetricsCollector::new(),
        }
    }
}

#[async_trait]
impl ResultHandler for JobSummaryHandler {
    type Message = JobSummaryMessage;

    fn name(&self) -> &'static str {
        "job-summary"
    }

    async fn apply(&self, message: &JobSummaryMessage) -> Result<(), SchedulerError> {
        let updated = self
            .store
            .apply_job_summary(message, self.clock.now())
            .await?;
        self.metrics.record_job_summary(message.status);

        if updated {
            info!(job_id = message.job_id, status = %message.status, "Applied job summary");
        } else {
            warn!(
                job_id = message.job_id,
                status = %message.status,
                "Job summary ignored; job missing or already finished"
            );
        }
        Ok(())
    }
}

/// What happened to a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Applied,
    Undecodable,
    Failed,
}

/// Reads one stream through a consumer group and feeds a [`ResultHandler`].
pub struct ResultConsumer<H: ResultHandler> {
    queue: Arc<dyn MessageQueue>,
    handler: H,
    topic: String,
    group: String,
    consumer: String,
    ack: AckPolicy,
    batch: usize,
    block: Duration,
    _message: PhantomData<fn() -> H::Message>,
}

impl ResultConsumer<RunnerResultHandler> {
    pub fn runner_results(deps: &Collaborators, config: &SchedulerConfig) -> Self {
        Self::new(
            deps.queue.clone(),
            RunnerResultHandler::new(deps),
            &config.runner_result_topic,
            config,
        )
        .with_ack_policy(config.runner_result_ack)
    }
}

impl ResultConsumer<JobSummaryHandler> {
    pub fn job_summaries(deps: &Collaborators, config: &SchedulerConfig) -> Self {
        Self::new(
            deps.queue.clone(),
            JobSummaryHandler::new(deps),
            &config.job_summary_topic,
            config,
        )
        .with_ack_policy(config.job_summary_ack)
    }
}

impl<H: ResultHandler> ResultConsumer<H> {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        handler: H,
        topic: &str,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            topic: topic.to_string(),
            group: config.scheduler_group.clone(),
            consumer: config.consumer_name.clone(),
            ack: AckPolicy::AfterProcessing,
            batch: config.receive_batch,
            block: config.receive_block,
            _message: PhantomData,
        }
    }

    pub fn with_ack_policy(mut self, ack: AckPolicy) -> Self {
        self.ack = ack;
        self
    }

    pub fn ack_policy(&self) -> AckPolicy {
        self.ack
    }

    /// Provisions the stream and drains this consumer's pending list.
    pub async fn start(&self) -> Result<usize, QueueError> {
        self.queue.ensure_stream(&self.topic, &self.group).await?;
        info!(
            consumer = self.handler.name(),
            topic = %self.topic,
            group = %self.group,
            ack = %self.ack,
            "Result consumer subscribed"
        );

        let replayed = self.replay_pending().await?;
        if replayed > 0 {
            info!(consumer = self.handler.name(), replayed, "Replayed pending messages");
        }
        Ok(replayed)
    }

    /// Re-handles entries delivered to this consumer but never acknowledged.
    pub async fn replay_pending(&self) -> Result<usize, QueueError> {
        let mut replayed = 0;
        loop {
            let deliveries = self.receive(ReadFrom::Pending).await?;
            if deliveries.is_empty() {
                return Ok(replayed);
            }
            for delivery in &deliveries {
                self.handle(delivery).await?;
                replayed += 1;
            }
        }
    }

    /// Receives and handles one batch of new entries.
    pub async fn poll_once(&self) -> Result<usize, QueueError> {
        let deliveries = self.receive(ReadFrom::New).await?;
        for delivery in &deliveries {
            self.handle(delivery).await?;
        }
        Ok(deliveries.len())
    }

    async fn receive(&self, from: ReadFrom) -> Result<Vec<Delivery>, QueueError> {
        self.queue
            .receive(
                &self.topic,
                &self.group,
                &self.consumer,
                from,
                self.batch,
                self.block,
            )
            .await
    }

    /// Handles one delivery under the configured ack policy. Only a failed
    /// ack is returned as an error.
    pub async fn handle(&self, delivery: &Delivery) -> Result<Handled, QueueError> {
        if self.ack == AckPolicy::BeforeProcessing {
            self.ack(delivery).await?;
        }

        let handled = match serde_json::from_str::<H::Message>(&delivery.payload) {
            Ok(message) => match self.handler.apply(&message).await {
                Ok(()) => Handled::Applied,
                Err(e) => {
                    error!(
                        consumer = self.handler.name(),
                        entry_id = %delivery.id,
                        error = %e,
                        "Failed to apply message; dropping"
                    );
                    Handled::Failed
                }
            },
            Err(e) => {
                warn!(
                    consumer = self.handler.name(),
                    entry_id = %delivery.id,
                    error = %e,
                    "Undecodable message; dropping"
                );
                Handled::Undecodable
            }
        };

        if self.ack == AckPolicy::AfterProcessing {
            self.ack(delivery).await?;
        }
        Ok(handled)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.queue.ack(&self.topic, &self.group, &delivery.id).await
    }

    /// Consumes until a shutdown signal arrives. Queue errors are logged and
    /// retried after one receive-block interval; a missing stream is
    /// provisioned again.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let name = self.handler.name();
        if let Err(e) = self.start().await {
            error!(consumer = name, error = %e, "Failed to start result consumer");
        }

        loop {
            match shutdown.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(consumer = name, "Result consumer received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.poll_once().await {
                Ok(0) => debug!(consumer = name, "No new messages"),
                Ok(count) => debug!(consumer = name, count, "Handled messages"),
                Err(e) if e.is_stream_not_found() => {
                    warn!(consumer = name, topic = %self.topic, "Stream missing; provisioning");
                    if let Err(e) = self.queue.ensure_stream(&self.topic, &self.group).await {
                        error!(consumer = name, error = %e, "Failed to provision stream");
                        tokio::time::sleep(self.block).await;
                    }
                }
                Err(e) => {
                    error!(consumer = name, error = %e, "Failed to receive messages");
                    tokio::time::sleep(self.block).await;
                }
            }
        }

        info!(consumer = name, "Result consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;
    use std::sync::Mutex;

    #[derive(serde::Deserialize)]
    struct Ping {
        n: u32,
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u32>>,
        fail: bool,
    }

    #[async_trait]
    impl ResultHandler for Arc<Recorder> {
        type Message = Ping;

        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn apply(&self, message: &Ping) -> Result<(), SchedulerError> {
            self.seen.lock().unwrap().push(message.n);
            if self.fail {
                return Err(SchedulerError::JobNotFound(i64::from(message.n)));
            }
            Ok(())
        }
    }

    fn consumer(
        queue: Arc<InMemoryQueue>,
        recorder: Arc<Recorder>,
        ack: AckPolicy,
    ) -> ResultConsumer<Arc<Recorder>> {
        let config = SchedulerConfig::default();
        ResultConsumer::new(queue, recorder, "results", &config).with_ack_policy(ack)
    }

    async fn publish(queue: &InMemoryQueue, payload: &str, key: &str) {
        queue.publish("results", payload, key).await.unwrap();
    }

    #[tokio::test]
    async fn test_applies_and_acks_new_messages() {
        let queue = Arc::new(InMemoryQueue::default());
        let recorder = Arc::new(Recorder::default());
        let consumer = consumer(queue.clone(), recorder.clone(), AckPolicy::AfterProcessing);
        consumer.start().await.unwrap();

        publish(&queue, r#"{"n":1}"#, "a").await;
        publish(&queue, r#"{"n":2}"#, "b").await;

        assert_eq!(consumer.poll_once().await.unwrap(), 2);
        assert_eq!(*recorder.seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(queue.pending_count("results", "compliance-scheduler").await, 0);
    }

    #[tokio::test]
    async fn test_undecodable_message_is_acked_and_dropped() {
        let queue = Arc::new(InMemoryQueue::default());
        let recorder = Arc::new(Recorder::default());
        let consumer = consumer(queue.clone(), recorder.clone(), AckPolicy::BeforeProcessing);
        consumer.start().await.unwrap();

        publish(&queue, "not json", "a").await;
        let deliveries = queue
            .receive("results", "compliance-scheduler", "scheduler-1", ReadFrom::New, 10, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(consumer.handle(&deliveries[0]).await.unwrap(), Handled::Undecodable);
        assert!(recorder.seen.lock().unwrap().is_empty());
        assert_eq!(queue.pending_count("results", "compliance-scheduler").await, 0);
    }

    #[tokio::test]
    async fn test_failed_apply_is_still_acked() {
        let queue = Arc::new(InMemoryQueue::default());
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let consumer = consumer(queue.clone(), recorder.clone(), AckPolicy::AfterProcessing);
        consumer.start().await.unwrap();

        publish(&queue, r#"{"n":7}"#, "a").await;
        assert_eq!(consumer.poll_once().await.unwrap(), 1);
        assert_eq!(*recorder.seen.lock().unwrap(), vec![7]);
        assert_eq!(queue.pending_count("results", "compliance-scheduler").await, 0);
    }

    #[tokio::test]
    async fn test_start_replays_unacked_deliveries() {
        let queue = Arc::new(InMemoryQueue::default());
        queue.ensure_stream("results", "compliance-scheduler").await.unwrap();
        publish(&queue, r#"{"n":3}"#, "a").await;

        // Delivered to this consumer but never acknowledged.
        queue
            .receive("results", "compliance-scheduler", "scheduler-1", ReadFrom::New, 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(queue.pending_count("results", "compliance-scheduler").await, 1);

        let recorder = Arc::new(Recorder::default());
        let consumer = consumer(queue.clone(), recorder.clone(), AckPolicy::AfterProcessing);
        assert_eq!(consumer.start().await.unwrap(), 1);
        assert_eq!(*recorder.seen.lock().unwrap(), vec![3]);
        assert_eq!(queue.pending_count("results", "compliance-scheduler").await, 0);
    }
}
