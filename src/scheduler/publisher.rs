//! Publisher loop: pushes created runners onto the work queue.
//!
//! One instance runs per trigger type, each with its own topic. Every
//! iteration of a tick first sweeps runners stuck in `Queued` or
//! `InProgress`, then publishes a batch of `Created` runners. The tick ends
//! on an empty batch or after `publish_max_iterations`, followed by a pass
//! that sends failed runners under the retry ceiling back to `Created`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::driver::PeriodicTask;
use super::{chrono_duration, Clock, Collaborators};
use crate::clients::{BenchmarkClient, IntegrationClient};
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::metrics::{MetricsCollector, PublishOutcome};
use crate::model::{Integration, IntegrationFilter, Query, Runner, RunnerJobMessage, RunnerStatus, TriggerType};
use crate::queue::{MessageQueue, PublishReceipt, QueueError};
use crate::store::{JobStore, SweepOutcome};

/// Counters for one publisher tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub iterations: usize,
    pub published: u64,
    pub duplicates: u64,
    pub failed: u64,
    pub swept: SweepOutcome,
    pub retried: u64,
}

/// Query and integration lookups, fetched once per tick.
struct Lookups {
    queries: HashMap<String, Query>,
    integrations: HashMap<String, Integration>,
}

pub struct PublisherLoop {
    name: String,
    trigger_type: TriggerType,
    topic: String,
    worker_group: String,
    store: Arc<dyn JobStore>,
    queue: Arc<dyn MessageQueue>,
    benchmarks: Arc<dyn BenchmarkClient>,
    integrations: Arc<dyn IntegrationClient>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
    max_iterations: usize,
    queued_timeout: chrono::Duration,
    in_progress_timeout: chrono::Duration,
    max_retries: i32,
    metrics: MetricsCollector,
}

impl PublisherLoop {
    pub fn new(deps: &Collaborators, config: &SchedulerConfig, trigger_type: TriggerType) -> Self {
        let topic = match trigger_type {
            TriggerType::Scheduled => config.scheduled_topic.clone(),
            TriggerType::Manual => config.manual_topic.clone(),
        };
        Self {
            name: format!("publisher-{}", trigger_type),
            trigger_type,
            topic,
            worker_group: config.worker_group.clone(),
            store: deps.store.clone(),
            queue: deps.queue.clone(),
            benchmarks: deps.benchmarks.clone(),
            integrations: deps.integrations.clone(),
            clock: deps.clock.clone(),
            batch_size: config.publish_batch_size,
            max_iterations: config.publish_max_iterations,
            queued_timeout: chrono_duration(config.queued_timeout),
            in_progress_timeout: chrono_duration(config.in_progress_timeout),
            max_retries: config.max_runner_retries,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Runs one full tick and reports what it did.
    pub async fn publish_pending(&self) -> Result<PublishReport, SchedulerError> {
        let mut report = PublishReport::default();
        let mut lookups: Option<Lookups> = None;

        while report.iterations < self.max_iterations {
            report.iterations += 1;
            let now = self.clock.now();

            let swept = self.sweep(now).await?;
            report.swept.retried += swept.retried;
            report.swept.failed += swept.failed;

            let runners = self
                .store
                .created_runners(self.trigger_type, self.batch_size)
                .await?;
            if runners.is_empty() {
                break;
            }

            if lookups.is_none() {
                lookups = Some(self.load_lookups().await?);
            }
            let Some(lookups) = lookups.as_ref() else {
                break;
            };

            for runner in &runners {
                match self.publish_runner(runner, lookups, now).await? {
                    PublishOutcome::Queued => report.published += 1,
                    PublishOutcome::Duplicate => report.duplicates += 1,
                    PublishOutcome::Failed => report.failed += 1,
                }
            }
        }

        report.retried = self
            .store
            .retry_failed_runners(self.max_retries, self.clock.now())
            .await?;
        self.metrics.record_retried(report.retried);

        Ok(report)
    }

    /// Sends stuck runners back for retry, or fails them at the ceiling.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepOutcome, SchedulerError> {
        let mut total = SweepOutcome::default();
        let sweeps = [
            (RunnerStatus::Queued, self.queued_timeout),
            (RunnerStatus::InProgress, self.in_progress_timeout),
        ];

        for (status, timeout) in sweeps {
            let outcome = self
                .store
                .sweep_stuck_runners(status, now - timeout, self.max_retries, now)
                .await?;
            if outcome.total() > 0 {
                info!(
                    status = %status,
                    retried = outcome.retried,
                    failed = outcome.failed,
                    "Swept stuck runners"
                );
            }
            self.metrics.record_sweep(status, outcome);
            total.retried += outcome.retried;
            total.failed += outcome.failed;
        }
        Ok(total)
    }

    async fn load_lookups(&self) -> Result<Lookups, SchedulerError> {
        let queries = self
            .benchmarks
            .list_queries()
            .await?
            .into_iter()
            .map(|q| (q.id.clone(), q))
            .collect();
        let integrations = self
            .integrations
            .list_integrations(&IntegrationFilter::all())
            .await?
            .into_iter()
            .map(|i| (i.integration_id.clone(), i))
            .collect();
        Ok(Lookups {
            queries,
            integrations,
        })
    }

    /// Publishes one runner. Per-runner problems mark the runner failed;
    /// only store errors abort the tick.
    async fn publish_runner(
        &self,
        runner: &Runner,
        lookups: &Lookups,
        now: DateTime<Utc>,
    ) -> Result<PublishOutcome, SchedulerError> {
        let Some(query) = lookups.queries.get(&runner.query_id) else {
            let message = format!("query '{}' not found", runner.query_id);
            return self.fail_runner(runner, &message, now).await;
        };

        let provider_id = match &runner.integration_id {
            Some(id) => match lookups.integrations.get(id) {
                Some(integration) => Some(integration.provider_id.clone()),
                None => {
                    let message = format!("integration '{}' not found", id);
                    return self.fail_runner(runner, &message, now).await;
                }
            },
            None => None,
        };

        let message = RunnerJobMessage::for_runner(runner, query.clone(), provider_id);
        let payload = serde_json::to_string(&message)?;

        match self.publish_with_reprovision(&payload, &message.dedup_key()).await {
            Ok(receipt) => {
                self.store
                    .mark_runner_queued(runner.id, &receipt.sequence, now)
                    .await?;
                let outcome = if receipt.duplicate {
                    PublishOutcome::Duplicate
                } else {
                    PublishOutcome::Queued
                };
                self.metrics.record_publish(self.trigger_type, outcome);
                debug!(
                    runner_id = runner.id,
                    retry_count = runner.retry_count,
                    sequence = %receipt.sequence,
                    duplicate = receipt.duplicate,
                    "Published runner"
                );
                Ok(outcome)
            }
            Err(e) => self.fail_runner(runner, &e.to_string(), now).await,
        }
    }

    /// Publishes once; if the stream is missing, provisions it and retries
    /// exactly once.
    async fn publish_with_reprovision(
        &self,
        payload: &str,
        dedup_key: &str,
    ) -> Result<PublishReceipt, QueueError> {
        match self.queue.publish(&self.topic, payload, dedup_key).await {
            Err(e) if e.is_stream_not_found() => {
                warn!(topic = %self.topic, "Work stream missing; provisioning and retrying");
                self.queue
                    .ensure_stream(&self.topic, &self.worker_group)
                    .await?;
                self.queue.publish(&self.topic, payload, dedup_key).await
            }
            other => other,
        }
    }

    async fn fail_runner(
        &self,
        runner: &Runner,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<PublishOutcome, SchedulerError> {
        warn!(
            runner_id = runner.id,
            query_id = %runner.query_id,
            error = message,
            "Runner publish failed"
        );
        self.store.mark_runner_failed(runner.id, message, now).await?;
        self.metrics
            .record_publish(self.trigger_type, PublishOutcome::Failed);
        Ok(PublishOutcome::Failed)
    }
}

#[async_trait]
impl PeriodicTask for PublisherLoop {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_once(&self) -> Result<(), SchedulerError> {
        let report = self.publish_pending().await?;
        if report.published + report.duplicates + report.failed == 0 {
            debug!(task = %self.name, retried = report.retried, "Nothing to publish");
        } else {
            info!(
                task = %self.name,
                iterations = report.iterations,
                published = report.published,
                duplicates = report.duplicates,
                failed = report.failed,
                retried = report.retried,
                "Publisher tick finished"
            );
        }
        Ok(())
    }
}
