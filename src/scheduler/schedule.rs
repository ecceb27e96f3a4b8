//! Scheduler loop: decides which (benchmark, integration) pairs are due.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::driver::PeriodicTask;
use super::{chrono_duration, Clock, Collaborators};
use crate::clients::{BenchmarkClient, IntegrationClient};
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::metrics::MetricsCollector;
use crate::model::{Benchmark, Integration, IntegrationFilter, JobStatus, NewJob};
use crate::store::JobStore;

/// Creates scheduled jobs and advances or times out running ones.
pub struct SchedulerLoop {
    store: Arc<dyn JobStore>,
    benchmarks: Arc<dyn BenchmarkClient>,
    integrations: Arc<dyn IntegrationClient>,
    clock: Arc<dyn Clock>,
    job_interval: chrono::Duration,
    job_timeout: chrono::Duration,
    max_runner_retries: i32,
    metrics: MetricsCollector,
}

impl SchedulerLoop {
    pub fn new(deps: &Collaborators, config: &SchedulerConfig) -> Self {
        Self {
            store: deps.store.clone(),
            benchmarks: deps.benchmarks.clone(),
            integrations: deps.integrations.clone(),
            clock: deps.clock.clone(),
            job_interval: chrono_duration(config.job_interval),
            job_timeout: chrono_duration(config.job_timeout),
            max_runner_retries: config.max_runner_retries,
            metrics: MetricsCollector::new(),
        }
    }

    /// Times out stale jobs, then moves jobs whose runners have all settled
    /// on to summarization.
    pub async fn sweep_jobs(&self, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        let timed_out = self.store.time_out_jobs(now - self.job_timeout, now).await?;
        if !timed_out.is_empty() {
            info!(count = timed_out.len(), job_ids = ?timed_out, "Timed out jobs");
            self.metrics
                .record_job_transitions(JobStatus::TimedOut, timed_out.len());
        }

        let advanced = self
            .store
            .advance_finished_jobs(self.max_runner_retries, now)
            .await?;
        if !advanced.is_empty() {
            info!(count = advanced.len(), job_ids = ?advanced, "Jobs ready for summarization");
            self.metrics
                .record_job_transitions(JobStatus::SummarizerInProgress, advanced.len());
        }
        Ok(())
    }

    /// Creates a scheduled job for every due (benchmark, integration) pair.
    /// Returns the number of jobs created.
    pub async fn schedule_due_jobs(&self, now: DateTime<Utc>) -> Result<usize, SchedulerError> {
        let benchmarks = self.benchmarks.list_benchmarks().await?;
        let active: HashMap<String, Integration> = self
            .integrations
            .list_integrations(&IntegrationFilter::active())
            .await?
            .into_iter()
            .map(|i| (i.integration_id.clone(), i))
            .collect();

        let mut created = 0;
        for benchmark in &benchmarks {
            let assigned = self
                .integrations
                .list_assignments_by_benchmark(&benchmark.id)
                .await?;

            for integration_id in assigned {
                let Some(integration) = active.get(&integration_id) else {
                    continue;
                };
                if !applies_to(benchmark, integration) {
                    debug!(
                        benchmark_id = %benchmark.id,
                        integration_id = %integration_id,
                        integration_type = %integration.integration_type,
                        "Benchmark does not apply to integration type"
                    );
                    continue;
                }
                if self.schedule_pair(&benchmark.id, &integration_id, now).await? {
                    created += 1;
                }
            }
        }
        Ok(created)
    }

    async fn schedule_pair(
        &self,
        benchmark_id: &str,
        integration_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, SchedulerError> {
        if let Some(last) = self
            .store
            .latest_scheduled_job(benchmark_id, integration_id)
            .await?
        {
            if last.age(now) < self.job_interval {
                return Ok(false);
            }
        }

        let removed = self
            .store
            .delete_finished_runners(benchmark_id, integration_id)
            .await?;

        let job = self
            .store
            .create_job(&NewJob::scheduled(benchmark_id, integration_id), now)
            .await?;
        self.metrics.record_job_created(job.trigger_type);

        info!(
            job_id = job.id,
            benchmark_id,
            integration_id,
            stale_runners_removed = removed,
            "Created scheduled job"
        );
        Ok(true)
    }
}

fn applies_to(benchmark: &Benchmark, integration: &Integration) -> bool {
    benchmark.integration_types.is_empty()
        || benchmark
            .integration_types
            .iter()
            .any(|t| t == &integration.integration_type)
}

#[async_trait]
impl PeriodicTask for SchedulerLoop {
    fn name(&self) -> &str {
        "scheduler"
    }

    async fn run_once(&self) -> Result<(), SchedulerError> {
        let now = self.clock.now();
        self.sweep_jobs(now).await?;

        let created = self.schedule_due_jobs(now).await?;
        if created == 0 {
            debug!("No scheduled jobs due");
        } else {
            info!(created, "Scheduled new jobs");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IntegrationState;

    #[test]
    fn test_benchmark_type_filter() {
        let aws = Integration::new("acc-1", "aws", IntegrationState::Active);
        let mut benchmark = Benchmark::new("cis");
        assert!(applies_to(&benchmark, &aws));

        benchmark.integration_types = vec!["azure".to_string()];
        assert!(!applies_to(&benchmark, &aws));

        benchmark.integration_types.push("aws".to_string());
        assert!(applies_to(&benchmark, &aws));
    }
}
