//! User-initiated jobs: manual triggers and re-triggers.

use std::sync::Arc;

use tracing::info;

use super::{Clock, Collaborators};
use crate::clients::{BenchmarkClient, IntegrationClient};
use crate::error::{BuildError, SchedulerError};
use crate::metrics::MetricsCollector;
use crate::model::{ComplianceJob, JobId, NewJob};
use crate::store::JobStore;

pub struct TriggerService {
    store: Arc<dyn JobStore>,
    benchmarks: Arc<dyn BenchmarkClient>,
    integrations: Arc<dyn IntegrationClient>,
    clock: Arc<dyn Clock>,
    metrics: MetricsCollector,
}

impl TriggerService {
    pub fn new(deps: &Collaborators) -> Self {
        Self {
            store: deps.store.clone(),
            benchmarks: deps.benchmarks.clone(),
            integrations: deps.integrations.clone(),
            clock: deps.clock.clone(),
            metrics: MetricsCollector::new(),
        }
    }

    /// Creates one manual job per integration. An empty `integration_ids`
    /// means every integration assigned to the benchmark.
    ///
    /// All IDs are checked against the benchmark's assignments before any
    /// job is created.
    pub async fn trigger_manual(
        &self,
        benchmark_id: &str,
        integration_ids: &[String],
        created_by: &str,
        with_incidents: bool,
    ) -> Result<Vec<ComplianceJob>, SchedulerError> {
        if self.benchmarks.get_benchmark(benchmark_id).await?.is_none() {
            return Err(BuildError::BenchmarkNotFound(benchmark_id.to_string()).into());
        }

        let assigned = self
            .integrations
            .list_assignments_by_benchmark(benchmark_id)
            .await?;

        let targets: Vec<String> = if integration_ids.is_empty() {
            assigned
        } else {
            if let Some(missing) = integration_ids.iter().find(|id| !assigned.contains(id)) {
                return Err(SchedulerError::NotAssigned {
                    benchmark_id: benchmark_id.to_string(),
                    integration_id: missing.clone(),
                });
            }
            integration_ids.to_vec()
        };

        let now = self.clock.now();
        let mut jobs = Vec::with_capacity(targets.len());
        for integration_id in &targets {
            let new_job = NewJob::manual(benchmark_id, integration_id, created_by)
                .with_incidents(with_incidents);
            let job = self.store.create_job(&new_job, now).await?;
            self.metrics.record_job_created(job.trigger_type);
            info!(
                job_id = job.id,
                benchmark_id,
                integration_id = %integration_id,
                created_by,
                "Created manual job"
            );
            jobs.push(job);
        }
        Ok(jobs)
    }

    /// Creates a child of `job_id` with the same scope.
    pub async fn retrigger(
        &self,
        job_id: JobId,
        created_by: &str,
    ) -> Result<ComplianceJob, SchedulerError> {
        let parent = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(SchedulerError::JobNotFound(job_id))?;

        let mut new_job = NewJob::manual(&parent.benchmark_id, &parent.integration_id, created_by)
            .with_parent(parent.id)
            .with_incidents(parent.with_incidents);
        new_job.trigger_type = parent.trigger_type;
        new_job.resource_collection_id = parent.resource_collection_id.clone();

        let job = self.store.create_job(&new_job, self.clock.now()).await?;
        self.metrics.record_job_created(job.trigger_type);
        info!(
            job_id = job.id,
            parent_id = parent.id,
            benchmark_id = %job.benchmark_id,
            integration_id = %job.integration_id,
            "Re-triggered job"
        );
        Ok(job)
    }
}
