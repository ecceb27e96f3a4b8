//! Enqueue loop: expands jobs into runners.
//!
//! A job keeps `are_all_runners_queued = false` while generation is in
//! flight. A pass that stores new runners leaves the flag alone; the next
//! pass rebuilds, finds every runner already stored, and only then sets the
//! flag. An interrupted pass therefore resumes where it left off.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::driver::PeriodicTask;
use super::{Clock, Collaborators};
use crate::builder::{build_runners, BenchmarkCatalog};
use crate::clients::{BenchmarkClient, IntegrationClient};
use crate::error::SchedulerError;
use crate::metrics::MetricsCollector;
use crate::model::{ComplianceJob, Integration, IntegrationFilter, JobStatus};
use crate::store::JobStore;

/// Jobs handled per tick.
const JOBS_PER_TICK: usize = 100;

/// What one generation pass did for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// New runners were stored; generation continues next pass.
    Stored(u64),
    /// Nothing new to build; the job's runner set is complete.
    Complete,
    /// Generation completed without a single runner; the job succeeded.
    Empty,
}

pub struct EnqueueLoop {
    store: Arc<dyn JobStore>,
    benchmarks: Arc<dyn BenchmarkClient>,
    integrations: Arc<dyn IntegrationClient>,
    clock: Arc<dyn Clock>,
    metrics: MetricsCollector,
}

impl EnqueueLoop {
    pub fn new(deps: &Collaborators) -> Self {
        Self {
            store: deps.store.clone(),
            benchmarks: deps.benchmarks.clone(),
            integrations: deps.integrations.clone(),
            clock: deps.clock.clone(),
            metrics: MetricsCollector::new(),
        }
    }

    /// Runs one generation pass for `job`.
    pub async fn generate(
        &self,
        job: &ComplianceJob,
        inventory: &HashMap<String, Integration>,
        now: DateTime<Utc>,
    ) -> Result<GenerationOutcome, SchedulerError> {
        let target = self.resolve_target(job, inventory).await?;
        let catalog = BenchmarkCatalog::load(self.benchmarks.as_ref(), &job.benchmark_id).await?;
        let existing = self.store.runner_keys(job.id).await?;

        let built = build_runners(job, &catalog, target, &existing)?;
        let mut combined = built.per_integration;
        combined.extend(built.global);

        if combined.is_empty() {
            if self.store.count_runners(job.id).await? == 0 {
                self.store.mark_runners_generated(job.id, now).await?;
                self.store
                    .update_job_status(job.id, JobStatus::Succeeded, None, now)
                    .await?;
                info!(job_id = job.id, "Job produced no runners");
                return Ok(GenerationOutcome::Empty);
            }
            // Runners stored by an earlier pass that did not get to move the job.
            if job.status == JobStatus::Created {
                self.store
                    .update_job_status(job.id, JobStatus::RunnersInProgress, None, now)
                    .await?;
            }
            self.store.mark_runners_generated(job.id, now).await?;
            debug!(job_id = job.id, "Runner generation complete");
            return Ok(GenerationOutcome::Complete);
        }

        // Status first: a job never sits in `Created` with runners stored.
        if job.status == JobStatus::Created {
            self.store
                .update_job_status(job.id, JobStatus::RunnersInProgress, None, now)
                .await?;
        }
        let inserted = self.store.insert_runners(&combined, now).await?;
        self.metrics.record_runners_created(inserted);

        info!(
            job_id = job.id,
            benchmark_id = %job.benchmark_id,
            integration_id = %job.integration_id,
            runners = inserted,
            "Stored runners"
        );
        Ok(GenerationOutcome::Stored(inserted))
    }

    /// The job's own integration while it is still assigned to the
    /// benchmark and present in the inventory. Otherwise only global
    /// runners can be built.
    async fn resolve_target<'a>(
        &self,
        job: &ComplianceJob,
        inventory: &'a HashMap<String, Integration>,
    ) -> Result<Option<&'a Integration>, SchedulerError> {
        let assigned = self
            .integrations
            .list_assignments_by_benchmark(&job.benchmark_id)
            .await?;

        let target = assigned
            .iter()
            .find(|id| **id == job.integration_id)
            .and_then(|id| inventory.get(id));

        if target.is_none() {
            warn!(
                job_id = job.id,
                integration_id = %job.integration_id,
                "Integration no longer assigned or missing; building global runners only"
            );
        }
        Ok(target)
    }
}

#[async_trait]
impl PeriodicTask for EnqueueLoop {
    fn name(&self) -> &str {
        "enqueue"
    }

    async fn run_once(&self) -> Result<(), SchedulerError> {
        let jobs = self.store.jobs_pending_generation(JOBS_PER_TICK).await?;
        if jobs.is_empty() {
            debug!("No jobs pending runner generation");
            return Ok(());
        }

        let inventory: HashMap<String, Integration> = self
            .integrations
            .list_integrations(&IntegrationFilter::all())
            .await?
            .into_iter()
            .map(|i| (i.integration_id.clone(), i))
            .collect();

        let now = self.clock.now();
        let mut first_error = None;

        // Every job gets its turn; the first failure is reported afterwards.
        for job in &jobs {
            if let Err(e) = self.generate(job, &inventory, now).await {
                warn!(job_id = job.id, benchmark_id = %job.benchmark_id, error = %e, "Runner generation failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
