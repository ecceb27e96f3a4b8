//! In-memory job store with the same conditional-update semantics as the
//! PostgreSQL store.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{JobStore, StoreError, SweepOutcome, JOB_TIMEOUT_MESSAGE, RUNNER_TIMEOUT_MESSAGE};
use crate::model::{
    ComplianceJob, JobId, JobStatus, JobSummaryMessage, NewJob, NewRunner, Runner, RunnerId,
    RunnerResultMessage, RunnerStatus, TriggerType,
};

#[derive(Debug, Default)]
struct Tables {
    next_job_id: JobId,
    next_runner_id: RunnerId,
    jobs: BTreeMap<JobId, ComplianceJob>,
    runners: BTreeMap<RunnerId, Runner>,
}

impl Tables {
    fn key_exists(&self, key_id: &str) -> bool {
        self.runners.values().any(|r| r.key().identifier() == key_id)
    }
}

/// Job store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    tables: Mutex<Tables>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored job, by ID.
    pub async fn jobs(&self) -> Vec<ComplianceJob> {
        self.tables.lock().await.jobs.values().cloned().collect()
    }

    /// Snapshot of every stored runner, by ID.
    pub async fn runners(&self) -> Vec<Runner> {
        self.tables.lock().await.runners.values().cloned().collect()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(
        &self,
        job: &NewJob,
        now: DateTime<Utc>,
    ) -> Result<ComplianceJob, StoreError> {
        let mut tables = self.tables.lock().await;
        tables.next_job_id += 1;
        let created = ComplianceJob {
            id: tables.next_job_id,
            parent_id: job.parent_id,
            benchmark_id: job.benchmark_id.clone(),
            integration_id: job.integration_id.clone(),
            resource_collection_id: job.resource_collection_id.clone(),
            trigger_type: job.trigger_type,
            status: JobStatus::Created,
            are_all_runners_queued: false,
            with_incidents: job.with_incidents,
            created_by: job.created_by.clone(),
            failure_message: None,
            started_at: None,
            created_at: now,
            updated_at: now,
        };
        tables.jobs.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<ComplianceJob>, StoreError> {
        Ok(self.tables.lock().await.jobs.get(&id).cloned())
    }

    async fn latest_scheduled_job(
        &self,
        benchmark_id: &str,
        integration_id: &str,
    ) -> Result<Option<ComplianceJob>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .jobs
            .values()
            .filter(|j| {
                j.benchmark_id == benchmark_id
                    && j.integration_id == integration_id
                    && j.trigger_type == TriggerType::Scheduled
            })
            .max_by_key(|j| (j.created_at, j.id))
            .cloned())
    }

    async fn jobs_pending_generation(
        &self,
        limit: usize,
    ) -> Result<Vec<ComplianceJob>, StoreError> {
        let tables = self.tables.lock().await;
        let mut pending: Vec<_> = tables
            .jobs
            .values()
            .filter(|j| !j.are_all_runners_queued && !j.status.is_terminal())
            .cloned()
            .collect();
        pending.sort_by_key(|j| (j.created_at, j.id));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_runners_generated(
        &self,
        id: JobId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.jobs.get_mut(&id) {
            Some(job) if !job.are_all_runners_queued => {
                job.are_all_runners_queued = true;
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        failure_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.jobs.get_mut(&id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = status;
                if let Some(message) = failure_message {
                    job.failure_message = Some(message.to_string());
                }
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn apply_job_summary(
        &self,
        summary: &JobSummaryMessage,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.jobs.get_mut(&summary.job_id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = summary.status;
                job.started_at = Some(summary.started_at);
                job.failure_message = summary.error.clone();
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn advance_finished_jobs(
        &self,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>, StoreError> {
        let mut tables = self.tables.lock().await;
        let finished: Vec<JobId> = tables
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::RunnersInProgress && j.are_all_runners_queued)
            .filter(|j| {
                tables
                    .runners
                    .values()
                    .filter(|r| r.parent_job_id == j.id)
                    .all(|r| r.is_settled(max_retries))
            })
            .map(|j| j.id)
            .collect();

        for id in &finished {
            if let Some(job) = tables.jobs.get_mut(id) {
                job.status = JobStatus::SummarizerInProgress;
                job.updated_at = now;
            }
        }
        Ok(finished)
    }

    async fn time_out_jobs(
        &self,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut timed_out = Vec::new();
        for job in tables.jobs.values_mut() {
            if !job.status.is_terminal() && job.created_at < created_before {
                job.status = JobStatus::TimedOut;
                job.failure_message = Some(JOB_TIMEOUT_MESSAGE.to_string());
                job.updated_at = now;
                timed_out.push(job.id);
            }
        }
        Ok(timed_out)
    }

    async fn delete_finished_runners(
        &self,
        benchmark_id: &str,
        integration_id: &str,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let finished: HashSet<JobId> = tables
            .jobs
            .values()
            .filter(|j| {
                j.benchmark_id == benchmark_id
                    && j.integration_id == integration_id
                    && j.status.is_terminal()
            })
            .map(|j| j.id)
            .collect();

        let before = tables.runners.len();
        tables
            .runners
            .retain(|_, r| !finished.contains(&r.parent_job_id));
        Ok((before - tables.runners.len()) as u64)
    }

    async fn runner_keys(&self, job_id: JobId) -> Result<HashSet<String>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .runners
            .values()
            .filter(|r| r.parent_job_id == job_id)
            .map(|r| r.key().identifier())
            .collect())
    }

    async fn count_runners(&self, job_id: JobId) -> Result<u64, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .runners
            .values()
            .filter(|r| r.parent_job_id == job_id)
            .count() as u64)
    }

    async fn insert_runners(
        &self,
        runners: &[NewRunner],
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut inserted = 0;
        for runner in runners {
            if tables.key_exists(&runner.key().identifier()) {
                continue;
            }
            tables.next_runner_id += 1;
            let stored = Runner {
                id: tables.next_runner_id,
                parent_job_id: runner.parent_job_id,
                benchmark_id: runner.benchmark_id.clone(),
                query_id: runner.query_id.clone(),
                integration_id: runner.integration_id.clone(),
                resource_collection_id: runner.resource_collection_id.clone(),
                trigger_type: runner.trigger_type,
                callers: runner.callers.clone(),
                status: RunnerStatus::Created,
                retry_count: 0,
                queued_at: None,
                started_at: None,
                total_count: None,
                failure_message: None,
                queue_sequence: None,
                created_at: now,
                updated_at: now,
            };
            tables.runners.insert(stored.id, stored);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn get_runner(&self, id: RunnerId) -> Result<Option<Runner>, StoreError> {
        Ok(self.tables.lock().await.runners.get(&id).cloned())
    }

    async fn runners_for_job(&self, job_id: JobId) -> Result<Vec<Runner>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .runners
            .values()
            .filter(|r| r.parent_job_id == job_id)
            .cloned()
            .collect())
    }

    async fn created_runners(
        &self,
        trigger_type: TriggerType,
        limit: usize,
    ) -> Result<Vec<Runner>, StoreError> {
        let tables = self.tables.lock().await;
        let mut created: Vec<_> = tables
            .runners
            .values()
            .filter(|r| r.status == RunnerStatus::Created && r.trigger_type == trigger_type)
            .cloned()
            .collect();
        created.sort_by_key(|r| (r.created_at, r.id));
        created.truncate(limit);
        Ok(created)
    }

    async fn mark_runner_queued(
        &self,
        id: RunnerId,
        queue_sequence: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.runners.get_mut(&id) {
            Some(runner) if runner.status == RunnerStatus::Created => {
                runner.status = RunnerStatus::Queued;
                runner.queue_sequence = Some(queue_sequence.to_string());
                runner.queued_at = Some(now);
                runner.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_runner_failed(
        &self,
        id: RunnerId,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.runners.get_mut(&id) {
            Some(runner) => {
                runner.status = RunnerStatus::Failed;
                runner.failure_message = Some(message.to_string());
                runner.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn sweep_stuck_runners(
        &self,
        status: RunnerStatus,
        stuck_before: DateTime<Utc>,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> Result<SweepOutcome, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut outcome = SweepOutcome::default();

        for runner in tables.runners.values_mut() {
            if runner.status != status {
                continue;
            }
            let since = match status {
                RunnerStatus::InProgress => runner.started_at.or(runner.queued_at),
                _ => runner.queued_at,
            }
            .unwrap_or(runner.updated_at);
            if since >= stuck_before {
                continue;
            }

            if runner.retry_count < max_retries {
                runner.status = RunnerStatus::Created;
                runner.retry_count += 1;
                runner.failure_message = None;
                runner.queue_sequence = None;
                outcome.retried += 1;
            } else {
                runner.status = RunnerStatus::Failed;
                runner.failure_message = Some(RUNNER_TIMEOUT_MESSAGE.to_string());
                outcome.failed += 1;
            }
            runner.updated_at = now;
        }
        Ok(outcome)
    }

    async fn retry_failed_runners(
        &self,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut retried = 0;
        for runner in tables.runners.values_mut() {
            if runner.status == RunnerStatus::Failed && runner.retry_count < max_retries {
                runner.status = RunnerStatus::Created;
                runner.retry_count += 1;
                runner.failure_message = None;
                runner.queue_sequence = None;
                runner.updated_at = now;
                retried += 1;
            }
        }
        Ok(retried)
    }

    async fn apply_runner_result(
        &self,
        result: &RunnerResultMessage,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.runners.get_mut(&result.runner_id) {
            Some(runner) if runner.status != RunnerStatus::Succeeded => {
                runner.status = result.status;
                runner.started_at = Some(result.started_at);
                if result.result_count.is_some() {
                    runner.total_count = result.result_count;
                }
                runner.failure_message = result.error.clone();
                runner.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
