//! Persistent job and runner records.
//!
//! Every loop coordinates through a [`JobStore`]; there is no shared
//! in-memory state between them. Updates that race with other loops are
//! conditional (they name the status they expect to find), so the store's
//! row-level updates are the only concurrency control.
//!
//! Two implementations are provided:
//! - [`PgJobStore`]: PostgreSQL via sqlx
//! - [`InMemoryJobStore`]: a mutex-guarded map for tests and local runs
//!
//! Operations comparing against "now" take the timestamp as an argument so
//! the caller's clock is the single source of time.

pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod schema;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{
    ComplianceJob, JobId, JobStatus, JobSummaryMessage, NewJob, NewRunner, Runner, RunnerId,
    RunnerResultMessage, RunnerStatus, TriggerType,
};

pub use memory::InMemoryJobStore;
pub use migrations::{Migration, MigrationError, MigrationReport, MigrationRunner};
pub use postgres::PgJobStore;

/// Failure message recorded on runners that exhaust their retries in a sweep.
pub const RUNNER_TIMEOUT_MESSAGE: &str = "runner timed out";

/// Failure message recorded on jobs swept by the job timeout.
pub const JOB_TIMEOUT_MESSAGE: &str = "job timed out";

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    /// A stored value could not be mapped back onto the model.
    #[error("Invalid stored value: {0}")]
    InvalidData(String),
}

/// Counts from one timeout sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Runners sent back to `Created` with an incremented retry count.
    pub retried: u64,
    /// Runners at the retry ceiling that were marked `Failed`.
    pub failed: u64,
}

impl SweepOutcome {
    pub fn total(&self) -> u64 {
        self.retried + self.failed
    }
}

/// Job and runner persistence.
#[async_trait]
pub trait JobStore: Send + Sync {
    // ---- jobs ----

    /// Inserts a job in `Created` with generation pending.
    async fn create_job(&self, job: &NewJob, now: DateTime<Utc>)
        -> Result<ComplianceJob, StoreError>;

    async fn get_job(&self, id: JobId) -> Result<Option<ComplianceJob>, StoreError>;

    /// Most recent scheduled job for a (benchmark, integration) pair.
    async fn latest_scheduled_job(
        &self,
        benchmark_id: &str,
        integration_id: &str,
    ) -> Result<Option<ComplianceJob>, StoreError>;

    /// Non-terminal jobs whose runners are not fully generated, oldest first.
    async fn jobs_pending_generation(&self, limit: usize)
        -> Result<Vec<ComplianceJob>, StoreError>;

    /// Sets `are_all_runners_queued`; returns `false` if it was already set.
    async fn mark_runners_generated(&self, id: JobId, now: DateTime<Utc>)
        -> Result<bool, StoreError>;

    /// Moves a non-terminal job to `status`. Returns `false` when the job is
    /// missing or already terminal.
    async fn update_job_status(
        &self,
        id: JobId,
        status: JobStatus,
        failure_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Records a job-level summary result on a non-terminal job. Returns
    /// `false` when the job is missing or already terminal.
    async fn apply_job_summary(
        &self,
        summary: &JobSummaryMessage,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Moves jobs whose runners have all settled to `SummarizerInProgress`.
    async fn advance_finished_jobs(
        &self,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>, StoreError>;

    /// Marks non-terminal jobs created before `created_before` as `TimedOut`.
    async fn time_out_jobs(
        &self,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>, StoreError>;

    // ---- runners ----

    /// Deletes runners belonging to terminal jobs of a (benchmark,
    /// integration) pair.
    async fn delete_finished_runners(
        &self,
        benchmark_id: &str,
        integration_id: &str,
    ) -> Result<u64, StoreError>;

    /// Key identifiers of every runner already stored for a job.
    async fn runner_keys(&self, job_id: JobId) -> Result<HashSet<String>, StoreError>;

    async fn count_runners(&self, job_id: JobId) -> Result<u64, StoreError>;

    /// Inserts runners in `Created` in one batch; runners whose key already
    /// exists are skipped. Returns the number inserted.
    async fn insert_runners(
        &self,
        runners: &[NewRunner],
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn get_runner(&self, id: RunnerId) -> Result<Option<Runner>, StoreError>;

    async fn runners_for_job(&self, job_id: JobId) -> Result<Vec<Runner>, StoreError>;

    /// `Created` runners of one trigger type, oldest first.
    async fn created_runners(
        &self,
        trigger_type: TriggerType,
        limit: usize,
    ) -> Result<Vec<Runner>, StoreError>;

    /// `Created` -> `Queued`, recording the stream entry ID.
    async fn mark_runner_queued(
        &self,
        id: RunnerId,
        queue_sequence: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn mark_runner_failed(
        &self,
        id: RunnerId,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Sweeps runners stuck in `status` since before `stuck_before`: under
    /// the retry ceiling they return to `Created` with `retry_count + 1`, at
    /// the ceiling they become `Failed`.
    async fn sweep_stuck_runners(
        &self,
        status: RunnerStatus,
        stuck_before: DateTime<Utc>,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> Result<SweepOutcome, StoreError>;

    /// `Failed` runners under the retry ceiling go back to `Created` with
    /// `retry_count + 1`.
    async fn retry_failed_runners(
        &self,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Records a worker's runner result. Results for a runner that already
    /// succeeded are ignored.
    async fn apply_runner_result(
        &self,
        result: &RunnerResultMessage,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_outcome_total() {
        let outcome = SweepOutcome {
            retried: 3,
            failed: 2,
        };
        assert_eq!(outcome.total(), 5);
        assert_eq!(SweepOutcome::default().total(), 0);
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::InvalidData("status 'x'".to_string());
        assert!(err.to_string().contains("status 'x'"));
    }
}
