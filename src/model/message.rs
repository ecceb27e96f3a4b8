//! JSON payloads exchanged with the runner workers over the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::benchmark::Query;
use super::job::{JobId, JobStatus};
use super::runner::{Caller, Runner, RunnerId, RunnerStatus};

/// Work item published for one runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerJobMessage {
    pub runner_id: RunnerId,
    pub retry_count: i32,
    pub parent_job_id: JobId,
    pub created_at: DateTime<Utc>,
    pub callers: Vec<Caller>,
    pub query: Query,
    pub integration_id: Option<String>,
    pub provider_id: Option<String>,
    #[serde(default)]
    pub resource_collection_id: Option<String>,
}

impl RunnerJobMessage {
    /// Builds the message for `runner` with its resolved query and provider.
    pub fn for_runner(runner: &Runner, query: Query, provider_id: Option<String>) -> Self {
        Self {
            runner_id: runner.id,
            retry_count: runner.retry_count,
            parent_job_id: runner.parent_job_id,
            created_at: runner.created_at,
            callers: runner.callers.clone(),
            query,
            integration_id: runner.integration_id.clone(),
            provider_id,
            resource_collection_id: runner.resource_collection_id.clone(),
        }
    }

    /// Idempotency key: a redelivered publish of the same retry is a no-op.
    pub fn dedup_key(&self) -> String {
        dedup_key(self.runner_id, self.retry_count)
    }
}

/// Formats the publish deduplication key for a runner attempt.
pub fn dedup_key(runner_id: RunnerId, retry_count: i32) -> String {
    format!("job-{runner_id}-{retry_count}")
}

/// Result of one runner evaluation, emitted by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerResultMessage {
    pub runner_id: RunnerId,
    pub status: RunnerStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub result_count: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of the job-level aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummaryMessage {
    pub job_id: JobId,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
}
