//! Runner records: one unit of dispatched work per distinct query.
//!
//! Runners are uniquely keyed by `(parent job, query, integration or
//! global)`. Every control in the benchmark tree that needs the same query
//! contributes a [`Caller`] to that single runner instead of creating a
//! duplicate.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::benchmark::Severity;
use super::job::{JobId, TriggerType};
use super::ParseStatusError;

/// Database identifier of a runner.
pub type RunnerId = i64;

/// Lifecycle of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    /// Built, waiting to be published.
    Created,
    /// Published to the work stream.
    Queued,
    /// Claimed by a worker.
    InProgress,
    Succeeded,
    Failed,
}

impl RunnerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerStatus::Created => "created",
            RunnerStatus::Queued => "queued",
            RunnerStatus::InProgress => "in_progress",
            RunnerStatus::Succeeded => "succeeded",
            RunnerStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunnerStatus::Succeeded | RunnerStatus::Failed)
    }
}

impl fmt::Display for RunnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunnerStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(RunnerStatus::Created),
            "queued" => Ok(RunnerStatus::Queued),
            "in_progress" => Ok(RunnerStatus::InProgress),
            "succeeded" => Ok(RunnerStatus::Succeeded),
            "failed" => Ok(RunnerStatus::Failed),
            other => Err(ParseStatusError::new("runner status", other)),
        }
    }
}

/// Provenance of a runner: one control, reached through one benchmark path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Caller {
    /// Top-level benchmark of the job.
    pub root_benchmark: String,
    /// Benchmark IDs from the root down to the benchmark owning the control.
    pub parent_benchmark_ids: Vec<String>,
    pub control_id: String,
    pub control_severity: Severity,
    /// Inherited from the root benchmark.
    pub tracks_drift_events: bool,
}

/// Uniqueness key of a runner within its job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunnerKey {
    pub parent_job_id: JobId,
    pub query_id: String,
    /// `None` for global runners.
    pub integration_id: Option<String>,
}

impl RunnerKey {
    pub fn new(parent_job_id: JobId, query_id: impl Into<String>, integration_id: Option<String>) -> Self {
        Self {
            parent_job_id,
            query_id: query_id.into(),
            integration_id,
        }
    }

    /// Flat identifier persisted alongside the runner and used to skip
    /// runners a previous, interrupted enqueue pass already stored.
    pub fn identifier(&self) -> String {
        format!(
            "{}|{}|{}",
            self.parent_job_id,
            self.query_id,
            self.integration_id.as_deref().unwrap_or("global")
        )
    }

    pub fn is_global(&self) -> bool {
        self.integration_id.is_none()
    }
}

/// A runner produced by the builder, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRunner {
    pub parent_job_id: JobId,
    /// Root benchmark of the parent job.
    pub benchmark_id: String,
    pub query_id: String,
    pub integration_id: Option<String>,
    pub resource_collection_id: Option<String>,
    pub trigger_type: TriggerType,
    pub callers: Vec<Caller>,
}

impl NewRunner {
    pub fn key(&self) -> RunnerKey {
        RunnerKey::new(
            self.parent_job_id,
            self.query_id.clone(),
            self.integration_id.clone(),
        )
    }
}

/// A persisted runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runner {
    pub id: RunnerId,
    pub parent_job_id: JobId,
    pub benchmark_id: String,
    pub query_id: String,
    pub integration_id: Option<String>,
    pub resource_collection_id: Option<String>,
    pub trigger_type: TriggerType,
    pub callers: Vec<Caller>,
    pub status: RunnerStatus,
    pub retry_count: i32,
    /// When the runner was last published.
    pub queued_at: Option<DateTime<Utc>>,
    /// When a worker started evaluating it.
    pub started_at: Option<DateTime<Utc>>,
    /// Number of result rows the worker reported.
    pub total_count: Option<i64>,
    pub failure_message: Option<String>,
    /// Stream entry ID returned by the queue on publish.
    pub queue_sequence: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Runner {
    pub fn key(&self) -> RunnerKey {
        RunnerKey::new(
            self.parent_job_id,
            self.query_id.clone(),
            self.integration_id.clone(),
        )
    }

    /// A runner is settled once it succeeded or failed with no retries left.
    pub fn is_settled(&self, max_retries: i32) -> bool {
        match self.status {
            RunnerStatus::Succeeded => true,
            RunnerStatus::Failed => self.retry_count >= max_retries,
            _ => false,
        }
    }
}
