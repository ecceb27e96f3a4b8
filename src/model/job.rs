//! Compliance job records.
//!
//! A job is one benchmark-evaluation request scoped to a single integration.
//! Its runners are generated later by the enqueue loop; the
//! `are_all_runners_queued` flag gates that generation step.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ParseStatusError;

/// Database identifier of a compliance job.
pub type JobId = i64;

/// Who created a job: the periodic scheduler or a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Created by the scheduler loop on its interval.
    Scheduled,
    /// Created on user request.
    Manual,
}

impl TriggerType {
    /// Stable string form used for storage and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Scheduled => "scheduled",
            TriggerType::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(TriggerType::Scheduled),
            "manual" => Ok(TriggerType::Manual),
            other => Err(ParseStatusError::new("trigger type", other)),
        }
    }
}

/// Lifecycle of a compliance job.
///
/// `Created` means runners have not been generated yet. `RunnersInProgress`
/// means runners exist and are being published or evaluated.
/// `SummarizerInProgress` means every runner reached a terminal state and the
/// job-level aggregation is pending. The remaining states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    RunnersInProgress,
    SummarizerInProgress,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobStatus {
    /// Stable string form used for storage and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::RunnersInProgress => "runners_in_progress",
            JobStatus::SummarizerInProgress => "summarizer_in_progress",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
        }
    }

    /// Returns whether no further transition is expected.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut
        )
    }

    /// All statuses that are not terminal.
    pub fn active() -> [JobStatus; 3] {
        [
            JobStatus::Created,
            JobStatus::RunnersInProgress,
            JobStatus::SummarizerInProgress,
        ]
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(JobStatus::Created),
            "runners_in_progress" => Ok(JobStatus::RunnersInProgress),
            "summarizer_in_progress" => Ok(JobStatus::SummarizerInProgress),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "timed_out" => Ok(JobStatus::TimedOut),
            other => Err(ParseStatusError::new("job status", other)),
        }
    }
}

/// A persisted compliance job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceJob {
    /// Auto-assigned identifier.
    pub id: JobId,
    /// Job this one was re-triggered from, if any.
    pub parent_id: Option<JobId>,
    /// Root benchmark being evaluated.
    pub benchmark_id: String,
    /// Integration (cloud account) the job is scoped to.
    pub integration_id: String,
    /// Optional narrowing of the evaluated resources.
    pub resource_collection_id: Option<String>,
    pub trigger_type: TriggerType,
    pub status: JobStatus,
    /// False until runner generation for this job has completed.
    pub are_all_runners_queued: bool,
    pub with_incidents: bool,
    pub created_by: String,
    pub failure_message: Option<String>,
    /// When the job-level aggregation started, as reported by the summarizer.
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ComplianceJob {
    /// Returns how long ago the job was created, relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// Fields needed to insert a new job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub parent_id: Option<JobId>,
    pub benchmark_id: String,
    pub integration_id: String,
    pub resource_collection_id: Option<String>,
    pub trigger_type: TriggerType,
    pub with_incidents: bool,
    pub created_by: String,
}

impl NewJob {
    /// Creates a scheduler-originated job.
    pub fn scheduled(benchmark_id: impl Into<String>, integration_id: impl Into<String>) -> Self {
        Self {
            parent_id: None,
            benchmark_id: benchmark_id.into(),
            integration_id: integration_id.into(),
            resource_collection_id: None,
            trigger_type: TriggerType::Scheduled,
            with_incidents: true,
            created_by: "system".to_string(),
        }
    }

    /// Creates a user-originated job.
    pub fn manual(
        benchmark_id: impl Into<String>,
        integration_id: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            parent_id: None,
            benchmark_id: benchmark_id.into(),
            integration_id: integration_id.into(),
            resource_collection_id: None,
            trigger_type: TriggerType::Manual,
            with_incidents: false,
            created_by: created_by.into(),
        }
    }

    /// Marks this job as a child of `parent`.
    pub fn with_parent(mut self, parent: JobId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    /// Sets whether the evaluation should raise incidents.
    pub fn with_incidents(mut self, with_incidents: bool) -> Self {
        self.with_incidents = with_incidents;
        self
    }

    /// Narrows the job to a resource collection.
    pub fn with_resource_collection(mut self, id: impl Into<String>) -> Self {
        self.resource_collection_id = Some(id.into());
        self
    }
}
