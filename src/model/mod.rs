//! Shared data model of the compliance scheduler.
//!
//! - [`ComplianceJob`]: one benchmark evaluation for one integration
//! - [`Runner`]: one deduplicated query evaluation dispatched to workers
//! - [`Caller`]: provenance linking a runner to the controls that need it
//! - [`Benchmark`], [`Control`], [`Query`], [`Integration`]: collaborator data
//! - queue message payloads

pub mod benchmark;
pub mod integration;
pub mod job;
pub mod message;
pub mod runner;

use thiserror::Error;

pub use benchmark::{Benchmark, Control, Query, QueryParameter, Severity};
pub use integration::{Integration, IntegrationFilter, IntegrationState};
pub use job::{ComplianceJob, JobId, JobStatus, NewJob, TriggerType};
pub use message::{dedup_key, JobSummaryMessage, RunnerJobMessage, RunnerResultMessage};
pub use runner::{Caller, NewRunner, Runner, RunnerId, RunnerKey, RunnerStatus};

/// A stored enum label did not match any known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: '{value}'")]
pub struct ParseStatusError {
    kind: &'static str,
    value: String,
}

impl ParseStatusError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
