//! The scheduler loops.
//!
//! # Loops
//!
//! | Loop | Driven by | Does |
//! | --- | --- | --- |
//! | [`SchedulerLoop`] | timer | creates due scheduled jobs, sweeps job progress and timeouts |
//! | [`EnqueueLoop`] | timer | expands jobs into runners |
//! | [`PublisherLoop`] (x2) | timer | publishes created runners per trigger type, sweeps stuck runners |
//! | [`ResultConsumer`] (x2) | queue | applies runner results and job summaries |
//! | [`CleanupLoop`] | timer | deletes search-index results of removed integrations |
//!
//! Loops share nothing in memory; they coordinate through the
//! [`JobStore`] and the [`MessageQueue`]. The scheduler, enqueue and
//! publisher loops assume a single active replica (see [`Role`]).

pub mod cleanup;
pub mod clock;
pub mod consumers;
pub mod driver;
pub mod enqueue;
pub mod publisher;
pub mod schedule;
pub mod service;
pub mod trigger;

use std::sync::Arc;
use std::time::Duration;

use crate::clients::{BenchmarkClient, IntegrationClient, SearchClient};
use crate::queue::MessageQueue;
use crate::store::JobStore;

pub use cleanup::{CleanupLoop, CleanupReport, ComplianceResultDoc};
pub use clock::{Clock, ManualClock, SystemClock};
pub use consumers::{Handled, JobSummaryHandler, ResultConsumer, ResultHandler, RunnerResultHandler};
pub use driver::{run_periodic, PeriodicTask};
pub use enqueue::EnqueueLoop;
pub use publisher::{PublishReport, PublisherLoop};
pub use schedule::SchedulerLoop;
pub use service::{Role, SchedulerService, ServiceError};
pub use trigger::TriggerService;

/// Shared handles every loop draws its collaborators from.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn MessageQueue>,
    pub benchmarks: Arc<dyn BenchmarkClient>,
    pub integrations: Arc<dyn IntegrationClient>,
    pub search: Arc<dyn SearchClient>,
    pub clock: Arc<dyn Clock>,
}

/// Converts a configured interval for timestamp arithmetic.
pub(crate) fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}
