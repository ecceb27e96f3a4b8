//! compliance_scheduler: schedules compliance benchmark evaluations.
//!
//! Jobs are created per (benchmark, integration) pair, expanded into
//! deduplicated runners, published to workers over Redis Streams, and
//! reconciled from the results the workers send back.

pub mod builder;
pub mod cli;
pub mod clients;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod queue;
pub mod scheduler;
pub mod store;

// Re-export commonly used types
pub use config::{AckPolicy, SchedulerConfig};
pub use error::{BuildError, ClientError, SchedulerError};
pub use queue::QueueError;
pub use store::StoreError;
