//! Prometheus metrics for the scheduler loops.
//!
//! # Example
//!
//! ```ignore
//! use compliance_scheduler::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_loop_iteration("enqueue", true, 0.4);
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{MetricsCollector, PublishOutcome};
pub use self::prometheus::{export_metrics, init_metrics, REGISTRY};
