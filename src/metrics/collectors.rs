//! Recording facade over the raw Prometheus metrics.
//!
//! Every method is a no-op until [`init_metrics`](super::init_metrics) has
//! run, so library code and tests can record unconditionally.

use super::prometheus::{
    CLEANUP_DELETED_TOTAL, JOBS_CREATED_TOTAL, JOB_SUMMARIES_TOTAL, JOB_TRANSITIONS_TOTAL,
    LOOP_DURATION, LOOP_ITERATIONS_TOTAL, RUNNERS_CREATED_TOTAL, RUNNERS_PUBLISHED_TOTAL,
    RUNNERS_RETRIED_TOTAL, RUNNERS_SWEPT_TOTAL, RUNNER_RESULTS_TOTAL,
};
use crate::model::{JobStatus, RunnerStatus, TriggerType};
use crate::store::SweepOutcome;

/// Outcome label of a publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Queued,
    Duplicate,
    Failed,
}

impl PublishOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishOutcome::Queued => "queued",
            PublishOutcome::Duplicate => "duplicate",
            PublishOutcome::Failed => "failed",
        }
    }
}

/// Metrics collector for scheduler operations.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn record_job_created(&self, trigger: TriggerType) {
        if let Some(counter) = JOBS_CREATED_TOTAL.get() {
            counter.with_label_values(&[trigger.as_str()]).inc();
        }
    }

    /// Records `count` jobs moved to `status` by a sweep.
    pub fn record_job_transitions(&self, status: JobStatus, count: usize) {
        if count == 0 {
            return;
        }
        if let Some(counter) = JOB_TRANSITIONS_TOTAL.get() {
            counter
                .with_label_values(&[status.as_str()])
                .inc_by(count as f64);
        }
    }

    pub fn record_runners_created(&self, count: u64) {
        if let Some(counter) = RUNNERS_CREATED_TOTAL.get() {
            counter.inc_by(count as f64);
        }
    }

    pub fn record_publish(&self, trigger: TriggerType, outcome: PublishOutcome) {
        if let Some(counter) = RUNNERS_PUBLISHED_TOTAL.get() {
            counter
                .with_label_values(&[trigger.as_str(), outcome.as_str()])
                .inc();
        }
        tracing::trace!(trigger = %trigger, outcome = outcome.as_str(), "Recorded publish metric");
    }

    pub fn record_runner_result(&self, status: RunnerStatus) {
        if let Some(counter) = RUNNER_RESULTS_TOTAL.get() {
            counter.with_label_values(&[status.as_str()]).inc();
        }
    }

    pub fn record_job_summary(&self, status: JobStatus) {
        if let Some(counter) = JOB_SUMMARIES_TOTAL.get() {
            counter.with_label_values(&[status.as_str()]).inc();
        }
    }

    pub fn record_sweep(&self, swept: RunnerStatus, outcome: SweepOutcome) {
        let Some(counter) = RUNNERS_SWEPT_TOTAL.get() else {
            return;
        };
        if outcome.retried > 0 {
            counter
                .with_label_values(&[swept.as_str(), "retried"])
                .inc_by(outcome.retried as f64);
        }
        if outcome.failed > 0 {
            counter
                .with_label_values(&[swept.as_str(), "failed"])
                .inc_by(outcome.failed as f64);
        }
    }

    pub fn record_retried(&self, count: u64) {
        if let Some(counter) = RUNNERS_RETRIED_TOTAL.get() {
            counter.inc_by(count as f64);
        }
    }

    pub fn record_cleanup_deleted(&self, count: u64) {
        if let Some(counter) = CLEANUP_DELETED_TOTAL.get() {
            counter.inc_by(count as f64);
        }
    }

    /// Records one loop iteration and its duration.
    pub fn record_loop_iteration(&self, loop_name: &str, success: bool, duration_secs: f64) {
        let outcome = if success { "success" } else { "error" };

        if let Some(counter) = LOOP_ITERATIONS_TOTAL.get() {
            counter.with_label_values(&[loop_name, outcome]).inc();
        }
        if let Some(histogram) = LOOP_DURATION.get() {
            histogram
                .with_label_values(&[loop_name])
                .observe(duration_secs);
        }
    }
}
