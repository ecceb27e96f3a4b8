//! Prometheus metrics registration and export.

use prometheus::{
    Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all scheduler metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Jobs created, labeled by trigger type.
pub static JOBS_CREATED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Job status transitions made by sweeps, labeled by target status.
pub static JOB_TRANSITIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Runners persisted by the enqueue loop.
pub static RUNNERS_CREATED_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Publish attempts, labeled by trigger type and outcome.
pub static RUNNERS_PUBLISHED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Runner results received, labeled by runner status.
pub static RUNNER_RESULTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Job summaries received, labeled by job status.
pub static JOB_SUMMARIES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Runners touched by timeout sweeps, labeled by swept status and outcome.
pub static RUNNERS_SWEPT_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Failed runners sent back for another attempt.
pub static RUNNERS_RETRIED_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Search-index documents deleted by cleanup.
pub static CLEANUP_DELETED_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Loop iterations, labeled by loop name and outcome.
pub static LOOP_ITERATIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Loop iteration duration in seconds, labeled by loop name.
pub static LOOP_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls leave the first registry in place.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let jobs_created = CounterVec::new(
        Opts::new("compliance_jobs_created_total", "Compliance jobs created"),
        &["trigger"],
    )?;

    let job_transitions = CounterVec::new(
        Opts::new(
            "compliance_job_transitions_total",
            "Job status transitions made by sweeps",
        ),
        &["status"],
    )?;

    let runners_created = Counter::new(
        "compliance_runners_created_total",
        "Runners persisted by the enqueue loop",
    )?;

    let runners_published = CounterVec::new(
        Opts::new(
            "compliance_runners_published_total",
            "Runner publish attempts",
        ),
        &["trigger", "outcome"],
    )?;

    let runner_results = CounterVec::new(
        Opts::new("compliance_runner_results_total", "Runner results received"),
        &["status"],
    )?;

    let job_summaries = CounterVec::new(
        Opts::new("compliance_job_summaries_total", "Job summaries received"),
        &["status"],
    )?;

    let runners_swept = CounterVec::new(
        Opts::new(
            "compliance_runners_swept_total",
            "Runners touched by timeout sweeps",
        ),
        &["swept_status", "outcome"],
    )?;

    let runners_retried = Counter::new(
        "compliance_runners_retried_total",
        "Failed runners sent back for another attempt",
    )?;

    let cleanup_deleted = Counter::new(
        "compliance_cleanup_deleted_total",
        "Orphaned compliance results deleted from the search index",
    )?;

    let loop_iterations = CounterVec::new(
        Opts::new("compliance_loop_iterations_total", "Loop iterations"),
        &["loop", "outcome"],
    )?;

    let loop_duration = HistogramVec::new(
        HistogramOpts::new(
            "compliance_loop_duration_seconds",
            "Loop iteration duration in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
        &["loop"],
    )?;

    registry.register(Box::new(jobs_created.clone()))?;
    registry.register(Box::new(job_transitions.clone()))?;
    registry.register(Box::new(runners_created.clone()))?;
    registry.register(Box::new(runners_published.clone()))?;
    registry.register(Box::new(runner_results.clone()))?;
    registry.register(Box::new(job_summaries.clone()))?;
    registry.register(Box::new(runners_swept.clone()))?;
    registry.register(Box::new(runners_retried.clone()))?;
    registry.register(Box::new(cleanup_deleted.clone()))?;
    registry.register(Box::new(loop_iterations.clone()))?;
    registry.register(Box::new(loop_duration.clone()))?;

    // Already set means a previous call won; keep its metrics.
    let _ = REGISTRY.set(registry);
    let _ = JOBS_CREATED_TOTAL.set(jobs_created);
    let _ = JOB_TRANSITIONS_TOTAL.set(job_transitions);
    let _ = RUNNERS_CREATED_TOTAL.set(runners_created);
    let _ = RUNNERS_PUBLISHED_TOTAL.set(runners_published);
    let _ = RUNNER_RESULTS_TOTAL.set(runner_results);
    let _ = JOB_SUMMARIES_TOTAL.set(job_summaries);
    let _ = RUNNERS_SWEPT_TOTAL.set(runners_swept);
    let _ = RUNNERS_RETRIED_TOTAL.set(runners_retried);
    let _ = CLEANUP_DELETED_TOTAL.set(cleanup_deleted);
    let _ = LOOP_ITERATIONS_TOTAL.set(loop_iterations);
    let _ = LOOP_DURATION.set(loop_duration);

    tracing::info!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_repeatable() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_recording() {
        let _ = init_metrics();
        if let Some(counter) = RUNNERS_PUBLISHED_TOTAL.get() {
            counter.with_label_values(&["scheduled", "queued"]).inc();
        }

        let text = export_metrics();
        assert!(!text.starts_with("# Error"));
        assert!(text.contains("compliance_runners_published_total"));
    }
}
