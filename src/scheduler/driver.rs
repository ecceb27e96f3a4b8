//! Periodic driver shared by the timer-based loops.
//!
//! Each loop implements [`PeriodicTask::run_once`]; [`run_periodic`] is the
//! thin always-running shell around it. An iteration error is logged and
//! the loop waits for its next tick, so a failing collaborator never takes
//! the process down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::error::SchedulerError;
use crate::metrics::MetricsCollector;

/// One iteration of a timer-driven loop.
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    /// Loop name used in logs and metric labels.
    fn name(&self) -> &str;

    async fn run_once(&self) -> Result<(), SchedulerError>;
}

/// Runs `task` every `interval` until a shutdown signal arrives.
///
/// The first iteration runs immediately. Ticks missed while an iteration
/// is still running are delayed rather than bunched up.
pub async fn run_periodic(
    task: Arc<dyn PeriodicTask>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let metrics = MetricsCollector::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(task = task.name(), interval_secs = interval.as_secs(), "Loop started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let started = Instant::now();
                let result = task.run_once().await;
                let elapsed = started.elapsed().as_secs_f64();
                metrics.record_loop_iteration(task.name(), result.is_ok(), elapsed);

                match result {
                    Ok(()) => debug!(task = task.name(), elapsed_secs = elapsed, "Iteration finished"),
                    Err(e) => error!(task = task.name(), error = %e, "Iteration failed"),
                }
            }
            _ = shutdown.recv() => {
                info!(task = task.name(), "Loop received shutdown signal");
                break;
            }
        }
    }
}
