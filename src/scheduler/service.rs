//! Assembles the loops into one running process.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{
    run_periodic, CleanupLoop, Collaborators, EnqueueLoop, PeriodicTask, PublisherLoop,
    ResultConsumer, SchedulerLoop, TriggerService,
};
use crate::config::SchedulerConfig;
use crate::model::TriggerType;

/// Which loops a process runs.
///
/// The scheduler, enqueue, publisher and cleanup loops must have a single
/// active instance; extra replicas run [`Role::Consumers`] only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    All,
    Consumers,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::All => "all",
            Role::Consumers => "consumers",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(Role::All),
            "consumers" => Ok(Role::Consumers),
            other => Err(format!("unknown role '{}', expected 'all' or 'consumers'", other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Service is already running")]
    AlreadyRunning,

    #[error("Service is not running")]
    NotRunning,

    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

pub struct SchedulerService {
    config: SchedulerConfig,
    deps: Collaborators,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl SchedulerService {
    pub fn new(config: SchedulerConfig, deps: Collaborators) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            deps,
            shutdown_tx,
            handles: Vec::new(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn trigger_service(&self) -> TriggerService {
        TriggerService::new(&self.deps)
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Spawns the loops for `role`.
    pub fn start(&mut self, role: Role) -> Result<(), ServiceError> {
        if self.is_running() {
            return Err(ServiceError::AlreadyRunning);
        }

        if role == Role::All {
            let config = &self.config;
            let periodic: Vec<(Arc<dyn PeriodicTask>, Duration)> = vec![
                (
                    Arc::new(SchedulerLoop::new(&self.deps, config)),
                    config.schedule_interval,
                ),
                (Arc::new(EnqueueLoop::new(&self.deps)), config.enqueue_interval),
                (
                    Arc::new(PublisherLoop::new(&self.deps, config, TriggerType::Scheduled)),
                    config.publish_interval,
                ),
                (
                    Arc::new(PublisherLoop::new(&self.deps, config, TriggerType::Manual)),
                    config.publish_interval,
                ),
                (
                    Arc::new(CleanupLoop::new(&self.deps, config)),
                    config.cleanup_interval,
                ),
            ];
            for (task, interval) in periodic {
                let shutdown = self.shutdown_tx.subscribe();
                self.handles
                    .push(tokio::spawn(run_periodic(task, interval, shutdown)));
            }
        }

        let runner_results = ResultConsumer::runner_results(&self.deps, &self.config);
        self.handles
            .push(tokio::spawn(runner_results.run(self.shutdown_tx.subscribe())));

        let job_summaries = ResultConsumer::job_summaries(&self.deps, &self.config);
        self.handles
            .push(tokio::spawn(job_summaries.run(self.shutdown_tx.subscribe())));

        info!(role = %role, tasks = self.handles.len(), "Scheduler service started");
        Ok(())
    }

    /// Signals every loop and waits for them to exit.
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        if !self.is_running() {
            return Err(ServiceError::NotRunning);
        }

        info!("Initiating scheduler shutdown");
        // Loops that already exited have dropped their receivers.
        let _ = self.shutdown_tx.send(());

        let handles: Vec<JoinHandle<()>> = self.handles.drain(..).collect();

        match tokio::time::timeout(self.shutdown_timeout, join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!(error = %e, "Loop task panicked during shutdown");
                    }
                }
                info!("Scheduler shutdown complete");
                Ok(())
            }
            Err(_) => {
                warn!(timeout = ?self.shutdown_timeout, "Scheduler shutdown timed out");
                Err(ServiceError::ShutdownTimeout(self.shutdown_timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("all".parse::<Role>().unwrap(), Role::All);
        assert_eq!("Consumers".parse::<Role>().unwrap(), Role::Consumers);
        assert!("publishers".parse::<Role>().is_err());
        assert_eq!(Role::default().to_string(), "all");
    }
}
