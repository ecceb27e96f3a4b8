//! Error types for compliance scheduling operations.
//!
//! Subsystem errors live next to their subsystem (`StoreError`,
//! `QueueError`, `ConfigError`); this module holds the collaborator-client
//! and runner-builder errors plus [`SchedulerError`], which every loop
//! returns.

use thiserror::Error;

use crate::config::ConfigError;
use crate::queue::QueueError;
use crate::store::StoreError;

/// Errors returned by benchmark, integration and search-index clients.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{service} returned status {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {service}: {message}")]
    InvalidResponse {
        service: &'static str,
        message: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that abort a runner build for a job.
///
/// A build never yields a partial runner set: any of these fails the whole
/// invocation and the enqueue loop retries on its next tick.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Benchmark '{0}' not found")]
    BenchmarkNotFound(String),

    #[error("Control '{0}' not found")]
    ControlNotFound(String),

    #[error("Query '{query_id}' referenced by control '{control_id}' not found")]
    QueryNotFound {
        control_id: String,
        query_id: String,
    },

    #[error("Benchmark cycle detected at '{0}'")]
    Cycle(String),

    #[error("Failed to load benchmark catalog: {0}")]
    Client(#[from] ClientError),
}

/// Top-level error of a scheduler loop iteration.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Runner build failed: {0}")]
    Build(#[from] BuildError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Job {0} not found")]
    JobNotFound(i64),

    #[error("Integration '{integration_id}' is not assigned to benchmark '{benchmark_id}'")]
    NotAssigned {
        benchmark_id: String,
        integration_id: String,
    },
}
