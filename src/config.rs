//! Scheduler configuration.
//!
//! Values come from `COMPLIANCE_*` environment variables layered over the
//! defaults below; durations are given in whole seconds.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// When a consumer acknowledges a message relative to applying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPolicy {
    /// Acknowledge on receipt. A crash before the store update loses the
    /// result.
    BeforeProcessing,
    /// Acknowledge once the store update returned, whether or not it
    /// succeeded. A crash before the ack redelivers the message.
    AfterProcessing,
}

impl AckPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckPolicy::BeforeProcessing => "before",
            AckPolicy::AfterProcessing => "after",
        }
    }
}

impl fmt::Display for AckPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AckPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "before" => Ok(AckPolicy::BeforeProcessing),
            "after" => Ok(AckPolicy::AfterProcessing),
            other => Err(format!("expected 'before' or 'after', got '{}'", other)),
        }
    }
}

/// Configuration of every scheduler loop and its collaborators.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    // Connections
    pub database_url: String,
    pub redis_url: String,
    pub benchmark_service_url: String,
    pub integration_service_url: String,
    pub search_url: String,
    pub search_username: Option<String>,
    pub search_password: Option<String>,
    pub compliance_result_index: String,

    // Loop cadence
    /// Tick of the scheduler loop.
    pub schedule_interval: Duration,
    /// Minimum age of the latest scheduled job before another is due.
    pub job_interval: Duration,
    pub enqueue_interval: Duration,
    pub publish_interval: Duration,
    pub cleanup_interval: Duration,

    // Publisher
    pub publish_batch_size: usize,
    pub publish_max_iterations: usize,
    pub queued_timeout: Duration,
    pub in_progress_timeout: Duration,
    pub max_runner_retries: i32,
    pub job_timeout: Duration,

    // Queue
    pub scheduled_topic: String,
    pub manual_topic: String,
    pub runner_result_topic: String,
    pub job_summary_topic: String,
    /// Consumer group of the runner workers on the work topics.
    pub worker_group: String,
    /// Consumer group of this service on the result topics.
    pub scheduler_group: String,
    pub consumer_name: String,
    pub dedup_window: Duration,
    pub receive_block: Duration,
    pub receive_batch: usize,

    // Consumers
    pub runner_result_ack: AckPolicy,
    pub job_summary_ack: AckPolicy,

    // Cleanup
    pub cleanup_page_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            redis_url: "redis://localhost:6379".to_string(),
            benchmark_service_url: "http://compliance-service:8000".to_string(),
            integration_service_url: "http://integration-service:8000".to_string(),
            search_url: "http://opensearch:9200".to_string(),
            search_username: None,
            search_password: None,
            compliance_result_index: "compliance_results".to_string(),

            schedule_interval: Duration::from_secs(5 * 60),
            job_interval: Duration::from_secs(24 * 3600),
            enqueue_interval: Duration::from_secs(60),
            publish_interval: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(6 * 3600),

            publish_batch_size: 1000,
            publish_max_iterations: 10,
            queued_timeout: Duration::from_secs(2 * 3600),
            in_progress_timeout: Duration::from_secs(6 * 3600),
            max_runner_retries: 3,
            job_timeout: Duration::from_secs(24 * 3600),

            scheduled_topic: "compliance-runner-job".to_string(),
            manual_topic: "compliance-runner-job-manual".to_string(),
            runner_result_topic: "compliance-runner-result".to_string(),
            job_summary_topic: "compliance-summarizer-result".to_string(),
            worker_group: "compliance-worker".to_string(),
            scheduler_group: "compliance-scheduler".to_string(),
            consumer_name: "scheduler-1".to_string(),
            dedup_window: Duration::from_secs(3600),
            receive_block: Duration::from_secs(5),
            receive_batch: 100,

            runner_result_ack: AckPolicy::BeforeProcessing,
            job_summary_ack: AckPolicy::AfterProcessing,

            cleanup_page_size: 1000,
        }
    }
}

impl SchedulerConfig {
    /// Loads configuration from the process environment.
    ///
    /// `DATABASE_URL` is required. Everything else falls back to defaults:
    ///
    /// - `REDIS_URL`
    /// - `COMPLIANCE_BENCHMARK_SERVICE_URL`, `COMPLIANCE_INTEGRATION_SERVICE_URL`
    /// - `COMPLIANCE_SEARCH_URL`, `COMPLIANCE_SEARCH_USERNAME`,
    ///   `COMPLIANCE_SEARCH_PASSWORD`, `COMPLIANCE_RESULT_INDEX`
    /// - `COMPLIANCE_*_INTERVAL_SECS`, `COMPLIANCE_*_TIMEOUT_SECS`
    /// - `COMPLIANCE_PUBLISH_BATCH_SIZE`, `COMPLIANCE_PUBLISH_MAX_ITERATIONS`,
    ///   `COMPLIANCE_MAX_RUNNER_RETRIES`
    /// - `COMPLIANCE_*_TOPIC`, `COMPLIANCE_WORKER_GROUP`,
    ///   `COMPLIANCE_SCHEDULER_GROUP`, `COMPLIANCE_CONSUMER_NAME`
    /// - `COMPLIANCE_RUNNER_RESULT_ACK`, `COMPLIANCE_JOB_SUMMARY_ACK`
    ///   (`before` | `after`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup` instead of the environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.database_url = lookup("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;
        if let Some(val) = lookup("REDIS_URL") {
            config.redis_url = val;
        }

        // Collaborators
        if let Some(val) = lookup("COMPLIANCE_BENCHMARK_SERVICE_URL") {
            config.benchmark_service_url = val;
        }
        if let Some(val) = lookup("COMPLIANCE_INTEGRATION_SERVICE_URL") {
            config.integration_service_url = val;
        }
        if let Some(val) = lookup("COMPLIANCE_SEARCH_URL") {
            config.search_url = val;
        }
        config.search_username = lookup("COMPLIANCE_SEARCH_USERNAME");
        config.search_password = lookup("COMPLIANCE_SEARCH_PASSWORD");
        if let Some(val) = lookup("COMPLIANCE_RESULT_INDEX") {
            config.compliance_result_index = val;
        }

        // Durations
        let durations: [(&str, &mut Duration); 10] = [
            ("COMPLIANCE_SCHEDULE_INTERVAL_SECS", &mut config.schedule_interval),
            ("COMPLIANCE_JOB_INTERVAL_SECS", &mut config.job_interval),
            ("COMPLIANCE_ENQUEUE_INTERVAL_SECS", &mut config.enqueue_interval),
            ("COMPLIANCE_PUBLISH_INTERVAL_SECS", &mut config.publish_interval),
            ("COMPLIANCE_CLEANUP_INTERVAL_SECS", &mut config.cleanup_interval),
            ("COMPLIANCE_QUEUED_TIMEOUT_SECS", &mut config.queued_timeout),
            ("COMPLIANCE_IN_PROGRESS_TIMEOUT_SECS", &mut config.in_progress_timeout),
            ("COMPLIANCE_JOB_TIMEOUT_SECS", &mut config.job_timeout),
            ("COMPLIANCE_DEDUP_WINDOW_SECS", &mut config.dedup_window),
            ("COMPLIANCE_RECEIVE_BLOCK_SECS", &mut config.receive_block),
        ];
        for (key, slot) in durations {
            if let Some(val) = lookup(key) {
                *slot = Duration::from_secs(parse_env_value(&val, key)?);
            }
        }

        // Counts
        let counts: [(&str, &mut usize); 4] = [
            ("COMPLIANCE_PUBLISH_BATCH_SIZE", &mut config.publish_batch_size),
            ("COMPLIANCE_PUBLISH_MAX_ITERATIONS", &mut config.publish_max_iterations),
            ("COMPLIANCE_RECEIVE_BATCH", &mut config.receive_batch),
            ("COMPLIANCE_CLEANUP_PAGE_SIZE", &mut config.cleanup_page_size),
        ];
        for (key, slot) in counts {
            if let Some(val) = lookup(key) {
                *slot = parse_env_value(&val, key)?;
            }
        }
        if let Some(val) = lookup("COMPLIANCE_MAX_RUNNER_RETRIES") {
            config.max_runner_retries = parse_env_value(&val, "COMPLIANCE_MAX_RUNNER_RETRIES")?;
        }

        // Queue names
        let names: [(&str, &mut String); 7] = [
            ("COMPLIANCE_SCHEDULED_TOPIC", &mut config.scheduled_topic),
            ("COMPLIANCE_MANUAL_TOPIC", &mut config.manual_topic),
            ("COMPLIANCE_RUNNER_RESULT_TOPIC", &mut config.runner_result_topic),
            ("COMPLIANCE_JOB_SUMMARY_TOPIC", &mut config.job_summary_topic),
            ("COMPLIANCE_WORKER_GROUP", &mut config.worker_group),
            ("COMPLIANCE_SCHEDULER_GROUP", &mut config.scheduler_group),
            ("COMPLIANCE_CONSUMER_NAME", &mut config.consumer_name),
        ];
        for (key, slot) in names {
            if let Some(val) = lookup(key) {
                *slot = val;
            }
        }

        // Ack policies
        if let Some(val) = lookup("COMPLIANCE_RUNNER_RESULT_ACK") {
            config.runner_result_ack = parse_ack(&val, "COMPLIANCE_RUNNER_RESULT_ACK")?;
        }
        if let Some(val) = lookup("COMPLIANCE_JOB_SUMMARY_ACK") {
            config.job_summary_ack = parse_ack(&val, "COMPLIANCE_JOB_SUMMARY_ACK")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }

        let intervals = [
            ("schedule_interval", self.schedule_interval),
            ("job_interval", self.job_interval),
            ("enqueue_interval", self.enqueue_interval),
            ("publish_interval", self.publish_interval),
            ("cleanup_interval", self.cleanup_interval),
            ("queued_timeout", self.queued_timeout),
            ("in_progress_timeout", self.in_progress_timeout),
            ("job_timeout", self.job_timeout),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.in_progress_timeout < self.queued_timeout {
            return Err(ConfigError::ValidationFailed(
                "in_progress_timeout must be at least queued_timeout".to_string(),
            ));
        }

        let sizes = [
            ("publish_batch_size", self.publish_batch_size),
            ("publish_max_iterations", self.publish_max_iterations),
            ("receive_batch", self.receive_batch),
            ("cleanup_page_size", self.cleanup_page_size),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.max_runner_retries < 0 {
            return Err(ConfigError::ValidationFailed(
                "max_runner_retries cannot be negative".to_string(),
            ));
        }

        let names = [
            ("scheduled_topic", &self.scheduled_topic),
            ("manual_topic", &self.manual_topic),
            ("runner_result_topic", &self.runner_result_topic),
            ("job_summary_topic", &self.job_summary_topic),
            ("worker_group", &self.worker_group),
            ("scheduler_group", &self.scheduler_group),
            ("consumer_name", &self.consumer_name),
        ];
        for (name, value) in names {
            if value.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} cannot be empty",
                    name
                )));
            }
        }

        if self.scheduled_topic == self.manual_topic {
            return Err(ConfigError::ValidationFailed(
                "scheduled_topic and manual_topic must differ".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    pub fn with_max_runner_retries(mut self, retries: i32) -> Self {
        self.max_runner_retries = retries;
        self
    }

    pub fn with_publish_batch_size(mut self, size: usize) -> Self {
        self.publish_batch_size = size;
        self
    }

    pub fn with_cleanup_page_size(mut self, size: usize) -> Self {
        self.cleanup_page_size = size;
        self
    }
}

fn parse_env_value<T: FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

fn parse_ack(value: &str, key: &str) -> Result<AckPolicy, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|message| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        })
}
