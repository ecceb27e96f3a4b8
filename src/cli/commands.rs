//! CLI command definitions for the compliance scheduler.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use crate::clients::{HttpBenchmarkClient, HttpIntegrationClient, OpenSearchClient};
use crate::config::SchedulerConfig;
use crate::metrics::init_metrics;
use crate::queue::RedisStreamQueue;
use crate::scheduler::{Collaborators, Role, SchedulerService, SystemClock, TriggerService};
use crate::store::PgJobStore;

/// Compliance job scheduler.
#[derive(Parser)]
#[command(name = "compliance-scheduler")]
#[command(about = "Schedule compliance benchmark evaluations and reconcile their results")]
#[command(version)]
#[command(
    long_about = "compliance-scheduler creates compliance jobs per benchmark and integration, expands them into deduplicated runners, publishes runners to Redis Streams and applies worker results.\n\nExample usage:\n  compliance-scheduler migrate\n  compliance-scheduler serve --role all\n  compliance-scheduler trigger --benchmark cis-aws -i acc-1 -i acc-2"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    /// Redis connection URL.
    #[arg(long, env = "REDIS_URL", global = true)]
    pub redis_url: Option<String>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the scheduler loops and result consumers until interrupted.
    Serve(ServeArgs),

    /// Apply the database schema.
    Migrate,

    /// Create manual jobs, or re-trigger an existing job.
    Trigger(TriggerArgs),
}

/// Arguments for `compliance-scheduler serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Loops to run: `all` on exactly one replica, `consumers` elsewhere.
    #[arg(long, default_value = "all", env = "COMPLIANCE_ROLE")]
    pub role: Role,

    /// Seconds to wait for loops to stop on shutdown.
    #[arg(long, default_value = "30")]
    pub shutdown_timeout_secs: u64,
}

/// Arguments for `compliance-scheduler trigger`.
#[derive(Parser, Debug)]
pub struct TriggerArgs {
    /// Benchmark to evaluate.
    #[arg(short, long, required_unless_present = "retrigger")]
    pub benchmark: Option<String>,

    /// Integration to evaluate; repeat for several. Defaults to every
    /// integration assigned to the benchmark.
    #[arg(short, long = "integration")]
    pub integrations: Vec<String>,

    /// Re-trigger this job instead of creating new ones.
    #[arg(long, conflicts_with_all = ["benchmark", "integrations"])]
    pub retrigger: Option<i64>,

    /// Recorded as the job creator.
    #[arg(long, default_value = "cli")]
    pub created_by: String,

    /// Raise incidents for failed controls.
    #[arg(long)]
    pub with_incidents: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Serve(args) => run_serve_command(config, args).await,
        Commands::Migrate => run_migrate_command(config).await,
        Commands::Trigger(args) => run_trigger_command(config, args).await,
    }
}

/// Environment configuration with the URL flags layered on top.
fn load_config(cli: &Cli) -> anyhow::Result<SchedulerConfig> {
    let database_url = cli.database_url.clone();
    let redis_url = cli.redis_url.clone();

    let config = SchedulerConfig::from_lookup(|key| match key {
        "DATABASE_URL" if database_url.is_some() => database_url.clone(),
        "REDIS_URL" if redis_url.is_some() => redis_url.clone(),
        _ => std::env::var(key).ok(),
    })?;
    config.validate()?;
    Ok(config)
}

async fn connect_store(config: &SchedulerConfig) -> anyhow::Result<PgJobStore> {
    let store = PgJobStore::connect(&config.database_url).await?;
    let report = store.run_migrations().await?;
    if !report.applied.is_empty() {
        info!(applied = report.applied.len(), "Applied schema migrations");
    }
    Ok(store)
}

async fn build_collaborators(config: &SchedulerConfig) -> anyhow::Result<Collaborators> {
    let store = connect_store(config).await?;
    let queue = RedisStreamQueue::connect(&config.redis_url, config.dedup_window).await?;

    let mut search = OpenSearchClient::new(&config.search_url);
    match (&config.search_username, &config.search_password) {
        (Some(user), Some(pass)) => search = search.with_basic_auth(user, pass),
        (Some(_), None) | (None, Some(_)) => {
            warn!("Only one of search username/password is set; using no authentication")
        }
        (None, None) => {}
    }

    Ok(Collaborators {
        store: Arc::new(store),
        queue: Arc::new(queue),
        benchmarks: Arc::new(HttpBenchmarkClient::new(&config.benchmark_service_url)),
        integrations: Arc::new(HttpIntegrationClient::new(&config.integration_service_url)),
        search: Arc::new(search),
        clock: Arc::new(SystemClock),
    })
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn run_serve_command(config: SchedulerConfig, args: ServeArgs) -> anyhow::Result<()> {
    init_metrics()?;
    let deps = build_collaborators(&config).await?;

    info!(
        role = %args.role,
        runner_result_ack = %config.runner_result_ack,
        job_summary_ack = %config.job_summary_ack,
        "Starting compliance scheduler"
    );

    let mut service = SchedulerService::new(config, deps)
        .with_shutdown_timeout(Duration::from_secs(args.shutdown_timeout_secs));
    service.start(args.role)?;

    tokio::signal::ctrl_c().await?;
    info!("Received interrupt, shutting down");
    service.shutdown().await?;
    Ok(())
}

async fn run_migrate_command(config: SchedulerConfig) -> anyhow::Result<()> {
    let store = PgJobStore::connect(&config.database_url).await?;
    let report = store.run_migrations().await?;
    for name in &report.applied {
        println!("Applied {}", name);
    }
    println!(
        "{} migration(s) applied, {} already up to date",
        report.applied.len(),
        report.up_to_date
    );
    Ok(())
}

async fn run_trigger_command(config: SchedulerConfig, args: TriggerArgs) -> anyhow::Result<()> {
    let deps = build_collaborators(&config).await?;
    let triggers = TriggerService::new(&deps);

    if let Some(job_id) = args.retrigger {
        let job = triggers.retrigger(job_id, &args.created_by).await?;
        println!("Created job {} (re-trigger of {})", job.id, job_id);
        return Ok(());
    }

    let benchmark = args
        .benchmark
        .ok_or_else(|| anyhow::anyhow!("--benchmark is required"))?;
    let jobs = triggers
        .trigger_manual(
            &benchmark,
            &args.integrations,
            &args.created_by,
            args.with_incidents,
        )
        .await?;

    if jobs.is_empty() {
        println!("No integrations assigned to benchmark '{}'", benchmark);
    }
    for job in &jobs {
        println!(
            "Created job {} for benchmark '{}' on integration '{}'",
            job.id, job.benchmark_id, job.integration_id
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_role() {
        let cli = Cli::try_parse_from(["compliance-scheduler", "serve", "--role", "consumers"])
            .unwrap();
        match cli.command {
            Commands::Serve(args) => assert_eq!(args.role, Role::Consumers),
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_parse_trigger_integrations() {
        let cli = Cli::try_parse_from([
            "compliance-scheduler",
            "trigger",
            "--benchmark",
            "cis",
            "-i",
            "acc-1",
            "-i",
            "acc-2",
            "--with-incidents",
        ])
        .unwrap();
        match cli.command {
            Commands::Trigger(args) => {
                assert_eq!(args.benchmark.as_deref(), Some("cis"));
                assert_eq!(args.integrations, vec!["acc-1", "acc-2"]);
                assert!(args.with_incidents);
                assert_eq!(args.created_by, "cli");
            }
            _ => panic!("expected trigger"),
        }
    }

    #[test]
    fn test_retrigger_conflicts_with_benchmark() {
        let result = Cli::try_parse_from([
            "compliance-scheduler",
            "trigger",
            "--retrigger",
            "7",
            "--benchmark",
            "cis",
        ]);
        assert!(result.is_err());
    }
}
