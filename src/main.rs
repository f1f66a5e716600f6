// ABOUTME: CLI entry point for running a SqlPackage export or import on Azure Batch
// ABOUTME: Parses arguments, loads configuration and drives the pipeline

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use sqlpackage_batch::batch::models::{JobConstraints, TaskStatus};
use sqlpackage_batch::batch::BatchClient;
use sqlpackage_batch::config::{CleanupPolicy, Config};
use sqlpackage_batch::storage::StorageClient;
use sqlpackage_batch::{logging, params, Orchestrator, RunSettings};

const DEFAULT_MAX_WALL_CLOCK_HOURS: u64 = 12;
const DEFAULT_MAX_TASK_RETRY_COUNT: i32 = 3;

#[derive(Parser, Debug)]
#[command(
    name = "sqlpackage-batch",
    version,
    about = "Run a SqlPackage bacpac export or import on Azure Batch"
)]
struct Cli {
    /// The Import or Export JSON parameter file
    parameter_file: PathBuf,

    /// Hours the job is allowed to run for. Defaults to 12 when not a positive integer
    #[arg(allow_hyphen_values = true)]
    max_wall_clock_time: String,

    /// Times a failed task is retried (-1 for unlimited). Defaults to 3 when not an integer
    #[arg(allow_hyphen_values = true)]
    max_task_retry_count: String,

    /// Path to the TOML config file holding account credentials and cluster settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// How long to wait for the task to complete before giving up
    #[arg(long)]
    monitor_timeout_mins: Option<u64>,

    /// What to delete after a successful run. delete-job removes the shared job,
    /// including tasks other operators may still be running in it
    #[arg(long, value_enum)]
    cleanup: Option<CleanupPolicy>,
}

fn parse_wall_clock_hours(raw: &str) -> Duration {
    let secs = raw
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|h| *h > 0)
        .and_then(|h| h.checked_mul(3600))
        .unwrap_or(DEFAULT_MAX_WALL_CLOCK_HOURS * 3600);
    Duration::from_secs(secs)
}

fn monitor_timeout_secs(mins: u64) -> Result<u64> {
    mins.checked_mul(60)
        .with_context(|| format!("--monitor-timeout-mins {} is too large", mins))
}

fn parse_retry_count(raw: &str) -> i32 {
    raw.trim()
        .parse::<i32>()
        .ok()
        .filter(|n| *n >= -1)
        .unwrap_or(DEFAULT_MAX_TASK_RETRY_COUNT)
}

fn describe(statuses: &[TaskStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("{} {}", s.id, s.state))
        .collect::<Vec<_>>()
        .join(", ")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let constraints = JobConstraints {
        max_wall_clock_time: parse_wall_clock_hours(&cli.max_wall_clock_time),
        max_task_retry_count: parse_retry_count(&cli.max_task_retry_count),
    };
    info!("Parameter file = {}", cli.parameter_file.display());
    info!(
        "maxWallClockTime = {}h",
        constraints.max_wall_clock_time.as_secs() / 3600
    );
    info!("maxTaskRetryCount = {}", constraints.max_task_retry_count);

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(mins) = cli.monitor_timeout_mins {
        config.monitor.timeout_secs = monitor_timeout_secs(mins)?;
    }
    if let Some(cleanup) = cli.cleanup {
        config.cleanup = cleanup;
    }
    config.validate()?;

    let raw = params::load(&cli.parameter_file)?;

    let compute = BatchClient::new(&config.batch)?;
    let store = StorageClient::new(&config.storage)?;
    let settings = RunSettings::from(&config);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {elapsed_precise} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(200));

    let result = Orchestrator::new(&compute, &store, &settings)
        .run(raw.as_ref(), &constraints, |statuses| {
            spinner.set_message(describe(statuses))
        })
        .await;
    spinner.finish_and_clear();

    match result {
        Ok(report) => {
            info!(
                "{} finished: pool {}, job {}, task {}",
                report.action, report.pool, report.job, report.task_id
            );
            for status in report.failed_tasks() {
                warn!(
                    "Task {} reached completed with exit code {:?}; check the task output in the job {}",
                    status.id,
                    status.exit_code(),
                    settings.job_id
                );
            }
            Ok(())
        }
        Err(failure) => {
            error!("{}", failure);
            Err(failure.into())
        }
    }
}
