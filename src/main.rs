use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use job_sentinel::config::{MemoryKillerConfig, MonitorConfig, SentinelConfig};
use job_sentinel::daemon::DaemonHandle;
use job_sentinel::memory_killer::{GrowthTable, MemoryKiller};
use job_sentinel::monitor::JobMonitor;
use job_sentinel::process::{ProcessControl, UnixProcess};
use job_sentinel::rss::{ProcessRssSampler, RssSampler};
use job_sentinel::shutdown::{install_quiet_handler, install_shutdown_handler};
use job_sentinel::store;
use job_sentinel::worker::{
    ExecutionResult, JobSpec, ShellExecutor, WorkerPool, DEFAULT_CONCURRENCY,
};

#[derive(Parser, Debug)]
#[command(name = "job-sentinel")]
#[command(version)]
#[command(about = "Memory guard and job cancellation for background job workers")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run jobs under the monitor and memory killer
    Run(RunArgs),

    /// Cancel a job anywhere in the fleet
    Cancel {
        /// The job ID to cancel
        job_id: String,

        /// Redis URL of the shared state
        #[arg(long, env = "REDIS_URL")]
        redis_url: String,
    },

    /// Show the current RSS and the configured limits
    Rss {
        #[command(flatten)]
        killer: KillerArgs,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Run Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RunArgs {
    /// Shell command to run as a job (repeatable)
    #[arg(long = "job", required = true)]
    jobs: Vec<String>,

    /// Worker class reported for the jobs
    #[arg(long, default_value = "ShellWorker")]
    worker_class: String,

    /// Queue reported for the jobs
    #[arg(long, default_value = "default")]
    queue: String,

    /// Redis URL of the shared state. Without it cancellation stays in-process.
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Maximum number of jobs running at once
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Disable the cancellation listener
    #[arg(long)]
    no_monitor: bool,

    /// Expected memory growth, format: "WorkerClass=KB_PER_SEC[:MAX_KB]" (repeatable)
    #[arg(long = "memory-growth")]
    memory_growth: Vec<String>,

    #[command(flatten)]
    killer: KillerArgs,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

// =============================================================================
// Memory Killer Arguments (shared by run and rss)
// =============================================================================

#[derive(Parser, Debug)]
struct KillerArgs {
    /// Soft RSS limit in KB (0 disables the memory killer)
    #[arg(long, env = "SIDEKIQ_MEMORY_KILLER_MAX_RSS", default_value = "2000000")]
    soft_limit_rss: u64,

    /// Hard RSS limit in KB
    #[arg(long, env = "SIDEKIQ_MEMORY_KILLER_HARD_LIMIT_RSS")]
    hard_limit_rss: Option<u64>,

    /// Seconds RSS may stay above the soft limit
    #[arg(long, env = "SIDEKIQ_MEMORY_KILLER_GRACE_TIME", default_value = "900")]
    grace_time: u64,

    /// Seconds between RSS checks (minimum 2)
    #[arg(long, env = "SIDEKIQ_MEMORY_KILLER_CHECK_INTERVAL", default_value = "3")]
    check_interval: u64,

    /// Seconds to wait after asking the worker to stop fetching jobs
    #[arg(long, env = "SIDEKIQ_MEMORY_KILLER_SHUTDOWN_WAIT", default_value = "30")]
    shutdown_wait: u64,

    /// The worker's job timeout in seconds
    #[arg(long, env = "SIDEKIQ_TIMEOUT", default_value = "25")]
    job_timeout: u64,
}

impl KillerArgs {
    fn to_config(&self) -> MemoryKillerConfig {
        let defaults = MemoryKillerConfig::default();
        MemoryKillerConfig {
            soft_limit_kb: self.soft_limit_rss,
            hard_limit_kb: self.hard_limit_rss.unwrap_or(defaults.hard_limit_kb),
            grace_balloon: Duration::from_secs(self.grace_time),
            shutdown_timeout: Duration::from_secs(self.shutdown_wait),
            job_timeout: Duration::from_secs(self.job_timeout),
            ..defaults
        }
        .with_check_interval_secs(self.check_interval)
    }
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobResultOutput {
    job_id: String,
    status: String,
    exit_code: Option<i32>,
    output: Option<String>,
    error: Option<String>,
}

impl From<ExecutionResult> for JobResultOutput {
    fn from(result: ExecutionResult) -> Self {
        Self {
            job_id: result.job_id,
            status: result.status.to_string(),
            exit_code: result.exit_code,
            output: result.output,
            error: result.error,
        }
    }
}

#[derive(Serialize)]
struct RssOutput {
    pid: u32,
    current_rss_kb: u64,
    soft_limit_kb: u64,
    hard_limit_kb: u64,
    memory_killer_enabled: bool,
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_worker(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = SentinelConfig {
        memory_killer: args.killer.to_config(),
        monitor: MonitorConfig {
            enabled: !args.no_monitor,
            ..MonitorConfig::default()
        },
        redis_url: args.redis_url,
    };
    config.memory_killer.validate()?;

    let mut growth = GrowthTable::new(config.memory_killer.default_max_memory_growth_kb);
    for spec in &args.memory_growth {
        growth.register_spec(spec)?;
    }

    let state = store::connect(config.redis_url.as_deref()).await?;
    let shutdown = install_shutdown_handler()?;
    let quiet = install_quiet_handler()?;

    let monitor = Arc::new(JobMonitor::new(config.monitor.clone(), state));
    let killer = Arc::new(
        MemoryKiller::new(
            config.memory_killer.clone(),
            monitor.registry(),
            Arc::new(ProcessRssSampler::current()?),
            Arc::new(UnixProcess),
        )
        .with_growth_table(growth),
    );

    // The killer sends SIGTERM to this process, so the daemons outlive the
    // shutdown token and stop only once the pool has drained.
    let daemons = CancellationToken::new();
    let monitor_handle = DaemonHandle::start(monitor.clone(), &daemons);
    let killer_handle = DaemonHandle::start(killer, &daemons);

    let pool = WorkerPool::new(
        monitor.clone(),
        ShellExecutor::default(),
        args.worker_class,
        args.queue,
    )
    .with_concurrency(args.concurrency)
    .with_quiet(quiet);
    let jobs: Vec<JobSpec> = args.jobs.into_iter().map(JobSpec::new).collect();
    for job in &jobs {
        tracing::info!(jid = %job.job_id, command = %job.command, "Job queued");
    }

    let results = pool
        .run_all_until(jobs, &shutdown, config.memory_killer.job_timeout)
        .await;
    daemons.cancel();

    if let Err(e) = monitor_handle.shutdown().await {
        tracing::warn!(error = %e, "Monitor daemon exited with error");
    }
    if let Err(e) = killer_handle.shutdown().await {
        tracing::warn!(error = %e, "MemoryKiller daemon exited with error");
    }

    print_results(results, &args.output)
}

fn print_results(
    results: Vec<ExecutionResult>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => {
            let output: Vec<JobResultOutput> = results.into_iter().map(Into::into).collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            if results.is_empty() {
                println!("No jobs finished.");
                return Ok(());
            }
            println!("{:<38} {:<10} {:<6} OUTPUT", "JOB ID", "STATUS", "EXIT");
            println!("{}", "-".repeat(72));
            for result in &results {
                let exit = result
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let text = result
                    .output
                    .as_deref()
                    .or(result.error.as_deref())
                    .unwrap_or("")
                    .trim();
                let first_line = text.lines().next().unwrap_or("");
                println!(
                    "{:<38} {:<10} {:<6} {}",
                    result.job_id, result.status, exit, first_line
                );
            }
        }
    }
    Ok(())
}

async fn handle_cancel(job_id: String, redis_url: String) -> Result<(), Box<dyn std::error::Error>> {
    let state = store::connect(Some(&redis_url)).await?;
    let deadline = MonitorConfig::default().cancel_deadline;
    JobMonitor::cancel_job(state.as_ref(), &job_id, deadline).await?;
    println!("Cancellation requested for job {}", job_id);
    Ok(())
}

fn handle_rss(killer: KillerArgs, output_format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let config = killer.to_config();
    let sampler = ProcessRssSampler::current()?;
    let output = RssOutput {
        pid: UnixProcess.pid(),
        current_rss_kb: sampler.sample_kb()?,
        soft_limit_kb: config.soft_limit_kb,
        hard_limit_kb: config.hard_limit_kb,
        memory_killer_enabled: config.is_enabled(),
    };

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("PID:             {}", output.pid);
            println!("Current RSS:     {} KB", output.current_rss_kb);
            println!("Soft limit:      {} KB", output.soft_limit_kb);
            println!("Hard limit:      {} KB", output.hard_limit_kb);
            println!(
                "Memory killer:   {}",
                if output.memory_killer_enabled { "enabled" } else { "disabled" }
            );
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Run(run_args) => {
            run_worker(run_args).await?;
        }
        Commands::Cancel { job_id, redis_url } => {
            handle_cancel(job_id, redis_url).await?;
        }
        Commands::Rss { killer, output } => {
            handle_rss(killer, &output)?;
        }
    }

    Ok(())
}
