use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::SentinelError;
use crate::monitor::JobMonitor;
use crate::worker::executor::{ExecutionResult, JobStatus, ShellExecutor};

/// A shell command to run as one job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job_id: String,
    pub command: String,
}

impl JobSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            command: command.into(),
        }
    }

    pub fn with_id(job_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            command: command.into(),
        }
    }
}

pub const DEFAULT_CONCURRENCY: usize = 10;

/// Runs jobs concurrently, each one tracked by the monitor.
///
/// At most `concurrency` jobs run at once. Once the quiet token fires, jobs
/// still waiting for a slot are skipped while running ones finish.
pub struct WorkerPool {
    monitor: Arc<JobMonitor>,
    executor: ShellExecutor,
    worker_class: String,
    queue: String,
    slots: Arc<Semaphore>,
    quiet: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        monitor: Arc<JobMonitor>,
        executor: ShellExecutor,
        worker_class: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            monitor,
            executor,
            worker_class: worker_class.into(),
            queue: queue.into(),
            slots: Arc::new(Semaphore::new(DEFAULT_CONCURRENCY)),
            quiet: CancellationToken::new(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.slots = Arc::new(Semaphore::new(concurrency.max(1)));
        self
    }

    /// Stop starting new jobs once `quiet` is cancelled.
    pub fn with_quiet(mut self, quiet: CancellationToken) -> Self {
        self.quiet = quiet;
        self
    }

    /// Run one job right away, ignoring the concurrency limit.
    pub async fn run_job(&self, job: &JobSpec) -> ExecutionResult {
        Self::execute_tracked(
            &self.monitor,
            &self.executor,
            &self.worker_class,
            &self.queue,
            job,
        )
        .await
    }

    /// Run every job, at most `concurrency` at a time, and return their
    /// results in completion order.
    pub async fn run_all(&self, jobs: Vec<JobSpec>) -> Vec<ExecutionResult> {
        self.run_all_until(jobs, &CancellationToken::new(), Duration::ZERO)
            .await
    }

    /// Like [`run_all`](Self::run_all), but stops early once `shutdown` fires.
    ///
    /// On shutdown the pool goes quiet, so queued jobs are skipped. Running
    /// jobs get `drain_timeout` to finish; any still running after that are
    /// interrupted and their children killed.
    pub async fn run_all_until(
        &self,
        jobs: Vec<JobSpec>,
        shutdown: &CancellationToken,
        drain_timeout: Duration,
    ) -> Vec<ExecutionResult> {
        let interrupt = CancellationToken::new();
        let mut set = JoinSet::new();
        for job in jobs {
            let monitor = self.monitor.clone();
            let executor = self.executor.clone();
            let worker_class = self.worker_class.clone();
            let queue = self.queue.clone();
            let slots = self.slots.clone();
            let quiet = self.quiet.clone();
            let interrupt = interrupt.clone();
            set.spawn(async move {
                // Held until the job finishes.
                let permit = tokio::select! {
                    biased;
                    _ = quiet.cancelled() => None,
                    permit = slots.acquire_owned() => permit.ok(),
                };
                if permit.is_none() || quiet.is_cancelled() {
                    tracing::warn!(jid = %job.job_id, "Job skipped, worker is quiet");
                    return ExecutionResult::skipped(&job.job_id);
                }

                tokio::select! {
                    biased;
                    _ = interrupt.cancelled() => {
                        tracing::warn!(jid = %job.job_id, "Job interrupted by shutdown");
                        ExecutionResult::interrupted(&job.job_id)
                    }
                    result = Self::execute_tracked(&monitor, &executor, &worker_class, &queue, &job) => result,
                }
            });
        }

        let mut results = Vec::new();
        let mut drain_deadline: Option<Instant> = None;
        loop {
            tokio::select! {
                _ = shutdown.cancelled(), if drain_deadline.is_none() => {
                    tracing::warn!(
                        running = self.monitor.registry().len(),
                        timeout = drain_timeout.as_secs(),
                        "Shutdown requested, waiting for running jobs"
                    );
                    self.quiet.cancel();
                    drain_deadline = Some(Instant::now() + drain_timeout);
                }
                _ = tokio::time::sleep_until(drain_deadline.unwrap_or_else(Instant::now)),
                    if drain_deadline.is_some() && !interrupt.is_cancelled() =>
                {
                    tracing::warn!(
                        running = self.monitor.registry().len(),
                        "Running jobs did not finish in time"
                    );
                    interrupt.cancel();
                }
                joined = set.join_next() => match joined {
                    Some(Ok(result)) => results.push(result),
                    Some(Err(e)) => tracing::error!(error = %e, "Job task panicked"),
                    None => break,
                },
            }
        }
        results
    }

    async fn execute_tracked(
        monitor: &JobMonitor,
        executor: &ShellExecutor,
        worker_class: &str,
        queue: &str,
        job: &JobSpec,
    ) -> ExecutionResult {
        let outcome = monitor
            .within_job(worker_class, &job.job_id, queue, |_token| {
                executor.execute(&job.job_id, &job.command)
            })
            .await;

        match outcome {
            Ok(result) => result,
            Err(SentinelError::Cancelled(_)) => {
                tracing::warn!(jid = %job.job_id, "Job cancelled");
                ExecutionResult::cancelled(&job.job_id)
            }
            Err(e) => ExecutionResult {
                job_id: job.job_id.clone(),
                status: JobStatus::Failed,
                exit_code: None,
                output: None,
                error: Some(e.to_string()),
            },
        }
    }
}
