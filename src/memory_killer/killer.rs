use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::MemoryKillerConfig;
use crate::daemon::{sleep_unless_stopped, Daemon};
use crate::error::Result;
use crate::memory_killer::growth::GrowthTable;
use crate::memory_killer::phase::Phase;
use crate::monitor::JobRegistry;
use crate::process::{ProcessControl, WorkerSignal};
use crate::rss::RssSampler;
use crate::telemetry::{KillerMetrics, RecorderMetrics};

const CLASS: &str = "MemoryKiller";

/// Phase together with the RSS snapshot it was computed from. All values in KB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillerState {
    pub phase: Phase,
    pub current_rss_kb: u64,
    /// Configured soft limit plus the growth expected from running jobs.
    pub soft_limit_kb: u64,
    pub hard_limit_kb: u64,
}

impl KillerState {
    fn initial(config: &MemoryKillerConfig) -> Self {
        Self {
            phase: Phase::Running,
            current_rss_kb: 0,
            soft_limit_kb: config.soft_limit_kb,
            hard_limit_kb: config.hard_limit_kb,
        }
    }

    pub fn above_hard_limit(&self) -> bool {
        self.current_rss_kb > self.hard_limit_kb
    }

    pub fn above_soft_limit(&self) -> bool {
        self.current_rss_kb > self.soft_limit_kb
    }

    /// Why this snapshot is out of range.
    pub fn out_of_range_reason(&self, grace_balloon: Duration) -> String {
        if self.above_hard_limit() {
            format!(
                "current_rss({}) > hard_limit_rss({})",
                self.current_rss_kb, self.hard_limit_kb
            )
        } else {
            format!(
                "current_rss({}) > soft_limit_rss({}) longer than GRACE_BALLOON_SECONDS({})",
                self.current_rss_kb,
                self.soft_limit_kb,
                grace_balloon.as_secs()
            )
        }
    }
}

/// Restarts the worker when its RSS stays out of range.
///
/// Each check samples RSS and compares it with:
/// - the hard limit, which triggers a restart immediately
/// - the soft limit plus the growth expected from running jobs, which may be
///   exceeded for at most `grace_balloon`
///
/// A restart walks `stop_fetching_new_jobs -> shutting_down -> killing_sidekiq`,
/// waiting for running jobs to drain between stages. The daemon restarts the
/// worker at most once and then exits.
pub struct MemoryKiller {
    config: MemoryKillerConfig,
    registry: Arc<JobRegistry>,
    growth: GrowthTable,
    sampler: Arc<dyn RssSampler>,
    process: Arc<dyn ProcessControl>,
    metrics: Arc<dyn KillerMetrics>,
    state: Mutex<KillerState>,
}

impl MemoryKiller {
    pub fn new(
        config: MemoryKillerConfig,
        registry: Arc<JobRegistry>,
        sampler: Arc<dyn RssSampler>,
        process: Arc<dyn ProcessControl>,
    ) -> Self {
        Self {
            growth: GrowthTable::new(config.default_max_memory_growth_kb),
            state: Mutex::new(KillerState::initial(&config)),
            config,
            registry,
            sampler,
            process,
            metrics: Arc::new(RecorderMetrics),
        }
    }

    pub fn with_growth_table(mut self, growth: GrowthTable) -> Self {
        self.growth = growth;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn KillerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &MemoryKillerConfig {
        &self.config
    }

    /// Last published state.
    pub fn state(&self) -> KillerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    /// Sample RSS, recompute limits and publish them under `phase`.
    pub fn refresh_state(&self, phase: Phase) -> Result<KillerState> {
        let current_rss_kb = self.sampler.sample_kb()?;
        let state = KillerState {
            phase,
            current_rss_kb,
            soft_limit_kb: self
                .config
                .soft_limit_kb
                .saturating_add(self.rss_increase_by_jobs()),
            hard_limit_kb: self.config.hard_limit_kb,
        };
        self.publish_state(state);
        Ok(state)
    }

    fn publish_state(&self, state: KillerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        self.metrics.record_state(&state);
    }

    /// Expected RSS growth from every running job, in KB.
    pub fn rss_increase_by_jobs(&self) -> u64 {
        let now = Instant::now();
        self.registry.with_jobs(|jobs| {
            jobs.values()
                .map(|job| self.growth.rss_increase_by_job(job, now))
                .fold(0u64, u64::saturating_add)
        })
    }

    /// Decide whether RSS is acceptable.
    ///
    /// Above the hard limit fails at once. Above the soft limit, RSS is
    /// re-sampled every `check_interval` until it drops back, crosses the hard
    /// limit, or the grace period runs out.
    pub async fn rss_within_range(&self, token: &CancellationToken) -> Result<bool> {
        let mut state = self.refresh_state(Phase::Running)?;
        let deadline = Instant::now() + self.config.grace_balloon;

        loop {
            if token.is_cancelled() {
                return Ok(true);
            }
            if state.above_hard_limit() {
                break;
            }
            if !state.above_soft_limit() {
                return Ok(true);
            }
            if Instant::now() > deadline {
                break;
            }
            if !sleep_unless_stopped(self.config.check_interval, token).await {
                return Ok(true);
            }
            state = self.refresh_state(Phase::AboveSoftLimit)?;
        }

        // A hard-limit breach goes straight to stop_fetching_new_jobs, so the
        // episode is always recorded as above_soft_limit here.
        let state = KillerState {
            phase: Phase::AboveSoftLimit,
            ..state
        };
        self.publish_state(state);
        self.log_rss_out_of_range(&state);
        Ok(false)
    }

    fn log_rss_out_of_range(&self, state: &KillerState) {
        let reason = state.out_of_range_reason(self.config.grace_balloon);
        let running_jobs: Vec<String> = self.registry.with_jobs(|jobs| {
            jobs.values()
                .map(|job| {
                    self.metrics.record_running_job(&job.worker_class);
                    format!(
                        "{}(jid={}, queue={}, running={}s)",
                        job.worker_class,
                        job.job_id,
                        job.queue,
                        job.elapsed().as_secs()
                    )
                })
                .collect()
        });

        tracing::warn!(
            class = CLASS,
            pid = self.process.pid(),
            reason = %reason,
            current_rss = state.current_rss_kb,
            soft_limit_rss = state.soft_limit_kb,
            hard_limit_rss = state.hard_limit_kb,
            running_jobs = ?running_jobs,
            "Worker RSS out of range"
        );
    }

    /// Restart the worker in three stages, stopping early if the daemon is stopped.
    pub async fn restart(&self, token: &CancellationToken) -> Result<()> {
        self.refresh_state(Phase::StopFetchingNewJobs)?;
        self.signal_and_wait(
            self.config.shutdown_timeout,
            WorkerSignal::StopFetching,
            "stop fetching new jobs",
            token,
        )
        .await?;
        if token.is_cancelled() {
            return Ok(());
        }

        self.refresh_state(Phase::ShuttingDown)?;
        self.signal_and_wait(
            self.config.graceful_stop_timeout(),
            WorkerSignal::Terminate,
            "gracefully shut down",
            token,
        )
        .await?;
        if token.is_cancelled() {
            return Ok(());
        }

        // Should be unreachable when the worker honours SIGTERM.
        self.refresh_state(Phase::KillingSidekiq)?;
        self.signal_pgroup(WorkerSignal::Kill, "die")
    }

    /// Send `signal` once, then wait until jobs drain, the daemon stops, or `timeout` passes.
    pub async fn signal_and_wait(
        &self,
        timeout: Duration,
        signal: WorkerSignal,
        explanation: &str,
        token: &CancellationToken,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;

        tracing::warn!(
            class = CLASS,
            pid = self.process.pid(),
            signal = %signal,
            explanation,
            wait_time = timeout.as_secs(),
            "Sending signal and waiting"
        );
        self.process.signal(signal)?;

        while !token.is_cancelled() && self.registry.any_jobs() && Instant::now() < deadline {
            if !sleep_unless_stopped(self.config.check_interval, token).await {
                break;
            }
        }
        Ok(())
    }

    /// Signal the whole process group when this process leads it, otherwise just this process.
    pub fn signal_pgroup(&self, signal: WorkerSignal, explanation: &str) -> Result<()> {
        let pid = self.process.pid();
        if self.process.is_group_leader() {
            tracing::warn!(class = CLASS, pid, signal = %signal, explanation, "Sending signal to process group");
            self.process.signal_group(signal)
        } else {
            tracing::warn!(class = CLASS, pid, signal = %signal, explanation, "Sending signal to process");
            self.process.signal(signal)
        }
    }

    async fn work(&self, token: &CancellationToken) -> Result<()> {
        while !token.is_cancelled() {
            let outcome = match self.rss_within_range(token).await {
                Ok(true) => Ok(false),
                Ok(false) => self.restart(token).await.map(|_| true),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(class = CLASS, action = "exception", error = %e, "Memory check failed");
                }
                Err(e) => {
                    tracing::warn!(class = CLASS, action = "exception", error = %e, "Memory killer failed");
                    return Err(e);
                }
            }

            if !sleep_unless_stopped(self.config.check_interval, token).await {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Daemon for MemoryKiller {
    fn name(&self) -> &'static str {
        CLASS
    }

    fn enabled(&self) -> bool {
        self.config.is_enabled()
    }

    async fn run(&self, token: CancellationToken) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }

        tracing::info!(
            class = CLASS,
            action = "start",
            pid = self.process.pid(),
            soft_limit_rss = self.config.soft_limit_kb,
            hard_limit_rss = self.config.hard_limit_kb,
            "Starting MemoryKiller Daemon"
        );

        let result = self.work(&token).await;

        tracing::warn!(class = CLASS, action = "stop", pid = self.process.pid(), "Stopping MemoryKiller Daemon");
        result
    }
}
