use std::time::Duration;

/// 64-bit CPUs address at most 256 TiB, so this is effectively "no hard limit".
pub const MAX_MEMORY_KB: u64 = 256 * 1024 * 1024 * 1024;

/// RSS checks never run more often than this.
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Extra time granted on top of the job timeout before the process group is killed.
pub const SHUTDOWN_BUFFER: Duration = Duration::from_secs(2);

/// Configuration for the memory killer daemon.
///
/// All RSS values are in kilobytes.
#[derive(Debug, Clone)]
pub struct MemoryKillerConfig {
    /// RSS at or below this value is considered safe. Zero disables the daemon.
    pub soft_limit_kb: u64,
    /// RSS above this value triggers an immediate restart.
    pub hard_limit_kb: u64,
    /// How long RSS may stay between the soft and hard limit.
    pub grace_balloon: Duration,
    /// Interval between RSS samples and between drain checks.
    pub check_interval: Duration,
    /// Wait after asking the worker to stop fetching new jobs.
    pub shutdown_timeout: Duration,
    /// The worker's own job timeout, used to bound the graceful stop stage.
    pub job_timeout: Duration,
    /// Growth cap for worker classes that declare a rate but no cap.
    pub default_max_memory_growth_kb: u64,
}

impl Default for MemoryKillerConfig {
    fn default() -> Self {
        Self {
            soft_limit_kb: 2_000_000,
            hard_limit_kb: MAX_MEMORY_KB,
            grace_balloon: Duration::from_secs(15 * 60),
            check_interval: Duration::from_secs(3),
            shutdown_timeout: Duration::from_secs(30),
            job_timeout: Duration::from_secs(25),
            default_max_memory_growth_kb: 300_000,
        }
    }
}

impl MemoryKillerConfig {
    pub fn with_limits(mut self, soft_limit_kb: u64, hard_limit_kb: u64) -> Self {
        self.soft_limit_kb = soft_limit_kb;
        self.hard_limit_kb = hard_limit_kb;
        self
    }

    /// Set the check interval from whole seconds, clamped to [`MIN_CHECK_INTERVAL`].
    pub fn with_check_interval_secs(mut self, secs: u64) -> Self {
        self.check_interval = Duration::from_secs(secs).max(MIN_CHECK_INTERVAL);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.soft_limit_kb > 0
    }

    /// Upper bound for the graceful stop stage.
    pub fn graceful_stop_timeout(&self) -> Duration {
        self.job_timeout + SHUTDOWN_BUFFER
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.is_enabled() && self.hard_limit_kb < self.soft_limit_kb {
            return Err(crate::error::SentinelError::Config(format!(
                "hard limit ({} KB) is below soft limit ({} KB)",
                self.hard_limit_kb, self.soft_limit_kb
            )));
        }
        if self.check_interval.is_zero() {
            return Err(crate::error::SentinelError::Config(
                "check interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the job monitor daemon.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Listen for cancellation requests. When false the daemon is a no-op,
    /// but jobs are still tracked and pre-start cancellation flags still apply.
    pub enabled: bool,
    /// Delay before re-subscribing after the subscription fails.
    pub reconnect_delay: Duration,
    /// Lifetime of a cancellation flag in the shared store.
    pub cancel_deadline: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reconnect_delay: Duration::from_secs(3),
            cancel_deadline: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SentinelConfig {
    pub memory_killer: MemoryKillerConfig,
    pub monitor: MonitorConfig,
    /// Shared store used for cancellation. `None` keeps everything in-process.
    pub redis_url: Option<String>,
}
