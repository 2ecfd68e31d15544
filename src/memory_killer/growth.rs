use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Result, SentinelError};
use crate::monitor::JobRecord;

/// Memory a worker class is expected to grow by while it runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryGrowth {
    pub growth_kb_per_sec: u64,
    /// `None` falls back to the table's default cap.
    pub max_growth_kb: Option<u64>,
}

/// Declared memory growth per worker class.
///
/// Classes that are not registered grow by nothing.
#[derive(Debug, Clone)]
pub struct GrowthTable {
    entries: HashMap<String, MemoryGrowth>,
    default_max_growth_kb: u64,
}

impl GrowthTable {
    pub fn new(default_max_growth_kb: u64) -> Self {
        Self {
            entries: HashMap::new(),
            default_max_growth_kb,
        }
    }

    pub fn register(&mut self, worker_class: impl Into<String>, growth: MemoryGrowth) {
        self.entries.insert(worker_class.into(), growth);
    }

    pub fn with_entry(mut self, worker_class: impl Into<String>, growth: MemoryGrowth) -> Self {
        self.register(worker_class, growth);
        self
    }

    /// Parse `WorkerClass=KB_PER_SEC[:MAX_KB]` and register it.
    pub fn register_spec(&mut self, spec: &str) -> Result<()> {
        let (class, values) = spec
            .split_once('=')
            .ok_or_else(|| invalid_spec(spec))?;
        let class = class.trim();
        if class.is_empty() {
            return Err(invalid_spec(spec));
        }

        let (rate, max) = match values.split_once(':') {
            Some((rate, max)) => (rate, Some(max)),
            None => (values, None),
        };
        let growth_kb_per_sec = rate.trim().parse::<u64>().map_err(|_| invalid_spec(spec))?;
        let max_growth_kb = max
            .map(|m| m.trim().parse::<u64>())
            .transpose()
            .map_err(|_| invalid_spec(spec))?;

        self.register(
            class,
            MemoryGrowth {
                growth_kb_per_sec,
                max_growth_kb,
            },
        );
        Ok(())
    }

    /// Rate and cap for `worker_class`, defaults applied.
    pub fn limits(&self, worker_class: &str) -> (u64, u64) {
        let growth = self.entries.get(worker_class).copied().unwrap_or_default();
        (
            growth.growth_kb_per_sec,
            growth.max_growth_kb.unwrap_or(self.default_max_growth_kb),
        )
    }

    /// Expected RSS increase caused by `job` so far.
    pub fn rss_increase_by_job(&self, job: &JobRecord, now: Instant) -> u64 {
        let (rate, max) = self.limits(&job.worker_class);
        if rate == 0 {
            return 0;
        }
        expected_growth_kb(rate, max, now.saturating_duration_since(job.started_at))
    }
}

fn invalid_spec(spec: &str) -> SentinelError {
    SentinelError::Config(format!(
        "invalid memory growth '{}', expected WorkerClass=KB_PER_SEC[:MAX_KB]",
        spec
    ))
}

/// `min(rate * elapsed, max)`, or 0 when the rate is 0.
pub fn expected_growth_kb(growth_kb_per_sec: u64, max_growth_kb: u64, elapsed: Duration) -> u64 {
    if growth_kb_per_sec == 0 {
        return 0;
    }
    let grown = (growth_kb_per_sec as f64 * elapsed.as_secs_f64()) as u64;
    grown.min(max_growth_kb)
}
