use std::sync::Mutex;

use sysinfo::{Pid, System};

use crate::error::{Result, SentinelError};

/// Source of resident set size readings, in kilobytes.
pub trait RssSampler: Send + Sync {
    fn sample_kb(&self) -> Result<u64>;
}

/// Samples the RSS of a single process through `sysinfo`.
pub struct ProcessRssSampler {
    pid: Pid,
    system: Mutex<System>,
}

impl ProcessRssSampler {
    pub fn new(pid: u32) -> Self {
        Self {
            pid: Pid::from_u32(pid),
            system: Mutex::new(System::new()),
        }
    }

    /// Sampler for the calling process.
    pub fn current() -> Result<Self> {
        let pid = sysinfo::get_current_pid().map_err(|e| SentinelError::Sampling(e.to_string()))?;
        Ok(Self {
            pid,
            system: Mutex::new(System::new()),
        })
    }
}

impl RssSampler for ProcessRssSampler {
    fn sample_kb(&self) -> Result<u64> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| SentinelError::Sampling("sampler lock poisoned".to_string()))?;

        if !system.refresh_process(self.pid) {
            return Err(SentinelError::Sampling(format!(
                "process {} not found",
                self.pid
            )));
        }

        system
            .process(self.pid)
            .map(|process| process.memory() / 1024)
            .ok_or_else(|| SentinelError::Sampling(format!("process {} not found", self.pid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_current_process() {
        let sampler = ProcessRssSampler::current().unwrap();
        let rss = sampler.sample_kb().unwrap();
        assert!(rss > 0);
    }

    #[test]
    fn missing_process_is_a_sampling_error() {
        let sampler = ProcessRssSampler::new(u32::MAX - 1);
        let err = sampler.sample_kb().unwrap_err();
        assert!(matches!(err, SentinelError::Sampling(_)));
        assert!(err.is_recoverable());
    }
}
