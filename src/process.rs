use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::{getpgrp, getpid};

use crate::error::{Result, SentinelError};

/// Signals the memory killer sends to its own worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerSignal {
    /// Stop fetching new jobs (SIGTSTP).
    StopFetching,
    /// Finish running jobs and exit (SIGTERM).
    Terminate,
    /// Last resort (SIGKILL).
    Kill,
}

impl WorkerSignal {
    pub fn name(self) -> &'static str {
        match self {
            WorkerSignal::StopFetching => "SIGTSTP",
            WorkerSignal::Terminate => "SIGTERM",
            WorkerSignal::Kill => "SIGKILL",
        }
    }

    fn as_nix(self) -> Signal {
        match self {
            WorkerSignal::StopFetching => Signal::SIGTSTP,
            WorkerSignal::Terminate => Signal::SIGTERM,
            WorkerSignal::Kill => Signal::SIGKILL,
        }
    }
}

impl std::fmt::Display for WorkerSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Control over the current worker process.
pub trait ProcessControl: Send + Sync {
    fn pid(&self) -> u32;

    /// True when this process leads its process group.
    fn is_group_leader(&self) -> bool;

    /// Deliver `signal` to this process only.
    fn signal(&self, signal: WorkerSignal) -> Result<()>;

    /// Deliver `signal` to every process in this process's group.
    fn signal_group(&self, signal: WorkerSignal) -> Result<()>;
}

/// [`ProcessControl`] backed by POSIX signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixProcess;

impl ProcessControl for UnixProcess {
    fn pid(&self) -> u32 {
        getpid().as_raw() as u32
    }

    fn is_group_leader(&self) -> bool {
        getpgrp() == getpid()
    }

    fn signal(&self, signal: WorkerSignal) -> Result<()> {
        let pid = getpid();
        kill(pid, signal.as_nix()).map_err(|source| SentinelError::Signal {
            signal: signal.name(),
            target: format!("pid {}", pid),
            source,
        })
    }

    fn signal_group(&self, signal: WorkerSignal) -> Result<()> {
        let pgrp = getpgrp();
        killpg(pgrp, signal.as_nix()).map_err(|source| SentinelError::Signal {
            signal: signal.name(),
            target: format!("process group {}", pgrp),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_names() {
        assert_eq!(WorkerSignal::StopFetching.name(), "SIGTSTP");
        assert_eq!(WorkerSignal::Terminate.to_string(), "SIGTERM");
        assert_eq!(WorkerSignal::Kill.as_nix(), Signal::SIGKILL);
    }

    #[test]
    fn unix_process_reports_own_pid() {
        let process = UnixProcess;
        assert_eq!(process.pid(), std::process::id());
    }
}
