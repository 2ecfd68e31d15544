/// Stage of the memory killer state machine.
///
/// Within one restart episode the phase only moves forward. The numeric value
/// is what the phase gauge reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Running = 1,
    AboveSoftLimit = 2,
    StopFetchingNewJobs = 3,
    ShuttingDown = 4,
    KillingSidekiq = 5,
}

impl Phase {
    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Running => "running",
            Phase::AboveSoftLimit => "above_soft_limit",
            Phase::StopFetchingNewJobs => "stop_fetching_new_jobs",
            Phase::ShuttingDown => "shutting_down",
            Phase::KillingSidekiq => "killing_sidekiq",
        }
    }

    /// True once the worker is being restarted.
    pub fn is_restarting(self) -> bool {
        self >= Phase::StopFetchingNewJobs
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
