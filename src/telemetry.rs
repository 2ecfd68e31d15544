use metrics::{counter, gauge};

use crate::memory_killer::KillerState;

pub const PHASE_GAUGE: &str = "sidekiq_memory_killer_phase";
pub const CURRENT_RSS_GAUGE: &str = "sidekiq_current_rss";
pub const SOFT_LIMIT_GAUGE: &str = "sidekiq_memory_killer_soft_limit_rss";
pub const HARD_LIMIT_GAUGE: &str = "sidekiq_memory_killer_hard_limit_rss";
pub const RUNNING_JOBS_COUNTER: &str = "sidekiq_memory_killer_running_jobs";

/// Where the memory killer reports its state.
pub trait KillerMetrics: Send + Sync {
    /// Phase plus the RSS snapshot it was computed from.
    fn record_state(&self, state: &KillerState);

    /// A job that was running when RSS went out of range.
    fn record_running_job(&self, worker_class: &str);
}

/// Reports through the global `metrics` recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderMetrics;

impl KillerMetrics for RecorderMetrics {
    fn record_state(&self, state: &KillerState) {
        let phase = state.phase.as_str();
        gauge!(PHASE_GAUGE).set(state.phase.value() as f64);
        gauge!(CURRENT_RSS_GAUGE, "phase" => phase).set(state.current_rss_kb as f64);
        gauge!(SOFT_LIMIT_GAUGE, "phase" => phase).set(state.soft_limit_kb as f64);
        gauge!(HARD_LIMIT_GAUGE, "phase" => phase).set(state.hard_limit_kb as f64);
    }

    fn record_running_job(&self, worker_class: &str) {
        counter!(RUNNING_JOBS_COUNTER, "worker_class" => worker_class.to_string()).increment(1);
    }
}
