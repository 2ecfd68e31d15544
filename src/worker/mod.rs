//! Job execution on the worker.
//!
//! - [`ShellExecutor`]: runs a job's command with `sh -c` and captures its output
//! - [`WorkerPool`]: runs jobs concurrently inside [`JobMonitor::within_job`]
//!
//! # Execution Flow
//!
//! 1. Each [`JobSpec`] gets a job id (UUID unless given)
//! 2. The monitor registers the job and checks its cancellation flag
//! 3. [`ShellExecutor::execute`] spawns the command
//! 4. On cancellation the execution future is dropped and the child is killed
//!
//! After SIGTSTP the pool stops handing out slots, so queued jobs are skipped.
//!
//! [`JobMonitor::within_job`]: crate::monitor::JobMonitor::within_job

pub mod executor;
pub mod pool;

pub use executor::{ExecutionResult, JobStatus, ShellExecutor};
pub use pool::{JobSpec, WorkerPool, DEFAULT_CONCURRENCY};
