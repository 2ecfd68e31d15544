//! Job tracking and fleet-wide job cancellation.
//!
//! - **Registry**: every job running in this process, keyed by job id
//! - **Cancellation**: any process can cancel a job by id through the shared store
//!
//! # Cancellation paths
//!
//! 1. [`JobMonitor::cancel_job`] sets `sidekiq:cancel:<jid>` with a TTL and
//!    publishes `{"action":"cancel","jid":...}` on [`NOTIFICATION_CHANNEL`]
//! 2. A job that has not started yet sees the flag in
//!    [`JobMonitor::within_job`] and is refused
//! 3. A running job is found by the listener and its token is cancelled; the
//!    body can observe the token, and is dropped at its next await otherwise

pub mod job_monitor;
pub mod message;
pub mod registry;

pub use job_monitor::{JobMonitor, MessageOutcome};
pub use message::{cancel_job_key, ControlMessage, NOTIFICATION_CHANNEL};
pub use registry::{JobRecord, JobRegistry};
