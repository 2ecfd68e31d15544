use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::daemon::{sleep_unless_stopped, Daemon};
use crate::error::{Result, SentinelError};
use crate::monitor::message::{cancel_job_key, ControlMessage, CANCEL_ACTION, NOTIFICATION_CHANNEL};
use crate::monitor::registry::{JobRecord, JobRegistry};
use crate::store::SharedState;

const CLASS: &str = "Monitor";

/// What the listener did with one control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The job was running here and has been cancelled.
    Cancelled(String),
    /// The job is not running in this process.
    NotRunning(String),
    /// Not valid JSON, or a cancel without a job id.
    Malformed,
    UnknownAction(String),
}

/// Tracks running jobs and cancels them on request.
pub struct JobMonitor {
    config: MonitorConfig,
    registry: Arc<JobRegistry>,
    state: Arc<dyn SharedState>,
}

impl JobMonitor {
    pub fn new(config: MonitorConfig, state: Arc<dyn SharedState>) -> Self {
        Self {
            config,
            registry: Arc::new(JobRegistry::new()),
            state,
        }
    }

    /// Read-only view of the running jobs, shared with the memory killer.
    pub fn registry(&self) -> Arc<JobRegistry> {
        self.registry.clone()
    }

    pub fn jobs<R>(&self, f: impl FnOnce(&std::collections::HashMap<String, JobRecord>) -> R) -> R {
        self.registry.with_jobs(f)
    }

    /// Run `body` as job `job_id`, tracked in the registry for its whole duration.
    ///
    /// The body gets a token to check at safe points. If the job is cancelled
    /// while running, the body future is also dropped at its next suspension
    /// point and `Cancelled` is returned. A job flagged as cancelled before it
    /// starts never runs.
    pub async fn within_job<F, Fut, T>(
        &self,
        worker_class: &str,
        job_id: &str,
        queue: &str,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T>,
    {
        let token = CancellationToken::new();
        // Registered before the flag check so a cancel published in between is not lost.
        let _guard = self
            .registry
            .register(JobRecord::new(job_id, worker_class, queue, token.clone()));

        if self.is_cancelled(job_id).await? {
            tracing::warn!(
                class = CLASS,
                action = "run",
                queue,
                jid = job_id,
                canceled = true,
                "Job was cancelled before it started"
            );
            return Err(SentinelError::Cancelled(job_id.to_string()));
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(SentinelError::Cancelled(job_id.to_string())),
            output = body(token.clone()) => Ok(output),
        }
    }

    pub async fn is_cancelled(&self, job_id: &str) -> Result<bool> {
        self.state.exists(&cancel_job_key(job_id)).await
    }

    /// Cancel `job_id` anywhere in the fleet.
    ///
    /// Sets the expiring flag so the job is refused if it has not started yet,
    /// then notifies every listening worker.
    pub async fn cancel_job(state: &dyn SharedState, job_id: &str, deadline: Duration) -> Result<()> {
        state
            .set_with_ttl(&cancel_job_key(job_id), b"1", deadline)
            .await?;
        let payload = ControlMessage::cancel(job_id).to_payload()?;
        state.publish(NOTIFICATION_CHANNEL, &payload).await
    }

    pub async fn cancel(&self, job_id: &str) -> Result<()> {
        Self::cancel_job(self.state.as_ref(), job_id, self.config.cancel_deadline).await
    }

    pub fn process_message(&self, payload: &[u8]) -> MessageOutcome {
        let text = String::from_utf8_lossy(payload);
        tracing::info!(class = CLASS, action = "received", message = %text, "Received control message");

        let message = match ControlMessage::parse(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::info!(class = CLASS, action = "malformed", message = %text, error = %e, "Ignoring malformed control message");
                return MessageOutcome::Malformed;
            }
        };

        match (message.action.as_str(), message.jid) {
            (CANCEL_ACTION, Some(jid)) => self.process_job_cancel(jid),
            (CANCEL_ACTION, None) => {
                tracing::info!(class = CLASS, action = "malformed", message = %text, "Cancel message without jid");
                MessageOutcome::Malformed
            }
            (action, _) => {
                tracing::warn!(class = CLASS, action = "unknown", message = %text, "Unknown control message action");
                MessageOutcome::UnknownAction(action.to_string())
            }
        }
    }

    fn process_job_cancel(&self, jid: String) -> MessageOutcome {
        if self.registry.cancel(&jid) {
            tracing::warn!(class = CLASS, action = "cancel", jid = %jid, "Cancelling running job");
            MessageOutcome::Cancelled(jid)
        } else {
            MessageOutcome::NotRunning(jid)
        }
    }

    async fn process_messages(&self, token: &CancellationToken) -> Result<()> {
        let mut rx = self.state.subscribe(NOTIFICATION_CHANNEL).await?;

        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                message = rx.recv() => match message {
                    Some(payload) => {
                        self.process_message(&payload);
                    }
                    None => return Err(SentinelError::SubscriptionClosed(NOTIFICATION_CHANNEL.to_string())),
                },
            }
        }
    }
}

#[async_trait]
impl Daemon for JobMonitor {
    fn name(&self) -> &'static str {
        CLASS
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    async fn run(&self, token: CancellationToken) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }

        tracing::info!(class = CLASS, action = "start", "Starting Monitor Daemon");

        let result = loop {
            if token.is_cancelled() {
                break Ok(());
            }

            if let Err(e) = self.process_messages(&token).await {
                tracing::warn!(class = CLASS, action = "exception", error = %e, "Monitor subscription failed");
                if !e.is_recoverable() {
                    break Err(e);
                }
            }

            if !sleep_unless_stopped(self.config.reconnect_delay, &token).await {
                break Ok(());
            }
        };

        tracing::warn!(class = CLASS, action = "stop", "Stopping Monitor Daemon");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySharedState;

    fn monitor() -> JobMonitor {
        JobMonitor::new(MonitorConfig::default(), Arc::new(MemorySharedState::new()))
    }

    #[tokio::test]
    async fn within_job_returns_body_output_and_unregisters() {
        let monitor = monitor();
        let registry = monitor.registry();

        let value = monitor
            .within_job("Worker", "jid-1", "default", |_token| async move {
                assert!(registry.contains("jid-1"));
                42
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert!(monitor.registry().is_empty());
    }

    #[tokio::test]
    async fn message_outcomes() {
        let monitor = monitor();
        assert_eq!(monitor.process_message(br#"{"action"}"#), MessageOutcome::Malformed);
        assert_eq!(
            monitor.process_message(br#"{"action":"cancel"}"#),
            MessageOutcome::Malformed
        );
        assert_eq!(
            monitor.process_message(br#"{"action":"reboot","jid":"x"}"#),
            MessageOutcome::UnknownAction("reboot".to_string())
        );
        assert_eq!(
            monitor.process_message(br#"{"action":"cancel","jid":"absent"}"#),
            MessageOutcome::NotRunning("absent".to_string())
        );
    }

    #[tokio::test]
    async fn disabled_monitor_returns_immediately() {
        let config = MonitorConfig {
            enabled: false,
            ..MonitorConfig::default()
        };
        let monitor = JobMonitor::new(config, Arc::new(MemorySharedState::new()));
        monitor.run(CancellationToken::new()).await.unwrap();
    }
}
