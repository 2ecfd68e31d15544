//! Lifecycle for long-running background daemons.
//!
//! A daemon is started from a parent [`CancellationToken`] (usually the
//! process-wide shutdown token). Each [`DaemonHandle`] owns a child token, so a
//! daemon can be stopped alone or together with everything else.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

#[async_trait]
pub trait Daemon: Send + Sync + 'static {
    /// Name used in log lines.
    fn name(&self) -> &'static str;

    /// Disabled daemons are never spawned.
    fn enabled(&self) -> bool {
        true
    }

    /// Run until `token` is cancelled or the daemon finishes its work.
    async fn run(&self, token: CancellationToken) -> Result<()>;
}

/// Handle to a spawned daemon task.
pub struct DaemonHandle {
    name: &'static str,
    token: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
}

impl DaemonHandle {
    pub fn start<D: Daemon>(daemon: Arc<D>, parent: &CancellationToken) -> Self {
        let name = daemon.name();
        let token = parent.child_token();

        if !daemon.enabled() {
            tracing::info!(daemon = name, "Daemon disabled, not starting");
            return Self {
                name,
                token,
                task: None,
            };
        }

        let run_token = token.clone();
        let task = tokio::spawn(async move { daemon.run(run_token).await });

        Self {
            name,
            token,
            task: Some(task),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Ask the daemon to stop. Does not wait for it.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Wait for the daemon task to exit and return its result.
    pub async fn join(mut self) -> Result<()> {
        match self.task.take() {
            Some(task) => task.await?,
            None => Ok(()),
        }
    }

    pub async fn shutdown(self) -> Result<()> {
        self.stop();
        self.join().await
    }
}

/// Sleep for `duration` unless `token` fires first.
///
/// Returns `false` when the sleep was cut short by cancellation.
pub(crate) async fn sleep_unless_stopped(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
