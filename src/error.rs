use thiserror::Error;

#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("Job {0} was cancelled")]
    Cancelled(String),

    #[error("Shared state error: {0}")]
    SharedState(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Subscription to {0} closed")]
    SubscriptionClosed(String),

    #[error("Failed to sample RSS: {0}")]
    Sampling(String),

    #[error("Failed to send {signal} to {target}: {source}")]
    Signal {
        signal: &'static str,
        target: String,
        #[source]
        source: nix::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Daemon task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SentinelError {
    /// Whether a daemon loop may log this error and keep going.
    ///
    /// Failures of the outside world (store, pub/sub, sampling, signal
    /// delivery, malformed payloads, I/O) are recoverable. Only broken
    /// internal invariants stop the daemon.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            SentinelError::Config(_) | SentinelError::Join(_) | SentinelError::Internal(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SentinelError::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, SentinelError>;
