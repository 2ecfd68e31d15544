//! Cross-process shared state for job cancellation.
//!
//! Two primitives are needed:
//! - **Expiring flags**: `sidekiq:cancel:<jid>` marks a job as cancelled for a while
//! - **Pub/sub**: a cancel notification reaches every subscribed worker
//!
//! # Backends
//!
//! - [`RedisSharedState`]: shared by every worker in the fleet
//! - [`MemorySharedState`]: in-process broker for single-process setups and tests
//!
//! Delivery is at-least-once at best. Consumers must tolerate duplicates.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

pub mod memory_state;
pub mod redis_state;

pub use self::memory_state::MemorySharedState;
pub use self::redis_state::RedisSharedState;

/// Buffer of a subscription channel. Slow consumers apply back-pressure to the forwarder.
pub const SUBSCRIPTION_BUFFER: usize = 256;

#[async_trait]
pub trait SharedState: Send + Sync {
    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()>;

    /// Subscribe to `channel`. The receiver yields `None` once the subscription is lost.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<Vec<u8>>>;
}

/// Connect to Redis when a URL is given, otherwise fall back to the in-process broker.
pub async fn connect(redis_url: Option<&str>) -> Result<std::sync::Arc<dyn SharedState>> {
    match redis_url {
        Some(url) => {
            let state = RedisSharedState::connect(url).await?;
            tracing::info!(url, "Connected to Redis shared state");
            Ok(std::sync::Arc::new(state))
        }
        None => {
            tracing::info!("Using in-process shared state");
            Ok(std::sync::Arc::new(MemorySharedState::new()))
        }
    }
}
