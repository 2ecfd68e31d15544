use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{SharedState, SUBSCRIPTION_BUFFER};
use crate::error::Result;

#[derive(Default)]
struct Inner {
    keys: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
    channels: Mutex<HashMap<String, Vec<mpsc::Sender<Vec<u8>>>>>,
}

/// In-process [`SharedState`] with expiring keys and fan-out channels.
#[derive(Clone, Default)]
pub struct MemorySharedState {
    inner: Arc<Inner>,
}

impl MemorySharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let channels = self
            .inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        channels
            .get(channel)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Drop every subscriber on `channel`, as a broken connection would.
    pub fn disconnect_all(&self, channel: &str) {
        let mut channels = self
            .inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        channels.remove(channel);
    }
}

#[async_trait]
impl SharedState for MemorySharedState {
    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut keys = self
            .inner
            .keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        keys.insert(key.to_string(), (value.to_vec(), Instant::now() + ttl));
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut keys = self
            .inner
            .keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match keys.get(key) {
            Some((_, expires_at)) if *expires_at > Instant::now() => Ok(true),
            Some(_) => {
                keys.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        let senders = {
            let mut channels = self
                .inner
                .channels
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let subs = channels.entry(channel.to_string()).or_default();
            subs.retain(|tx| !tx.is_closed());
            subs.clone()
        };

        for sender in senders {
            // A subscriber that went away mid-publish just misses the message.
            let _ = sender.send(payload.to_vec()).await;
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<Vec<u8>>> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut channels = self
            .inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        channels.entry(channel.to_string()).or_default().push(tx);
        Ok(rx)
    }
}
