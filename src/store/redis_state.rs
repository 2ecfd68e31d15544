use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use super::{SharedState, SUBSCRIPTION_BUFFER};
use crate::error::Result;

/// [`SharedState`] backed by Redis keys and Redis pub/sub.
#[derive(Clone)]
pub struct RedisSharedState {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisSharedState {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl SharedState for RedisSharedState {
    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists::<_, bool>(key).await?)
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<Vec<u8>>> {
        // Pub/sub needs a dedicated connection; it lives as long as the forwarder task.
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let channel = channel.to_string();

        tokio::spawn(async move {
            let mut messages = Box::pin(pubsub.into_on_message());
            while let Some(msg) = messages.next().await {
                match msg.get_payload::<Vec<u8>>() {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            // Receiver dropped, stop forwarding
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "Dropping undecodable pub/sub payload");
                    }
                }
            }
            tracing::debug!(channel = %channel, "Redis subscription ended");
        });

        Ok(rx)
    }
}
