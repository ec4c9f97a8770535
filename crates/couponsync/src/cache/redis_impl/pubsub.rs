//! Redis pub/sub implementation.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use tokio::sync::mpsc;

use couponsync_core::cache::{CacheError, CachePubSub, Result};

use super::error::map_redis_error;

/// Buffer between the Redis message stream and the subscriber.
const CHANNEL_CAPACITY: usize = 100;

/// Redis pub/sub backend for cross-instance event fan-out.
pub struct RedisPubSub {
    client: redis::Client,
}

impl RedisPubSub {
    /// Creates a new Redis pub/sub connection.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::ConnectionFailed` if the connection cannot be established.
    pub async fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(map_redis_error)?;

        // Verify connection by getting a connection
        let _ = client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_error)?;

        Ok(Self { client })
    }
}

#[async_trait]
impl CachePubSub for RedisPubSub {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_error)?;

        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e| CacheError::PublishFailed(e.to_string()))?;

        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<mpsc::Receiver<String>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(map_redis_error)?;

        for channel in channels {
            pubsub.subscribe(channel).await.map_err(map_redis_error)?;
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        // The task ends (dropping `tx`) when the connection drops or the
        // subscriber goes away; either way the receiver then yields `None`.
        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(
                            channel = %msg.get_channel_name(),
                            error = %e,
                            "Discarding non-text broker message"
                        );
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
            tracing::info!("Redis subscription stream ended");
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    /// Helper to get Redis URL from environment.
    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
    }

    /// Skip test if Redis not available.
    async fn get_test_pubsub() -> Option<RedisPubSub> {
        RedisPubSub::new(&redis_url()).await.ok()
    }

    #[tokio::test]
    async fn test_redis_pubsub_publish_and_receive() {
        let Some(pubsub) = get_test_pubsub().await else {
            eprintln!("Skipping test: Redis not available");
            return;
        };

        let channel = format!("couponsync:test:{}", Uuid::new_v4());
        let mut rx = pubsub.subscribe(&[channel.clone()]).await.unwrap();

        // Give the subscription time to establish
        tokio::time::sleep(Duration::from_millis(100)).await;

        pubsub.publish(&channel, "payload").await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        match received {
            Ok(Some(payload)) => assert_eq!(payload, "payload"),
            Ok(None) => panic!("Subscription closed unexpectedly"),
            Err(_) => panic!("Timeout waiting for message"),
        }
    }

    #[tokio::test]
    async fn test_redis_pubsub_publish_without_subscribers() {
        let Some(pubsub) = get_test_pubsub().await else {
            eprintln!("Skipping test: Redis not available");
            return;
        };

        let channel = format!("couponsync:test:{}", Uuid::new_v4());
        assert!(pubsub.publish(&channel, "nobody listens").await.is_ok());
    }
}
