//! In-memory pub/sub implementation.
//!
//! Provides a broker shared by every hub in the process using tokio
//! broadcast channels, one per channel name.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, RwLock};

use couponsync_core::cache::{CacheError, CachePubSub, Result};

/// Channel capacity for pub/sub messages.
const CHANNEL_CAPACITY: usize = 100;

/// In-memory pub/sub implementation.
///
/// Clones share the same channels, so two hubs holding clones of one
/// `MemoryPubSub` behave like two instances attached to the same broker.
#[derive(Debug, Clone)]
pub struct MemoryPubSub {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<String>>>>,
    available: Arc<AtomicBool>,
}

impl MemoryPubSub {
    /// Creates a new empty pub/sub instance.
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Drops every channel, ending all live subscriptions.
    ///
    /// Subscribers observe this the way they observe a lost broker
    /// connection: their receiver yields `None`.
    pub async fn sever(&self) {
        self.channels.write().await.clear();
    }

    /// Makes `publish` and `subscribe` fail (or succeed again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::ConnectionFailed(
                "in-memory broker is offline".to_string(),
            ))
        }
    }

    /// Gets or creates a channel for the given name.
    async fn get_or_create_channel(&self, channel: &str) -> broadcast::Sender<String> {
        {
            let channels = self.channels.read().await;
            if let Some(sender) = channels.get(channel) {
                return sender.clone();
            }
        }

        let mut channels = self.channels.write().await;

        // Double-check after acquiring write lock
        if let Some(sender) = channels.get(channel) {
            return sender.clone();
        }

        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        channels.insert(channel.to_string(), sender.clone());
        sender
    }
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CachePubSub for MemoryPubSub {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.ensure_available()?;
        let sender = self.get_or_create_channel(channel).await;

        // No receivers just means nobody is subscribed yet.
        let _ = sender.send(payload.to_string());

        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<mpsc::Receiver<String>> {
        self.ensure_available()?;
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        for channel in channels {
            let mut receiver = self.get_or_create_channel(channel).await.subscribe();
            let tx = tx.clone();
            let channel = channel.clone();

            tokio::spawn(async move {
                loop {
                    match receiver.recv().await {
                        Ok(payload) => {
                            if tx.send(payload).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(channel = %channel, skipped, "Broker subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn channels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let pubsub = MemoryPubSub::new();
        let mut rx = pubsub
            .subscribe(&channels(&["couponsync:events:stores"]))
            .await
            .unwrap();

        pubsub
            .publish("couponsync:events:stores", "hello")
            .await
            .unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_one_receiver_for_many_channels() {
        let pubsub = MemoryPubSub::new();
        let mut rx = pubsub
            .subscribe(&channels(&["a", "b"]))
            .await
            .unwrap();

        pubsub.publish("a", "from-a").await.unwrap();
        pubsub.publish("b", "from-b").await.unwrap();
        pubsub.publish("c", "from-c").await.unwrap();

        let mut received = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        received.sort();
        assert_eq!(received, vec!["from-a", "from-b"]);

        let extra = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(extra.is_err(), "channel c was never subscribed");
    }

    #[tokio::test]
    async fn test_clones_share_channels() {
        let instance_a = MemoryPubSub::new();
        let instance_b = instance_a.clone();

        let mut rx = instance_b.subscribe(&channels(&["x"])).await.unwrap();
        instance_a.publish("x", "cross-instance").await.unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("cross-instance"));
    }

    #[tokio::test]
    async fn test_publish_no_subscribers() {
        let pubsub = MemoryPubSub::new();
        assert!(pubsub.publish("nobody", "payload").await.is_ok());
    }

    #[tokio::test]
    async fn test_sever_closes_receivers() {
        let pubsub = MemoryPubSub::new();
        let mut rx = pubsub.subscribe(&channels(&["a", "b"])).await.unwrap();

        pubsub.sever().await;

        let next = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("receiver should close");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_offline_broker_fails() {
        let pubsub = MemoryPubSub::new();
        pubsub.set_available(false);

        assert!(matches!(
            pubsub.publish("a", "x").await,
            Err(CacheError::ConnectionFailed(_))
        ));
        assert!(pubsub.subscribe(&channels(&["a"])).await.is_err());
    }
}
