use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::Result;

/// Raw key/value backend: TTL storage plus a cursor-based key scan.
///
/// Implementations report failures as errors; the cache port above them is
/// responsible for turning those into misses and no-ops.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Gets a value from the cache by key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Sets a value in the cache with an optional TTL.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Deletes the given keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// Returns one page of keys matching `pattern` starting at `cursor`.
    ///
    /// A returned cursor of `0` means the iteration is complete. `count` is a
    /// hint for the page size, as with Redis `SCAN ... COUNT`.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)>;
}

/// Message broker used to fan events out across service instances.
#[async_trait]
pub trait CachePubSub: Send + Sync {
    /// Publishes a raw payload on a channel.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Subscribes to every channel in `channels`.
    ///
    /// Payloads from all channels arrive on the returned receiver. The
    /// receiver yields `None` once the underlying connection is lost, which
    /// the caller treats as a signal to reconnect.
    async fn subscribe(&self, channels: &[String]) -> Result<mpsc::Receiver<String>>;
}
