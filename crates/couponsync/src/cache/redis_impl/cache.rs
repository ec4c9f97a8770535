//! Redis cache implementation.
//!
//! Pattern deletion is driven by the cache port through cursor-based
//! `SCAN ... MATCH ... COUNT`, never `KEYS`, so a sweep of a large keyspace
//! does not block the server.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use couponsync_core::cache::{CacheBackend, Result};

use super::error::map_redis_error;

/// Redis cache backend using connection manager for pooling.
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
}

impl RedisCache {
    /// Creates a new Redis cache connection.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::ConnectionFailed` if the connection cannot be established.
    pub async fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(map_redis_error)?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(map_redis_error)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let result: Option<Vec<u8>> = conn.get(key).await.map_err(map_redis_error)?;
        Ok(result)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();

        match ttl {
            Some(duration) => {
                let seconds = duration.as_secs().max(1);
                conn.set_ex::<_, _, ()>(key, value, seconds)
                    .await
                    .map_err(map_redis_error)?;
            }
            None => {
                conn.set::<_, _, ()>(key, value)
                    .await
                    .map_err(map_redis_error)?;
            }
        }

        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(keys).await.map_err(map_redis_error)?;
        Ok(removed)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        let mut conn = self.conn.clone();
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count.max(1))
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok((next, keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Helper to get Redis URL from environment.
    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
    }

    /// Skip test if Redis not available.
    async fn get_test_cache() -> Option<RedisCache> {
        RedisCache::new(&redis_url()).await.ok()
    }

    /// Generate a unique key prefix to avoid conflicts between runs.
    fn test_prefix() -> String {
        format!("cdir:test-{}:", Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_redis_set_and_get() {
        let Some(cache) = get_test_cache().await else {
            eprintln!("Skipping test: Redis not available");
            return;
        };

        let key = format!("{}value", test_prefix());
        cache.set(&key, b"hello world", None).await.unwrap();

        let result = cache.get(&key).await.unwrap();
        assert_eq!(result, Some(b"hello world".to_vec()));

        assert_eq!(cache.delete(&[key]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_redis_delete_empty_is_noop() {
        let Some(cache) = get_test_cache().await else {
            eprintln!("Skipping test: Redis not available");
            return;
        };

        assert_eq!(cache.delete(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_redis_ttl() {
        let Some(cache) = get_test_cache().await else {
            eprintln!("Skipping test: Redis not available");
            return;
        };

        let key = format!("{}ttl", test_prefix());
        cache
            .set(&key, b"expiring", Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(cache.get(&key).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_redis_scan_finds_all_matches() {
        let Some(cache) = get_test_cache().await else {
            eprintln!("Skipping test: Redis not available");
            return;
        };

        let prefix = test_prefix();
        let keys: Vec<String> = (0..25).map(|i| format!("{prefix}{i}")).collect();
        for key in &keys {
            cache.set(key, b"x", None).await.unwrap();
        }

        let pattern = format!("{prefix}*");
        let mut cursor = 0;
        let mut found = Vec::new();
        loop {
            let (next, page) = cache.scan(cursor, &pattern, 10).await.unwrap();
            found.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        found.sort();
        found.dedup();
        assert_eq!(found.len(), keys.len());

        assert_eq!(cache.delete(&keys).await.unwrap(), keys.len() as u64);
    }
}
