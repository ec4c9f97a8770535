//! In-memory cache implementation with LRU eviction.
//!
//! Mirrors the Redis backend closely enough for the cache port to treat both
//! the same way: values carry an optional TTL and keys can be enumerated
//! page by page with a glob pattern.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use couponsync_core::cache::{pattern_matches, CacheBackend, CacheError, Result};

/// A single cache entry with optional expiration.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|d| Instant::now() + d);
        Self { value, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() >= exp)
    }
}

/// Scans kept open at once. Older abandoned sweeps are dropped first.
const MAX_OPEN_SCANS: usize = 16;

/// Sorted key snapshots of scans in progress.
///
/// A scan cursor carries its sweep id in the high 32 bits and the offset into
/// the snapshot in the low 32 bits. Cursor 0 starts a new sweep.
#[derive(Debug, Default)]
struct ScanSnapshots {
    last_sweep: u64,
    open: VecDeque<(u64, Vec<String>)>,
}

impl ScanSnapshots {
    fn start(&mut self) -> u64 {
        self.last_sweep = self.last_sweep % u64::from(u32::MAX) + 1;
        self.last_sweep
    }

    fn take(&mut self, sweep: u64) -> Option<Vec<String>> {
        let position = self.open.iter().position(|(id, _)| *id == sweep)?;
        self.open.remove(position).map(|(_, keys)| keys)
    }

    fn keep(&mut self, sweep: u64, keys: Vec<String>) {
        if self.open.len() >= MAX_OPEN_SCANS {
            self.open.pop_front();
        }
        self.open.push_back((sweep, keys));
    }
}

fn split_cursor(cursor: u64) -> (u64, usize) {
    let offset = usize::try_from(cursor & u64::from(u32::MAX)).unwrap_or(usize::MAX);
    (cursor >> 32, offset)
}

fn join_cursor(sweep: u64, offset: usize) -> u64 {
    let offset = u64::try_from(offset).unwrap_or(u64::MAX).min(u64::from(u32::MAX));
    (sweep << 32) | offset
}

/// In-memory cache implementation with LRU eviction.
///
/// Thread-safe cache using `Arc<RwLock<LruCache>>` for concurrent access.
/// Supports TTL with lazy expiration (entries are dropped when touched).
/// Uses LRU eviction to limit memory usage when max_entries is reached.
///
/// The cache can be switched offline with [`set_available`](Self::set_available),
/// after which every call fails with `ConnectionFailed`.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    store: Arc<RwLock<LruCache<String, CacheEntry>>>,
    scans: Arc<Mutex<ScanSnapshots>>,
    available: Arc<AtomicBool>,
}

impl MemoryCache {
    /// Creates a new in-memory cache with LRU eviction.
    ///
    /// A `max_entries` of 0 is treated as 1.
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            store: Arc::new(RwLock::new(LruCache::new(capacity))),
            scans: Arc::new(Mutex::new(ScanSnapshots::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulates the cache going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live entries, expired ones excluded.
    pub async fn len(&self) -> usize {
        let store = self.store.read().await;
        store.iter().filter(|(_, entry)| !entry.is_expired()).count()
    }

    async fn sorted_matching(&self, pattern: &str) -> Vec<String> {
        let store = self.store.read().await;

        // `iter` does not promote entries, so scanning leaves LRU order alone.
        let mut matching: Vec<String> = store
            .iter()
            .filter(|(key, entry)| !entry.is_expired() && pattern_matches(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        matching.sort_unstable();
        matching
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::ConnectionFailed(
                "in-memory cache is offline".to_string(),
            ))
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_available()?;
        let mut store = self.store.write().await;

        match store.get(key) {
            Some(entry) if entry.is_expired() => {
                store.pop(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.ensure_available()?;
        let mut store = self.store.write().await;
        store.put(key.to_string(), CacheEntry::new(value.to_vec(), ttl));
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        self.ensure_available()?;
        let mut store = self.store.write().await;

        let mut removed = 0;
        for key in keys {
            if let Some(entry) = store.pop(key) {
                if !entry.is_expired() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Pages through a sorted snapshot of the matching keys taken when the
    /// sweep started. Like Redis `SCAN`, keys added mid-sweep may be missed
    /// and keys deleted mid-sweep may still be returned.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        self.ensure_available()?;
        let (sweep, offset) = split_cursor(cursor);

        let mut scans = self.scans.lock().await;
        let keys = match scans.take(sweep) {
            Some(keys) => keys,
            // New sweep, or one whose snapshot was dropped: take a fresh one.
            None => self.sorted_matching(pattern).await,
        };

        let start = offset.min(keys.len());
        let end = start.saturating_add(count.max(1)).min(keys.len());
        let page = keys[start..end].to_vec();
        if end >= keys.len() {
            return Ok((0, page));
        }

        let sweep = if sweep == 0 { scans.start() } else { sweep };
        scans.keep(sweep, keys);
        Ok((join_cursor(sweep, end), page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MAX_ENTRIES: usize = 1000;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    async fn scan_all(cache: &MemoryCache, pattern: &str, count: usize) -> Vec<String> {
        let mut cursor = 0;
        let mut found = Vec::new();
        loop {
            let (next, page) = cache.scan(cursor, pattern, count).await.unwrap();
            found.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        found
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = MemoryCache::new(TEST_MAX_ENTRIES);

        cache.set("cdir:store:1:", b"acme", None).await.unwrap();
        let result = cache.get("cdir:store:1:").await.unwrap();

        assert_eq!(result, Some(b"acme".to_vec()));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let cache = MemoryCache::new(TEST_MAX_ENTRIES);
        assert_eq!(cache.get("cdir:store:missing:").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_counts_existing_keys_only() {
        let cache = MemoryCache::new(TEST_MAX_ENTRIES);
        cache.set("cdir:a:", b"1", None).await.unwrap();
        cache.set("cdir:b:", b"2", None).await.unwrap();

        let removed = cache
            .delete(&keys(&["cdir:a:", "cdir:b:", "cdir:c:"]))
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let again = cache.delete(&keys(&["cdir:a:"])).await.unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiration() {
        let cache = MemoryCache::new(TEST_MAX_ENTRIES);
        cache
            .set("cdir:stores:", b"[]", Some(Duration::from_secs(300)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.get("cdir:stores:").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("cdir:stores:").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_pages_through_matches() {
        let cache = MemoryCache::new(TEST_MAX_ENTRIES);
        for i in 0..7 {
            cache
                .set(&format!("cdir:store:1:page={i}"), b"x", None)
                .await
                .unwrap();
        }
        cache.set("cdir:store:12:", b"x", None).await.unwrap();
        cache.set("cdir:coupon:1:", b"x", None).await.unwrap();

        let found = scan_all(&cache, "cdir:store:1:*", 3).await;
        assert_eq!(found.len(), 7);
        assert!(found.iter().all(|k| k.starts_with("cdir:store:1:")));
    }

    #[tokio::test]
    async fn test_scan_pages_through_one_snapshot() {
        let cache = MemoryCache::new(TEST_MAX_ENTRIES);
        for name in ["cdir:b:", "cdir:c:", "cdir:d:", "cdir:e:"] {
            cache.set(name, b"x", None).await.unwrap();
        }

        let (cursor, first) = cache.scan(0, "cdir:*", 2).await.unwrap();
        assert_eq!(first, keys(&["cdir:b:", "cdir:c:"]));

        // Sorts ahead of the cursor; a re-sorted keyspace would repeat "cdir:c:".
        cache.set("cdir:a:", b"x", None).await.unwrap();

        let (next, second) = cache.scan(cursor, "cdir:*", 2).await.unwrap();
        assert_eq!(second, keys(&["cdir:d:", "cdir:e:"]));
        assert_eq!(next, 0);
    }

    #[tokio::test]
    async fn test_interleaved_scans_keep_their_own_snapshots() {
        let cache = MemoryCache::new(TEST_MAX_ENTRIES);
        for i in 0..5 {
            cache
                .set(&format!("cdir:store:{i}:"), b"x", None)
                .await
                .unwrap();
            cache
                .set(&format!("cdir:coupon:{i}:"), b"x", None)
                .await
                .unwrap();
        }

        let (stores_cursor, mut stores) = cache.scan(0, "cdir:store:*", 2).await.unwrap();
        let (coupons_cursor, mut coupons) = cache.scan(0, "cdir:coupon:*", 2).await.unwrap();
        assert_ne!(stores_cursor, coupons_cursor);

        let mut cursor = stores_cursor;
        while cursor != 0 {
            let (next, page) = cache.scan(cursor, "cdir:store:*", 2).await.unwrap();
            stores.extend(page);
            cursor = next;
        }
        let mut cursor = coupons_cursor;
        while cursor != 0 {
            let (next, page) = cache.scan(cursor, "cdir:coupon:*", 2).await.unwrap();
            coupons.extend(page);
            cursor = next;
        }

        assert_eq!(stores.len(), 5);
        assert!(stores.iter().all(|k| k.starts_with("cdir:store:")));
        assert_eq!(coupons.len(), 5);
        assert!(coupons.iter().all(|k| k.starts_with("cdir:coupon:")));
    }

    #[tokio::test]
    async fn test_scan_empty_returns_zero_cursor() {
        let cache = MemoryCache::new(TEST_MAX_ENTRIES);
        let (cursor, page) = cache.scan(0, "cdir:*", 10).await.unwrap();
        assert_eq!(cursor, 0);
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn test_offline_cache_fails() {
        let cache = MemoryCache::new(TEST_MAX_ENTRIES);
        cache.set_available(false);

        assert!(matches!(
            cache.get("cdir:a:").await,
            Err(CacheError::ConnectionFailed(_))
        ));
        assert!(cache.set("cdir:a:", b"1", None).await.is_err());

        cache.set_available(true);
        assert!(cache.set("cdir:a:", b"1", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = MemoryCache::new(3);

        cache.set("key1", b"value1", None).await.unwrap();
        cache.set("key2", b"value2", None).await.unwrap();
        cache.set("key3", b"value3", None).await.unwrap();

        // Touch key1 so key2 becomes least recently used
        cache.get("key1").await.unwrap();
        cache.set("key4", b"value4", None).await.unwrap();

        assert!(cache.get("key1").await.unwrap().is_some());
        assert!(cache.get("key2").await.unwrap().is_none());
        assert!(cache.get("key3").await.unwrap().is_some());
        assert!(cache.get("key4").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_zero_max_entries_holds_one() {
        let cache = MemoryCache::new(0);
        cache.set("a", b"1", None).await.unwrap();
        cache.set("b", b"2", None).await.unwrap();
        assert_eq!(cache.len().await, 1);
    }
}
