//! The cache port: the only way the rest of the service touches the cache.
//!
//! Every operation resolves to a value or a [`CacheOpResult`] instead of an
//! error, so callers can invoke it inline on a write path. Backend failures
//! and timeouts become misses and no-ops, and are counted.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use couponsync_core::cache::{
    is_namespaced, CacheBackend, CacheError, CacheKind, InvalidationPlan, TtlPolicy, NAMESPACE,
};

use crate::config::Config;

/// Invalidation generation slots. Keys hash onto a slot, so two keys sharing
/// one only cost each other a skipped cache fill.
const GENERATION_SLOTS: usize = 1024;

/// Outcome of a cache write or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheOpResult {
    pub success: bool,
    /// Keys written or deleted.
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CacheOpResult {
    pub fn ok(count: u64) -> Self {
        Self {
            success: true,
            count,
            error: None,
        }
    }

    pub fn failed(count: u64, error: impl ToString) -> Self {
        Self {
            success: false,
            count,
            error: Some(error.to_string()),
        }
    }
}

/// Counters reported on the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub hit_rate: f64,
}

/// Tuning of the cache port.
#[derive(Debug, Clone)]
pub struct CachePortSettings {
    pub op_timeout: Duration,
    pub scan_batch: usize,
    pub max_scan_keys: usize,
    pub delete_batch: usize,
    pub ttl: TtlPolicy,
}

impl Default for CachePortSettings {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_millis(500),
            scan_batch: 100,
            max_scan_keys: 10_000,
            delete_batch: 100,
            ttl: TtlPolicy::default(),
        }
    }
}

impl From<&Config> for CachePortSettings {
    fn from(config: &Config) -> Self {
        Self {
            op_timeout: config.cache_op_timeout,
            scan_batch: config.cache_scan_batch.max(1),
            max_scan_keys: config.cache_scan_max_keys.max(1),
            delete_batch: config.cache_delete_batch.max(1),
            ttl: config.ttl_policy(),
        }
    }
}

/// Fault-tolerant front of a [`CacheBackend`].
///
/// Deletes bump a per-key invalidation generation before they reach the
/// backend. A cache-aside read records the generation before it loads from
/// the datastore and writes through [`set_if_current`](Self::set_if_current),
/// so a snapshot taken before a concurrent invalidation is never left behind
/// in the cache.
pub struct CachePort {
    backend: Arc<dyn CacheBackend>,
    settings: CachePortSettings,
    generations: Box<[AtomicU64]>,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl CachePort {
    pub fn new(backend: Arc<dyn CacheBackend>, settings: CachePortSettings) -> Self {
        Self {
            backend,
            settings,
            generations: (0..GENERATION_SLOTS).map(|_| AtomicU64::new(0)).collect(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.settings.ttl
    }

    fn generation_slot(&self, key: &str) -> &AtomicU64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let slot = (hasher.finish() % self.generations.len() as u64) as usize;
        &self.generations[slot]
    }

    /// Current invalidation generation of `key`.
    pub fn generation(&self, key: &str) -> u64 {
        self.generation_slot(key).load(Ordering::Acquire)
    }

    /// Runs one backend call under the op timeout.
    async fn guarded<T, F>(&self, call: F) -> Result<T, CacheError>
    where
        F: std::future::Future<Output = Result<T, CacheError>>,
    {
        let timeout = self.settings.op_timeout;
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(timeout.as_millis() as u64)),
        };
        if result.is_err() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Reads a key. Backend failures are reported as a miss.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.guarded(self.backend.get(key)).await {
            Ok(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %e, "Cache get failed, treating as miss");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheOpResult {
        match self.guarded(self.backend.set(key, value, ttl)).await {
            Ok(()) => CacheOpResult::ok(1),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache set failed");
                CacheOpResult::failed(0, e)
            }
        }
    }

    /// Writes a key with the TTL configured for `kind`.
    pub async fn set_for(&self, kind: CacheKind, key: &str, value: &[u8]) -> CacheOpResult {
        let ttl = self.settings.ttl.ttl_for(kind);
        self.set(key, value, Some(ttl)).await
    }

    /// Writes a value loaded while `key` was at `generation`.
    ///
    /// The write is skipped when the key has been invalidated since. If an
    /// invalidation lands between the check and the write, the key is
    /// deleted again so the stale value does not outlive it.
    pub async fn set_if_current(
        &self,
        kind: CacheKind,
        key: &str,
        value: &[u8],
        generation: u64,
    ) -> CacheOpResult {
        if self.generation(key) != generation {
            tracing::debug!(key = %key, "Key invalidated during read, not caching snapshot");
            return CacheOpResult::ok(0);
        }

        let result = self.set_for(kind, key, value).await;
        if result.success && self.generation(key) != generation {
            tracing::debug!(key = %key, "Key invalidated while caching, dropping snapshot");
            self.del(key).await;
            return CacheOpResult::ok(0);
        }
        result
    }

    pub async fn del(&self, key: &str) -> CacheOpResult {
        self.del_many(&[key.to_string()]).await
    }

    async fn del_many(&self, keys: &[String]) -> CacheOpResult {
        if keys.is_empty() {
            return CacheOpResult::ok(0);
        }
        for key in keys {
            self.generation_slot(key).fetch_add(1, Ordering::AcqRel);
        }
        match self.guarded(self.backend.delete(keys)).await {
            Ok(count) => CacheOpResult::ok(count),
            Err(e) => {
                tracing::warn!(keys = keys.len(), error = %e, "Cache delete failed");
                CacheOpResult::failed(0, e)
            }
        }
    }

    /// Deletes every key matching `pattern`.
    ///
    /// The pattern must start with the reserved namespace. Keys are
    /// enumerated with a cursor scan, at most `max_scan_keys` per call, and
    /// deleted in batches of `delete_batch`.
    pub async fn delete_by_pattern(&self, pattern: &str) -> CacheOpResult {
        if !is_namespaced(pattern) {
            tracing::error!(
                pattern = %pattern,
                namespace = NAMESPACE,
                "Refusing pattern delete outside the cache namespace"
            );
            return CacheOpResult::failed(0, CacheError::OutsideNamespace(pattern.to_string()));
        }

        let keys = match self.collect_matching(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "Cache scan failed");
                return CacheOpResult::failed(0, e);
            }
        };

        let mut deleted = 0;
        for batch in keys.chunks(self.settings.delete_batch.max(1)) {
            let result = self.del_many(batch).await;
            deleted += result.count;
            if !result.success {
                return CacheOpResult {
                    count: deleted,
                    ..result
                };
            }
        }

        tracing::debug!(pattern = %pattern, scanned = keys.len(), deleted, "Pattern invalidated");
        CacheOpResult::ok(deleted)
    }

    async fn collect_matching(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let cap = self.settings.max_scan_keys;
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        let mut cursor = 0;

        loop {
            let (next, page) = self
                .guarded(self.backend.scan(cursor, pattern, self.settings.scan_batch))
                .await?;

            // SCAN may return a key more than once.
            for key in page {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }

            if keys.len() >= cap {
                tracing::warn!(
                    pattern = %pattern,
                    cap,
                    "Pattern delete hit the key cap; remaining keys are left to expire"
                );
                keys.truncate(cap);
                break;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }

    /// Applies an entity's invalidation plan: direct keys first, then patterns.
    ///
    /// Every step runs even if an earlier one failed. The result is
    /// successful only if all of them were.
    pub async fn invalidate(&self, plan: &InvalidationPlan) -> CacheOpResult {
        let mut results = vec![self.del_many(&plan.keys).await];
        for pattern in &plan.patterns {
            results.push(self.delete_by_pattern(pattern).await);
        }

        let count = results.iter().map(|r| r.count).sum();
        match results.into_iter().find(|r| !r.success) {
            Some(failed) => CacheOpResult {
                success: false,
                count,
                error: failed.error,
            },
            None => CacheOpResult::ok(count),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}
