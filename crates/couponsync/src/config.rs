use std::{collections::BTreeMap, env, str::FromStr, time::Duration};

use couponsync_core::cache::{TtlPolicy, DEFAULT_DETAIL_TTL, DEFAULT_LIST_TTL};
use couponsync_core::resilience::{BreakerConfig, Dependency};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of in-memory cache entries (default: 10,000)
    pub cache_max_entries: usize,
    /// TTL of detail views in seconds (default: 3600)
    pub cache_detail_ttl_seconds: u64,
    /// TTL of list views in seconds (default: 300)
    pub cache_list_ttl_seconds: u64,
    /// Timeout applied to every cache backend call (default: 500ms)
    pub cache_op_timeout: Duration,
    /// `SCAN ... COUNT` hint for pattern deletion (default: 100)
    pub cache_scan_batch: usize,
    /// Keys a single pattern deletion may enumerate (default: 10,000)
    pub cache_scan_max_keys: usize,
    /// Keys per `DEL` during pattern deletion (default: 100)
    pub cache_delete_batch: usize,
    /// Circuit breaker tuning per dependency
    pub breakers: BTreeMap<Dependency, BreakerConfig>,
    /// Interval of the consecutive-failure decay tick (default: 300s)
    pub breaker_decay_interval: Duration,
    /// Attempts of the read-after-write (default: 3)
    pub fresh_read_attempts: u32,
    /// Initial backoff between read-after-write attempts (default: 50ms)
    pub fresh_read_backoff: Duration,
    /// Timeout of each primary datastore call (default: 2000ms)
    pub datastore_timeout: Duration,
    /// Broker reconnect attempts before degrading to local fan-out (default: 5)
    pub broker_reconnect_attempts: u32,
    /// Initial broker reconnect delay (default: 500ms)
    pub broker_reconnect_base: Duration,
    /// Cap on the broker reconnect delay (default: 30s)
    pub broker_reconnect_max: Duration,
    /// Interval between broker probes once degraded (default: 60s)
    pub broker_degraded_reprobe: Duration,
    /// Outbound queue size per connected client (default: 64)
    pub client_queue_capacity: usize,
    /// External revalidation endpoint. Revalidation is skipped when unset.
    pub revalidation_url: Option<String>,
    /// Bearer token for the revalidation endpoint
    pub revalidation_token: Option<String>,
    /// Redis connection URL (default: "redis://localhost:6379")
    /// Note: Only used when the `redis` feature is enabled.
    #[allow(dead_code)]
    pub redis_url: String,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_millis(name: &str, default: u64) -> Duration {
    Duration::from_millis(env_or(name, default))
}

fn env_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Reads `BREAKER_{DEP}_THRESHOLD`, `BREAKER_{DEP}_OPEN_SECONDS` and
/// `BREAKER_{DEP}_CALL_TIMEOUT_MS`, falling back to the dependency defaults.
fn breaker_from_env(dependency: Dependency) -> BreakerConfig {
    let defaults = BreakerConfig::default_for(dependency);
    let prefix = format!("BREAKER_{}", dependency.as_str().to_uppercase());

    BreakerConfig::new(
        env_or(&format!("{prefix}_THRESHOLD"), defaults.threshold),
        Duration::from_secs(env_or(
            &format!("{prefix}_OPEN_SECONDS"),
            defaults.open_timeout.as_secs(),
        )),
        env_millis(
            &format!("{prefix}_CALL_TIMEOUT_MS"),
            defaults.call_timeout.as_millis() as u64,
        ),
    )
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CACHE_MAX_ENTRIES`, `CACHE_DETAIL_TTL_SECONDS`, `CACHE_LIST_TTL_SECONDS`
    /// - `CACHE_OP_TIMEOUT_MS`, `CACHE_SCAN_BATCH`, `CACHE_SCAN_MAX_KEYS`, `CACHE_DELETE_BATCH`
    /// - `BREAKER_{CACHE,NOTIFICATION,REVALIDATION}_{THRESHOLD,OPEN_SECONDS,CALL_TIMEOUT_MS}`
    /// - `BREAKER_DECAY_INTERVAL_SECONDS`
    /// - `FRESH_READ_ATTEMPTS`, `FRESH_READ_BACKOFF_MS`, `DATASTORE_TIMEOUT_MS`
    /// - `BROKER_RECONNECT_ATTEMPTS`, `BROKER_RECONNECT_BASE_MS`, `BROKER_RECONNECT_MAX_MS`
    /// - `BROKER_DEGRADED_REPROBE_MS`
    /// - `CLIENT_QUEUE_CAPACITY`
    /// - `REVALIDATION_URL`, `REVALIDATION_TOKEN`
    /// - `REDIS_URL`
    pub fn from_env() -> Self {
        let breakers = Dependency::all()
            .into_iter()
            .map(|dependency| (dependency, breaker_from_env(dependency)))
            .collect();

        Self {
            cache_max_entries: env_or("CACHE_MAX_ENTRIES", 10_000),
            cache_detail_ttl_seconds: env_or(
                "CACHE_DETAIL_TTL_SECONDS",
                DEFAULT_DETAIL_TTL.as_secs(),
            ),
            cache_list_ttl_seconds: env_or("CACHE_LIST_TTL_SECONDS", DEFAULT_LIST_TTL.as_secs()),
            cache_op_timeout: env_millis("CACHE_OP_TIMEOUT_MS", 500),
            cache_scan_batch: env_or("CACHE_SCAN_BATCH", 100),
            cache_scan_max_keys: env_or("CACHE_SCAN_MAX_KEYS", 10_000),
            cache_delete_batch: env_or("CACHE_DELETE_BATCH", 100),
            breakers,
            breaker_decay_interval: Duration::from_secs(env_or(
                "BREAKER_DECAY_INTERVAL_SECONDS",
                300,
            )),
            fresh_read_attempts: env_or("FRESH_READ_ATTEMPTS", 3),
            fresh_read_backoff: env_millis("FRESH_READ_BACKOFF_MS", 50),
            datastore_timeout: env_millis("DATASTORE_TIMEOUT_MS", 2_000),
            broker_reconnect_attempts: env_or("BROKER_RECONNECT_ATTEMPTS", 5),
            broker_reconnect_base: env_millis("BROKER_RECONNECT_BASE_MS", 500),
            broker_reconnect_max: env_millis("BROKER_RECONNECT_MAX_MS", 30_000),
            broker_degraded_reprobe: env_millis("BROKER_DEGRADED_REPROBE_MS", 60_000),
            client_queue_capacity: env_or("CLIENT_QUEUE_CAPACITY", 64),
            revalidation_url: env_optional("REVALIDATION_URL"),
            revalidation_token: env_optional("REVALIDATION_TOKEN"),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        }
    }

    /// The cache TTL table built from the configured detail and list TTLs.
    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy::new(
            Duration::from_secs(self.cache_detail_ttl_seconds),
            Duration::from_secs(self.cache_list_ttl_seconds),
        )
    }

    /// Breaker configuration of a dependency.
    pub fn breaker(&self, dependency: Dependency) -> BreakerConfig {
        self.breakers
            .get(&dependency)
            .copied()
            .unwrap_or_else(|| BreakerConfig::default_for(dependency))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
