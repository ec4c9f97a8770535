use std::sync::Arc;

use tokio::sync::broadcast;

use couponsync_core::cache::{broker_channels, CacheBackend, CachePubSub};
use couponsync_core::resilience::Dependency;
use couponsync_core::storage::EntityRepository;

use crate::cache::CachePort;
use crate::config::Config;
use crate::coordinator::{CoordinatorSettings, UpdateCoordinator};
use crate::notify::{BrokerBridge, NotificationHub, ReconnectPolicy};
use crate::resilience::CircuitBreaker;
use crate::revalidation::revalidator_from_config;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<UpdateCoordinator>,
    pub hub: Arc<NotificationHub>,
    pub breakers: Arc<CircuitBreaker>,
    pub cache: Arc<CachePort>,
    /// Shutdown signal for SSE connections and background tasks
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Wires the coordinator to the given backends and spawns the broker
    /// bridge and the breaker decay tick.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(
        repository: Arc<dyn EntityRepository>,
        cache_backend: Arc<dyn CacheBackend>,
        pubsub: Arc<dyn CachePubSub>,
        config: &Config,
    ) -> Result<Self, anyhow::Error> {
        let (shutdown_tx, _) = broadcast::channel(1);

        let breakers = Arc::new(CircuitBreaker::from_config(config));
        breakers.spawn_decay_task(config.breaker_decay_interval, shutdown_tx.subscribe());

        let (bridge_handle, bridge) = BrokerBridge::new(
            pubsub,
            broker_channels(),
            ReconnectPolicy::from_config(config),
            config.breaker(Dependency::Notification).call_timeout,
        );
        let hub = Arc::new(NotificationHub::new(
            bridge_handle,
            config.client_queue_capacity,
        ));
        bridge.spawn(Arc::clone(&hub), shutdown_tx.subscribe());

        let cache = Arc::new(CachePort::new(cache_backend, config.into()));
        let revalidator = revalidator_from_config(config)?;

        let coordinator = Arc::new(UpdateCoordinator::new(
            repository,
            Arc::clone(&cache),
            Arc::clone(&hub),
            Arc::clone(&breakers),
            revalidator,
            CoordinatorSettings::from(config),
        ));

        Ok(Self {
            coordinator,
            hub,
            breakers,
            cache,
            shutdown_tx,
        })
    }

    /// Subscribe to shutdown signal.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal all SSE connections and background tasks to close.
    pub fn signal_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

// ============================================================================
// Factory functions for the backend features
// ============================================================================

#[cfg(feature = "memory")]
mod memory_backends {
    use super::*;
    use crate::cache::{MemoryCache, MemoryPubSub};
    use crate::storage::InMemoryRepository;

    impl AppState {
        /// Creates AppState with in-memory storage, cache and broker.
        /// Useful for development and tests without external services.
        pub async fn new(config: &Config) -> Result<Self, anyhow::Error> {
            let repository = Arc::new(InMemoryRepository::new());
            let cache = Arc::new(MemoryCache::new(config.cache_max_entries));
            let pubsub = Arc::new(MemoryPubSub::new());

            Self::build(repository, cache, pubsub, config)
        }
    }
}

#[cfg(feature = "redis")]
mod redis_backends {
    use super::*;
    use crate::cache::{RedisCache, RedisPubSub};
    use crate::storage::InMemoryRepository;

    impl AppState {
        /// Creates AppState with a Redis cache and broker.
        pub async fn new(config: &Config) -> Result<Self, anyhow::Error> {
            let repository = Arc::new(InMemoryRepository::new());
            let cache = Arc::new(RedisCache::new(&config.redis_url).await?);
            let pubsub = Arc::new(RedisPubSub::new(&config.redis_url).await?);

            tracing::info!(url = %config.redis_url, "Using Redis cache and broker");
            Self::build(repository, cache, pubsub, config)
        }
    }
}
