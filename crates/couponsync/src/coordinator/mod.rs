//! The update coordinator.
//!
//! Every mutation runs the same pipeline:
//!
//! 1. Write to the primary datastore. A failure here is the only fatal one.
//! 2. Read the entity back so the later stages see committed data (skipped
//!    for deletes).
//! 3. Invalidate the affected cache keys and scopes through the cache breaker.
//!    Updates cover the entity as it was before the write as well, so keys
//!    under an old slug or an old parent store are dropped too.
//! 4. Publish a change event through the notification breaker. If that fails
//!    the fallback invalidates the cache directly, so a lost event does not
//!    leave stale entries behind.
//! 5. Ask the edge to revalidate through the revalidation breaker.
//!
//! Stages 3 to 5 never fail the mutation. Their outcomes are reported in the
//! returned [`UpdateOperationResult`].

mod fresh_read;
mod result;

pub use fresh_read::{read_after_write, FreshReadPolicy};
pub use result::{FreshRead, StageResult, UpdateOperationResult};

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use couponsync_core::cache::{
    change_invalidation_plan, deserialize_entity, entity_key, serialize_entity, CacheKind,
    InvalidationPlan,
};
use couponsync_core::entity::{ChangeEvent, ChangeType, Entity, EntityType, Fields};
use couponsync_core::resilience::Dependency;
use couponsync_core::revalidation::{
    RevalidationError, RevalidationOutcome, RevalidationRequest, Revalidator,
};
use couponsync_core::storage::{EntityRepository, RepositoryError};

use crate::cache::CachePort;
use crate::config::Config;
use crate::notify::NotificationHub;
use crate::resilience::CircuitBreaker;

use fresh_read::with_timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub fresh_read_attempts: u32,
    pub fresh_read_backoff: Duration,
    pub datastore_timeout: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            fresh_read_attempts: 3,
            fresh_read_backoff: Duration::from_millis(50),
            datastore_timeout: Duration::from_millis(2000),
        }
    }
}

impl From<&Config> for CoordinatorSettings {
    fn from(config: &Config) -> Self {
        Self {
            fresh_read_attempts: config.fresh_read_attempts,
            fresh_read_backoff: config.fresh_read_backoff,
            datastore_timeout: config.datastore_timeout,
        }
    }
}

/// Issues strictly increasing event versions.
///
/// Versions are wall-clock milliseconds, bumped past the previous value when
/// two mutations land in the same millisecond or the clock steps back.
#[derive(Debug, Default)]
struct VersionClock {
    last: AtomicI64,
}

impl VersionClock {
    fn next(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }
}

/// Sequences datastore writes with cache, notification and revalidation side
/// effects.
pub struct UpdateCoordinator {
    repository: Arc<dyn EntityRepository>,
    cache: Arc<CachePort>,
    hub: Arc<NotificationHub>,
    breakers: Arc<CircuitBreaker>,
    revalidator: Arc<dyn Revalidator>,
    settings: CoordinatorSettings,
    versions: VersionClock,
}

impl UpdateCoordinator {
    pub fn new(
        repository: Arc<dyn EntityRepository>,
        cache: Arc<CachePort>,
        hub: Arc<NotificationHub>,
        breakers: Arc<CircuitBreaker>,
        revalidator: Arc<dyn Revalidator>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            repository,
            cache,
            hub,
            breakers,
            revalidator,
            settings,
            versions: VersionClock::default(),
        }
    }

    /// Creates an entity. The id is taken from an `id` string field when
    /// present, otherwise a new UUID is assigned.
    pub async fn create_entity(
        &self,
        entity_type: EntityType,
        mut fields: Fields,
    ) -> UpdateOperationResult {
        let id = match fields.remove("id") {
            Some(serde_json::Value::String(id)) if !id.is_empty() => id,
            _ => Uuid::new_v4().to_string(),
        };

        let written = with_timeout(
            self.settings.datastore_timeout,
            self.repository.insert(entity_type, &id, fields),
        )
        .await;

        match written {
            Ok(entity) => self.propagate(ChangeType::Created, entity, None).await,
            Err(e) => self.write_failed(ChangeType::Created, entity_type, &id, e),
        }
    }

    /// Applies a partial update to an existing entity.
    pub async fn update_entity(
        &self,
        entity_type: EntityType,
        id: &str,
        patch: Fields,
    ) -> UpdateOperationResult {
        let written = with_timeout(
            self.settings.datastore_timeout,
            self.repository.update_by_id(entity_type, id, &patch),
        )
        .await
        .and_then(|snapshots| snapshots.ok_or_else(|| not_found(entity_type, id)));

        match written {
            Ok((previous, entity)) => {
                self.propagate(ChangeType::Updated, entity, Some(previous))
                    .await
            }
            Err(e) => self.write_failed(ChangeType::Updated, entity_type, id, e),
        }
    }

    /// Deletes an entity. The removed document drives invalidation and the
    /// change event.
    pub async fn delete_entity(&self, entity_type: EntityType, id: &str) -> UpdateOperationResult {
        let removed = with_timeout(
            self.settings.datastore_timeout,
            self.repository.delete_by_id(entity_type, id),
        )
        .await
        .and_then(|entity| entity.ok_or_else(|| not_found(entity_type, id)));

        match removed {
            Ok(entity) => self.propagate(ChangeType::Deleted, entity, None).await,
            Err(e) => self.write_failed(ChangeType::Deleted, entity_type, id, e),
        }
    }

    /// Cache-aside read of a single entity.
    ///
    /// Cache problems never fail the read. They fall through to the
    /// datastore, whose errors do propagate. The snapshot is only cached if
    /// no invalidation touched the key while it was being read.
    pub async fn get_entity(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> Result<Option<Entity>, RepositoryError> {
        let key = entity_key(entity_type, id);

        if let Some(bytes) = self.cache.get(&key).await {
            match deserialize_entity(&bytes) {
                Ok(entity) => return Ok(Some(entity)),
                Err(e) => tracing::warn!(key = %key, error = %e, "Discarding unreadable cache entry"),
            }
        }

        let generation = self.cache.generation(&key);
        let entity = with_timeout(
            self.settings.datastore_timeout,
            self.repository.find_by_id(entity_type, id),
        )
        .await?;

        if let Some(entity) = &entity {
            match serialize_entity(entity) {
                Ok(bytes) => {
                    self.cache
                        .set_if_current(CacheKind::detail(entity_type), &key, &bytes, generation)
                        .await;
                }
                Err(e) => tracing::warn!(key = %key, error = %e, "Failed to serialize entity for cache"),
            }
        }

        Ok(entity)
    }

    fn write_failed(
        &self,
        change_type: ChangeType,
        entity_type: EntityType,
        id: &str,
        error: RepositoryError,
    ) -> UpdateOperationResult {
        tracing::warn!(
            change_type = change_type.as_str(),
            entity_type = %entity_type,
            entity_id = %id,
            error = %error,
            "Primary write failed, skipping side effects"
        );
        UpdateOperationResult::write_failed(change_type, error)
    }

    /// Runs stages 2 to 5 after a successful write.
    async fn propagate(
        &self,
        change_type: ChangeType,
        written: Entity,
        previous: Option<Entity>,
    ) -> UpdateOperationResult {
        let (entity, fresh_read) = if change_type == ChangeType::Deleted {
            (written, None)
        } else {
            let policy = FreshReadPolicy {
                attempts: self.settings.fresh_read_attempts,
                backoff: self.settings.fresh_read_backoff,
                timeout: self.settings.datastore_timeout,
            };
            let (entity, fresh) = read_after_write(self.repository.as_ref(), written, policy).await;
            (entity, Some(fresh))
        };

        let version = self.versions.next();

        let plan = change_invalidation_plan(previous.as_ref(), &entity);

        let mut cache_result = self.invalidate_cache(&entity, &plan).await;
        let (notification_result, fallback_invalidation) =
            self.notify(&entity, &plan, change_type, version).await;
        if let Some(rerun) = fallback_invalidation {
            if rerun.success || !cache_result.success {
                cache_result = rerun;
            }
        }
        let revalidation_result = self
            .revalidate(&entity, previous.as_ref(), change_type, version)
            .await;

        let result = UpdateOperationResult {
            change_type,
            entity: Some(entity),
            version: Some(version),
            database_result: StageResult::succeeded(None),
            fresh_read,
            cache_result: Some(cache_result),
            notification_result: Some(notification_result),
            revalidation_result: Some(revalidation_result),
            database_error: None,
        };

        let degraded = result.degraded_stages();
        if degraded.is_empty() {
            tracing::info!(
                change_type = change_type.as_str(),
                entity_id = ?result.entity.as_ref().map(|e| e.id.as_str()),
                version,
                "Mutation propagated"
            );
        } else {
            tracing::warn!(
                change_type = change_type.as_str(),
                entity_id = ?result.entity.as_ref().map(|e| e.id.as_str()),
                version,
                degraded = ?degraded,
                "Mutation committed with degraded side effects"
            );
        }

        result
    }

    async fn invalidate_cache(&self, entity: &Entity, plan: &InvalidationPlan) -> StageResult {
        self.breakers
            .call_with_fallback(
                Dependency::Cache,
                || async move {
                    let outcome = self.cache.invalidate(plan).await;
                    if outcome.success {
                        Ok(StageResult::succeeded(Some(outcome.count)))
                    } else {
                        Err(outcome
                            .error
                            .unwrap_or_else(|| "cache invalidation failed".to_string()))
                    }
                },
                |err| async move {
                    tracing::warn!(
                        entity_id = %entity.id,
                        error = %err,
                        "Cache invalidation fell back, entries expire by TTL"
                    );
                    StageResult::fallback(err, Some(0))
                },
            )
            .await
    }

    /// Publishes the change event. On failure the fallback re-runs cache
    /// invalidation and hands back its result.
    async fn notify(
        &self,
        entity: &Entity,
        plan: &InvalidationPlan,
        change_type: ChangeType,
        version: i64,
    ) -> (StageResult, Option<StageResult>) {
        let event = &ChangeEvent::from_entity(entity, change_type, version);

        self.breakers
            .call_with_fallback(
                Dependency::Notification,
                || async move {
                    self.hub
                        .publish(event)
                        .await
                        .map(|delivered| (StageResult::succeeded(Some(delivered as u64)), None))
                },
                |err| async move {
                    tracing::warn!(
                        entity_id = %entity.id,
                        version,
                        error = %err,
                        "Change notification failed, invalidating cache directly"
                    );
                    let rerun = self.invalidate_cache(entity, plan).await;
                    (StageResult::fallback(err, None), Some(rerun))
                },
            )
            .await
    }

    /// Revalidates the entity's public identifier, and the old one when an
    /// update moved it.
    async fn revalidate(
        &self,
        entity: &Entity,
        previous: Option<&Entity>,
        change_type: ChangeType,
        version: i64,
    ) -> StageResult {
        let requests = &RevalidationRequest::for_change(previous, entity, change_type, version);

        self.breakers
            .call_with_fallback(
                Dependency::Revalidation,
                || async move {
                    let mut revalidated = 0;
                    for request in requests {
                        if self.revalidator.revalidate(request).await?
                            == RevalidationOutcome::Revalidated
                        {
                            revalidated += 1;
                        }
                    }
                    Ok::<_, RevalidationError>(if revalidated == 0 {
                        StageResult::skipped()
                    } else {
                        StageResult::succeeded(Some(revalidated))
                    })
                },
                |err| async move {
                    tracing::warn!(
                        identifiers = ?requests.iter().map(|r| r.identifier.as_str()).collect::<Vec<_>>(),
                        error = %err,
                        "Revalidation failed"
                    );
                    StageResult::failed(err)
                },
            )
            .await
    }
}

fn not_found(entity_type: EntityType, id: &str) -> RepositoryError {
    RepositoryError::NotFound {
        entity_type: entity_type.as_str(),
        id: id.to_string(),
    }
}
