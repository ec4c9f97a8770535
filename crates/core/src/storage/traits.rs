use async_trait::async_trait;

use crate::entity::{Entity, EntityType, Fields};

use super::Result;

/// Primary datastore for stores and coupons.
///
/// Implementations must apply `update_by_id` atomically per document; the
/// coordinator adds no locking of its own.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Gets an entity by its ID.
    async fn find_by_id(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>>;

    /// Inserts a new entity. Fails with `AlreadyExists` on a duplicate id or slug.
    async fn insert(&self, entity_type: EntityType, id: &str, fields: Fields) -> Result<Entity>;

    /// Applies `patch` to an existing entity and returns the document as it
    /// was before the patch and as it is after, or `None` when no entity has
    /// that id.
    async fn update_by_id(
        &self,
        entity_type: EntityType,
        id: &str,
        patch: &Fields,
    ) -> Result<Option<(Entity, Entity)>>;

    /// Deletes an entity, returning the removed document, or `None` when no
    /// entity has that id.
    async fn delete_by_id(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>>;
}
