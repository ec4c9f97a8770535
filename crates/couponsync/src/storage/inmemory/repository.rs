//! In-memory repository implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use couponsync_core::entity::{apply_patch, validate_fields, Entity, EntityType, Fields};
use couponsync_core::storage::{EntityRepository, RepositoryError, Result};

type DocumentKey = (EntityType, String);

/// In-memory document store.
///
/// Every write holds the write lock for its whole read-modify-write cycle,
/// which gives the per-document atomic update the coordinator relies on.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    documents: Arc<RwLock<HashMap<DocumentKey, Entity>>>,
}

impl InMemoryRepository {
    /// Creates a new empty in-memory repository.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Rejects a slug already used by another entity of the same type.
fn ensure_unique_slug(
    documents: &HashMap<DocumentKey, Entity>,
    candidate: &Entity,
) -> Result<()> {
    let Some(slug) = candidate.slug() else {
        return Ok(());
    };
    let taken = documents.values().any(|existing| {
        existing.entity_type == candidate.entity_type
            && existing.id != candidate.id
            && existing.slug() == Some(slug)
    });
    if taken {
        return Err(RepositoryError::AlreadyExists {
            entity_type: candidate.entity_type.as_str(),
            id: slug.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl EntityRepository for InMemoryRepository {
    async fn find_by_id(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>> {
        let documents = self.documents.read().await;
        Ok(documents.get(&(entity_type, id.to_string())).cloned())
    }

    async fn insert(&self, entity_type: EntityType, id: &str, fields: Fields) -> Result<Entity> {
        validate_fields(entity_type, &fields)?;
        let entity = Entity::new(entity_type, id, fields);

        let mut documents = self.documents.write().await;
        let key = (entity_type, id.to_string());
        if documents.contains_key(&key) {
            return Err(RepositoryError::AlreadyExists {
                entity_type: entity_type.as_str(),
                id: id.to_string(),
            });
        }
        ensure_unique_slug(&documents, &entity)?;

        documents.insert(key, entity.clone());
        Ok(entity)
    }

    async fn update_by_id(
        &self,
        entity_type: EntityType,
        id: &str,
        patch: &Fields,
    ) -> Result<Option<(Entity, Entity)>> {
        let mut documents = self.documents.write().await;
        let key = (entity_type, id.to_string());
        let Some(current) = documents.get(&key) else {
            return Ok(None);
        };

        let mut updated = current.clone();
        apply_patch(&mut updated.fields, patch)?;
        validate_fields(entity_type, &updated.fields)?;
        ensure_unique_slug(&documents, &updated)?;
        updated.updated_at = Utc::now();

        let previous = current.clone();
        documents.insert(key, updated.clone());
        Ok(Some((previous, updated)))
    }

    async fn delete_by_id(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>> {
        let mut documents = self.documents.write().await;
        Ok(documents.remove(&(entity_type, id.to_string())))
    }
}
