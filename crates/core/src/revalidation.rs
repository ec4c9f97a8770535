//! External cache revalidation port.
//!
//! After a write, the edge/SSR layer outside this service is asked to drop
//! its cached pages for the entity. The call is best-effort.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::entity::{ChangeType, Entity, EntityType};

/// Body sent to the revalidation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevalidationRequest {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub identifier: String,
    pub metadata: serde_json::Value,
}

impl RevalidationRequest {
    /// Builds the request for a changed entity.
    ///
    /// The identifier is the entity's slug when it has one, since that is
    /// what public page paths are keyed by.
    pub fn for_entity(entity: &Entity, change_type: ChangeType, version: i64) -> Self {
        let mut metadata = serde_json::json!({
            "entityId": entity.id,
            "changeType": change_type.as_str(),
            "version": version,
        });
        if let Some(store_id) = entity.parent_store_id() {
            metadata["storeId"] = serde_json::Value::String(store_id.to_string());
        }

        Self {
            entity_type: entity.entity_type,
            identifier: entity.public_identifier().to_string(),
            metadata,
        }
    }

    /// Builds the requests for a change from `previous` to `current`.
    ///
    /// The old snapshot gets a request of its own when its slug or parent
    /// store differs, so pages published under the old path are dropped too.
    pub fn for_change(
        previous: Option<&Entity>,
        current: &Entity,
        change_type: ChangeType,
        version: i64,
    ) -> Vec<Self> {
        let mut requests = vec![Self::for_entity(current, change_type, version)];
        if let Some(previous) = previous {
            let old = Self::for_entity(previous, change_type, version);
            if old != requests[0] {
                requests.push(old);
            }
        }
        requests
    }
}

/// Errors that can occur when calling the revalidation endpoint.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RevalidationError {
    #[error("Revalidation request failed: {0}")]
    RequestFailed(String),
    #[error("Revalidation endpoint returned {status}: {message}")]
    Rejected { status: u16, message: String },
}

/// Outcome of a revalidation call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevalidationOutcome {
    /// The endpoint accepted the request.
    Revalidated,
    /// No endpoint is configured; nothing was sent.
    Skipped,
}

/// Client of the external revalidation endpoint.
#[async_trait]
pub trait Revalidator: Send + Sync {
    async fn revalidate(
        &self,
        request: &RevalidationRequest,
    ) -> Result<RevalidationOutcome, RevalidationError>;
}
