use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Entity, EntityType};

/// Subscription channel that matches every event.
pub const ALL_CHANNEL: &str = "all";

/// Kind of mutation that produced a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Updated => "updated",
            ChangeType::Deleted => "deleted",
        }
    }
}

/// Immutable record of a successful write, fanned out to connected clients.
///
/// `version` is a wall-clock millisecond stamp. Delivery order is not
/// guaranteed across instances, so consumers resolve overlapping updates for
/// the same entity with last-write-wins on `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub change_type: ChangeType,
    pub payload: serde_json::Value,
    pub version: i64,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Builds an event from an entity snapshot.
    pub fn from_entity(entity: &Entity, change_type: ChangeType, version: i64) -> Self {
        let payload = serde_json::to_value(entity).unwrap_or(serde_json::Value::Null);
        Self {
            entity_type: entity.entity_type,
            entity_id: entity.id.clone(),
            change_type,
            payload,
            version,
            timestamp: Utc::now(),
        }
    }

    /// The notification channel this event is published on.
    pub fn channel(&self) -> &'static str {
        self.entity_type.plural()
    }

    /// Whether a client subscribed to `channel` should receive this event.
    pub fn matches_channel(&self, channel: &str) -> bool {
        channel == ALL_CHANNEL || channel == self.channel()
    }

    /// Last-write-wins: true when `self` should replace `other` for the same
    /// entity.
    pub fn supersedes(&self, other: &ChangeEvent) -> bool {
        self.version > other.version
    }
}
