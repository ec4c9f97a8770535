//! Pure functions for serializing entities to/from cache bytes.
//!
//! Values are stored as JSON so cached entries stay readable with
//! `redis-cli`.

use thiserror::Error;

use crate::entity::Entity;

/// Errors that can occur during cache serialization/deserialization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SerializationError {
    /// Failed to serialize a value to bytes.
    #[error("Failed to serialize: {0}")]
    SerializeFailed(String),
    /// Failed to deserialize bytes to a value.
    #[error("Failed to deserialize: {0}")]
    DeserializeFailed(String),
}

/// Result type for serialization operations.
pub type Result<T> = std::result::Result<T, SerializationError>;

/// Serializes an entity to JSON bytes.
pub fn serialize_entity(entity: &Entity) -> Result<Vec<u8>> {
    serde_json::to_vec(entity).map_err(|e| SerializationError::SerializeFailed(e.to_string()))
}

/// Deserializes JSON bytes to an entity.
pub fn deserialize_entity(bytes: &[u8]) -> Result<Entity> {
    serde_json::from_slice(bytes).map_err(|e| SerializationError::DeserializeFailed(e.to_string()))
}
