use thiserror::Error;

use crate::entity::PatchError;

/// Errors that can occur during repository operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("{entity_type} not found: {id}")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },
    #[error("{entity_type} already exists: {id}")]
    AlreadyExists {
        entity_type: &'static str,
        id: String,
    },
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Query failed: {0}")]
    QueryFailed(String),
    #[error("Datastore call timed out after {0}ms")]
    Timeout(u64),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl RepositoryError {
    /// Whether retrying the same call may succeed.
    ///
    /// Not-found, conflicts and validation failures are final answers from the
    /// datastore; connection problems and timeouts are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RepositoryError::ConnectionFailed(_)
                | RepositoryError::QueryFailed(_)
                | RepositoryError::Timeout(_)
        )
    }
}

impl From<PatchError> for RepositoryError {
    fn from(err: PatchError) -> Self {
        RepositoryError::InvalidData(err.to_string())
    }
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_not_found_display() {
        let error = RepositoryError::NotFound {
            entity_type: "store",
            id: "abc-123".to_string(),
        };
        assert_eq!(error.to_string(), "store not found: abc-123");
    }

    #[test]
    fn test_repository_error_already_exists_display() {
        let error = RepositoryError::AlreadyExists {
            entity_type: "coupon",
            id: "summer-sale".to_string(),
        };
        assert_eq!(error.to_string(), "coupon already exists: summer-sale");
    }

    #[test]
    fn test_repository_error_timeout_display() {
        let error = RepositoryError::Timeout(2000);
        assert_eq!(error.to_string(), "Datastore call timed out after 2000ms");
    }

    #[test]
    fn test_transient_classification() {
        assert!(RepositoryError::ConnectionFailed("reset".into()).is_transient());
        assert!(RepositoryError::Timeout(10).is_transient());
        assert!(!RepositoryError::InvalidData("bad".into()).is_transient());
        assert!(!RepositoryError::NotFound {
            entity_type: "store",
            id: "1".into()
        }
        .is_transient());
    }

    #[test]
    fn test_patch_error_becomes_invalid_data() {
        let error: RepositoryError = PatchError::MissingField("name").into();
        assert_eq!(
            error,
            RepositoryError::InvalidData("Missing required field 'name'".to_string())
        );
    }
}
