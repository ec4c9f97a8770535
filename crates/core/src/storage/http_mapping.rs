//! Pure functions for mapping repository errors to HTTP status codes.

use super::RepositoryError;

/// Maps a [`RepositoryError`] to an HTTP status code.
///
/// - `NotFound` -> 404 (Not Found)
/// - `AlreadyExists` -> 409 (Conflict)
/// - `ConnectionFailed` -> 503 (Service Unavailable)
/// - `Timeout` -> 504 (Gateway Timeout)
/// - `QueryFailed` -> 500 (Internal Server Error)
/// - `Serialization` -> 500 (Internal Server Error)
/// - `InvalidData` -> 400 (Bad Request)
///
/// # Examples
///
/// ```
/// use couponsync_core::storage::{RepositoryError, repository_error_to_status_code};
///
/// let error = RepositoryError::NotFound {
///     entity_type: "store",
///     id: "abc-123".to_string(),
/// };
/// assert_eq!(repository_error_to_status_code(&error), 404);
/// ```
pub fn repository_error_to_status_code(error: &RepositoryError) -> u16 {
    match error {
        RepositoryError::NotFound { .. } => 404,
        RepositoryError::AlreadyExists { .. } => 409,
        RepositoryError::ConnectionFailed(_) => 503,
        RepositoryError::Timeout(_) => 504,
        RepositoryError::QueryFailed(_) => 500,
        RepositoryError::Serialization(_) => 500,
        RepositoryError::InvalidData(_) => 400,
    }
}
