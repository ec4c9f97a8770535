use thiserror::Error;

/// Errors that can occur during cache and broker operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Cache operation failed: {0}")]
    OperationFailed(String),
    #[error("Cache operation timed out after {0}ms")]
    Timeout(u64),
    #[error("Pattern '{0}' is outside the reserved cache namespace")]
    OutsideNamespace(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Publish failed: {0}")]
    PublishFailed(String),
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
