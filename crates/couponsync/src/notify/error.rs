use thiserror::Error;

use couponsync_core::cache::CacheError;

/// Errors that can occur in the notification path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("Unknown client: {0}")]
    UnknownClient(String),
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),
    #[error("Broker unavailable, delivering to local clients only")]
    BrokerDegraded,
    #[error("Broker error: {0}")]
    Broker(#[from] CacheError),
    #[error("Broker bridge is not running")]
    BridgeClosed,
    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_error_display() {
        let error = NotifyError::from(CacheError::PublishFailed("closed".to_string()));
        assert_eq!(error.to_string(), "Broker error: Publish failed: closed");
    }

    #[test]
    fn test_degraded_display() {
        assert_eq!(
            NotifyError::BrokerDegraded.to_string(),
            "Broker unavailable, delivering to local clients only"
        );
    }
}
