//! Read-after-write with bounded retries.

use std::future::Future;
use std::time::Duration;

use couponsync_core::entity::Entity;
use couponsync_core::storage::{EntityRepository, RepositoryError, Result};

use super::result::FreshRead;

/// Applies the datastore timeout to a single repository call.
pub(crate) async fn with_timeout<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or_else(|_| Err(RepositoryError::Timeout(timeout.as_millis() as u64)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshReadPolicy {
    pub attempts: u32,
    /// Delay before the second attempt, doubled after each further failure.
    pub backoff: Duration,
    pub timeout: Duration,
}

/// Re-reads `written` from the datastore so downstream stages see the
/// committed document.
///
/// Only transient errors are retried. A not-found answer means the entity
/// went away after the write and is final. When no read succeeds the write's
/// own return value is used and the result is marked unverified.
pub async fn read_after_write(
    repository: &dyn EntityRepository,
    written: Entity,
    policy: FreshReadPolicy,
) -> (Entity, FreshRead) {
    let attempts = policy.attempts.max(1);
    let mut delay = policy.backoff;

    let mut attempt = 0;
    loop {
        attempt += 1;
        let read = with_timeout(
            policy.timeout,
            repository.find_by_id(written.entity_type, &written.id),
        )
        .await;

        match read {
            Ok(Some(entity)) => {
                return (
                    entity,
                    FreshRead {
                        verified: true,
                        attempts: attempt,
                        error: None,
                    },
                );
            }
            Ok(None) => {
                tracing::warn!(
                    entity_type = %written.entity_type,
                    entity_id = %written.id,
                    "Entity missing on read-after-write, using write result"
                );
                return (
                    written,
                    FreshRead {
                        verified: false,
                        attempts: attempt,
                        error: Some("not found on read-after-write".to_string()),
                    },
                );
            }
            Err(e) if e.is_transient() && attempt < attempts => {
                tracing::debug!(
                    entity_id = %written.id,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Read-after-write failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(e) => {
                tracing::warn!(
                    entity_type = %written.entity_type,
                    entity_id = %written.id,
                    attempts = attempt,
                    error = %e,
                    "Read-after-write gave up, using write result"
                );
                return (
                    written,
                    FreshRead {
                        verified: false,
                        attempts: attempt,
                        error: Some(e.to_string()),
                    },
                );
            }
        }
    }
}
