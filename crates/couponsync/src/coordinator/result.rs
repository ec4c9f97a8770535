//! Per-stage outcome records returned by every mutation.

use serde::Serialize;

use couponsync_core::entity::{ChangeType, Entity};
use couponsync_core::storage::RepositoryError;

/// Outcome of one stage of a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResult {
    pub success: bool,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Keys invalidated or clients reached, where that applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// The stage had nothing to do (e.g. revalidation not configured).
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

impl StageResult {
    pub fn succeeded(count: Option<u64>) -> Self {
        Self {
            success: true,
            fallback_used: false,
            error: None,
            count,
            skipped: false,
        }
    }

    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::succeeded(None)
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            fallback_used: false,
            error: Some(error.to_string()),
            count: None,
            skipped: false,
        }
    }

    /// A failed stage whose fallback ran instead.
    pub fn fallback(error: impl ToString, count: Option<u64>) -> Self {
        Self {
            fallback_used: true,
            count,
            ..Self::failed(error)
        }
    }
}

/// How the post-write snapshot was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshRead {
    /// True when the snapshot came from a read after the write. False means
    /// the write's own return value was used.
    pub verified: bool,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Composite result of a create, update or delete.
///
/// The downstream results are `None` when the stage was never attempted,
/// which is always the case when the primary write failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOperationResult {
    pub change_type: ChangeType,
    pub entity: Option<Entity>,
    pub version: Option<i64>,
    pub database_result: StageResult,
    pub fresh_read: Option<FreshRead>,
    pub cache_result: Option<StageResult>,
    pub notification_result: Option<StageResult>,
    pub revalidation_result: Option<StageResult>,
    /// The primary write's error, kept for status mapping.
    #[serde(skip)]
    pub database_error: Option<RepositoryError>,
}

impl UpdateOperationResult {
    /// Result of a primary write that failed. No other stage runs.
    pub fn write_failed(change_type: ChangeType, error: RepositoryError) -> Self {
        Self {
            change_type,
            entity: None,
            version: None,
            database_result: StageResult::failed(&error),
            fresh_read: None,
            cache_result: None,
            notification_result: None,
            revalidation_result: None,
            database_error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.database_result.success
    }

    /// Names of the downstream stages that did not succeed.
    pub fn degraded_stages(&self) -> Vec<&'static str> {
        [
            ("cache", &self.cache_result),
            ("notification", &self.notification_result),
            ("revalidation", &self.revalidation_result),
        ]
        .into_iter()
        .filter(|(_, result)| result.as_ref().is_some_and(|r| !r.success))
        .map(|(name, _)| name)
        .collect()
    }
}
