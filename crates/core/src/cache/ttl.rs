//! Per-kind cache TTL table.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use crate::entity::EntityType;

/// The kinds of cached views, each with its own lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    StoreDetail,
    StoreList,
    CouponDetail,
    CouponList,
}

impl CacheKind {
    /// The detail view kind of an entity type.
    pub fn detail(entity_type: EntityType) -> Self {
        match entity_type {
            EntityType::Store => CacheKind::StoreDetail,
            EntityType::Coupon => CacheKind::CouponDetail,
        }
    }

    /// The list view kind of an entity type.
    pub fn list(entity_type: EntityType) -> Self {
        match entity_type {
            EntityType::Store => CacheKind::StoreList,
            EntityType::Coupon => CacheKind::CouponList,
        }
    }
}

/// Default lifetime of detail views.
pub const DEFAULT_DETAIL_TTL: Duration = Duration::from_secs(3600);

/// Default lifetime of list views. Lists churn more, so they live shorter.
pub const DEFAULT_LIST_TTL: Duration = Duration::from_secs(300);

/// TTL lookup table keyed by [`CacheKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    table: HashMap<CacheKind, Duration>,
}

impl TtlPolicy {
    /// Builds a policy with one TTL for detail views and one for lists.
    pub fn new(detail: Duration, list: Duration) -> Self {
        let table = HashMap::from([
            (CacheKind::StoreDetail, detail),
            (CacheKind::CouponDetail, detail),
            (CacheKind::StoreList, list),
            (CacheKind::CouponList, list),
        ]);
        Self { table }
    }

    /// Overrides the TTL of a single kind.
    pub fn with(mut self, kind: CacheKind, ttl: Duration) -> Self {
        self.table.insert(kind, ttl);
        self
    }

    /// Returns the TTL for a kind.
    pub fn ttl_for(&self, kind: CacheKind) -> Duration {
        self.table.get(&kind).copied().unwrap_or(DEFAULT_LIST_TTL)
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_DETAIL_TTL, DEFAULT_LIST_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lists_are_shorter_lived() {
        let policy = TtlPolicy::default();
        assert!(policy.ttl_for(CacheKind::StoreList) < policy.ttl_for(CacheKind::StoreDetail));
        assert_eq!(policy.ttl_for(CacheKind::CouponDetail), DEFAULT_DETAIL_TTL);
    }

    #[test]
    fn test_override_single_kind() {
        let policy = TtlPolicy::default().with(CacheKind::CouponList, Duration::from_secs(30));
        assert_eq!(policy.ttl_for(CacheKind::CouponList), Duration::from_secs(30));
        assert_eq!(policy.ttl_for(CacheKind::StoreList), DEFAULT_LIST_TTL);
    }

    #[test]
    fn test_kind_for_entity_type() {
        assert_eq!(CacheKind::detail(EntityType::Coupon), CacheKind::CouponDetail);
        assert_eq!(CacheKind::list(EntityType::Store), CacheKind::StoreList);
    }
}
