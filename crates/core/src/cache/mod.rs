mod error;
mod keys;
mod patterns;
mod serialization;
mod traits;
mod ttl;

pub use error::{CacheError, Result};
pub use keys::{
    broker_channel, broker_channels, change_invalidation_plan, coupon_key, coupon_list_key, coupon_lists_pattern,
    coupon_scope_pattern, entity_key, generate_key, invalidation_plan, is_namespaced,
    store_coupons_key, store_coupons_pattern, store_key, store_list_key, store_lists_pattern,
    store_scope_pattern, store_slug_key, store_slug_pattern, InvalidationPlan, NAMESPACE,
};
pub use patterns::pattern_matches;
pub use serialization::{deserialize_entity, serialize_entity, SerializationError};
pub use traits::{CacheBackend, CachePubSub};
pub use ttl::{CacheKind, TtlPolicy, DEFAULT_DETAIL_TTL, DEFAULT_LIST_TTL};
