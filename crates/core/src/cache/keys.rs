use crate::entity::{Entity, EntityType};

/// Reserved prefix of every cache key owned by this service.
///
/// Pattern deletion refuses to run on anything outside it.
pub const NAMESPACE: &str = "cdir:";

/// Generates a deterministic cache key from a key type and parameters.
///
/// Parameters are sorted by name (then value) before concatenation, so the
/// same parameter set always produces the same key regardless of the order it
/// was supplied in. The key always ends with the parameter segment, which is
/// empty when there are no parameters.
///
/// # Examples
///
/// ```
/// use couponsync_core::cache::generate_key;
///
/// let a = generate_key("store", [("id", "42"), ("lang", "en")]);
/// let b = generate_key("store", [("lang", "en"), ("id", "42")]);
/// assert_eq!(a, b);
/// assert_eq!(a, "cdir:store:id=42&lang=en");
/// ```
pub fn generate_key<I, K, V>(key_type: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<(String, String)> = params
        .into_iter()
        .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
        .collect();
    pairs.sort();

    let joined = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    format!("{NAMESPACE}{key_type}:{joined}")
}

const NO_PARAMS: [(&str, &str); 0] = [];

/// Cache key for a store detail view.
pub fn store_key<I, K, V>(store_id: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    generate_key(&format!("store:{store_id}"), params)
}

/// Cache key for a store detail view looked up by slug.
pub fn store_slug_key<I, K, V>(slug: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    generate_key(&format!("store-slug:{slug}"), params)
}

/// Cache key for the coupon listing of one store.
pub fn store_coupons_key<I, K, V>(store_id: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    generate_key(&format!("store:{store_id}:coupons"), params)
}

/// Cache key for a store listing page.
pub fn store_list_key<I, K, V>(params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    generate_key("stores", params)
}

/// Cache key for a coupon detail view.
pub fn coupon_key<I, K, V>(coupon_id: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    generate_key(&format!("coupon:{coupon_id}"), params)
}

/// Cache key for a global coupon listing page.
pub fn coupon_list_key<I, K, V>(params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    generate_key("coupons", params)
}

/// The parameterless detail key of an entity, used by cache-aside reads.
pub fn entity_key(entity_type: EntityType, id: &str) -> String {
    match entity_type {
        EntityType::Store => store_key(id, NO_PARAMS),
        EntityType::Coupon => coupon_key(id, NO_PARAMS),
    }
}

/// Matches every key scoped to a store: detail variants and its coupon listings.
pub fn store_scope_pattern(store_id: &str) -> String {
    format!("{NAMESPACE}store:{store_id}:*")
}

/// Matches every slug-addressed detail variant of a store.
pub fn store_slug_pattern(slug: &str) -> String {
    format!("{NAMESPACE}store-slug:{slug}:*")
}

/// Matches the coupon listings of one store.
pub fn store_coupons_pattern(store_id: &str) -> String {
    format!("{NAMESPACE}store:{store_id}:coupons:*")
}

/// Matches every store listing page.
pub fn store_lists_pattern() -> String {
    format!("{NAMESPACE}stores:*")
}

/// Matches every detail variant of a coupon.
pub fn coupon_scope_pattern(coupon_id: &str) -> String {
    format!("{NAMESPACE}coupon:{coupon_id}:*")
}

/// Matches every global coupon listing page.
pub fn coupon_lists_pattern() -> String {
    format!("{NAMESPACE}coupons:*")
}

/// Returns true when a pattern is confined to this service's keyspace.
pub fn is_namespaced(pattern: &str) -> bool {
    pattern.len() > NAMESPACE.len() && pattern.starts_with(NAMESPACE)
}

/// Keys and patterns that may hold stale data after `entity` changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationPlan {
    /// Keys deleted directly.
    pub keys: Vec<String>,
    /// Namespaced patterns swept with a cursor scan.
    pub patterns: Vec<String>,
}

/// Computes the invalidation plan for an entity.
///
/// A store invalidates its own scope (detail variants and its coupon
/// listings), its slug scope and every listing page, because store names are
/// rendered on coupon listings too. A coupon invalidates its own scope, the
/// coupon listing of its parent store and the global coupon listings.
pub fn invalidation_plan(entity: &Entity) -> InvalidationPlan {
    let keys = vec![entity_key(entity.entity_type, &entity.id)];

    let patterns = match entity.entity_type {
        EntityType::Store => {
            let mut patterns = vec![store_scope_pattern(&entity.id)];
            if let Some(slug) = entity.slug() {
                patterns.push(store_slug_pattern(slug));
            }
            patterns.push(store_lists_pattern());
            patterns.push(coupon_lists_pattern());
            patterns
        }
        EntityType::Coupon => {
            let mut patterns = vec![coupon_scope_pattern(&entity.id)];
            if let Some(store_id) = entity.parent_store_id() {
                patterns.push(store_coupons_pattern(store_id));
            }
            patterns.push(coupon_lists_pattern());
            patterns
        }
    };

    InvalidationPlan { keys, patterns }
}

/// Computes the invalidation plan for a change from `previous` to `current`.
///
/// Entries keyed by the old slug or the old parent store are stale too, so
/// the plan covers both snapshots. Duplicates are dropped, first occurrence
/// wins.
pub fn change_invalidation_plan(previous: Option<&Entity>, current: &Entity) -> InvalidationPlan {
    let mut plan = invalidation_plan(current);
    if let Some(previous) = previous {
        let old = invalidation_plan(previous);
        for key in old.keys {
            if !plan.keys.contains(&key) {
                plan.keys.push(key);
            }
        }
        for pattern in old.patterns {
            if !plan.patterns.contains(&pattern) {
                plan.patterns.push(pattern);
            }
        }
    }
    plan
}

/// Returns the broker channel carrying change events for an entity type.
pub fn broker_channel(entity_type: EntityType) -> String {
    format!("couponsync:events:{}", entity_type.plural())
}

/// Returns every broker channel the notification bridge subscribes to.
pub fn broker_channels() -> Vec<String> {
    EntityType::all().iter().map(|t| broker_channel(*t)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::pattern_matches;
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap};

    fn entity(entity_type: EntityType, id: &str, fields: serde_json::Value) -> Entity {
        Entity::new(entity_type, id, fields.as_object().cloned().unwrap())
    }

    #[test]
    fn test_generate_key_is_order_independent() {
        let a = generate_key("store", [("id", "42"), ("lang", "en")]);
        let b = generate_key("store", [("lang", "en"), ("id", "42")]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_generate_key_from_maps() {
        let mut hash = HashMap::new();
        hash.insert("page", "2");
        hash.insert("category", "food");
        let mut tree = BTreeMap::new();
        tree.insert("category", "food");
        tree.insert("page", "2");

        assert_eq!(generate_key("stores", &hash), generate_key("stores", &tree));
        assert_eq!(
            generate_key("stores", &hash),
            "cdir:stores:category=food&page=2"
        );
    }

    #[test]
    fn test_generate_key_without_params_ends_with_separator() {
        assert_eq!(generate_key("stores", NO_PARAMS), "cdir:stores:");
    }

    #[test]
    fn test_entity_key() {
        assert_eq!(entity_key(EntityType::Store, "42"), "cdir:store:42:");
        assert_eq!(entity_key(EntityType::Coupon, "7"), "cdir:coupon:7:");
    }

    #[test]
    fn test_store_scope_covers_detail_and_coupon_listing() {
        let pattern = store_scope_pattern("42");
        assert!(pattern_matches(&pattern, &store_key("42", NO_PARAMS)));
        assert!(pattern_matches(&pattern, &store_key("42", [("lang", "en")])));
        assert!(pattern_matches(
            &pattern,
            &store_coupons_key("42", [("page", "1")])
        ));
        assert!(!pattern_matches(&pattern, &store_key("420", NO_PARAMS)));
    }

    #[test]
    fn test_store_coupons_pattern_is_scoped_to_store() {
        let pattern = store_coupons_pattern("s1");
        assert!(pattern_matches(&pattern, &store_coupons_key("s1", NO_PARAMS)));
        assert!(!pattern_matches(&pattern, &store_coupons_key("s10", NO_PARAMS)));
        assert!(!pattern_matches(&pattern, &store_key("s1", NO_PARAMS)));
    }

    #[test]
    fn test_list_patterns() {
        assert!(pattern_matches(
            &store_lists_pattern(),
            &store_list_key([("page", "3")])
        ));
        assert!(pattern_matches(
            &coupon_lists_pattern(),
            &coupon_list_key([("sort", "new")])
        ));
        assert!(!pattern_matches(
            &coupon_lists_pattern(),
            &coupon_key("c1", NO_PARAMS)
        ));
    }

    #[test]
    fn test_is_namespaced() {
        assert!(is_namespaced("cdir:store:1:*"));
        assert!(!is_namespaced("*"));
        assert!(!is_namespaced("session:*"));
        assert!(!is_namespaced("cdir:"));
    }

    #[test]
    fn test_invalidation_plan_for_store() {
        let store = entity(EntityType::Store, "s1", json!({"name": "A", "slug": "acme"}));
        let plan = invalidation_plan(&store);

        assert_eq!(plan.keys, vec!["cdir:store:s1:".to_string()]);
        assert_eq!(
            plan.patterns,
            vec![
                "cdir:store:s1:*".to_string(),
                "cdir:store-slug:acme:*".to_string(),
                "cdir:stores:*".to_string(),
                "cdir:coupons:*".to_string(),
            ]
        );
        assert!(plan.patterns.iter().all(|p| is_namespaced(p)));
    }

    #[test]
    fn test_invalidation_plan_for_coupon_includes_parent() {
        let coupon = entity(
            EntityType::Coupon,
            "c1",
            json!({"title": "Deal", "storeId": "s1"}),
        );
        let plan = invalidation_plan(&coupon);

        assert_eq!(plan.keys, vec!["cdir:coupon:c1:".to_string()]);
        assert_eq!(
            plan.patterns,
            vec![
                "cdir:coupon:c1:*".to_string(),
                "cdir:store:s1:coupons:*".to_string(),
                "cdir:coupons:*".to_string(),
            ]
        );
    }

    #[test]
    fn test_change_plan_covers_old_slug() {
        let before = entity(EntityType::Store, "s1", json!({"name": "A", "slug": "acme"}));
        let after = entity(
            EntityType::Store,
            "s1",
            json!({"name": "A", "slug": "acme-corp"}),
        );
        let plan = change_invalidation_plan(Some(&before), &after);

        assert_eq!(plan.keys, vec!["cdir:store:s1:".to_string()]);
        assert_eq!(
            plan.patterns,
            vec![
                "cdir:store:s1:*".to_string(),
                "cdir:store-slug:acme-corp:*".to_string(),
                "cdir:stores:*".to_string(),
                "cdir:coupons:*".to_string(),
                "cdir:store-slug:acme:*".to_string(),
            ]
        );
    }

    #[test]
    fn test_change_plan_covers_old_parent_store() {
        let before = entity(
            EntityType::Coupon,
            "c1",
            json!({"title": "Deal", "storeId": "s1"}),
        );
        let after = entity(
            EntityType::Coupon,
            "c1",
            json!({"title": "Deal", "storeId": "s2"}),
        );
        let plan = change_invalidation_plan(Some(&before), &after);

        assert!(plan.patterns.contains(&"cdir:store:s1:coupons:*".to_string()));
        assert!(plan.patterns.contains(&"cdir:store:s2:coupons:*".to_string()));
        assert_eq!(plan.patterns.len(), 4);
    }

    #[test]
    fn test_change_plan_without_previous_matches_entity_plan() {
        let coupon = entity(
            EntityType::Coupon,
            "c1",
            json!({"title": "Deal", "storeId": "s1"}),
        );
        assert_eq!(
            change_invalidation_plan(None, &coupon),
            invalidation_plan(&coupon)
        );
        assert_eq!(
            change_invalidation_plan(Some(&coupon), &coupon),
            invalidation_plan(&coupon)
        );
    }

    #[test]
    fn test_broker_channels() {
        assert_eq!(
            broker_channels(),
            vec![
                "couponsync:events:stores".to_string(),
                "couponsync:events:coupons".to_string()
            ]
        );
    }
}
