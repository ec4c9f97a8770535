//! Glob matching for cache keys.
//!
//! Mirrors the subset of Redis `MATCH` syntax the service uses: `*` matches
//! any sequence of characters, everything else matches literally. The
//! in-memory backend uses it to emulate `SCAN MATCH`.

/// Checks if a cache key matches a glob pattern.
///
/// The pattern supports `*` as a wildcard that matches any sequence
/// of characters (including empty strings).
///
/// # Examples
///
/// ```
/// use couponsync_core::cache::pattern_matches;
///
/// assert!(pattern_matches("cdir:store:42:", "cdir:store:42:"));
/// assert!(pattern_matches("cdir:store:42:*", "cdir:store:42:coupons:page=1"));
/// assert!(pattern_matches("cdir:store:*:coupons:*", "cdir:store:7:coupons:"));
/// assert!(!pattern_matches("cdir:store:42:*", "cdir:coupon:42:"));
/// ```
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    // Handle edge cases
    if pattern.is_empty() {
        return key.is_empty();
    }

    if pattern == "*" {
        return true;
    }

    // Split pattern by '*' to get segments
    let segments: Vec<&str> = pattern.split('*').collect();

    // If no wildcards, require exact match
    if segments.len() == 1 {
        return pattern == key;
    }

    let mut remaining = key;
    let starts_with_wildcard = pattern.starts_with('*');
    let ends_with_wildcard = pattern.ends_with('*');

    for (i, segment) in segments.iter().enumerate() {
        // Skip empty segments (from adjacent wildcards or leading/trailing *)
        if segment.is_empty() {
            continue;
        }

        let is_first = i == 0;
        let is_last = i == segments.len() - 1;

        if is_first && !starts_with_wildcard {
            // First segment must be at the start of the key
            if !remaining.starts_with(segment) {
                return false;
            }
            remaining = &remaining[segment.len()..];
        } else if is_last && !ends_with_wildcard {
            // Last segment must be at the end of the key
            if !remaining.ends_with(segment) {
                return false;
            }
            // No need to update remaining, we're done
        } else {
            // Middle segment (or first with leading *, or last with trailing *)
            // Just needs to be found somewhere in remaining
            match remaining.find(segment) {
                Some(pos) => {
                    remaining = &remaining[pos + segment.len()..];
                }
                None => return false,
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(pattern_matches("cdir:store:1:", "cdir:store:1:"));
        assert!(!pattern_matches("cdir:store:1:", "cdir:store:2:"));
    }

    #[test]
    fn test_wildcard_at_end() {
        assert!(pattern_matches("cdir:stores:*", "cdir:stores:page=2"));
        assert!(pattern_matches("cdir:stores:*", "cdir:stores:"));
        assert!(!pattern_matches("cdir:stores:*", "cdir:store:1:"));
    }

    #[test]
    fn test_wildcard_at_start() {
        assert!(pattern_matches("*:coupons:", "cdir:store:1:coupons:"));
        assert!(!pattern_matches("*:coupons:", "cdir:store:1:coupons:page=1"));
    }

    #[test]
    fn test_wildcard_in_middle() {
        assert!(pattern_matches(
            "cdir:store:*:coupons:*",
            "cdir:store:abc:coupons:page=1"
        ));
        assert!(!pattern_matches(
            "cdir:store:*:coupons:*",
            "cdir:store:abc:lang=en"
        ));
    }

    #[test]
    fn test_adjacent_wildcards() {
        assert!(pattern_matches("cdir:**:coupons:", "cdir:store:1:coupons:"));
        assert!(pattern_matches("**", "anything"));
    }

    #[test]
    fn test_empty_pattern_and_key() {
        assert!(pattern_matches("", ""));
        assert!(!pattern_matches("", "cdir:stores:"));
        assert!(pattern_matches("*", ""));
        assert!(!pattern_matches("cdir:*", ""));
    }

    #[test]
    fn test_scope_does_not_leak_into_longer_ids() {
        assert!(!pattern_matches("cdir:store:4:*", "cdir:store:42:"));
        assert!(pattern_matches("cdir:store:4*", "cdir:store:42:"));
    }
}
