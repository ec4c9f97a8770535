//! Pure functions for applying mutation patches and validating documents.

use thiserror::Error;

use super::{EntityType, Fields};

/// Reasons a document or patch is rejected before it reaches storage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("Field '{0}' cannot be modified")]
    Immutable(&'static str),
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),
    #[error("Field '{field}' must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

/// Shallow-merges `patch` into `fields`. A `null` value removes the field.
pub fn apply_patch(fields: &mut Fields, patch: &Fields) -> Result<(), PatchError> {
    if patch.contains_key("id") {
        return Err(PatchError::Immutable("id"));
    }
    for (key, value) in patch {
        if value.is_null() {
            fields.remove(key);
        } else {
            fields.insert(key.clone(), value.clone());
        }
    }
    Ok(())
}

/// Checks the required fields of a store or coupon document.
pub fn validate_fields(entity_type: EntityType, fields: &Fields) -> Result<(), PatchError> {
    let required: &[&'static str] = match entity_type {
        EntityType::Store => &["name"],
        EntityType::Coupon => &["title", "storeId"],
    };

    for &field in required {
        match fields.get(field) {
            None | Some(serde_json::Value::Null) => return Err(PatchError::MissingField(field)),
            Some(serde_json::Value::String(s)) if s.trim().is_empty() => {
                return Err(PatchError::MissingField(field))
            }
            Some(serde_json::Value::String(_)) => {}
            Some(_) => {
                return Err(PatchError::WrongType {
                    field,
                    expected: "a string",
                })
            }
        }
    }

    if let Some(slug) = fields.get("slug") {
        if !slug.is_string() {
            return Err(PatchError::WrongType {
                field: "slug",
                expected: "a string",
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_apply_patch_overwrites_and_adds() {
        let mut doc = fields(json!({"name": "Acme", "slug": "acme"}));
        apply_patch(&mut doc, &fields(json!({"name": "X", "featured": true}))).unwrap();

        assert_eq!(doc["name"], "X");
        assert_eq!(doc["slug"], "acme");
        assert_eq!(doc["featured"], true);
    }

    #[test]
    fn test_apply_patch_null_removes_field() {
        let mut doc = fields(json!({"name": "Acme", "featured": true}));
        apply_patch(&mut doc, &fields(json!({"featured": null}))).unwrap();
        assert!(!doc.contains_key("featured"));
    }

    #[test]
    fn test_apply_patch_rejects_id() {
        let mut doc = fields(json!({"name": "Acme"}));
        let err = apply_patch(&mut doc, &fields(json!({"id": "other"}))).unwrap_err();
        assert_eq!(err, PatchError::Immutable("id"));
        assert_eq!(doc["name"], "Acme");
    }

    #[test]
    fn test_validate_store_requires_name() {
        assert!(validate_fields(EntityType::Store, &fields(json!({"name": "Acme"}))).is_ok());
        assert_eq!(
            validate_fields(EntityType::Store, &fields(json!({"name": "  "}))),
            Err(PatchError::MissingField("name"))
        );
    }

    #[test]
    fn test_validate_coupon_requires_store_id() {
        assert_eq!(
            validate_fields(EntityType::Coupon, &fields(json!({"title": "Deal"}))),
            Err(PatchError::MissingField("storeId"))
        );
        assert!(validate_fields(
            EntityType::Coupon,
            &fields(json!({"title": "Deal", "storeId": "s1"}))
        )
        .is_ok());
    }

    #[test]
    fn test_validate_rejects_non_string_slug() {
        assert_eq!(
            validate_fields(EntityType::Store, &fields(json!({"name": "A", "slug": 3}))),
            Err(PatchError::WrongType {
                field: "slug",
                expected: "a string"
            })
        );
    }
}
