use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Document body of an entity: a JSON object.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// The entity kinds whose mutations are coordinated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Store,
    Coupon,
}

impl EntityType {
    /// Singular name, used in cache keys and revalidation requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Store => "store",
            EntityType::Coupon => "coupon",
        }
    }

    /// Plural name, used as the notification channel and in routes.
    pub fn plural(&self) -> &'static str {
        match self {
            EntityType::Store => "stores",
            EntityType::Coupon => "coupons",
        }
    }

    pub fn all() -> [EntityType; 2] {
        [EntityType::Store, EntityType::Coupon]
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    /// Accepts both the singular and plural spelling.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "store" | "stores" => Ok(EntityType::Store),
            "coupon" | "coupons" => Ok(EntityType::Coupon),
            other => Err(format!("unknown entity type: {other}")),
        }
    }
}

/// A store or coupon document as held by the primary datastore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub entity_type: EntityType,
    pub id: String,
    pub fields: Fields,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(entity_type: EntityType, id: impl Into<String>, fields: Fields) -> Self {
        Self {
            entity_type,
            id: id.into(),
            fields,
            updated_at: Utc::now(),
        }
    }

    /// The entity's URL slug, if it has one.
    pub fn slug(&self) -> Option<&str> {
        self.str_field("slug")
    }

    /// The owning store of a coupon. Always `None` for stores.
    pub fn parent_store_id(&self) -> Option<&str> {
        match self.entity_type {
            EntityType::Coupon => self.str_field("storeId"),
            EntityType::Store => None,
        }
    }

    /// Identifier handed to the external revalidation endpoint: the slug when
    /// present, the id otherwise.
    pub fn public_identifier(&self) -> &str {
        self.slug().unwrap_or(&self.id)
    }

    fn str_field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }
}
