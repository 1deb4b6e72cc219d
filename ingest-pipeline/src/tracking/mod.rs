//! Production-tracking database access
//!
//! Entities are JSON objects carrying `type` and `id` plus arbitrary
//! fields. Links to other entities are stored as `{"type": .., "id": ..}`
//! objects, multi-entity fields as arrays of links.

pub mod queries;
pub mod sqlite;

pub use sqlite::SqliteTrackingClient;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::IngestResult;

/// A tracking database record
pub type Entity = Map<String, Value>;

/// Query filter on one field
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Is(String, Value),
    IsNot(String, Value),
    In(String, Vec<Value>),
}

impl Filter {
    pub fn is(field: &str, value: impl Into<Value>) -> Self {
        Filter::Is(field.to_string(), value.into())
    }

    pub fn is_not(field: &str, value: impl Into<Value>) -> Self {
        Filter::IsNot(field.to_string(), value.into())
    }

    pub fn is_in(field: &str, values: Vec<Value>) -> Self {
        Filter::In(field.to_string(), values)
    }

    /// Evaluate against an entity
    ///
    /// Entity links compare by type and id. When the entity field holds an
    /// array, `is` means "contains".
    pub fn matches(&self, entity: &Entity) -> bool {
        let null = Value::Null;
        match self {
            Filter::Is(field, expected) => {
                field_matches(entity.get(field).unwrap_or(&null), expected)
            }
            Filter::IsNot(field, expected) => {
                !field_matches(entity.get(field).unwrap_or(&null), expected)
            }
            Filter::In(field, candidates) => {
                let actual = entity.get(field).unwrap_or(&null);
                candidates.iter().any(|c| field_matches(actual, c))
            }
        }
    }
}

fn field_matches(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(items) if !expected.is_array() => {
            items.iter().any(|item| values_equal(item, expected))
        }
        _ => values_equal(actual, expected),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) if is_link(a) && is_link(b) => {
            a.get("type") == b.get("type") && a.get("id") == b.get("id")
        }
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => a == b,
    }
}

fn is_link(map: &Map<String, Value>) -> bool {
    map.contains_key("type") && map.contains_key("id")
}

/// Read the id of an entity
pub fn entity_id(entity: &Entity) -> Option<i64> {
    entity.get("id").and_then(Value::as_i64)
}

/// `{"type": .., "id": ..}` link to an entity
pub fn entity_link(entity: &Entity) -> Value {
    serde_json::json!({
        "type": entity.get("type").cloned().unwrap_or(Value::Null),
        "id": entity.get("id").cloned().unwrap_or(Value::Null),
    })
}

/// Client for the production-tracking database
#[async_trait]
pub trait TrackingClient: Send + Sync {
    /// Find entities of `entity_type` matching every filter
    ///
    /// `fields` limits the returned fields (plus `type` and `id`); empty
    /// means all fields.
    async fn find(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[&str],
    ) -> IngestResult<Vec<Entity>>;

    async fn find_one(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[&str],
    ) -> IngestResult<Option<Entity>> {
        Ok(self
            .find(entity_type, filters, fields)
            .await?
            .into_iter()
            .next())
    }

    /// Create an entity; returns it with `type` and `id` set
    async fn create(&self, entity_type: &str, data: Entity) -> IngestResult<Entity>;

    /// Merge `data` into an existing entity
    async fn update(&self, entity_type: &str, id: i64, data: Entity) -> IngestResult<Entity>;

    /// Returns false when no such entity existed
    async fn delete(&self, entity_type: &str, id: i64) -> IngestResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(value: Value) -> Entity {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_link_filters_compare_type_and_id() {
        let publish = entity(json!({
            "type": "PublishedFile",
            "id": 4,
            "entity": {"type": "Shot", "id": 12, "name": "sh010"},
        }));

        assert!(Filter::is("entity", json!({"type": "Shot", "id": 12})).matches(&publish));
        assert!(!Filter::is("entity", json!({"type": "Asset", "id": 12})).matches(&publish));
        assert!(Filter::is_not("entity", json!({"type": "Shot", "id": 13})).matches(&publish));
    }

    #[test]
    fn test_array_field_means_contains() {
        let plate = entity(json!({
            "type": "Element",
            "id": 1,
            "sg_published_files": [{"type": "PublishedFile", "id": 7}],
        }));

        assert!(Filter::is("sg_published_files", json!({"type": "PublishedFile", "id": 7})).matches(&plate));
        assert!(!Filter::is("sg_published_files", json!({"type": "PublishedFile", "id": 8})).matches(&plate));
    }

    #[test]
    fn test_in_filter_and_missing_field() {
        let publish = entity(json!({"type": "PublishedFile", "id": 1, "sg_status_list": "cmpt"}));

        assert!(Filter::is_in("sg_status_list", vec![json!("ip"), json!("cmpt")]).matches(&publish));
        assert!(Filter::is("description", Value::Null).matches(&publish));
        assert!(!Filter::is("description", "x").matches(&publish));
    }
}
