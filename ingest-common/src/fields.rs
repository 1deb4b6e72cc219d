//! Field-map value types
//!
//! A `FieldMap` is the structured form of a path: the keys a template
//! renders from and parses into. It is built in layers (context defaults,
//! path-derived values, manifest values, computed values) so the merge
//! helpers here distinguish "overwrite" from "fill only if absent".

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

/// Reference to a record in the tracking database
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity type, e.g. "Shot", "Sequence", "Project"
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Record id in the tracking database
    pub id: i64,
    /// Display name (code) if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, id: i64, name: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
            name: Some(name.into()),
        }
    }

    /// Two references point at the same record (names are not compared)
    pub fn same_record(&self, other: &EntityRef) -> bool {
        self.entity_type == other.entity_type && self.id == other.id
    }

    /// JSON link form stored in entity payloads: `{"type": .., "id": ..}`
    pub fn to_link(&self) -> Value {
        serde_json::json!({ "type": self.entity_type, "id": self.id })
    }
}

/// Frame placeholder used when a sequence key is rendered as a pattern
/// rather than a concrete frame number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSpec {
    /// printf style, `%04d`
    Printf,
    /// hash style, `####`
    Hash,
    /// Houdini style, `$F4`
    Houdini,
    /// glob wildcard, `*`
    Glob,
}

impl FrameSpec {
    /// Render the placeholder for the given zero-padding width
    pub fn render(&self, padding: usize) -> String {
        match self {
            FrameSpec::Printf if padding > 1 => format!("%0{}d", padding),
            FrameSpec::Printf => "%d".to_string(),
            FrameSpec::Hash => "#".repeat(padding.max(1)),
            FrameSpec::Houdini if padding > 1 => format!("$F{}", padding),
            FrameSpec::Houdini => "$F".to_string(),
            FrameSpec::Glob => "*".to_string(),
        }
    }

    /// Recognize a placeholder token such as `%04d`, `%d`, `####`, `$F4` or `*`
    pub fn parse(token: &str) -> Option<FrameSpec> {
        if token == "*" {
            return Some(FrameSpec::Glob);
        }
        if !token.is_empty() && token.chars().all(|c| c == '#') {
            return Some(FrameSpec::Hash);
        }
        if let Some(rest) = token.strip_prefix("$F") {
            if rest.chars().all(|c| c.is_ascii_digit()) {
                return Some(FrameSpec::Houdini);
            }
        }
        if let Some(inner) = token.strip_prefix('%').and_then(|t| t.strip_suffix('d')) {
            let digits = inner.strip_prefix('0').unwrap_or(inner);
            if digits.chars().all(|c| c.is_ascii_digit()) {
                return Some(FrameSpec::Printf);
            }
        }
        None
    }
}

/// A single field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Entity(EntityRef),
    Frame(FrameSpec),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            FieldValue::Entity(e) => e.name.as_deref(),
            _ => None,
        }
    }

    /// Integer view; numeric strings are accepted
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            FieldValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Convert a JSON scalar or entity link into a field value
    pub fn from_json(value: &Value) -> Option<FieldValue> {
        match value {
            Value::String(s) => Some(FieldValue::Str(s.clone())),
            Value::Number(n) => n.as_i64().map(FieldValue::Int),
            Value::Bool(b) => Some(FieldValue::Str(b.to_string())),
            Value::Object(_) => serde_json::from_value::<EntityRef>(value.clone())
                .ok()
                .map(FieldValue::Entity),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Str(s) => Value::String(s.clone()),
            FieldValue::Int(i) => Value::from(*i),
            FieldValue::Entity(e) => serde_json::to_value(e).unwrap_or(Value::Null),
            FieldValue::Frame(spec) => Value::String(spec.render(4)),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(s) => write!(f, "{}", s),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Entity(e) => match &e.name {
                Some(name) => write!(f, "{}", name),
                None => write!(f, "{} {}", e.entity_type, e.id),
            },
            FieldValue::Frame(spec) => write!(f, "{}", spec.render(4)),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<EntityRef> for FieldValue {
    fn from(value: EntityRef) -> Self {
        FieldValue::Entity(value)
    }
}

impl From<FrameSpec> for FieldValue {
    fn from(value: FrameSpec) -> Self {
        FieldValue::Frame(value)
    }
}

/// Ordered mapping from template key name to value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap(BTreeMap<String, FieldValue>);

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(FieldValue::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(FieldValue::as_int)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Insert a value, replacing any previous one
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Insert only if the key is not present yet
    pub fn insert_missing(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.entry(key.into()).or_insert_with(|| value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        self.0.remove(key)
    }

    /// Overlay `other` on top of this map; `other` wins on conflict
    pub fn overlay(&mut self, other: &FieldMap) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Copy keys from `other` that this map does not have yet
    pub fn backfill(&mut self, other: &FieldMap) {
        for (key, value) in &other.0 {
            self.0.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, FieldValue> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// JSON object view, used for logging and for record payloads
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl FromIterator<(String, FieldValue)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        FieldMap(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a FieldMap {
    type Item = (&'a String, &'a FieldValue);
    type IntoIter = btree_map::Iter<'a, String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_replaces_and_backfill_keeps() {
        let mut base = FieldMap::new();
        base.insert("name", "plate");
        base.insert("version", 2);

        let mut manifest = FieldMap::new();
        manifest.insert("name", "shot010_comp");
        manifest.insert("vendor", "acme");

        let mut overlaid = base.clone();
        overlaid.overlay(&manifest);
        assert_eq!(overlaid.get_str("name"), Some("shot010_comp"));
        assert_eq!(overlaid.get_int("version"), Some(2));
        assert_eq!(overlaid.get_str("vendor"), Some("acme"));

        let mut backfilled = base.clone();
        backfilled.backfill(&manifest);
        assert_eq!(backfilled.get_str("name"), Some("plate"));
        assert_eq!(backfilled.get_str("vendor"), Some("acme"));
    }

    #[test]
    fn test_frame_spec_parse_and_render() {
        assert_eq!(FrameSpec::parse("%04d"), Some(FrameSpec::Printf));
        assert_eq!(FrameSpec::parse("%d"), Some(FrameSpec::Printf));
        assert_eq!(FrameSpec::parse("####"), Some(FrameSpec::Hash));
        assert_eq!(FrameSpec::parse("$F4"), Some(FrameSpec::Houdini));
        assert_eq!(FrameSpec::parse("*"), Some(FrameSpec::Glob));
        assert_eq!(FrameSpec::parse("0001"), None);

        assert_eq!(FrameSpec::Printf.render(4), "%04d");
        assert_eq!(FrameSpec::Hash.render(3), "###");
        assert_eq!(FrameSpec::Houdini.render(4), "$F4");
    }

    #[test]
    fn test_field_value_from_json_entity() {
        let value = serde_json::json!({"type": "Shot", "id": 12, "name": "sh010"});
        let field = FieldValue::from_json(&value).unwrap();
        match field {
            FieldValue::Entity(e) => {
                assert_eq!(e.entity_type, "Shot");
                assert_eq!(e.id, 12);
            }
            other => panic!("Expected entity, got {:?}", other),
        }
    }
}
