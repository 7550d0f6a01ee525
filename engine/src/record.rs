//! Record types for storing data.
//!
//! A [`Record`] is an opaque JSON document. The engine never inspects its
//! shape beyond the fields it is told about: the store's key path, index key
//! paths, validation rules, and the two timestamps it maintains itself.

use crate::{error::Result, Error, KeyPath, RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding the creation time (milliseconds since epoch).
pub const CREATED_AT: &str = "createdAt";
/// Field holding the last modification time (milliseconds since epoch).
pub const UPDATED_AT: &str = "updatedAt";

/// Where a mutation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Issued by a caller on this device
    Local,
    /// Applied from a remote peer during sync
    Remote,
    /// Written back from a backup snapshot
    Restore,
}

/// A keyed document belonging to one store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self { fields: Map::new() }
    }

    /// Build a record from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(Error::validation(
                "<record>",
                format!("expected an object, got {}", json_type_name(&other)),
            )),
        }
    }

    /// Convert back into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    /// Borrow the underlying field map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Get a field. Dotted paths (`address.city`) descend into nested objects.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.fields.get(first)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Set a top-level field.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: impl Into<String>, value: Value) -> Self {
        self.set(field, value);
        self
    }

    /// Remove a top-level field.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// The record's key as a string, read from `key_field`.
    pub fn key(&self, key_field: &str) -> Option<RecordId> {
        self.get(key_field).and_then(key_string)
    }

    /// The value(s) addressed by a key path. Composite paths yield an array;
    /// `None` if any component is missing or null.
    pub fn key_path_value(&self, key_path: &KeyPath) -> Option<Value> {
        match key_path {
            KeyPath::Single(field) => self.get(field).filter(|v| !v.is_null()).cloned(),
            KeyPath::Composite(fields) => fields
                .iter()
                .map(|f| self.get(f).filter(|v| !v.is_null()).cloned())
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
        }
    }

    /// Creation timestamp, if stamped.
    pub fn created_at(&self) -> Option<Timestamp> {
        self.fields.get(CREATED_AT).and_then(Value::as_u64)
    }

    /// Last-update timestamp, if stamped.
    pub fn updated_at(&self) -> Option<Timestamp> {
        self.fields.get(UPDATED_AT).and_then(Value::as_u64)
    }

    /// The record's own last-modified time: `updatedAt`, else `createdAt`.
    pub fn last_modified(&self) -> Option<Timestamp> {
        self.updated_at().or_else(|| self.created_at())
    }

    /// The user-visible content: all fields except the engine-maintained
    /// timestamps. Two records with equal content are considered the same
    /// payload by conflict detection.
    pub fn content(&self) -> Map<String, Value> {
        let mut content = self.fields.clone();
        content.remove(CREATED_AT);
        content.remove(UPDATED_AT);
        content
    }

    /// Shallow-merge `other`'s fields over this record.
    pub fn merge_from(&mut self, other: &Record) {
        for (k, v) in &other.fields {
            self.fields.insert(k.clone(), v.clone());
        }
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

impl TryFrom<Value> for Record {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Record::from_value(value)
    }
}

/// Render a scalar key value as a record id. Strings are used verbatim,
/// numbers in their JSON form; anything else is not a valid key.
pub fn key_string(value: &Value) -> Option<RecordId> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn rejects_non_objects() {
        assert!(matches!(
            Record::from_value(json!([1, 2])),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn nested_field_access() {
        let r = record(json!({"id": "u1", "address": {"city": "Oslo"}}));
        assert_eq!(r.get("address.city"), Some(&json!("Oslo")));
        assert_eq!(r.get("address.zip"), None);
        assert_eq!(r.get("id.nope"), None);
    }

    #[test]
    fn keys_from_strings_and_numbers() {
        assert_eq!(record(json!({"id": "a"})).key("id"), Some("a".into()));
        assert_eq!(record(json!({"id": 42})).key("id"), Some("42".into()));
        assert_eq!(record(json!({"id": ""})).key("id"), None);
        assert_eq!(record(json!({"id": true})).key("id"), None);
    }

    #[test]
    fn composite_key_path() {
        let r = record(json!({"first": "Ada", "last": "Lovelace"}));
        let path = KeyPath::Composite(vec!["last".into(), "first".into()]);
        assert_eq!(r.key_path_value(&path), Some(json!(["Lovelace", "Ada"])));

        let missing = KeyPath::Composite(vec!["last".into(), "middle".into()]);
        assert_eq!(r.key_path_value(&missing), None);
    }

    #[test]
    fn content_ignores_timestamps() {
        let a = record(json!({"id": "1", "name": "x", "createdAt": 1, "updatedAt": 2}));
        let b = record(json!({"id": "1", "name": "x", "createdAt": 5, "updatedAt": 9}));
        assert_eq!(a.content(), b.content());
        assert_eq!(a.last_modified(), Some(2));
    }

    #[test]
    fn shallow_merge() {
        let mut base = record(json!({"id": "1", "name": "old", "age": 3}));
        base.merge_from(&record(json!({"name": "new", "tag": "t"})));
        assert_eq!(
            base.into_value(),
            json!({"id": "1", "name": "new", "age": 3, "tag": "t"})
        );
    }

    #[test]
    fn serializes_transparently() {
        let r = record(json!({"id": "u1", "n": 1}));
        let s = serde_json::to_string(&r).unwrap();
        assert_eq!(s, r#"{"id":"u1","n":1}"#);
    }
}
