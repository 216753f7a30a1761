//! Content items (posts, comments).
//!
//! An item is an open JSON object: callers decide its fields. The sync layer
//! only cares about `id` and, for display, `timestamp`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::id::{generate_local_id, ItemId};

/// Field holding the item identifier
pub const ID_FIELD: &str = "id";

/// Field holding the creation time (milliseconds since epoch)
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// A post or comment, pending or confirmed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(Map<String, Value>);

impl Item {
    /// Create an empty item
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style field setter
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Set a field, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// All fields, in the map's key order
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }

    /// The item id, if one is set
    pub fn id(&self) -> Option<ItemId> {
        self.0.get(ID_FIELD).and_then(ItemId::from_value)
    }

    pub fn set_id(&mut self, id: ItemId) {
        self.0.insert(ID_FIELD.to_string(), id.to_value());
    }

    /// Return the item id, assigning a fresh local one if unset
    pub fn ensure_id(&mut self) -> ItemId {
        if let Some(id) = self.id() {
            return id;
        }
        let id = ItemId::Number(generate_local_id());
        self.set_id(id.clone());
        id
    }

    /// Creation time in milliseconds (numbers or numeric strings)
    pub fn timestamp(&self) -> Option<i64> {
        match self.0.get(TIMESTAMP_FIELD)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
            _ => None,
        }
    }
}

impl From<Map<String, Value>> for Item {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl TryFrom<Value> for Item {
    type Error = Value;

    /// Only JSON objects are items; anything else is handed back
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ensure_id_assigns_once() {
        let mut item = Item::new().with("text", "x");
        let first = item.ensure_id();
        let second = item.ensure_id();

        assert_eq!(first, second);
        assert!(matches!(first, ItemId::Number(_)));
    }

    #[test]
    fn test_ensure_id_replaces_unusable_id() {
        let mut item = Item::new().with("id", true).with("text", "x");
        let id = item.ensure_id();

        assert!(matches!(id, ItemId::Number(_)));
        assert_eq!(item.get("id"), Some(&id.to_value()));
    }

    #[test]
    fn test_ensure_id_keeps_caller_id() {
        let mut item = Item::new().with("id", "server-9");
        assert_eq!(item.ensure_id(), ItemId::from("server-9"));
    }

    #[test]
    fn test_timestamp_accepts_numeric_strings() {
        let item = Item::new().with("timestamp", "1000");
        assert_eq!(item.timestamp(), Some(1000));

        let item = Item::new().with("timestamp", 2000);
        assert_eq!(item.timestamp(), Some(2000));
    }

    #[test]
    fn test_item_serializes_as_plain_object() {
        let item = Item::new().with("name", "A").with("id", 7);
        assert_eq!(serde_json::to_value(&item).unwrap(), json!({"name": "A", "id": 7}));

        assert!(Item::try_from(json!([1, 2])).is_err());
    }
}
