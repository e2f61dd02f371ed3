//! Plain record with dirty tracking
//!
//! A record never persists itself; repositories take it by `&mut` and write
//! back the surrogate id and stored attributes after a successful save.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::table::ID_COLUMN;
use crate::types::value_to_text;

/// One changed attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub key: String,
    pub old: Value,
    pub new: Value,
}

/// A row of a dynamic table
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: Option<i64>,
    attributes: Map<String, Value>,
    original: Map<String, Value>,
    audited: bool,
}

impl Record {
    /// A new, unsaved record
    pub fn new(attributes: Map<String, Value>) -> Self {
        let attributes = attributes
            .into_iter()
            .filter(|(key, _)| key != ID_COLUMN)
            .collect();
        Self {
            id: None,
            attributes,
            original: Map::new(),
            audited: true,
        }
    }

    /// A record read back from storage
    pub fn from_stored(id: i64, attributes: Map<String, Value>) -> Self {
        let mut record = Self::new(attributes);
        record.id = Some(id);
        record.original = record.attributes.clone();
        record
    }

    /// Surrogate id, `None` until saved
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.id.is_some()
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.attributes
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        if key == ID_COLUMN {
            return None;
        }
        self.attributes.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if key != ID_COLUMN {
            self.attributes.insert(key, value);
        }
    }

    /// Public id held in `id_field`, as text
    pub fn uid(&self, id_field: &str) -> Option<String> {
        self.attributes
            .get(id_field)
            .and_then(value_to_text)
            .filter(|s| !s.is_empty())
    }

    /// Merge top-level attributes; incoming keys replace existing ones
    pub fn fill(&mut self, attributes: Map<String, Value>) {
        for (key, value) in attributes {
            self.set(key, value);
        }
    }

    /// Attributes that differ from the stored snapshot
    ///
    /// A new record reports every attribute with `old` set to null.
    pub fn changes(&self) -> Vec<Change> {
        self.attributes
            .iter()
            .filter(|(key, value)| self.original.get(*key) != Some(*value))
            .map(|(key, value)| Change {
                key: key.clone(),
                old: self.original.get(key).cloned().unwrap_or(Value::Null),
                new: value.clone(),
            })
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        !self.changes().is_empty()
    }

    /// Record the state a repository just persisted
    pub fn mark_saved(&mut self, id: i64, attributes: Map<String, Value>) {
        let audited = self.audited;
        *self = Self::from_stored(id, attributes);
        self.audited = audited;
    }

    /// Exempt this record from per-record audit events
    pub fn without_audit(mut self) -> Self {
        self.audited = false;
        self
    }

    pub fn set_audited(&mut self, audited: bool) {
        self.audited = audited;
    }

    pub fn is_audited(&self) -> bool {
        self.audited
    }

    /// JSON object of the record, surrogate id first
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert(
            ID_COLUMN.to_string(),
            self.id.map(Value::from).unwrap_or(Value::Null),
        );
        for (key, value) in &self.attributes {
            object.insert(key.clone(), value.clone());
        }
        Value::Object(object)
    }
}

impl Serialize for Record {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
