use crate::FieldValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A synchronizable row in the local object store.
///
/// Local deletion is a field mutation: `is_deleted` is set and the row stays
/// until a purge pass removes it once the deletion has reached the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Record type name this entity belongs to.
    pub entity_type: String,
    /// Primary key value; doubles as the remote unique id.
    pub id: String,
    /// Field values keyed by field name.
    pub fields: BTreeMap<String, FieldValue>,
    /// Soft-delete flag.
    #[serde(default)]
    pub is_deleted: bool,
}

impl Entity {
    /// Creates a live entity with no fields.
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            fields: BTreeMap::new(),
            is_deleted: false,
        }
    }

    /// Sets a field, builder style.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets a field in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Returns a field value.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Extract a string field.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(FieldValue::as_str)
    }

    /// Marks the entity soft-deleted.
    pub fn mark_deleted(&mut self) {
        self.is_deleted = true;
    }
}
