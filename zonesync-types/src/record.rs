//! Wire records and their field values.
//!
//! A record is a named, typed, flat mapping from field name to scalar value,
//! plus the `RecordId` that identifies it on the remote.

use crate::RecordId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The wire type of a field, as declared by a `SyncableType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Int,
    String,
    Bool,
    Timestamp,
    Float,
    Double,
    Blob,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int => "int",
            Self::String => "string",
            Self::Bool => "bool",
            Self::Timestamp => "timestamp",
            Self::Float => "float",
            Self::Double => "double",
            Self::Blob => "blob",
        };
        f.write_str(name)
    }
}

/// Binary payload carried on the wire for a blob-valued field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Blob key the payload is stored under locally.
    pub key: String,
    /// Raw bytes.
    pub bytes: Vec<u8>,
}

/// A single field value.
///
/// Blob fields are `BlobRef` on a local entity (a blob-store locator) and
/// `Asset` on a wire record (the bytes themselves).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Int(i64),
    String(String),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Float(f32),
    Double(f64),
    BlobRef(String),
    Asset(Asset),
}

impl FieldValue {
    /// Returns the wire kind of this value, or `None` for `Null`.
    pub fn kind(&self) -> Option<FieldKind> {
        match self {
            Self::Null => None,
            Self::Int(_) => Some(FieldKind::Int),
            Self::String(_) => Some(FieldKind::String),
            Self::Bool(_) => Some(FieldKind::Bool),
            Self::Timestamp(_) => Some(FieldKind::Timestamp),
            Self::Float(_) => Some(FieldKind::Float),
            Self::Double(_) => Some(FieldKind::Double),
            Self::BlobRef(_) | Self::Asset(_) => Some(FieldKind::Blob),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Approximate payload size in bytes, used when sizing push batches.
    pub fn approximate_size(&self) -> usize {
        match self {
            Self::Null | Self::Bool(_) => 1,
            Self::Int(_) | Self::Double(_) | Self::Timestamp(_) => 8,
            Self::Float(_) => 4,
            Self::String(s) | Self::BlobRef(s) => s.len(),
            Self::Asset(asset) => asset.key.len() + asset.bytes.len(),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

/// A record as exchanged with the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record type name (matches a registered `SyncableType`).
    pub record_type: String,
    /// Remote identity.
    pub id: RecordId,
    /// Field values keyed by field name.
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Creates a record with no fields.
    pub fn new(record_type: impl Into<String>, id: RecordId) -> Self {
        Self {
            record_type: record_type.into(),
            id,
            fields: BTreeMap::new(),
        }
    }

    /// Adds a field, builder style.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns a field value.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Approximate serialized size of the record.
    pub fn approximate_size(&self) -> usize {
        self.id.unique_id.len()
            + self
                .fields
                .iter()
                .map(|(k, v)| k.len() + v.approximate_size())
                .sum::<usize>()
    }
}
