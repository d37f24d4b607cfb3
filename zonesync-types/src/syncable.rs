//! Per-type sync metadata and the registry that holds it.
//!
//! A `SyncableType` is created once when the engine is built and never
//! changes for the lifetime of the process. The `TypeRegistry` is an explicit
//! object handed to every component that needs lookups; there is no global.

use crate::{Error, FieldKind, Result, ZoneId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A declared field of a syncable type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    fn simple(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Shorthand for an integer field.
    pub fn int(name: &str) -> Self {
        Self::simple(name, FieldKind::Int)
    }

    /// Shorthand for a string field.
    pub fn string(name: &str) -> Self {
        Self::simple(name, FieldKind::String)
    }

    /// Shorthand for a boolean field.
    pub fn bool(name: &str) -> Self {
        Self::simple(name, FieldKind::Bool)
    }

    /// Shorthand for a timestamp field.
    pub fn timestamp(name: &str) -> Self {
        Self::simple(name, FieldKind::Timestamp)
    }

    /// Shorthand for a single-precision float field.
    pub fn float(name: &str) -> Self {
        Self::simple(name, FieldKind::Float)
    }

    /// Shorthand for a double-precision float field.
    pub fn double(name: &str) -> Self {
        Self::simple(name, FieldKind::Double)
    }

    /// Shorthand for a blob field stored through the blob store.
    pub fn blob(name: &str) -> Self {
        Self::simple(name, FieldKind::Blob)
    }
}

/// Metadata describing how one local entity type maps onto remote records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncableType {
    /// Record type name on the wire and entity type name locally.
    pub record_type: String,
    /// Name of the primary key field.
    pub primary_key: String,
    /// Zone the records of this type live in.
    pub zone: ZoneId,
    /// Declared fields, in declaration order.
    pub fields: Vec<FieldSpec>,
    /// Wire field carrying the soft-delete flag.
    pub soft_delete_field: String,
}

impl SyncableType {
    /// Starts building a descriptor for `record_type`.
    pub fn builder(record_type: impl Into<String>) -> SyncableTypeBuilder {
        SyncableTypeBuilder::new(record_type)
    }

    /// Returns the declared field with the given name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns the names of blob-valued fields.
    pub fn blob_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.kind == FieldKind::Blob)
            .map(|f| f.name.as_str())
    }

    /// Blob key for one field of one entity.
    pub fn blob_key(&self, primary_key: &str, field: &str) -> String {
        format!("{}_{}_{}", self.record_type, primary_key, field)
    }

    /// Blob key prefix covering every blob of one entity.
    pub fn blob_prefix(&self, primary_key: &str) -> String {
        format!("{}_{}_", self.record_type, primary_key)
    }
}

/// Builder for [`SyncableType`].
#[derive(Debug, Clone)]
pub struct SyncableTypeBuilder {
    record_type: String,
    primary_key: String,
    zone_name: Option<String>,
    zone_owner: String,
    fields: Vec<FieldSpec>,
    soft_delete_field: String,
}

impl SyncableTypeBuilder {
    fn new(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            primary_key: "id".to_string(),
            zone_name: None,
            zone_owner: ZoneId::DEFAULT_OWNER.to_string(),
            fields: Vec::new(),
            soft_delete_field: "isDeleted".to_string(),
        }
    }

    /// Sets the primary key field name (default `id`).
    #[must_use]
    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = name.into();
        self
    }

    /// Places the type in a named zone, possibly shared with other types.
    /// Without this the type gets its own zone named `<RecordType>sZone`.
    #[must_use]
    pub fn zone(mut self, name: impl Into<String>) -> Self {
        self.zone_name = Some(name.into());
        self
    }

    /// Sets the zone owner.
    #[must_use]
    pub fn zone_owner(mut self, owner: impl Into<String>) -> Self {
        self.zone_owner = owner.into();
        self
    }

    /// Places the type in the always-present default zone.
    #[must_use]
    pub fn default_zone(mut self) -> Self {
        self.zone_name = Some(ZoneId::DEFAULT_ZONE_NAME.to_string());
        self
    }

    /// Declares a field.
    #[must_use]
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// Overrides the soft-delete wire field name (default `isDeleted`).
    #[must_use]
    pub fn soft_delete_field(mut self, name: impl Into<String>) -> Self {
        self.soft_delete_field = name.into();
        self
    }

    /// Validates and builds the descriptor.
    pub fn build(self) -> Result<SyncableType> {
        let invalid = |reason: String| Error::InvalidDescriptor {
            record_type: self.record_type.clone(),
            reason,
        };

        if self.record_type.is_empty() {
            return Err(invalid("record type name is empty".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(invalid(format!("field {} declared twice", field.name)));
            }
            if field.name == self.primary_key || field.name == self.soft_delete_field {
                return Err(invalid(format!("field {} shadows a reserved field", field.name)));
            }
        }

        let zone_name = self
            .zone_name
            .clone()
            .unwrap_or_else(|| format!("{}sZone", self.record_type));

        Ok(SyncableType {
            zone: ZoneId::new(zone_name, self.zone_owner.clone()),
            record_type: self.record_type,
            primary_key: self.primary_key,
            fields: self.fields,
            soft_delete_field: self.soft_delete_field,
        })
    }
}

/// Registry mapping record type names to their descriptors.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: Vec<Arc<SyncableType>>,
    by_name: HashMap<String, usize>,
}

impl TypeRegistry {
    /// Builds a registry from descriptors, rejecting duplicate names.
    pub fn new(types: impl IntoIterator<Item = SyncableType>) -> Result<Self> {
        let mut registry = Self::default();
        for ty in types {
            if registry.by_name.contains_key(&ty.record_type) {
                return Err(Error::DuplicateType(ty.record_type));
            }
            registry
                .by_name
                .insert(ty.record_type.clone(), registry.types.len());
            registry.types.push(Arc::new(ty));
        }
        Ok(registry)
    }

    /// Looks up a descriptor by record type name.
    pub fn get(&self, record_type: &str) -> Option<&Arc<SyncableType>> {
        self.by_name.get(record_type).map(|&i| &self.types[i])
    }

    /// All descriptors in registration order.
    pub fn types(&self) -> &[Arc<SyncableType>] {
        &self.types
    }

    /// Distinct zones in registration order.
    pub fn zones(&self) -> Vec<ZoneId> {
        let mut zones: Vec<ZoneId> = Vec::new();
        for ty in &self.types {
            if !zones.contains(&ty.zone) {
                zones.push(ty.zone.clone());
            }
        }
        zones
    }

    /// Descriptors whose records live in `zone`.
    pub fn types_in_zone(&self, zone: &ZoneId) -> Vec<Arc<SyncableType>> {
        self.types
            .iter()
            .filter(|t| &t.zone == zone)
            .cloned()
            .collect()
    }

    /// Returns true when more than one type shares `zone`.
    pub fn is_shared_zone(&self, zone: &ZoneId) -> bool {
        self.types.iter().filter(|t| &t.zone == zone).count() > 1
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
