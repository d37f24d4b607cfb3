//! Entity ⇄ record projection.

use crate::error::{SyncError, SyncResult};
use std::sync::Arc;
use tracing::warn;
use zonesync_storage::BlobStore;
use zonesync_types::{
    Asset, Entity, FieldKind, FieldValue, Record, RecordId, SyncableType, TypeRegistry, ZoneId,
};

/// Projects local entities to wire records and back.
///
/// Blob fields are `BlobRef` locators locally and `Asset` payloads on the
/// wire; the converter moves the bytes through the blob store.
pub struct RecordConverter {
    registry: Arc<TypeRegistry>,
    blobs: Arc<dyn BlobStore>,
    /// Overrides every descriptor's zone (public scope).
    zone_override: Option<ZoneId>,
}

impl RecordConverter {
    pub fn new(registry: Arc<TypeRegistry>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            registry,
            blobs,
            zone_override: None,
        }
    }

    /// Places every record in `zone` regardless of its descriptor.
    #[must_use]
    pub fn with_zone_override(mut self, zone: ZoneId) -> Self {
        self.zone_override = Some(zone);
        self
    }

    pub fn descriptor(&self, record_type: &str) -> SyncResult<&Arc<SyncableType>> {
        self.registry
            .get(record_type)
            .ok_or_else(|| SyncError::UnknownRecordType(record_type.to_string()))
    }

    /// Zone the records of `ty` are written to.
    pub fn zone_for(&self, ty: &SyncableType) -> ZoneId {
        self.zone_override.clone().unwrap_or_else(|| ty.zone.clone())
    }

    pub fn record_id(&self, ty: &SyncableType, primary_key: &str) -> RecordId {
        RecordId::new(primary_key, self.zone_for(ty))
    }

    /// Builds the wire record for an entity.
    pub fn to_record(&self, entity: &Entity) -> SyncResult<Record> {
        let ty = self.descriptor(&entity.entity_type)?;
        let mut record = Record::new(&ty.record_type, self.record_id(ty, &entity.id));

        for spec in &ty.fields {
            let Some(value) = entity.get(&spec.name) else {
                continue;
            };
            let wire = match (spec.kind, value) {
                (_, FieldValue::Null) => FieldValue::Null,
                (FieldKind::Blob, FieldValue::BlobRef(locator)) => {
                    match self.blobs.fetch(locator)? {
                        Some(bytes) => FieldValue::Asset(Asset {
                            key: ty.blob_key(&entity.id, &spec.name),
                            bytes,
                        }),
                        None => {
                            warn!(
                                record_type = %ty.record_type,
                                id = %entity.id,
                                field = %spec.name,
                                "blob missing locally; field not sent"
                            );
                            continue;
                        }
                    }
                }
                (kind, value) if value.kind() == Some(kind) => value.clone(),
                (kind, _) => {
                    warn!(
                        record_type = %ty.record_type,
                        field = %spec.name,
                        expected = %kind,
                        "field kind mismatch; field not sent"
                    );
                    continue;
                }
            };
            record.fields.insert(spec.name.clone(), wire);
        }
        record.fields.insert(
            ty.soft_delete_field.clone(),
            FieldValue::Bool(entity.is_deleted),
        );
        Ok(record)
    }

    /// Rebuilds the local entity for a wire record, storing blob payloads.
    pub fn to_entity(&self, record: &Record) -> SyncResult<Entity> {
        let ty = self.descriptor(&record.record_type)?;
        let mut entity = Entity::new(&ty.record_type, &record.id.unique_id);

        for spec in &ty.fields {
            let Some(value) = record.get(&spec.name) else {
                continue;
            };
            let local = match (spec.kind, value) {
                (_, FieldValue::Null) => FieldValue::Null,
                (FieldKind::Blob, FieldValue::Asset(asset)) => {
                    let key = ty.blob_key(&record.id.unique_id, &spec.name);
                    FieldValue::BlobRef(self.blobs.store(&key, &asset.bytes)?)
                }
                (kind, value) if kind != FieldKind::Blob && value.kind() == Some(kind) => {
                    value.clone()
                }
                (kind, _) => {
                    warn!(
                        record_type = %ty.record_type,
                        field = %spec.name,
                        expected = %kind,
                        "field kind mismatch; field ignored"
                    );
                    continue;
                }
            };
            entity.fields.insert(spec.name.clone(), local);
        }
        entity.is_deleted = record
            .get(&ty.soft_delete_field)
            .and_then(FieldValue::as_bool)
            .unwrap_or(false);
        Ok(entity)
    }
}
