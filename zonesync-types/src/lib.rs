//! Core type definitions for zonesync.
//!
//! This crate defines the plain data the sync core moves around:
//! - Zone, record and long-lived operation identifiers
//! - Opaque change tokens issued by the remote change feed
//! - Wire records and their typed field values
//! - Local entities with their soft-delete flag
//! - `SyncableType` descriptors and the `TypeRegistry` that holds them
//!
//! Nothing here performs I/O.

mod entity;
mod ids;
mod record;
mod syncable;

pub use entity::Entity;
pub use ids::{ChangeToken, OperationId, RecordId, ZoneId};
pub use record::{Asset, FieldKind, FieldValue, Record};
pub use syncable::{FieldSpec, SyncableType, SyncableTypeBuilder, TypeRegistry};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("record type registered twice: {0}")]
    DuplicateType(String),

    #[error("invalid descriptor for {record_type}: {reason}")]
    InvalidDescriptor { record_type: String, reason: String },
}
