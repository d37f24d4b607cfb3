//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Entity not found.
    #[error("entity not found: {entity_type}/{id}")]
    NotFound { entity_type: String, id: String },

    /// Insert of a primary key that already exists.
    #[error("duplicate primary key: {entity_type}/{id}")]
    DuplicateKey { entity_type: String, id: String },

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid data.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Poisoned,
}
