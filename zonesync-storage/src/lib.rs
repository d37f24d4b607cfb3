//! Local storage collaborators for zonesync.
//!
//! The sync core does not own the local object store or the blob store; it
//! talks to them through the traits defined here.
//!
//! # Architecture
//!
//! - [`LocalStore`]: ordered per-type collections of [`Entity`] rows, scoped
//!   write transactions that commit or roll back as a unit, and per-type
//!   change observation with notification suppression
//! - [`BlobStore`]: store, fetch and delete-by-prefix of binary payloads
//!
//! [`MemoryStore`], [`MemoryBlobStore`] and [`FileBlobStore`] are the
//! implementations shipped with the crate.
//!
//! [`Entity`]: zonesync_types::Entity

mod blob;
mod error;
mod local;
mod memory;

pub use blob::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use error::{StorageError, StorageResult};
pub use local::{
    CollectionChange, LocalStore, Observation, ObserverId, WriteOp, WriteTransaction,
};
pub use memory::MemoryStore;
