//! Local object store contract.

use crate::error::StorageResult;
use std::fmt;
use tokio::sync::mpsc;
use zonesync_types::Entity;

/// Handle identifying one observation of one collection.
///
/// Passing it to a write transaction suppresses the notification that
/// observer would otherwise receive for that commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// A committed change to one collection.
///
/// `insertions` and `modifications` index into `snapshot` (the collection
/// after the commit); `deletions` index into the collection before it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionChange {
    pub snapshot: Vec<Entity>,
    pub insertions: Vec<usize>,
    pub modifications: Vec<usize>,
    pub deletions: Vec<usize>,
}

impl CollectionChange {
    /// Returns true when nothing was inserted, modified or deleted.
    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty() && self.modifications.is_empty() && self.deletions.is_empty()
    }
}

/// An active observation of one collection.
#[derive(Debug)]
pub struct Observation {
    pub id: ObserverId,
    pub changes: mpsc::UnboundedReceiver<CollectionChange>,
}

/// One operation inside a write transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert or replace by primary key.
    Upsert(Entity),
    /// Insert; fails when the primary key exists.
    Insert(Entity),
    /// Physically remove a row. Removing a missing row is a no-op.
    Delete { entity_type: String, id: String },
}

/// A scoped write: every operation commits, or none does.
#[derive(Debug, Clone, Default)]
pub struct WriteTransaction {
    pub(crate) ops: Vec<WriteOp>,
    pub(crate) suppress: Option<ObserverId>,
}

impl WriteTransaction {
    /// Creates an empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty transaction whose commit is hidden from `observer`.
    pub fn suppressing(observer: ObserverId) -> Self {
        Self {
            ops: Vec::new(),
            suppress: Some(observer),
        }
    }

    pub fn upsert(&mut self, entity: Entity) -> &mut Self {
        self.ops.push(WriteOp::Upsert(entity));
        self
    }

    pub fn insert(&mut self, entity: Entity) -> &mut Self {
        self.ops.push(WriteOp::Insert(entity));
        self
    }

    pub fn delete(&mut self, entity_type: impl Into<String>, id: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            entity_type: entity_type.into(),
            id: id.into(),
        });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn suppressed(&self) -> Option<ObserverId> {
        self.suppress
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// The local transactional object store.
pub trait LocalStore: Send + Sync {
    /// Returns the rows of `entity_type`, ordered by first insertion.
    fn query(&self, entity_type: &str) -> StorageResult<Vec<Entity>>;

    /// Finds one row by primary key.
    fn find(&self, entity_type: &str, id: &str) -> StorageResult<Option<Entity>>;

    /// Starts observing committed changes to `entity_type`.
    fn observe(&self, entity_type: &str) -> StorageResult<Observation>;

    /// Stops an observation. Unknown ids are ignored.
    fn unobserve(&self, id: ObserverId);

    /// Commits a transaction atomically.
    fn write(&self, txn: WriteTransaction) -> StorageResult<()>;
}

impl dyn LocalStore {
    /// Runs `body` against a fresh transaction and commits it.
    ///
    /// If `body` fails nothing is written.
    pub fn transaction<F>(&self, suppress: Option<ObserverId>, body: F) -> StorageResult<()>
    where
        F: FnOnce(&mut WriteTransaction) -> StorageResult<()>,
    {
        let mut txn = WriteTransaction {
            ops: Vec::new(),
            suppress,
        };
        body(&mut txn)?;
        if txn.is_empty() {
            return Ok(());
        }
        self.write(txn)
    }
}
