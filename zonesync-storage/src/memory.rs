//! In-memory implementation of [`LocalStore`].

use crate::error::{StorageError, StorageResult};
use crate::local::{
    CollectionChange, LocalStore, Observation, ObserverId, WriteOp, WriteTransaction,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use zonesync_types::Entity;

struct ObserverEntry {
    id: ObserverId,
    entity_type: String,
    tx: mpsc::UnboundedSender<CollectionChange>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Vec<Entity>>,
    observers: Vec<ObserverEntry>,
    next_observer: u64,
}

/// Process-local object store.
///
/// Each collection keeps rows in first-insertion order. A commit stages its
/// operations against copies of the touched collections and swaps them in
/// only when every operation succeeded.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StorageError::Poisoned)
    }
}

fn position(rows: &[Entity], id: &str) -> Option<usize> {
    rows.iter().position(|e| e.id == id)
}

fn apply_op(staged: &mut HashMap<String, Vec<Entity>>, op: &WriteOp) -> StorageResult<()> {
    match op {
        WriteOp::Upsert(entity) | WriteOp::Insert(entity) => {
            if entity.id.is_empty() {
                return Err(StorageError::InvalidData(format!(
                    "{} row without primary key",
                    entity.entity_type
                )));
            }
            let rows = staged.entry(entity.entity_type.clone()).or_default();
            match position(rows, &entity.id) {
                Some(_) if matches!(op, WriteOp::Insert(_)) => {
                    return Err(StorageError::DuplicateKey {
                        entity_type: entity.entity_type.clone(),
                        id: entity.id.clone(),
                    });
                }
                Some(i) => rows[i] = entity.clone(),
                None => rows.push(entity.clone()),
            }
        }
        WriteOp::Delete { entity_type, id } => {
            if let Some(rows) = staged.get_mut(entity_type) {
                if let Some(i) = position(rows, id) {
                    rows.remove(i);
                }
            }
        }
    }
    Ok(())
}

fn diff(before: &[Entity], after: &[Entity]) -> CollectionChange {
    let mut change = CollectionChange::default();
    for (i, old) in before.iter().enumerate() {
        if position(after, &old.id).is_none() {
            change.deletions.push(i);
        }
    }
    for (i, new) in after.iter().enumerate() {
        match before.iter().find(|e| e.id == new.id) {
            None => change.insertions.push(i),
            Some(old) if old != new => change.modifications.push(i),
            Some(_) => {}
        }
    }
    change.snapshot = after.to_vec();
    change
}

impl LocalStore for MemoryStore {
    fn query(&self, entity_type: &str) -> StorageResult<Vec<Entity>> {
        let inner = self.lock()?;
        Ok(inner
            .collections
            .get(entity_type)
            .cloned()
            .unwrap_or_default())
    }

    fn find(&self, entity_type: &str, id: &str) -> StorageResult<Option<Entity>> {
        let inner = self.lock()?;
        Ok(inner
            .collections
            .get(entity_type)
            .and_then(|rows| rows.iter().find(|e| e.id == id).cloned()))
    }

    fn observe(&self, entity_type: &str) -> StorageResult<Observation> {
        let mut inner = self.lock()?;
        let id = ObserverId(inner.next_observer);
        inner.next_observer += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.observers.push(ObserverEntry {
            id,
            entity_type: entity_type.to_string(),
            tx,
        });
        debug!(%id, entity_type, "observer registered");
        Ok(Observation { id, changes: rx })
    }

    fn unobserve(&self, id: ObserverId) {
        if let Ok(mut inner) = self.lock() {
            inner.observers.retain(|o| o.id != id);
        }
    }

    fn write(&self, txn: WriteTransaction) -> StorageResult<()> {
        let mut inner = self.lock()?;

        let touched: HashSet<&str> = txn
            .ops
            .iter()
            .map(|op| match op {
                WriteOp::Upsert(e) | WriteOp::Insert(e) => e.entity_type.as_str(),
                WriteOp::Delete { entity_type, .. } => entity_type.as_str(),
            })
            .collect();

        let mut staged: HashMap<String, Vec<Entity>> = touched
            .iter()
            .map(|t| {
                let rows = inner.collections.get(*t).cloned().unwrap_or_default();
                (t.to_string(), rows)
            })
            .collect();

        for op in &txn.ops {
            apply_op(&mut staged, op)?;
        }

        let mut changes = Vec::new();
        for (entity_type, rows) in staged {
            let before = inner.collections.get(&entity_type).map(Vec::as_slice).unwrap_or(&[]);
            let change = diff(before, &rows);
            inner.collections.insert(entity_type.clone(), rows);
            if !change.is_empty() {
                changes.push((entity_type, change));
            }
        }
        trace!(ops = txn.ops.len(), changed = changes.len(), "transaction committed");

        inner.observers.retain(|o| !o.tx.is_closed());
        for (entity_type, change) in changes {
            for observer in inner
                .observers
                .iter()
                .filter(|o| o.entity_type == entity_type && Some(o.id) != txn.suppress)
            {
                let _ = observer.tx.send(change.clone());
            }
        }
        Ok(())
    }
}
