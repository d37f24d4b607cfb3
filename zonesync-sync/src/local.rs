//! Debounced observation of one local collection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace};
use zonesync_storage::{CollectionChange, LocalStore, ObserverId, StorageResult};
use zonesync_types::Entity;

/// Local changes of one type, ready to push.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalBatch {
    pub record_type: String,
    /// Live rows inserted or modified.
    pub to_store: Vec<Entity>,
    /// Rows modified into the soft-deleted state.
    pub to_delete: Vec<Entity>,
}

impl LocalBatch {
    pub fn is_empty(&self) -> bool {
        self.to_store.is_empty() && self.to_delete.is_empty()
    }
}

/// Pending changes keyed by primary key; the latest state of a row wins
/// and the row keeps the position of its first change.
#[derive(Default)]
struct Pending {
    order: Vec<String>,
    rows: HashMap<String, Entity>,
}

impl Pending {
    fn record(&mut self, entity: Entity) {
        if !self.rows.contains_key(&entity.id) {
            self.order.push(entity.id.clone());
        }
        self.rows.insert(entity.id.clone(), entity);
    }

    fn take(&mut self, record_type: &str) -> LocalBatch {
        let mut batch = LocalBatch {
            record_type: record_type.to_string(),
            ..Default::default()
        };
        for id in self.order.drain(..) {
            if let Some(entity) = self.rows.remove(&id) {
                if entity.is_deleted {
                    batch.to_delete.push(entity);
                } else {
                    batch.to_store.push(entity);
                }
            }
        }
        batch
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Sorts one committed change into pending upserts and soft deletions.
///
/// Physical removals are ignored: they come from purges of rows whose
/// deletion already reached the remote.
fn classify(change: &CollectionChange, pending: &mut Pending) {
    for &i in &change.insertions {
        if let Some(entity) = change.snapshot.get(i) {
            if !entity.is_deleted {
                pending.record(entity.clone());
            }
        }
    }
    for &i in &change.modifications {
        if let Some(entity) = change.snapshot.get(i) {
            pending.record(entity.clone());
        }
    }
}

/// Watches one local collection and emits debounced batches.
///
/// The debounce is trailing: every change restarts the timer, and one batch
/// holding the latest state of each touched row is emitted once the
/// collection has been quiet for the whole window. Empty batches are never
/// emitted.
pub struct LocalChangeSource {
    record_type: String,
    observer: ObserverId,
    store: Arc<dyn LocalStore>,
    task: JoinHandle<()>,
}

impl LocalChangeSource {
    /// Starts observing `record_type`. Batches go to `out`.
    pub fn spawn(
        store: Arc<dyn LocalStore>,
        record_type: &str,
        debounce: Duration,
        out: mpsc::UnboundedSender<LocalBatch>,
    ) -> StorageResult<Self> {
        let mut observation = store.observe(record_type)?;
        let observer = observation.id;
        let name = record_type.to_string();
        let task = tokio::spawn(async move {
            let mut pending = Pending::default();
            let mut deadline: Option<Instant> = None;
            loop {
                tokio::select! {
                    change = observation.changes.recv() => match change {
                        Some(change) => {
                            classify(&change, &mut pending);
                            if !pending.is_empty() {
                                deadline = Some(Instant::now() + debounce);
                            }
                            trace!(record_type = %name, "local change observed");
                        }
                        None => {
                            let batch = pending.take(&name);
                            if !batch.is_empty() {
                                let _ = out.send(batch);
                            }
                            break;
                        }
                    },
                    _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                        deadline = None;
                        let batch = pending.take(&name);
                        if batch.is_empty() {
                            continue;
                        }
                        debug!(
                            record_type = %name,
                            store = batch.to_store.len(),
                            delete = batch.to_delete.len(),
                            "local batch ready"
                        );
                        if out.send(batch).is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(record_type = %name, "local change source stopped");
        });
        Ok(Self {
            record_type: record_type.to_string(),
            observer,
            store,
            task,
        })
    }

    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// The observer whose notifications this source consumes.
    pub fn observer(&self) -> ObserverId {
        self.observer
    }
}

impl Drop for LocalChangeSource {
    fn drop(&mut self) {
        self.task.abort();
        self.store.unobserve(self.observer);
    }
}
