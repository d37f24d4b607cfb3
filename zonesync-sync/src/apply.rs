//! The single task allowed to mutate the local store on behalf of sync.
//!
//! Every write it makes is a scoped transaction that suppresses the
//! observer watching the written type, so remote changes are never
//! re-detected as local ones.

use crate::error::{SyncError, SyncResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zonesync_storage::{BlobStore, LocalStore, ObserverId, WriteTransaction};
use zonesync_types::{Entity, TypeRegistry};

enum ApplyCommand {
    Suppress {
        record_type: String,
        observer: ObserverId,
    },
    Upsert {
        entity: Entity,
        reply: oneshot::Sender<SyncResult<()>>,
    },
    Remove {
        record_type: String,
        id: String,
        reply: oneshot::Sender<SyncResult<bool>>,
    },
    Purge {
        record_type: String,
        ids: Vec<String>,
        reply: oneshot::Sender<SyncResult<usize>>,
    },
}

/// Handle to the apply executor. Cheap to clone.
#[derive(Clone)]
pub struct ApplyHandle {
    tx: mpsc::UnboundedSender<ApplyCommand>,
}

struct ApplyExecutor {
    store: Arc<dyn LocalStore>,
    blobs: Arc<dyn BlobStore>,
    registry: Arc<TypeRegistry>,
    suppressed: HashMap<String, ObserverId>,
}

/// Spawns the executor. Must be called inside a Tokio runtime.
pub fn spawn_apply_executor(
    store: Arc<dyn LocalStore>,
    blobs: Arc<dyn BlobStore>,
    registry: Arc<TypeRegistry>,
) -> (ApplyHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut executor = ApplyExecutor {
        store,
        blobs,
        registry,
        suppressed: HashMap::new(),
    };
    let task = tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            executor.handle(cmd);
        }
        debug!("apply executor stopped");
    });
    (ApplyHandle { tx }, task)
}

impl ApplyExecutor {
    fn handle(&mut self, cmd: ApplyCommand) {
        match cmd {
            ApplyCommand::Suppress {
                record_type,
                observer,
            } => {
                self.suppressed.insert(record_type, observer);
            }
            ApplyCommand::Upsert { entity, reply } => {
                let _ = reply.send(self.upsert(entity));
            }
            ApplyCommand::Remove {
                record_type,
                id,
                reply,
            } => {
                let _ = reply.send(self.purge(&record_type, &[id]).map(|n| n > 0));
            }
            ApplyCommand::Purge {
                record_type,
                ids,
                reply,
            } => {
                let _ = reply.send(self.purge(&record_type, &ids));
            }
        }
    }

    fn txn_for(&self, record_type: &str) -> WriteTransaction {
        match self.suppressed.get(record_type) {
            Some(observer) => WriteTransaction::suppressing(*observer),
            None => WriteTransaction::new(),
        }
    }

    /// Last writer wins on the fields the record carries; fields it does
    /// not carry keep their local values.
    fn upsert(&self, incoming: Entity) -> SyncResult<()> {
        let merged = match self.store.find(&incoming.entity_type, &incoming.id)? {
            Some(mut existing) => {
                existing.fields.extend(incoming.fields);
                existing.is_deleted = incoming.is_deleted;
                existing
            }
            None => incoming,
        };
        let mut txn = self.txn_for(&merged.entity_type);
        txn.upsert(merged);
        self.store.write(txn)?;
        Ok(())
    }

    /// Physically removes rows and their blobs. Returns rows removed.
    fn purge(&self, record_type: &str, ids: &[String]) -> SyncResult<usize> {
        let ty = self
            .registry
            .get(record_type)
            .ok_or_else(|| SyncError::UnknownRecordType(record_type.to_string()))?;
        let mut txn = self.txn_for(record_type);
        let mut removed = 0;
        for id in ids {
            if self.store.find(record_type, id)?.is_some() {
                txn.delete(record_type, id.as_str());
                removed += 1;
            }
        }
        if !txn.is_empty() {
            self.store.write(txn)?;
        }
        for id in ids {
            if let Err(e) = self.blobs.delete_prefix(&ty.blob_prefix(id)) {
                warn!(record_type, id = %id, error = %e, "blob cleanup failed");
            }
        }
        Ok(removed)
    }
}

impl ApplyHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<SyncResult<T>>) -> ApplyCommand,
    ) -> SyncResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).map_err(|_| SyncError::ChannelClosed)?;
        rx.await.map_err(|_| SyncError::ChannelClosed)?
    }

    /// Hides executor writes of `record_type` from `observer`.
    pub fn suppress(&self, record_type: &str, observer: ObserverId) -> SyncResult<()> {
        self.tx
            .send(ApplyCommand::Suppress {
                record_type: record_type.to_string(),
                observer,
            })
            .map_err(|_| SyncError::ChannelClosed)
    }

    /// Inserts or updates an entity.
    pub async fn upsert(&self, entity: Entity) -> SyncResult<()> {
        self.call(|reply| ApplyCommand::Upsert { entity, reply }).await
    }

    /// Removes one row. Returns whether it existed.
    pub async fn remove(&self, record_type: &str, id: &str) -> SyncResult<bool> {
        let record_type = record_type.to_string();
        let id = id.to_string();
        self.call(|reply| ApplyCommand::Remove {
            record_type,
            id,
            reply,
        })
        .await
    }

    /// Removes rows and their blobs. Returns rows removed.
    pub async fn purge(&self, record_type: &str, ids: Vec<String>) -> SyncResult<usize> {
        let record_type = record_type.to_string();
        self.call(|reply| ApplyCommand::Purge {
            record_type,
            ids,
            reply,
        })
        .await
    }
}
