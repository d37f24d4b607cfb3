//! Atomic, resumable pushes with retry and chunking.
//!
//! Each batch becomes one atomic, long-lived write request. The request's
//! operation id stays the same across retries of the same payload so the
//! service can recognise a resubmission.
//!
//! When the service says a request is too large the upserts are re-sliced
//! into chunks and each chunk is pushed on its own. Deletions stay with the
//! first chunk. Every chunk reports its own completion.

use crate::classifier::{ErrorClassifier, Outcome, retry_operation_if_possible};
use crate::error::{RecoverableReason, SyncError, SyncResult};
use crate::events::SyncEvent;
use crate::guard::ZoneLocks;
use crate::ledger::PurgeLedger;
use crate::remote::{ModifyRequest, RemoteService};
use crate::zones::ZoneLifecycleManager;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use zonesync_types::{OperationId, Record, RecordId, ZoneId};

/// Records to upsert and ids to delete in one zone.
#[derive(Debug, Clone, PartialEq)]
pub struct PushBatch {
    pub zone: ZoneId,
    pub upserts: Vec<Record>,
    pub deletions: Vec<RecordId>,
}

impl PushBatch {
    pub fn new(zone: ZoneId) -> Self {
        Self {
            zone,
            upserts: Vec::new(),
            deletions: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.upserts.len() + self.deletions.len()
    }
}

/// States of one write request.
#[derive(Debug)]
enum PushState {
    Submit { attempt: u32 },
    Backoff { after: Duration, attempt: u32 },
    /// Too large; replace with smaller batches.
    Split,
    Done,
    Failed(SyncError),
}

/// Splits a batch that was rejected as too large.
///
/// Over the limit: `ceil(n / limit)` chunks of equal size. At or under it:
/// halves. A single record cannot be split.
pub fn split_batch(batch: PushBatch, limit: usize) -> Option<Vec<PushBatch>> {
    let n = batch.upserts.len();
    if n <= 1 {
        return None;
    }
    let size = if n > limit {
        let count = n.div_ceil(limit);
        n.div_ceil(count)
    } else {
        n.div_ceil(2)
    };

    let PushBatch {
        zone,
        upserts,
        mut deletions,
    } = batch;
    let mut chunks = Vec::with_capacity(n.div_ceil(size));
    let mut upserts = upserts.into_iter().peekable();
    while upserts.peek().is_some() {
        chunks.push(PushBatch {
            zone: zone.clone(),
            upserts: upserts.by_ref().take(size).collect(),
            deletions: std::mem::take(&mut deletions),
        });
    }
    Some(chunks)
}

/// Submits push batches to the remote.
pub struct PushCoordinator {
    remote: Arc<dyn RemoteService>,
    classifier: ErrorClassifier,
    chunk_limit: usize,
    locks: ZoneLocks,
    zones: Arc<ZoneLifecycleManager>,
    ledger: Arc<PurgeLedger>,
    events: broadcast::Sender<SyncEvent>,
}

impl PushCoordinator {
    pub fn new(
        remote: Arc<dyn RemoteService>,
        classifier: ErrorClassifier,
        chunk_limit: usize,
        zones: Arc<ZoneLifecycleManager>,
        ledger: Arc<PurgeLedger>,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            remote,
            classifier,
            chunk_limit,
            locks: ZoneLocks::new(),
            zones,
            ledger,
            events,
        }
    }

    /// Pushes a batch and returns one completion per write request that
    /// reached a terminal state: a single entry when the batch went
    /// through whole, one per chunk when it was split.
    ///
    /// Pushes to the same zone run one at a time, in call order.
    pub async fn push(&self, batch: PushBatch) -> Vec<SyncResult<()>> {
        if batch.is_empty() {
            return Vec::new();
        }
        let zone = batch.zone.clone();
        let _guard = self.locks.acquire(&zone).await;

        let mut completions = Vec::new();
        let mut queue = VecDeque::from([batch]);
        while let Some(batch) = queue.pop_front() {
            match self.submit(batch).await {
                Ok(None) => {
                    completions.push(Ok(()));
                    self.after_success(&zone).await;
                }
                Ok(Some(chunks)) => {
                    debug!(%zone, chunks = chunks.len(), "batch split");
                    for chunk in chunks.into_iter().rev() {
                        queue.push_front(chunk);
                    }
                }
                Err(e) => completions.push(Err(e)),
            }
        }
        completions
    }

    /// Drives one write request to a terminal state. `Ok(Some)` carries
    /// the replacement chunks when it was too large.
    async fn submit(&self, batch: PushBatch) -> SyncResult<Option<Vec<PushBatch>>> {
        let request = ModifyRequest {
            upserts: batch.upserts.clone(),
            deletions: batch.deletions.clone(),
            atomic: true,
            long_lived: true,
            operation_id: OperationId::new(),
        };
        let zone = batch.zone.clone();

        self.ledger.begin(&request.deletions);
        let mut state = PushState::Submit { attempt: 0 };
        let result = loop {
            state = match state {
                PushState::Submit { attempt } => {
                    let result = self.remote.modify_records(request.clone()).await;
                    match self.classifier.classify(result.as_ref().err(), attempt) {
                        Outcome::Success => PushState::Done,
                        Outcome::Retry { after, reason } => {
                            if self.classifier.retries_exhausted(attempt) {
                                PushState::Failed(SyncError::RetriesExhausted { attempts: attempt })
                            } else {
                                debug!(%zone, attempt, delay = ?after, %reason, "push will retry");
                                PushState::Backoff { after, attempt }
                            }
                        }
                        Outcome::Chunk => PushState::Split,
                        Outcome::Recoverable { reason } => {
                            if reason == RecoverableReason::ZoneNotFound {
                                if let Err(e) = self.zones.reset(&zone) {
                                    warn!(%zone, error = %e, "zone reset failed");
                                }
                            }
                            PushState::Failed(SyncError::Recoverable { reason })
                        }
                        Outcome::Fatal { reason } => PushState::Failed(SyncError::Fatal { reason }),
                    }
                }
                PushState::Backoff { after, attempt } => {
                    retry_operation_if_possible(after, || async {}).await;
                    PushState::Submit {
                        attempt: attempt + 1,
                    }
                }
                PushState::Split => break match split_batch(batch, self.chunk_limit) {
                    Some(chunks) => Ok(Some(chunks)),
                    None => Err(SyncError::Fatal {
                        reason: "single record exceeds request size limit".into(),
                    }),
                },
                PushState::Done => break Ok(None),
                PushState::Failed(e) => break Err(e),
            };
        };

        let confirmed = matches!(result, Ok(None));
        self.ledger.finish(&request.deletions, confirmed);
        match &result {
            Ok(None) => {
                info!(
                    %zone,
                    upserts = request.upserts.len(),
                    deletions = request.deletions.len(),
                    "[SYNC] push committed"
                );
                let _ = self.events.send(SyncEvent::PushCompleted {
                    zone,
                    upserts: request.upserts.len(),
                    deletions: request.deletions.len(),
                });
            }
            Ok(Some(_)) => {}
            Err(e) => {
                warn!(%zone, error = %e, "push failed");
                let _ = self.events.send(SyncEvent::PushFailed {
                    zone,
                    error: e.to_string(),
                });
            }
        }
        result
    }

    async fn after_success(&self, zone: &ZoneId) {
        if let Err(e) = self.zones.ensure_subscription(zone).await {
            warn!(%zone, error = %e, "subscription not saved; will retry after next push");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(n: usize, deletions: usize) -> PushBatch {
        let zone = ZoneId::owned("Z");
        PushBatch {
            upserts: (0..n)
                .map(|i| Record::new("T", RecordId::new(format!("r{i}"), zone.clone())))
                .collect(),
            deletions: (0..deletions)
                .map(|i| RecordId::new(format!("d{i}"), zone.clone()))
                .collect(),
            zone,
        }
    }

    #[test]
    fn split_over_limit_uses_equal_chunks() {
        let chunks = split_batch(batch(900, 2), 300).unwrap();
        assert_eq!(chunks.iter().map(|c| c.upserts.len()).collect::<Vec<_>>(), vec![300, 300, 300]);
        assert_eq!(chunks[0].deletions.len(), 2);
        assert!(chunks[1].deletions.is_empty());

        let chunks = split_batch(batch(301, 0), 300).unwrap();
        assert_eq!(chunks.iter().map(|c| c.upserts.len()).collect::<Vec<_>>(), vec![151, 150]);
    }

    #[test]
    fn split_under_limit_halves() {
        let chunks = split_batch(batch(5, 0), 300).unwrap();
        assert_eq!(chunks.iter().map(|c| c.upserts.len()).collect::<Vec<_>>(), vec![3, 2]);
    }

    #[test]
    fn single_record_cannot_split() {
        assert!(split_batch(batch(1, 3), 300).is_none());
        assert!(split_batch(batch(0, 3), 300).is_none());
    }
}
