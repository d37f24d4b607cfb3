//! Pull for the public database.
//!
//! The public database has no change tokens. Each pull queries every record
//! of each registered type, page by page, and hands them to the sink as
//! upserts.

use crate::classifier::{ErrorClassifier, retry_operation_if_possible};
use crate::error::SyncResult;
use crate::feed::{ChangeSink, PassState, PullSummary, after_failure};
use crate::guard::{PassKey, PullGate};
use crate::remote::{QueryCursor, RemoteService};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info};
use zonesync_types::{TypeRegistry, ZoneId};

/// Query-based pull for the public scope.
pub struct PublicQueryFeed {
    remote: Arc<dyn RemoteService>,
    registry: Arc<TypeRegistry>,
    classifier: ErrorClassifier,
    gate: PullGate,
    zone: ZoneId,
}

impl PublicQueryFeed {
    pub fn new(
        remote: Arc<dyn RemoteService>,
        registry: Arc<TypeRegistry>,
        classifier: ErrorClassifier,
        gate: PullGate,
        zone: ZoneId,
    ) -> Self {
        Self {
            remote,
            registry,
            classifier,
            gate,
            zone,
        }
    }

    /// Queries every registered type concurrently.
    pub async fn pull(&self, sink: &dyn ChangeSink) -> SyncResult<PullSummary> {
        let types: Vec<String> = self
            .registry
            .types()
            .iter()
            .map(|t| t.record_type.clone())
            .collect();
        let passes = types.iter().map(|t| self.guarded_query(t, sink));

        let mut summary = PullSummary::default();
        let mut completed = false;
        for (record_type, result) in types.iter().zip(join_all(passes).await) {
            match result {
                Ok(Some(added)) => {
                    summary.added += added;
                    completed = true;
                }
                Ok(None) => summary.coalesced = true,
                Err(e) => summary.failed.push((self.zone.clone(), format!("{record_type}: {e}"))),
            }
        }
        if completed {
            summary.zones.push(self.zone.clone());
            sink.on_zone_completed(&self.zone, summary.added, 0).await;
        }
        info!(added = summary.added, failed = summary.failed.len(), "[SYNC] public pull complete");
        Ok(summary)
    }

    async fn guarded_query(&self, record_type: &str, sink: &dyn ChangeSink) -> SyncResult<Option<usize>> {
        let Some(mut lease) = self.gate.try_begin(PassKey::Query(record_type.to_string())) else {
            return Ok(None);
        };
        let mut added = 0;
        loop {
            added += self.query_pass(record_type, sink).await?;
            if !lease.rerun_requested() {
                return Ok(Some(added));
            }
        }
    }

    async fn query_pass(&self, record_type: &str, sink: &dyn ChangeSink) -> SyncResult<usize> {
        let mut cursor: Option<QueryCursor> = None;
        let mut added = 0;
        let mut state = PassState::Fetch { attempt: 0 };
        loop {
            state = match state {
                PassState::Fetch { attempt } => {
                    match self.remote.query_records(record_type, cursor.clone()).await {
                        Ok(page) => {
                            for record in page.records {
                                sink.on_added(record).await?;
                                added += 1;
                            }
                            cursor = page.cursor;
                            if cursor.is_some() {
                                PassState::Fetch { attempt: 0 }
                            } else {
                                PassState::Done
                            }
                        }
                        Err(e) => after_failure(&self.classifier, &e, attempt, record_type),
                    }
                }
                PassState::Backoff { after, attempt } => {
                    retry_operation_if_possible(after, || async {}).await;
                    PassState::Fetch {
                        attempt: attempt + 1,
                    }
                }
                PassState::Restart { attempt } => {
                    cursor = None;
                    PassState::Fetch {
                        attempt: attempt + 1,
                    }
                }
                PassState::Done => {
                    debug!(record_type, added, "query pass complete");
                    return Ok(added);
                }
                PassState::Failed(e) => return Err(e),
            };
        }
    }
}
