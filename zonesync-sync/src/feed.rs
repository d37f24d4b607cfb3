//! Token-resumable pull of remote changes.
//!
//! A pull runs two cascading passes. The database pass lists zones changed
//! since the database token; the zone pass fetches changed and deleted
//! records of each of those zones since the zone's own token. Both passes
//! page until the server reports nothing more is coming.
//!
//! Tokens only move forward after the page they belong to has been handed
//! to the [`ChangeSink`]. A retried fetch re-presents the same token, so a
//! failed page is never half-applied and never skipped.

use crate::classifier::{ErrorClassifier, Outcome, retry_operation_if_possible};
use crate::error::{RecoverableReason, RemoteError, SyncError, SyncResult};
use crate::guard::{PassKey, PullGate};
use crate::remote::{RemoteService, ZoneFetch, ZonePageResult};
use crate::token_store::{ChangeTokenStore, TokenKey};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use zonesync_types::{Record, RecordId, TypeRegistry, ZoneId};

/// Receives pulled changes.
#[async_trait]
pub trait ChangeSink: Send + Sync {
    /// A record was added or changed remotely.
    async fn on_added(&self, record: Record) -> SyncResult<()>;

    /// A record was deleted remotely.
    async fn on_removed(&self, id: RecordId, record_type: String) -> SyncResult<()>;

    /// A zone was deleted remotely. Its token and flags are already reset.
    async fn on_zone_deleted(&self, _zone: &ZoneId) -> SyncResult<()> {
        Ok(())
    }

    /// All pages of a zone were applied and its token persisted.
    async fn on_zone_completed(&self, _zone: &ZoneId, _added: usize, _removed: usize) {}
}

/// What one pull did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullSummary {
    /// Zones whose pass completed.
    pub zones: Vec<ZoneId>,
    pub added: usize,
    pub removed: usize,
    /// Zones whose pass failed, with the reason.
    pub failed: Vec<(ZoneId, String)>,
    /// The pull was folded into one already running.
    pub coalesced: bool,
}

impl PullSummary {
    fn merge(&mut self, other: PullSummary) {
        self.zones.extend(other.zones);
        self.added += other.added;
        self.removed += other.removed;
        self.failed.extend(other.failed);
    }
}

/// States of one pass.
#[derive(Debug)]
pub(crate) enum PassState {
    /// Issue the next fetch with the currently stored token.
    Fetch { attempt: u32 },
    /// Wait before re-issuing the same fetch.
    Backoff { after: Duration, attempt: u32 },
    /// The token was cleared; start over from a full resync.
    Restart { attempt: u32 },
    Done,
    Failed(SyncError),
}

/// Transition taken after a failed fetch.
pub(crate) fn after_failure(
    classifier: &ErrorClassifier,
    error: &RemoteError,
    attempt: u32,
    scope: &str,
) -> PassState {
    match classifier.classify(Some(error), attempt) {
        Outcome::Retry { after, reason } => {
            if classifier.retries_exhausted(attempt) {
                warn!(scope, attempt, %reason, "pull retries exhausted");
                PassState::Failed(SyncError::RetriesExhausted { attempts: attempt })
            } else {
                debug!(scope, attempt, delay = ?after, %reason, "pull will retry");
                PassState::Backoff { after, attempt }
            }
        }
        Outcome::Recoverable {
            reason: RecoverableReason::ChangeTokenExpired,
        } => {
            if classifier.retries_exhausted(attempt) {
                PassState::Failed(SyncError::RetriesExhausted { attempts: attempt })
            } else {
                info!(scope, "change token expired; resyncing from scratch");
                PassState::Restart { attempt }
            }
        }
        Outcome::Recoverable { reason } => PassState::Failed(SyncError::Recoverable { reason }),
        Outcome::Chunk => PassState::Failed(SyncError::Fatal {
            reason: format!("{scope}: unexpected size limit on fetch"),
        }),
        Outcome::Fatal { reason } => {
            warn!(scope, %reason, "pull aborted");
            PassState::Failed(SyncError::Fatal { reason })
        }
        Outcome::Success => PassState::Done,
    }
}

/// Pulls changes for the private database.
pub struct RemoteChangeFeed {
    remote: Arc<dyn RemoteService>,
    tokens: Arc<ChangeTokenStore>,
    registry: Arc<TypeRegistry>,
    classifier: ErrorClassifier,
    gate: PullGate,
    /// Zones the database token moved past without a completed zone pass,
    /// either because the zone pass or a later database page failed. They
    /// are pulled again on the next pull.
    carry_over: Mutex<Vec<ZoneId>>,
}

impl RemoteChangeFeed {
    pub fn new(
        remote: Arc<dyn RemoteService>,
        tokens: Arc<ChangeTokenStore>,
        registry: Arc<TypeRegistry>,
        classifier: ErrorClassifier,
        gate: PullGate,
    ) -> Self {
        Self {
            remote,
            tokens,
            registry,
            classifier,
            gate,
            carry_over: Mutex::new(Vec::new()),
        }
    }

    /// Runs a full pull: database pass, then a zone pass for every
    /// registered zone the database pass reported.
    ///
    /// Zone passes run concurrently. A zone failure is reported in the
    /// summary; a database pass failure is returned as the error.
    pub async fn pull(&self, sink: &dyn ChangeSink) -> SyncResult<PullSummary> {
        let Some(mut lease) = self.gate.try_begin(PassKey::Database) else {
            debug!("pull already running; trigger folded into it");
            return Ok(PullSummary {
                coalesced: true,
                ..Default::default()
            });
        };

        let mut summary = PullSummary::default();
        loop {
            let mut zones = self.database_pass(sink).await?;
            for zone in self.take_carry_over() {
                if !zones.contains(&zone) {
                    zones.push(zone);
                }
            }
            let pass = self.pull_zones(&zones, sink).await;
            self.carry_over
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend(pass.failed.iter().map(|(zone, _)| zone.clone()));
            summary.merge(pass);
            if !lease.rerun_requested() {
                break;
            }
        }
        info!(
            zones = summary.zones.len(),
            added = summary.added,
            removed = summary.removed,
            failed = summary.failed.len(),
            "[SYNC] pull complete"
        );
        Ok(summary)
    }

    fn take_carry_over(&self) -> Vec<ZoneId> {
        std::mem::take(&mut *self.carry_over.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Runs the zone pass for each of `zones` concurrently.
    pub async fn pull_zones(&self, zones: &[ZoneId], sink: &dyn ChangeSink) -> PullSummary {
        let passes = zones.iter().map(|zone| self.guarded_zone_pass(zone, sink));
        let mut summary = PullSummary::default();
        for (zone, result) in zones.iter().zip(join_all(passes).await) {
            match result {
                Ok(Some((added, removed))) => {
                    summary.zones.push(zone.clone());
                    summary.added += added;
                    summary.removed += removed;
                }
                Ok(None) => {}
                Err(e) => summary.failed.push((zone.clone(), e.to_string())),
            }
        }
        summary
    }

    async fn database_pass(&self, sink: &dyn ChangeSink) -> SyncResult<Vec<ZoneId>> {
        let registered = self.registry.zones();
        let mut changed: Vec<ZoneId> = Vec::new();
        let mut state = PassState::Fetch { attempt: 0 };
        loop {
            state = match state {
                PassState::Fetch { attempt } => {
                    let token = self.tokens.get(&TokenKey::Database)?;
                    match self.remote.fetch_database_changes(token).await {
                        Ok(page) => {
                            for zone in &page.deleted_zones {
                                if registered.contains(zone) {
                                    info!(%zone, "zone deleted remotely");
                                    self.tokens.reset_zone(zone)?;
                                    sink.on_zone_deleted(zone).await?;
                                }
                            }
                            for zone in page.changed_zones {
                                if registered.contains(&zone) && !changed.contains(&zone) {
                                    changed.push(zone);
                                }
                            }
                            self.tokens.set(&TokenKey::Database, Some(&page.token))?;
                            if page.more_coming {
                                PassState::Fetch { attempt: 0 }
                            } else {
                                PassState::Done
                            }
                        }
                        Err(e) => after_failure(&self.classifier, &e, attempt, "database"),
                    }
                }
                PassState::Backoff { after, attempt } => {
                    retry_operation_if_possible(after, || async {}).await;
                    PassState::Fetch {
                        attempt: attempt + 1,
                    }
                }
                PassState::Restart { attempt } => {
                    self.tokens.set(&TokenKey::Database, None)?;
                    changed.clear();
                    PassState::Fetch {
                        attempt: attempt + 1,
                    }
                }
                PassState::Done => {
                    debug!(zones = changed.len(), "database pass complete");
                    return Ok(changed);
                }
                PassState::Failed(e) => {
                    // The database token already moved past these zones.
                    if !changed.is_empty() {
                        debug!(zones = changed.len(), "carrying zones of a failed database pass");
                        self.carry_over
                            .lock()
                            .unwrap_or_else(|p| p.into_inner())
                            .extend(changed);
                    }
                    return Err(e);
                }
            };
        }
    }

    /// `Ok(None)` when another pass for the zone is running and this
    /// trigger was folded into it.
    async fn guarded_zone_pass(
        &self,
        zone: &ZoneId,
        sink: &dyn ChangeSink,
    ) -> SyncResult<Option<(usize, usize)>> {
        let Some(mut lease) = self.gate.try_begin(PassKey::Zone(zone.clone())) else {
            return Ok(None);
        };
        let (mut added, mut removed) = (0, 0);
        loop {
            let (a, r) = self.zone_pass(zone, sink).await?;
            added += a;
            removed += r;
            if !lease.rerun_requested() {
                return Ok(Some((added, removed)));
            }
        }
    }

    async fn zone_pass(&self, zone: &ZoneId, sink: &dyn ChangeSink) -> SyncResult<(usize, usize)> {
        let key = TokenKey::Zone(zone.clone());
        let (mut added, mut removed) = (0, 0);
        let mut state = PassState::Fetch { attempt: 0 };
        loop {
            state = match state {
                PassState::Fetch { attempt } => {
                    let fetch = ZoneFetch {
                        zone: zone.clone(),
                        token: self.tokens.get(&key)?,
                    };
                    match self.remote.fetch_zone_changes(vec![fetch]).await {
                        Ok(page) => {
                            let result = page.zone_results.into_iter().find(|r| &r.zone == zone);
                            match result {
                                Some(ZonePageResult {
                                    error: Some(error), ..
                                }) => self.zone_failure(zone, &error, attempt)?,
                                Some(result) => {
                                    for record in page.changed {
                                        if &record.id.zone_id != zone {
                                            continue;
                                        }
                                        sink.on_added(record).await?;
                                        added += 1;
                                    }
                                    for deleted in page.deleted {
                                        if &deleted.id.zone_id != zone {
                                            continue;
                                        }
                                        sink.on_removed(deleted.id, deleted.record_type).await?;
                                        removed += 1;
                                    }
                                    if let Some(token) = &result.token {
                                        self.tokens.set(&key, Some(token))?;
                                    }
                                    if result.more_coming {
                                        PassState::Fetch { attempt: 0 }
                                    } else {
                                        PassState::Done
                                    }
                                }
                                None => PassState::Failed(SyncError::Fatal {
                                    reason: format!("no result for zone {zone}"),
                                }),
                            }
                        }
                        Err(e) => self.zone_failure(zone, &e, attempt)?,
                    }
                }
                PassState::Backoff { after, attempt } => {
                    retry_operation_if_possible(after, || async {}).await;
                    PassState::Fetch {
                        attempt: attempt + 1,
                    }
                }
                PassState::Restart { attempt } => {
                    self.tokens.set(&key, None)?;
                    PassState::Fetch {
                        attempt: attempt + 1,
                    }
                }
                PassState::Done => {
                    sink.on_zone_completed(zone, added, removed).await;
                    debug!(%zone, added, removed, "zone pass complete");
                    return Ok((added, removed));
                }
                PassState::Failed(e) => return Err(e),
            };
        }
    }

    fn zone_failure(&self, zone: &ZoneId, error: &RemoteError, attempt: u32) -> SyncResult<PassState> {
        let scope = zone.to_string();
        let next = after_failure(&self.classifier, error, attempt, &scope);
        if let PassState::Failed(SyncError::Recoverable {
            reason: RecoverableReason::ZoneNotFound,
        }) = &next
        {
            warn!(%zone, "zone missing remotely; local zone state reset");
            self.tokens.reset_zone(zone)?;
        }
        Ok(next)
    }
}
