//! The sync engine: owns every sync component and wires them together.
//!
//! Local changes flow `LocalChangeSource → PushCoordinator → remote`.
//! Remote changes flow `notification or sync() → pull feed → apply executor
//! → local store`.

use crate::apply::{ApplyHandle, spawn_apply_executor};
use crate::classifier::ErrorClassifier;
use crate::config::{DatabaseScope, SyncConfig};
use crate::convert::RecordConverter;
use crate::error::{SyncError, SyncResult};
use crate::events::{EngineState, SyncEvent};
use crate::feed::{ChangeSink, PullSummary, RemoteChangeFeed};
use crate::guard::PullGate;
use crate::ledger::PurgeLedger;
use crate::local::{LocalBatch, LocalChangeSource};
use crate::public::PublicQueryFeed;
use crate::push::{PushBatch, PushCoordinator};
use crate::remote::{AccountStatus, RemoteService};
use crate::token_store::ChangeTokenStore;
use crate::zones::{ZoneLifecycleManager, ZoneState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zonesync_storage::{BlobStore, LocalStore};
use zonesync_types::{Entity, Record, RecordId, TypeRegistry, ZoneId};

const EVENT_CAPACITY: usize = 256;

/// Tasks and observers that exist only while the engine runs.
#[derive(Default)]
struct Wiring {
    sources: Vec<LocalChangeSource>,
    tasks: Vec<JoinHandle<()>>,
}

struct EngineInner {
    config: SyncConfig,
    registry: Arc<TypeRegistry>,
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteService>,
    tokens: Arc<ChangeTokenStore>,
    classifier: ErrorClassifier,
    converter: RecordConverter,
    apply: ApplyHandle,
    feed: RemoteChangeFeed,
    public_feed: PublicQueryFeed,
    zones: Arc<ZoneLifecycleManager>,
    push: PushCoordinator,
    ledger: Arc<PurgeLedger>,
    state: Mutex<EngineState>,
    events: broadcast::Sender<SyncEvent>,
    last_pull: Mutex<Option<DateTime<Utc>>>,
}

/// The sync engine.
///
/// `Constructed → Starting → Running`. A start that fails (for instance
/// because the account is unavailable) returns to `Constructed`; the next
/// [`SyncEngine::sync`] call tries again.
pub struct SyncEngine {
    inner: Arc<EngineInner>,
    start_lock: tokio::sync::Mutex<()>,
    wiring: Mutex<Wiring>,
    apply_task: JoinHandle<()>,
}

impl SyncEngine {
    /// Builds an engine. Must be called inside a Tokio runtime.
    pub fn new(
        config: SyncConfig,
        registry: TypeRegistry,
        store: Arc<dyn LocalStore>,
        blobs: Arc<dyn BlobStore>,
        remote: Arc<dyn RemoteService>,
    ) -> SyncResult<Self> {
        if registry.is_empty() {
            return Err(SyncError::InvalidState("no syncable types registered".into()));
        }
        let tokens = Arc::new(match &config.token_store_path {
            Some(path) => ChangeTokenStore::open(path)?,
            None => ChangeTokenStore::open_in_memory()?,
        });
        let registry = Arc::new(registry);
        let classifier = ErrorClassifier::from_config(&config);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let gate = PullGate::new();
        let public_zone = ZoneId::new(ZoneId::DEFAULT_ZONE_NAME, config.default_zone_owner.clone());

        let converter = match config.scope {
            DatabaseScope::Private => RecordConverter::new(registry.clone(), blobs.clone()),
            DatabaseScope::Public => RecordConverter::new(registry.clone(), blobs.clone())
                .with_zone_override(public_zone.clone()),
        };
        let (apply, apply_task) = spawn_apply_executor(store.clone(), blobs, registry.clone());
        let zones = Arc::new(ZoneLifecycleManager::new(
            remote.clone(),
            tokens.clone(),
            registry.clone(),
            classifier,
            config.scope,
            events.clone(),
        ));
        let ledger = Arc::new(PurgeLedger::new());

        let inner = EngineInner {
            feed: RemoteChangeFeed::new(
                remote.clone(),
                tokens.clone(),
                registry.clone(),
                classifier,
                gate.clone(),
            ),
            public_feed: PublicQueryFeed::new(
                remote.clone(),
                registry.clone(),
                classifier,
                gate,
                public_zone,
            ),
            push: PushCoordinator::new(
                remote.clone(),
                classifier,
                config.chunk_limit,
                zones.clone(),
                ledger.clone(),
                events.clone(),
            ),
            config,
            registry,
            store,
            remote,
            tokens,
            classifier,
            converter,
            apply,
            zones,
            ledger,
            state: Mutex::new(EngineState::Constructed),
            events,
            last_pull: Mutex::new(None),
        };

        Ok(Self {
            inner: Arc::new(inner),
            start_lock: tokio::sync::Mutex::new(()),
            wiring: Mutex::new(Wiring::default()),
            apply_task,
        })
    }

    pub fn state(&self) -> EngineState {
        self.inner.state()
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn token_store(&self) -> &Arc<ChangeTokenStore> {
        &self.inner.tokens
    }

    pub fn zone_state(&self, zone: &ZoneId) -> ZoneState {
        self.inner.zones.state(zone)
    }

    /// When the last successful pull finished.
    pub fn last_pull_at(&self) -> Option<DateTime<Utc>> {
        *lock(&self.inner.last_pull)
    }

    /// Brings the engine to `Running`.
    ///
    /// Checks the account, reattaches orphaned long-lived writes, pulls,
    /// creates missing zones, starts watching local collections and remote
    /// notifications, then force-pushes into zones created just now.
    pub async fn start(&self) -> SyncResult<()> {
        let _starting = self.start_lock.lock().await;
        if self.state() == EngineState::Running {
            return Ok(());
        }
        self.inner.set_state(EngineState::Starting);

        match self.bring_up().await {
            Ok(()) => {
                self.inner.set_state(EngineState::Running);
                info!(scope = ?self.inner.config.scope, types = self.inner.registry.len(), "[SYNC] engine running");
                Ok(())
            }
            Err(e) => {
                self.tear_down();
                self.inner.set_state(EngineState::Constructed);
                error!(error = %e, "[SYNC] engine start failed");
                Err(e)
            }
        }
    }

    async fn bring_up(&self) -> SyncResult<()> {
        let inner = &self.inner;
        inner.check_account().await?;
        inner.recover_long_lived().await;

        if let Err(e) = inner.pull().await {
            warn!(error = %e, "initial pull failed; continuing start");
        }

        let mut created = Vec::new();
        for zone in inner.registry.zones() {
            match inner.zones.ensure_zone(&zone).await {
                Ok(true) => created.push(zone),
                Ok(false) => {}
                Err(e) => warn!(%zone, error = %e, "zone not created; will retry on next start"),
            }
        }

        self.wire_local_sources()?;
        self.wire_notifications();

        if !created.is_empty() {
            info!(zones = created.len(), "catch-up push into new zones");
            for result in inner.push_zones(Some(created.as_slice())).await? {
                if let Err(e) = result {
                    warn!(error = %e, "catch-up push failed");
                }
            }
        }
        Ok(())
    }

    fn wire_local_sources(&self) -> SyncResult<()> {
        let inner = &self.inner;
        let mut wiring = lock(&self.wiring);
        for ty in inner.registry.types() {
            let (tx, mut rx) = mpsc::unbounded_channel::<LocalBatch>();
            let source = LocalChangeSource::spawn(
                inner.store.clone(),
                &ty.record_type,
                inner.config.debounce(),
                tx,
            )?;
            inner.apply.suppress(&ty.record_type, source.observer())?;
            wiring.sources.push(source);

            // One router per type keeps that type's pushes in order.
            let engine = inner.clone();
            wiring.tasks.push(tokio::spawn(async move {
                while let Some(batch) = rx.recv().await {
                    for result in engine.push_local(batch).await {
                        if let Err(e) = result {
                            debug!(error = %e, "local batch not pushed; rows stay dirty");
                        }
                    }
                }
            }));
        }
        Ok(())
    }

    fn wire_notifications(&self) {
        let Some(mut rx) = self.inner.remote.notifications() else {
            return;
        };
        let engine = self.inner.clone();
        lock(&self.wiring).tasks.push(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(notification) => {
                        debug!(zone = ?notification.zone, "remote change notification");
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(skipped = n, "notifications lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                if let Err(e) = engine.pull().await {
                    debug!(error = %e, "notification-triggered pull failed");
                }
            }
        }));
    }

    fn tear_down(&self) {
        let mut wiring = lock(&self.wiring);
        for task in wiring.tasks.drain(..) {
            task.abort();
        }
        wiring.sources.clear();
    }

    /// Pulls all remote changes. Starts the engine first if it is not
    /// running, which re-checks the account.
    pub async fn sync(&self) -> SyncResult<PullSummary> {
        if self.state() != EngineState::Running {
            self.start().await?;
        }
        self.inner.pull().await
    }

    /// Re-derives every pending change from the local store and pushes it:
    /// live rows as upserts, soft-deleted rows as deletions.
    pub async fn push_all(&self) -> SyncResult<()> {
        let results = self.inner.push_zones(None).await?;
        results.into_iter().collect()
    }

    /// Physically removes soft-deleted rows whose deletion was confirmed
    /// by the remote during this process and is not being pushed again.
    /// Returns the number of rows removed.
    pub async fn clean_up(&self) -> SyncResult<usize> {
        let inner = &self.inner;
        let mut total = 0;
        for ty in inner.registry.types() {
            let (ids, record_ids): (Vec<String>, Vec<RecordId>) = inner
                .store
                .query(&ty.record_type)?
                .into_iter()
                .filter(|e| e.is_deleted)
                .map(|e| {
                    let id = inner.converter.record_id(ty, &e.id);
                    (e.id, id)
                })
                .filter(|(_, id)| inner.ledger.can_purge(id))
                .unzip();
            if ids.is_empty() {
                continue;
            }
            total += inner.apply.purge(&ty.record_type, ids).await?;
            inner.ledger.forget(&record_ids);
        }
        if total > 0 {
            info!(rows = total, "[SYNC] purged soft-deleted rows");
            let _ = inner.events.send(SyncEvent::Purged { count: total });
        }
        Ok(total)
    }

    /// Stops watching local and remote changes.
    pub fn shutdown(&self) {
        self.tear_down();
        self.inner.set_state(EngineState::Constructed);
        info!("[SYNC] engine stopped");
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.tear_down();
        self.apply_task.abort();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl EngineInner {
    fn state(&self) -> EngineState {
        *lock(&self.state)
    }

    fn set_state(&self, state: EngineState) {
        *lock(&self.state) = state;
        let _ = self.events.send(SyncEvent::StateChanged(state));
    }

    async fn check_account(&self) -> SyncResult<()> {
        let remote = &self.remote;
        let status = self
            .classifier
            .run_with_retry("account status", || remote.account_status())
            .await?;
        if status != AccountStatus::Available {
            warn!(?status, "[SYNC] remote account unavailable");
            let _ = self.events.send(SyncEvent::AccountUnavailable);
            return Err(SyncError::AccountUnavailable);
        }
        Ok(())
    }

    /// Reattaches writes a previous process left in flight. Never fails
    /// the start.
    async fn recover_long_lived(&self) {
        let remote = &self.remote;
        let operations = match self
            .classifier
            .run_with_retry("fetch orphaned operations", || remote.fetch_orphaned_operations())
            .await
        {
            Ok(ops) => ops,
            Err(e) => {
                warn!(error = %e, "could not list orphaned operations");
                return;
            }
        };
        for op in operations {
            let id = op.operation_id;
            match self
                .classifier
                .run_with_retry("resume operation", || remote.resume_operation(id))
                .await
            {
                Ok(()) => info!(operation = %id, "resumed long-lived operation"),
                Err(e) => warn!(operation = %id, error = %e, "long-lived operation not resumed"),
            }
        }
    }

    async fn pull(&self) -> SyncResult<PullSummary> {
        let result = match self.config.scope {
            DatabaseScope::Private => self.feed.pull(self).await,
            DatabaseScope::Public => self.public_feed.pull(self).await,
        };
        match &result {
            Ok(summary) if !summary.coalesced => {
                let at = Utc::now();
                *lock(&self.last_pull) = Some(at);
                let _ = self.events.send(SyncEvent::PullCompleted {
                    added: summary.added,
                    removed: summary.removed,
                    at,
                });
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "[SYNC] pull failed");
                let _ = self.events.send(SyncEvent::PullFailed {
                    error: e.to_string(),
                });
            }
        }
        result
    }

    fn build_batch(
        &self,
        record_type: &str,
        to_store: &[Entity],
        to_delete: &[Entity],
    ) -> SyncResult<PushBatch> {
        let ty = self.converter.descriptor(record_type)?;
        let mut batch = PushBatch::new(self.converter.zone_for(ty));
        batch.upserts = to_store
            .iter()
            .map(|e| self.converter.to_record(e))
            .collect::<SyncResult<Vec<Record>>>()?;
        batch.deletions = to_delete
            .iter()
            .map(|e| self.converter.record_id(ty, &e.id))
            .collect();
        Ok(batch)
    }

    async fn push_local(&self, batch: LocalBatch) -> Vec<SyncResult<()>> {
        match self.build_batch(&batch.record_type, &batch.to_store, &batch.to_delete) {
            Ok(push) => self.push.push(push).await,
            Err(e) => vec![Err(e)],
        }
    }

    /// Builds one batch per zone from the whole local store and pushes the
    /// zones concurrently. `only` restricts the zones.
    async fn push_zones(&self, only: Option<&[ZoneId]>) -> SyncResult<Vec<SyncResult<()>>> {
        let mut batches: Vec<PushBatch> = Vec::new();
        for ty in self.registry.types() {
            let zone = self.converter.zone_for(ty);
            if only.is_some_and(|zones| !zones.contains(&zone)) {
                continue;
            }
            let (deleted, live): (Vec<Entity>, Vec<Entity>) = self
                .store
                .query(&ty.record_type)?
                .into_iter()
                .partition(|e| e.is_deleted);
            let part = self.build_batch(&ty.record_type, &live, &deleted)?;
            match batches.iter_mut().find(|b| b.zone == zone) {
                Some(batch) => {
                    batch.upserts.extend(part.upserts);
                    batch.deletions.extend(part.deletions);
                }
                None => batches.push(part),
            }
        }
        batches.retain(|b| !b.is_empty());
        debug!(zones = batches.len(), "pushing full local state");

        let pushes = batches.into_iter().map(|b| self.push.push(b));
        Ok(join_all(pushes).await.into_iter().flatten().collect())
    }
}

#[async_trait]
impl ChangeSink for EngineInner {
    async fn on_added(&self, record: Record) -> SyncResult<()> {
        if self.registry.get(&record.record_type).is_none() {
            debug!(record_type = %record.record_type, "record of unregistered type ignored");
            return Ok(());
        }
        let entity = self.converter.to_entity(&record)?;
        self.apply.upsert(entity).await
    }

    async fn on_removed(&self, id: RecordId, record_type: String) -> SyncResult<()> {
        if self.registry.get(&record_type).is_none() {
            debug!(%record_type, "removal of unregistered type ignored");
            return Ok(());
        }
        self.apply.remove(&record_type, &id.unique_id).await?;
        Ok(())
    }

    async fn on_zone_deleted(&self, zone: &ZoneId) -> SyncResult<()> {
        self.zones.reset(zone)
    }

    async fn on_zone_completed(&self, zone: &ZoneId, added: usize, removed: usize) {
        let _ = self.events.send(SyncEvent::ZonePulled {
            zone: zone.clone(),
            added,
            removed,
        });
    }
}
