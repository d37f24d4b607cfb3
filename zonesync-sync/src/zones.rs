//! Zone and subscription lifecycle.
//!
//! Each zone moves `Unknown → ZoneCreated → SubscriptionCreated`. Both
//! transitions are persisted as flags so they run at most once per
//! installation, and cached in memory so they are checked at most once per
//! process. A failed transition leaves the zone where it was.

use crate::classifier::ErrorClassifier;
use crate::config::DatabaseScope;
use crate::error::SyncResult;
use crate::events::SyncEvent;
use crate::guard::ZoneLocks;
use crate::remote::{RemoteService, Subscription};
use crate::token_store::{ChangeTokenStore, FlagKey};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info};
use zonesync_types::{TypeRegistry, ZoneId};

/// Lifecycle position of one zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ZoneState {
    Unknown,
    ZoneCreated,
    SubscriptionCreated,
}

/// Ensures zones and their change subscriptions exist remotely.
pub struct ZoneLifecycleManager {
    remote: Arc<dyn RemoteService>,
    tokens: Arc<ChangeTokenStore>,
    registry: Arc<TypeRegistry>,
    classifier: ErrorClassifier,
    scope: DatabaseScope,
    states: Mutex<HashMap<ZoneId, ZoneState>>,
    locks: ZoneLocks,
    events: broadcast::Sender<SyncEvent>,
}

impl ZoneLifecycleManager {
    pub fn new(
        remote: Arc<dyn RemoteService>,
        tokens: Arc<ChangeTokenStore>,
        registry: Arc<TypeRegistry>,
        classifier: ErrorClassifier,
        scope: DatabaseScope,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            remote,
            tokens,
            registry,
            classifier,
            scope,
            states: Mutex::new(HashMap::new()),
            locks: ZoneLocks::new(),
            events,
        }
    }

    fn states(&self) -> MutexGuard<'_, HashMap<ZoneId, ZoneState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// In-memory state of a zone.
    pub fn state(&self, zone: &ZoneId) -> ZoneState {
        self.states().get(zone).copied().unwrap_or(ZoneState::Unknown)
    }

    fn advance(&self, zone: &ZoneId, to: ZoneState) {
        let mut states = self.states();
        let entry = states.entry(zone.clone()).or_insert(ZoneState::Unknown);
        if to > *entry {
            *entry = to;
        }
    }

    /// Creates `zone` remotely unless it is known to exist.
    ///
    /// Returns true when this call created it, which means nothing local
    /// has reached it yet.
    pub async fn ensure_zone(&self, zone: &ZoneId) -> SyncResult<bool> {
        let _guard = self.locks.acquire(zone).await;
        if self.state(zone) >= ZoneState::ZoneCreated {
            return Ok(false);
        }
        let flag = FlagKey::ZoneCreated(zone.clone());
        if self.scope == DatabaseScope::Public || zone.is_default_zone() || self.tokens.flag(&flag)? {
            self.advance(zone, ZoneState::ZoneCreated);
            return Ok(false);
        }

        self.classifier
            .run_with_retry("create zone", || self.remote.create_zone(zone))
            .await?;
        self.tokens.set_flag(&flag, true)?;
        self.advance(zone, ZoneState::ZoneCreated);
        info!(%zone, "[SYNC] zone created");
        let _ = self.events.send(SyncEvent::ZoneCreated(zone.clone()));
        Ok(true)
    }

    /// Saves the change subscription for `zone` unless already saved.
    ///
    /// In the public scope subscriptions are per record type, each with its
    /// own persisted flag.
    pub async fn ensure_subscription(&self, zone: &ZoneId) -> SyncResult<()> {
        let _guard = self.locks.acquire(zone).await;
        if self.state(zone) == ZoneState::SubscriptionCreated {
            return Ok(());
        }

        match self.scope {
            DatabaseScope::Private => {
                let flag = FlagKey::SubscriptionCreated(zone.clone());
                if !self.tokens.flag(&flag)? {
                    self.save(Subscription::for_zone(zone)).await?;
                    self.tokens.set_flag(&flag, true)?;
                }
            }
            DatabaseScope::Public => {
                for ty in self.registry.types() {
                    let flag = FlagKey::PublicSubscriptionCreated(ty.record_type.clone());
                    if self.tokens.flag(&flag)? {
                        continue;
                    }
                    self.save(Subscription::for_record_type(&ty.record_type)).await?;
                    self.tokens.set_flag(&flag, true)?;
                }
            }
        }
        self.advance(zone, ZoneState::SubscriptionCreated);
        Ok(())
    }

    async fn save(&self, subscription: Subscription) -> SyncResult<()> {
        let id = subscription.id.clone();
        self.classifier
            .run_with_retry("save subscription", || {
                self.remote.save_subscription(subscription.clone())
            })
            .await?;
        info!(subscription = %id, "[SYNC] subscription saved");
        let _ = self.events.send(SyncEvent::SubscriptionCreated {
            subscription_id: id,
        });
        Ok(())
    }

    /// Forgets a zone that disappeared remotely.
    pub fn reset(&self, zone: &ZoneId) -> SyncResult<()> {
        self.tokens.reset_zone(zone)?;
        self.states().remove(zone);
        debug!(%zone, "zone state reset");
        Ok(())
    }
}
