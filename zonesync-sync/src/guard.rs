//! In-flight guards.
//!
//! At most one pull pass runs per scope at a time. A trigger that arrives
//! while a pass is running is folded into it: the running pass is told to
//! go around once more before it releases the scope.
//!
//! Pushes queue instead: each zone has an async mutex held for the whole
//! push including its retries and chunks.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;
use zonesync_types::ZoneId;

/// What a pull pass covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PassKey {
    Database,
    Zone(ZoneId),
    Query(String),
}

#[derive(Default)]
struct GateState {
    running: HashSet<PassKey>,
    rerun: HashSet<PassKey>,
}

/// Compare-and-swap "pass in progress" flags.
#[derive(Clone, Default)]
pub struct PullGate {
    state: Arc<Mutex<GateState>>,
}

impl PullGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claims `key`. When it is already claimed the holder is asked to run
    /// again and `None` is returned.
    pub fn try_begin(&self, key: PassKey) -> Option<PullLease> {
        let mut state = self.lock();
        if state.running.contains(&key) {
            state.rerun.insert(key);
            return None;
        }
        state.running.insert(key.clone());
        Some(PullLease {
            gate: self.clone(),
            key,
            released: false,
        })
    }

    pub fn is_running(&self, key: &PassKey) -> bool {
        self.lock().running.contains(key)
    }
}

/// Exclusive claim on one pass scope. Released on drop.
pub struct PullLease {
    gate: PullGate,
    key: PassKey,
    released: bool,
}

impl PullLease {
    /// Returns true if another trigger arrived while the pass ran; the
    /// lease is kept and the caller should run the pass again. Otherwise
    /// the scope is released.
    pub fn rerun_requested(&mut self) -> bool {
        let mut state = self.gate.lock();
        if state.rerun.remove(&self.key) {
            return true;
        }
        state.running.remove(&self.key);
        self.released = true;
        false
    }
}

impl Drop for PullLease {
    fn drop(&mut self) {
        if !self.released {
            let mut state = self.gate.lock();
            state.running.remove(&self.key);
            state.rerun.remove(&self.key);
        }
    }
}

/// One async mutex per zone.
#[derive(Clone, Default)]
pub struct ZoneLocks {
    locks: Arc<Mutex<HashMap<ZoneId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ZoneLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other holder of `zone` is running.
    pub async fn acquire(&self, zone: &ZoneId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(zone.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}
