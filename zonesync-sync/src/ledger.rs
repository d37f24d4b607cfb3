//! Tracks which soft deletions have reached the remote.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use zonesync_types::RecordId;

#[derive(Default)]
struct LedgerState {
    in_flight: HashMap<RecordId, usize>,
    confirmed: HashSet<RecordId>,
}

/// Purge bookkeeping for the current process.
///
/// A soft-deleted row may be physically removed only once a successful
/// write carried its deletion and no other write carrying it is pending.
#[derive(Default)]
pub struct PurgeLedger {
    state: Mutex<LedgerState>,
}

impl PurgeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Marks deletions as submitted.
    pub fn begin(&self, ids: &[RecordId]) {
        let mut state = self.lock();
        for id in ids {
            *state.in_flight.entry(id.clone()).or_default() += 1;
        }
    }

    /// Ends a submission; `confirmed` when the remote accepted it.
    pub fn finish(&self, ids: &[RecordId], confirmed: bool) {
        let mut state = self.lock();
        for id in ids {
            if let Some(count) = state.in_flight.get_mut(id) {
                *count -= 1;
                if *count == 0 {
                    state.in_flight.remove(id);
                }
            }
            if confirmed {
                state.confirmed.insert(id.clone());
            }
        }
    }

    /// True when the deletion was confirmed and nothing carrying it is pending.
    pub fn can_purge(&self, id: &RecordId) -> bool {
        let state = self.lock();
        state.confirmed.contains(id) && !state.in_flight.contains_key(id)
    }

    /// Drops purged ids.
    pub fn forget(&self, ids: &[RecordId]) {
        let mut state = self.lock();
        for id in ids {
            state.confirmed.remove(id);
        }
    }
}
