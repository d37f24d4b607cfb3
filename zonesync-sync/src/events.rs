//! Engine lifecycle states and the events broadcast to subscribers.

use chrono::{DateTime, Utc};
use zonesync_types::ZoneId;

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Constructed,
    Starting,
    Running,
}

/// Events emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    StateChanged(EngineState),
    /// Start failed because the remote account is unavailable.
    AccountUnavailable,
    ZoneCreated(ZoneId),
    /// A change subscription was saved for a zone or a record type.
    SubscriptionCreated { subscription_id: String },
    /// All pages of one zone were applied.
    ZonePulled {
        zone: ZoneId,
        added: usize,
        removed: usize,
    },
    PullCompleted {
        added: usize,
        removed: usize,
        at: DateTime<Utc>,
    },
    PullFailed { error: String },
    /// One write request (or chunk) committed.
    PushCompleted {
        zone: ZoneId,
        upserts: usize,
        deletions: usize,
    },
    PushFailed { zone: ZoneId, error: String },
    /// Soft-deleted rows were physically removed.
    Purged { count: usize },
}
