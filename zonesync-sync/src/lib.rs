//! Offline-first bidirectional sync between a local object store and a
//! remote zone-partitioned record service.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **ErrorClassifier**: turns remote failures into retry, chunk,
//!   recoverable or fatal outcomes
//! - **ChangeTokenStore**: durable per-scope change tokens and lifecycle flags
//! - **RemoteChangeFeed**: token-resumable two-pass pull
//! - **PushCoordinator**: atomic long-lived writes with retry and chunking
//! - **ZoneLifecycleManager**: zone and subscription creation, once per install
//! - **LocalChangeSource**: debounced local collection observation
//! - **SyncEngine**: owns all of the above
//!
//! ## Sync Process
//!
//! 1. **Start**: check the account, resume orphaned writes, pull, create zones
//! 2. **Watch**: local changes are debounced and pushed per zone
//! 3. **Pull**: notifications and `sync()` fetch remote changes since the
//!    last persisted token and apply them without echo
//! 4. **Clean up**: rows whose deletion the remote confirmed are purged
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use zonesync_storage::{MemoryBlobStore, MemoryStore};
//! use zonesync_sync::{SyncConfig, SyncEngine, mock::MockRemote};
//! use zonesync_types::{FieldSpec, SyncableType, TypeRegistry};
//!
//! # async fn run() -> zonesync_sync::SyncResult<()> {
//! let note = SyncableType::builder("Note")
//!     .primary_key("id")
//!     .zone("Notes")
//!     .field(FieldSpec::string("title"))
//!     .build()?;
//! let registry = TypeRegistry::new([note])?;
//!
//! let engine = SyncEngine::new(
//!     SyncConfig::default(),
//!     registry,
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MemoryBlobStore::new()),
//!     Arc::new(MockRemote::new()),
//! )?;
//! engine.start().await?;
//! engine.sync().await?;
//! # Ok(())
//! # }
//! ```

mod apply;
mod classifier;
mod config;
mod convert;
mod engine;
mod error;
mod events;
mod feed;
mod guard;
mod ledger;
mod local;
mod public;
mod push;
pub mod remote;
mod token_store;
mod zones;

pub use apply::{ApplyHandle, spawn_apply_executor};
pub use classifier::{ErrorClassifier, Outcome, describe, retry_operation_if_possible};
pub use config::{DatabaseScope, SyncConfig};
pub use convert::RecordConverter;
pub use engine::SyncEngine;
pub use error::{ErrorCode, RecoverableReason, RemoteError, SyncError, SyncResult};
pub use events::{EngineState, SyncEvent};
pub use feed::{ChangeSink, PullSummary, RemoteChangeFeed};
pub use guard::{PassKey, PullGate, PullLease, ZoneLocks};
pub use ledger::PurgeLedger;
pub use local::{LocalBatch, LocalChangeSource};
pub use public::PublicQueryFeed;
pub use push::{PushBatch, PushCoordinator, split_batch};
pub use remote::{
    AccountStatus, DatabaseChangesPage, DeletedRecord, LongLivedOperation, ModifyRequest,
    QueryCursor, QueryPage, RemoteNotification, RemoteResult, RemoteService, Subscription,
    SubscriptionTarget, ZoneChangesPage, ZoneFetch, ZonePageResult, mock,
};
pub use token_store::{ChangeTokenStore, FlagKey, TokenKey};
pub use zones::{ZoneLifecycleManager, ZoneState};
