//! Remote service abstraction.
//!
//! The sync core never talks to a concrete backend; it drives a
//! [`RemoteService`] implementation. [`mock::MockRemote`] is a scriptable
//! in-memory implementation for tests.

use crate::error::RemoteError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use zonesync_types::{ChangeToken, OperationId, Record, RecordId, ZoneId};

/// Result of a remote call.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Whether the remote account can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    Available,
    NoAccount,
    Restricted,
    CouldNotDetermine,
}

/// One page of the database-level change scan.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DatabaseChangesPage {
    pub changed_zones: Vec<ZoneId>,
    pub deleted_zones: Vec<ZoneId>,
    /// Token to present for the next page or the next scan.
    pub token: ChangeToken,
    pub more_coming: bool,
}

/// A zone to fetch and the token to resume from.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneFetch {
    pub zone: ZoneId,
    pub token: Option<ChangeToken>,
}

/// A record removed remotely.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedRecord {
    pub id: RecordId,
    pub record_type: String,
}

/// Per-zone status of a zone change page.
#[derive(Debug, Clone, PartialEq)]
pub struct ZonePageResult {
    pub zone: ZoneId,
    pub token: Option<ChangeToken>,
    pub more_coming: bool,
    pub error: Option<RemoteError>,
}

/// One page of the zone-level change scan.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ZoneChangesPage {
    /// Changed records, in server order.
    pub changed: Vec<Record>,
    pub deleted: Vec<DeletedRecord>,
    pub zone_results: Vec<ZonePageResult>,
}

/// A write request.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifyRequest {
    pub upserts: Vec<Record>,
    pub deletions: Vec<RecordId>,
    /// All items commit or none do.
    pub atomic: bool,
    /// The request may be resumed by the service after a relaunch.
    pub long_lived: bool,
    /// Stable across resubmissions of the same payload.
    pub operation_id: OperationId,
}

/// What a change-notification subscription watches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionTarget {
    Zone(ZoneId),
    RecordType(String),
}

/// A change-notification subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub target: SubscriptionTarget,
}

impl Subscription {
    pub fn for_zone(zone: &ZoneId) -> Self {
        Self {
            id: format!("{}-changes", zone.name),
            target: SubscriptionTarget::Zone(zone.clone()),
        }
    }

    pub fn for_record_type(record_type: &str) -> Self {
        Self {
            id: format!("{record_type}-changes"),
            target: SubscriptionTarget::RecordType(record_type.to_string()),
        }
    }
}

/// A long-lived write left behind by a previous process.
#[derive(Debug, Clone, PartialEq)]
pub struct LongLivedOperation {
    pub operation_id: OperationId,
    pub zone: Option<ZoneId>,
}

/// Opaque continuation of a record query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCursor(pub Vec<u8>);

/// One page of a record query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryPage {
    pub records: Vec<Record>,
    pub cursor: Option<QueryCursor>,
}

/// A remote change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteNotification {
    /// Zone the change happened in, when the service reports it.
    pub zone: Option<ZoneId>,
}

/// The remote change-feed service.
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn account_status(&self) -> RemoteResult<AccountStatus>;

    /// Zones changed or deleted since `token` (`None` = from the beginning).
    async fn fetch_database_changes(
        &self,
        token: Option<ChangeToken>,
    ) -> RemoteResult<DatabaseChangesPage>;

    /// One page of record changes for each requested zone.
    async fn fetch_zone_changes(&self, zones: Vec<ZoneFetch>) -> RemoteResult<ZoneChangesPage>;

    async fn modify_records(&self, request: ModifyRequest) -> RemoteResult<()>;

    async fn create_zone(&self, zone: &ZoneId) -> RemoteResult<()>;

    async fn save_subscription(&self, subscription: Subscription) -> RemoteResult<()>;

    async fn fetch_orphaned_operations(&self) -> RemoteResult<Vec<LongLivedOperation>>;

    async fn resume_operation(&self, operation_id: OperationId) -> RemoteResult<()>;

    /// Public scope: every record of a type, page by page.
    async fn query_records(
        &self,
        record_type: &str,
        cursor: Option<QueryCursor>,
    ) -> RemoteResult<QueryPage>;

    /// Stream of change notifications, if the service pushes them.
    fn notifications(&self) -> Option<broadcast::Receiver<RemoteNotification>> {
        None
    }
}

/// Scriptable in-memory remote for tests.
pub mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Mutex, MutexGuard};
    use tokio::time::Instant;

    /// Every call the mock received, in order.
    #[derive(Debug, Default, Clone)]
    pub struct MockCalls {
        pub account_status: usize,
        pub database_fetches: Vec<Option<ChangeToken>>,
        pub zone_fetches: Vec<Vec<ZoneFetch>>,
        /// Write requests with the (tokio) time they arrived.
        pub modifies: Vec<(Instant, ModifyRequest)>,
        pub created_zones: Vec<ZoneId>,
        pub subscriptions: Vec<Subscription>,
        pub resumed: Vec<OperationId>,
        pub queries: Vec<(String, Option<QueryCursor>)>,
    }

    struct MockState {
        account: AccountStatus,
        database_pages: VecDeque<RemoteResult<DatabaseChangesPage>>,
        zone_pages: HashMap<ZoneId, VecDeque<RemoteResult<ZoneChangesPage>>>,
        modify_results: VecDeque<RemoteResult<()>>,
        create_zone_results: VecDeque<RemoteResult<()>>,
        subscription_results: VecDeque<RemoteResult<()>>,
        orphaned: Vec<LongLivedOperation>,
        query_pages: HashMap<String, VecDeque<RemoteResult<QueryPage>>>,
        calls: MockCalls,
    }

    /// A remote whose responses are queued up front.
    ///
    /// Unscripted calls succeed: empty pages echoing the presented token,
    /// successful writes and zone/subscription saves.
    pub struct MockRemote {
        state: Mutex<MockState>,
        notifications: broadcast::Sender<RemoteNotification>,
    }

    impl Default for MockRemote {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockRemote {
        pub fn new() -> Self {
            let (notifications, _) = broadcast::channel(16);
            Self {
                state: Mutex::new(MockState {
                    account: AccountStatus::Available,
                    database_pages: VecDeque::new(),
                    zone_pages: HashMap::new(),
                    modify_results: VecDeque::new(),
                    create_zone_results: VecDeque::new(),
                    subscription_results: VecDeque::new(),
                    orphaned: Vec::new(),
                    query_pages: HashMap::new(),
                    calls: MockCalls::default(),
                }),
                notifications,
            }
        }

        fn state(&self) -> MutexGuard<'_, MockState> {
            self.state.lock().unwrap_or_else(|e| e.into_inner())
        }

        pub fn set_account_status(&self, status: AccountStatus) {
            self.state().account = status;
        }

        pub fn push_database_page(&self, page: RemoteResult<DatabaseChangesPage>) {
            self.state().database_pages.push_back(page);
        }

        pub fn push_zone_page(&self, zone: &ZoneId, page: RemoteResult<ZoneChangesPage>) {
            self.state()
                .zone_pages
                .entry(zone.clone())
                .or_default()
                .push_back(page);
        }

        pub fn push_modify_result(&self, result: RemoteResult<()>) {
            self.state().modify_results.push_back(result);
        }

        pub fn push_create_zone_result(&self, result: RemoteResult<()>) {
            self.state().create_zone_results.push_back(result);
        }

        pub fn push_subscription_result(&self, result: RemoteResult<()>) {
            self.state().subscription_results.push_back(result);
        }

        pub fn push_query_page(&self, record_type: &str, page: RemoteResult<QueryPage>) {
            self.state()
                .query_pages
                .entry(record_type.to_string())
                .or_default()
                .push_back(page);
        }

        pub fn add_orphaned_operation(&self, op: LongLivedOperation) {
            self.state().orphaned.push(op);
        }

        /// Sends a change notification to subscribers.
        pub fn notify(&self, zone: Option<ZoneId>) {
            let _ = self.notifications.send(RemoteNotification { zone });
        }

        /// Snapshot of the calls received so far.
        pub fn calls(&self) -> MockCalls {
            self.state().calls.clone()
        }
    }

    #[async_trait]
    impl RemoteService for MockRemote {
        async fn account_status(&self) -> RemoteResult<AccountStatus> {
            let mut state = self.state();
            state.calls.account_status += 1;
            Ok(state.account)
        }

        async fn fetch_database_changes(
            &self,
            token: Option<ChangeToken>,
        ) -> RemoteResult<DatabaseChangesPage> {
            let mut state = self.state();
            state.calls.database_fetches.push(token.clone());
            state.database_pages.pop_front().unwrap_or_else(|| {
                Ok(DatabaseChangesPage {
                    token: token.unwrap_or_else(|| ChangeToken::from("db-0")),
                    ..Default::default()
                })
            })
        }

        async fn fetch_zone_changes(&self, zones: Vec<ZoneFetch>) -> RemoteResult<ZoneChangesPage> {
            let mut state = self.state();
            state.calls.zone_fetches.push(zones.clone());
            let mut merged = ZoneChangesPage::default();
            for fetch in zones {
                let scripted = state
                    .zone_pages
                    .get_mut(&fetch.zone)
                    .and_then(VecDeque::pop_front);
                match scripted {
                    Some(Ok(page)) => {
                        merged.changed.extend(page.changed);
                        merged.deleted.extend(page.deleted);
                        merged.zone_results.extend(page.zone_results);
                    }
                    Some(Err(e)) => return Err(e),
                    None => merged.zone_results.push(ZonePageResult {
                        token: fetch.token,
                        zone: fetch.zone,
                        more_coming: false,
                        error: None,
                    }),
                }
            }
            Ok(merged)
        }

        async fn modify_records(&self, request: ModifyRequest) -> RemoteResult<()> {
            let mut state = self.state();
            state.calls.modifies.push((Instant::now(), request));
            state.modify_results.pop_front().unwrap_or(Ok(()))
        }

        async fn create_zone(&self, zone: &ZoneId) -> RemoteResult<()> {
            let mut state = self.state();
            let result = state.create_zone_results.pop_front().unwrap_or(Ok(()));
            if result.is_ok() {
                state.calls.created_zones.push(zone.clone());
            }
            result
        }

        async fn save_subscription(&self, subscription: Subscription) -> RemoteResult<()> {
            let mut state = self.state();
            let result = state.subscription_results.pop_front().unwrap_or(Ok(()));
            if result.is_ok() {
                state.calls.subscriptions.push(subscription);
            }
            result
        }

        async fn fetch_orphaned_operations(&self) -> RemoteResult<Vec<LongLivedOperation>> {
            Ok(std::mem::take(&mut self.state().orphaned))
        }

        async fn resume_operation(&self, operation_id: OperationId) -> RemoteResult<()> {
            self.state().calls.resumed.push(operation_id);
            Ok(())
        }

        async fn query_records(
            &self,
            record_type: &str,
            cursor: Option<QueryCursor>,
        ) -> RemoteResult<QueryPage> {
            let mut state = self.state();
            state.calls.queries.push((record_type.to_string(), cursor));
            state
                .query_pages
                .get_mut(record_type)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Ok(QueryPage::default()))
        }

        fn notifications(&self) -> Option<broadcast::Receiver<RemoteNotification>> {
            Some(self.notifications.subscribe())
        }
    }
}
