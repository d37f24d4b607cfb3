//! Durable storage for change tokens and lifecycle flags.
//!
//! Uses its own SQLite file so cursors survive process termination and can
//! be read before any network activity begins.

use crate::error::{SyncError, SyncResult};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use zonesync_types::{ChangeToken, ZoneId};

/// Scope of a change token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TokenKey {
    /// Tracks zone membership changes across the database.
    Database,
    /// Tracks record changes within one zone.
    Zone(ZoneId),
}

impl TokenKey {
    fn storage_key(&self) -> String {
        match self {
            Self::Database => "database_changeToken".to_string(),
            Self::Zone(zone) => format!("{zone}_zoneChangeToken"),
        }
    }
}

/// A persisted boolean.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlagKey {
    ZoneCreated(ZoneId),
    SubscriptionCreated(ZoneId),
    /// Public-database subscription for one record type.
    PublicSubscriptionCreated(String),
}

impl FlagKey {
    fn storage_key(&self) -> String {
        match self {
            Self::ZoneCreated(zone) => format!("{zone}_zoneCreated"),
            Self::SubscriptionCreated(zone) => format!("{zone}_subscriptionCreated"),
            Self::PublicSubscriptionCreated(record_type) => {
                format!("{record_type}_publicSubscriptionCreated")
            }
        }
    }
}

/// Persistent key-value store for tokens and flags backed by SQLite.
pub struct ChangeTokenStore {
    conn: Arc<Mutex<Connection>>,
}

impl ChangeTokenStore {
    /// Opens (or creates) a token store at the given path.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| SyncError::Persistence(format!("failed to open token store: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")
            .map_err(|e| SyncError::Persistence(format!("failed to configure token store: {e}")))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        debug!(path = %path.as_ref().display(), "token store opened");
        Ok(store)
    }

    /// Opens an in-memory token store (for testing).
    pub fn open_in_memory() -> SyncResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            SyncError::Persistence(format!("failed to open in-memory token store: {e}"))
        })?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> SyncResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SyncError::Persistence("token store lock poisoned".into()))
    }

    fn init_schema(&self) -> SyncResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS change_tokens (
                key TEXT PRIMARY KEY,
                token BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sync_flags (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );
            ",
        )
        .map_err(|e| SyncError::Persistence(format!("failed to init token schema: {e}")))?;
        Ok(())
    }

    // ── Tokens ──────────────────────────────────────────────────

    /// Returns the stored token for a scope.
    pub fn get(&self, key: &TokenKey) -> SyncResult<Option<ChangeToken>> {
        let conn = self.lock()?;
        let bytes: Option<Vec<u8>> = conn
            .query_row(
                "SELECT token FROM change_tokens WHERE key = ?1",
                params![key.storage_key()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| SyncError::Persistence(format!("failed to read token: {e}")))?;
        Ok(bytes.map(ChangeToken::from_bytes))
    }

    /// Stores a token for a scope. `None` clears it.
    pub fn set(&self, key: &TokenKey, token: Option<&ChangeToken>) -> SyncResult<()> {
        let conn = self.lock()?;
        let storage_key = key.storage_key();
        match token {
            Some(token) => conn.execute(
                "INSERT INTO change_tokens (key, token) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET token = excluded.token",
                params![storage_key, token.as_bytes()],
            ),
            None => conn.execute(
                "DELETE FROM change_tokens WHERE key = ?1",
                params![storage_key],
            ),
        }
        .map_err(|e| SyncError::Persistence(format!("failed to write token: {e}")))?;
        debug!(key = %storage_key, cleared = token.is_none(), "token stored");
        Ok(())
    }

    // ── Flags ───────────────────────────────────────────────────

    /// Returns a flag; unset flags read as false.
    pub fn flag(&self, key: &FlagKey) -> SyncResult<bool> {
        let conn = self.lock()?;
        let value: Option<i64> = conn
            .query_row(
                "SELECT value FROM sync_flags WHERE key = ?1",
                params![key.storage_key()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| SyncError::Persistence(format!("failed to read flag: {e}")))?;
        Ok(value.unwrap_or(0) != 0)
    }

    pub fn set_flag(&self, key: &FlagKey, value: bool) -> SyncResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_flags (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key.storage_key(), i64::from(value)],
        )
        .map_err(|e| SyncError::Persistence(format!("failed to write flag: {e}")))?;
        Ok(())
    }

    /// Forgets everything known about a zone: its token and both flags.
    pub fn reset_zone(&self, zone: &ZoneId) -> SyncResult<()> {
        self.set(&TokenKey::Zone(zone.clone()), None)?;
        self.set_flag(&FlagKey::ZoneCreated(zone.clone()), false)?;
        self.set_flag(&FlagKey::SubscriptionCreated(zone.clone()), false)?;
        Ok(())
    }
}
