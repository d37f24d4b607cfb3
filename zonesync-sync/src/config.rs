//! Engine configuration.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use zonesync_types::ZoneId;

/// Which remote database the engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseScope {
    /// Custom zones with token-based incremental fetch.
    #[default]
    Private,
    /// Default zone only; pulls query every record of each type.
    Public,
}

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote database scope.
    pub scope: DatabaseScope,
    /// Local change debounce window (ms).
    pub debounce_ms: u64,
    /// Maximum records per write request after a chunk split.
    pub chunk_limit: usize,
    /// Upper bound of the exponential backoff (seconds).
    pub max_backoff_secs: u64,
    /// Consecutive retries allowed within one pass or push.
    pub max_retry_attempts: u32,
    /// Owner used for zones the account creates.
    pub default_zone_owner: String,
    /// SQLite file for tokens and flags. In-memory when absent.
    pub token_store_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            scope: DatabaseScope::Private,
            debounce_ms: 500,
            chunk_limit: 300,
            max_backoff_secs: 1800,
            max_retry_attempts: 10,
            default_zone_owner: ZoneId::DEFAULT_OWNER.to_string(),
            token_store_path: None,
        }
    }
}

impl SyncConfig {
    /// Parses a JSON document. Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> SyncResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    fn validate(&self) -> SyncResult<()> {
        if self.chunk_limit == 0 {
            return Err(SyncError::InvalidState("chunk_limit must be positive".into()));
        }
        if self.default_zone_owner.is_empty() {
            return Err(SyncError::InvalidState("default_zone_owner is empty".into()));
        }
        Ok(())
    }
}
