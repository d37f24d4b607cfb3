//! Error types for the sync layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use zonesync_storage::StorageError;
use zonesync_types::RecordId;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Conditions a remote service can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    NetworkUnavailable,
    NetworkFailure,
    ServiceUnavailable,
    RequestRateLimited,
    ZoneBusy,
    ResultsTruncated,
    ServerResponseLost,
    /// The request carried too many records or bytes.
    LimitExceeded,
    ChangeTokenExpired,
    ServerRecordChanged,
    ZoneNotFound,
    UserDeletedZone,
    QuotaExceeded,
    NotAuthenticated,
    PermissionFailure,
    InvalidArguments,
    IncompatibleVersion,
    UnknownItem,
    ServerRejectedRequest,
    AssetFileNotFound,
    /// Some items of a batch failed; see [`RemoteError::partial`].
    PartialFailure,
    /// This item failed only because a sibling in an atomic batch failed.
    BatchRequestFailed,
    InternalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A failure reported by the remote service.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {message}")]
pub struct RemoteError {
    pub code: ErrorCode,
    pub message: String,
    /// Server-suggested delay before retrying.
    pub retry_after: Option<Duration>,
    /// Per-item failures of a partially failed batch.
    pub partial: Vec<(RecordId, RemoteError)>,
}

impl RemoteError {
    /// Creates an error with no retry hint and no per-item failures.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after: None,
            partial: Vec::new(),
        }
    }

    /// Attaches a server-suggested retry delay.
    #[must_use]
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Builds a partial-failure error from per-item failures.
    pub fn partial_failure(items: Vec<(RecordId, RemoteError)>) -> Self {
        Self {
            code: ErrorCode::PartialFailure,
            message: format!("{} item(s) failed", items.len()),
            retry_after: None,
            partial: items,
        }
    }
}

/// Why a failure needs local state reset before the operation can restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoverableReason {
    ChangeTokenExpired,
    ServerRecordChanged,
    ZoneNotFound,
}

impl fmt::Display for RecoverableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ChangeTokenExpired => "change token expired",
            Self::ServerRecordChanged => "server record changed",
            Self::ZoneNotFound => "zone not found",
        };
        f.write_str(s)
    }
}

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local store or blob store failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Unclassified remote failure.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Token or flag persistence failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Descriptor or registry error.
    #[error("type error: {0}")]
    Types(#[from] zonesync_types::Error),

    /// The remote account is not available.
    #[error("remote account unavailable")]
    AccountUnavailable,

    /// Non-retriable failure.
    #[error("fatal: {reason}")]
    Fatal { reason: String },

    /// Local state was reset; the operation needs to restart.
    #[error("recoverable: {reason}")]
    Recoverable { reason: RecoverableReason },

    /// Consecutive retries hit the configured ceiling.
    #[error("gave up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// No descriptor registered for a record type.
    #[error("unknown record type: {0}")]
    UnknownRecordType(String),

    /// Operation not allowed in the current engine state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,
}
