//! Maps remote failures to the action the caller should take.
//!
//! Classification is pure. The only side-effecting helper is
//! [`retry_operation_if_possible`], which waits out a backoff delay before
//! running the retried operation.

use crate::config::SyncConfig;
use crate::error::{ErrorCode, RecoverableReason, RemoteError, SyncError, SyncResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// What to do after an operation completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Transient failure; resubmit the same payload after `after`.
    Retry { after: Duration, reason: String },
    /// Payload too large; split it and resubmit the pieces.
    Chunk,
    /// A cached token or flag is stale; reset it and restart.
    Recoverable { reason: RecoverableReason },
    /// Give up.
    Fatal { reason: String },
}

/// Classifies remote failures and computes backoff delays.
#[derive(Debug, Clone, Copy)]
pub struct ErrorClassifier {
    max_backoff: Duration,
    max_attempts: u32,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl ErrorClassifier {
    pub fn new(max_backoff: Duration, max_attempts: u32) -> Self {
        Self {
            max_backoff,
            max_attempts,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.max_backoff(), config.max_retry_attempts)
    }

    /// Classifies the result of the `attempt`-th try (zero based).
    pub fn classify(&self, error: Option<&RemoteError>, attempt: u32) -> Outcome {
        let Some(error) = error else {
            return Outcome::Success;
        };
        match error.code {
            ErrorCode::PartialFailure => self.classify_partial(error, attempt),
            code => self.classify_code(code, error.retry_after, attempt),
        }
    }

    fn classify_code(&self, code: ErrorCode, retry_after: Option<Duration>, attempt: u32) -> Outcome {
        use ErrorCode::*;
        match code {
            NetworkUnavailable | NetworkFailure | ServiceUnavailable | RequestRateLimited
            | ZoneBusy | ResultsTruncated | ServerResponseLost | BatchRequestFailed => {
                Outcome::Retry {
                    after: retry_after.unwrap_or_else(|| self.backoff(attempt)),
                    reason: describe(code).to_string(),
                }
            }
            LimitExceeded => Outcome::Chunk,
            ChangeTokenExpired => Outcome::Recoverable {
                reason: RecoverableReason::ChangeTokenExpired,
            },
            ServerRecordChanged => Outcome::Recoverable {
                reason: RecoverableReason::ServerRecordChanged,
            },
            ZoneNotFound | UserDeletedZone => Outcome::Recoverable {
                reason: RecoverableReason::ZoneNotFound,
            },
            QuotaExceeded | NotAuthenticated | PermissionFailure | InvalidArguments
            | IncompatibleVersion | UnknownItem | ServerRejectedRequest | AssetFileNotFound
            | InternalError | PartialFailure => Outcome::Fatal {
                reason: describe(code).to_string(),
            },
        }
    }

    /// Items that failed only because an atomic sibling failed are ignored.
    /// Of the rest, the most severe outcome wins: fatal, then recoverable,
    /// then chunk, then retry with the longest delay.
    fn classify_partial(&self, error: &RemoteError, attempt: u32) -> Outcome {
        let mut outcome: Option<Outcome> = None;
        for (id, item) in &error.partial {
            if item.code == ErrorCode::BatchRequestFailed {
                continue;
            }
            let next = self.classify_code(item.code, item.retry_after, attempt);
            debug!(record = %id, code = %item.code, "partial failure item");
            outcome = Some(match outcome {
                None => next,
                Some(current) => more_severe(current, next),
            });
        }
        outcome.unwrap_or_else(|| Outcome::Retry {
            after: error.retry_after.unwrap_or_else(|| self.backoff(attempt)),
            reason: describe(ErrorCode::BatchRequestFailed).to_string(),
        })
    }

    /// Exponential backoff: `min(2^attempt, max)` seconds.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.max_backoff)
    }

    /// Returns true once `attempt` consecutive retries have been spent.
    pub fn retries_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Runs `op` until it succeeds or classifies as something other than
    /// `Retry`. Chunk outcomes are fatal here; only pushes can split.
    pub async fn run_with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 0;
        let mut result = op().await;
        loop {
            let error = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            match self.classify(Some(&error), attempt) {
                Outcome::Success => return Err(error.into()),
                Outcome::Retry { after, reason } => {
                    if self.retries_exhausted(attempt) {
                        warn!(what, attempt, "retries exhausted");
                        return Err(SyncError::RetriesExhausted { attempts: attempt });
                    }
                    debug!(what, attempt, delay = ?after, %reason, "retrying");
                    attempt += 1;
                    result = retry_operation_if_possible(after, &mut op).await;
                }
                Outcome::Chunk => {
                    warn!(what, "request too large");
                    return Err(SyncError::Fatal {
                        reason: describe(ErrorCode::LimitExceeded).to_string(),
                    });
                }
                Outcome::Recoverable { reason } => {
                    return Err(SyncError::Recoverable { reason });
                }
                Outcome::Fatal { reason } => {
                    warn!(what, %reason, "fatal remote error");
                    return Err(SyncError::Fatal { reason });
                }
            }
        }
    }
}

fn severity(outcome: &Outcome) -> u8 {
    match outcome {
        Outcome::Success => 0,
        Outcome::Retry { .. } => 1,
        Outcome::Chunk => 2,
        Outcome::Recoverable { .. } => 3,
        Outcome::Fatal { .. } => 4,
    }
}

fn more_severe(a: Outcome, b: Outcome) -> Outcome {
    let take_b = match (&a, &b) {
        (Outcome::Retry { after: x, .. }, Outcome::Retry { after: y, .. }) => y > x,
        _ => severity(&b) > severity(&a),
    };
    if take_b { b } else { a }
}

/// Waits `after`, then runs `block`.
pub async fn retry_operation_if_possible<F, Fut, T>(after: Duration, block: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    tokio::time::sleep(after).await;
    block().await
}

/// Human readable description of a remote condition.
pub fn describe(code: ErrorCode) -> &'static str {
    use ErrorCode::*;
    match code {
        NetworkUnavailable => "network unavailable",
        NetworkFailure => "network failure",
        ServiceUnavailable => "service temporarily unavailable",
        RequestRateLimited => "request rate limited",
        ZoneBusy => "zone busy",
        ResultsTruncated => "results truncated",
        ServerResponseLost => "server response lost",
        LimitExceeded => "request exceeds size limit",
        ChangeTokenExpired => "change token expired",
        ServerRecordChanged => "server record changed",
        ZoneNotFound => "zone not found",
        UserDeletedZone => "zone deleted by user",
        QuotaExceeded => "storage quota exceeded",
        NotAuthenticated => "account not authenticated",
        PermissionFailure => "permission denied",
        InvalidArguments => "invalid arguments",
        IncompatibleVersion => "incompatible client version",
        UnknownItem => "unknown item or record type",
        ServerRejectedRequest => "server rejected request",
        AssetFileNotFound => "asset file not found",
        PartialFailure => "partial failure",
        BatchRequestFailed => "atomic batch aborted",
        InternalError => "internal server error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let c = ErrorClassifier::default();
        assert_eq!(c.backoff(0), Duration::from_secs(1));
        assert_eq!(c.backoff(3), Duration::from_secs(8));
        assert_eq!(c.backoff(11), Duration::from_secs(1800));
        assert_eq!(c.backoff(200), Duration::from_secs(1800));
    }

    #[test]
    fn longer_retry_wins_between_retries() {
        let short = Outcome::Retry {
            after: Duration::from_secs(1),
            reason: String::new(),
        };
        let long = Outcome::Retry {
            after: Duration::from_secs(9),
            reason: String::new(),
        };
        assert_eq!(more_severe(short, long.clone()), long);
    }
}
