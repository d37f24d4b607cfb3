use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use zonesync_sync::{
    ErrorClassifier, ErrorCode, Outcome, RecoverableReason, RemoteError, SyncError, describe,
};
use zonesync_types::{RecordId, ZoneId};

fn err(code: ErrorCode) -> RemoteError {
    RemoteError::new(code, "test")
}

fn item(id: &str, code: ErrorCode) -> (RecordId, RemoteError) {
    (RecordId::new(id, ZoneId::owned("Z")), err(code))
}

fn classify(error: RemoteError) -> Outcome {
    ErrorClassifier::default().classify(Some(&error), 0)
}

// ── Single errors ───────────────────────────────────────────────

#[test]
fn no_error_is_success() {
    assert_eq!(ErrorClassifier::default().classify(None, 3), Outcome::Success);
}

#[test]
fn transient_codes_retry_with_backoff() {
    let classifier = ErrorClassifier::default();
    for code in [
        ErrorCode::NetworkUnavailable,
        ErrorCode::NetworkFailure,
        ErrorCode::ServiceUnavailable,
        ErrorCode::RequestRateLimited,
        ErrorCode::ZoneBusy,
        ErrorCode::ResultsTruncated,
        ErrorCode::ServerResponseLost,
    ] {
        match classifier.classify(Some(&err(code)), 2) {
            Outcome::Retry { after, .. } => assert_eq!(after, Duration::from_secs(4), "{code}"),
            other => panic!("{code} classified as {other:?}"),
        }
    }
}

#[test]
fn server_suggested_delay_wins() {
    let error = err(ErrorCode::RequestRateLimited).with_retry_after(Duration::from_secs(5));
    match classify(error) {
        Outcome::Retry { after, .. } => assert_eq!(after, Duration::from_secs(5)),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn limit_exceeded_asks_for_chunking() {
    assert_eq!(classify(err(ErrorCode::LimitExceeded)), Outcome::Chunk);
}

#[test]
fn stale_state_is_recoverable() {
    let cases = [
        (ErrorCode::ChangeTokenExpired, RecoverableReason::ChangeTokenExpired),
        (ErrorCode::ServerRecordChanged, RecoverableReason::ServerRecordChanged),
        (ErrorCode::ZoneNotFound, RecoverableReason::ZoneNotFound),
        (ErrorCode::UserDeletedZone, RecoverableReason::ZoneNotFound),
    ];
    for (code, reason) in cases {
        assert_eq!(classify(err(code)), Outcome::Recoverable { reason });
    }
}

#[test]
fn permanent_codes_are_fatal() {
    for code in [
        ErrorCode::QuotaExceeded,
        ErrorCode::NotAuthenticated,
        ErrorCode::PermissionFailure,
        ErrorCode::InvalidArguments,
        ErrorCode::IncompatibleVersion,
        ErrorCode::UnknownItem,
        ErrorCode::ServerRejectedRequest,
        ErrorCode::AssetFileNotFound,
        ErrorCode::InternalError,
    ] {
        assert_eq!(
            classify(err(code)),
            Outcome::Fatal {
                reason: describe(code).to_string()
            }
        );
    }
}

// ── Partial failures ────────────────────────────────────────────

#[test]
fn sibling_failures_are_ignored() {
    let error = RemoteError::partial_failure(vec![
        item("a", ErrorCode::BatchRequestFailed),
        item("b", ErrorCode::ServerRecordChanged),
        item("c", ErrorCode::BatchRequestFailed),
    ]);
    assert_eq!(
        classify(error),
        Outcome::Recoverable {
            reason: RecoverableReason::ServerRecordChanged
        }
    );
}

#[test]
fn most_severe_item_wins() {
    let error = RemoteError::partial_failure(vec![
        item("a", ErrorCode::NetworkFailure),
        item("b", ErrorCode::LimitExceeded),
        item("c", ErrorCode::ZoneNotFound),
    ]);
    assert_eq!(
        classify(error),
        Outcome::Recoverable {
            reason: RecoverableReason::ZoneNotFound
        }
    );

    let error = RemoteError::partial_failure(vec![
        item("a", ErrorCode::ZoneNotFound),
        item("b", ErrorCode::QuotaExceeded),
    ]);
    assert!(matches!(classify(error), Outcome::Fatal { .. }));
}

#[test]
fn longest_item_delay_wins() {
    let error = RemoteError::partial_failure(vec![
        (
            RecordId::new("a", ZoneId::owned("Z")),
            err(ErrorCode::ZoneBusy).with_retry_after(Duration::from_secs(3)),
        ),
        (
            RecordId::new("b", ZoneId::owned("Z")),
            err(ErrorCode::RequestRateLimited).with_retry_after(Duration::from_secs(12)),
        ),
    ]);
    match classify(error) {
        Outcome::Retry { after, .. } => assert_eq!(after, Duration::from_secs(12)),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn only_sibling_failures_retry() {
    let error = RemoteError::partial_failure(vec![item("a", ErrorCode::BatchRequestFailed)]);
    assert!(matches!(classify(error), Outcome::Retry { .. }));
}

// ── Backoff and retry driver ────────────────────────────────────

#[test]
fn backoff_is_capped_by_config() {
    let classifier = ErrorClassifier::new(Duration::from_secs(10), 5);
    assert_eq!(classifier.backoff(0), Duration::from_secs(1));
    assert_eq!(classifier.backoff(1), Duration::from_secs(2));
    assert_eq!(classifier.backoff(4), Duration::from_secs(10));
    assert!(!classifier.retries_exhausted(4));
    assert!(classifier.retries_exhausted(5));
}

#[tokio::test(start_paused = true)]
async fn run_with_retry_waits_out_transient_failures() {
    let calls = AtomicU32::new(0);
    let start = tokio::time::Instant::now();
    let result = ErrorClassifier::default()
        .run_with_retry("probe", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(err(ErrorCode::NetworkFailure))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(result, 2);
    // 1s after the first failure, 2s after the second.
    assert!(start.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn run_with_retry_gives_up_at_ceiling() {
    let calls = AtomicU32::new(0);
    let result: Result<(), SyncError> = ErrorClassifier::new(Duration::from_secs(1), 3)
        .run_with_retry("probe", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(err(ErrorCode::ZoneBusy)) }
        })
        .await;

    assert!(matches!(result, Err(SyncError::RetriesExhausted { attempts: 3 })));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn run_with_retry_does_not_retry_fatal() {
    let calls = AtomicU32::new(0);
    let result: Result<(), SyncError> = ErrorClassifier::default()
        .run_with_retry("probe", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(err(ErrorCode::PermissionFailure)) }
        })
        .await;

    assert!(matches!(result, Err(SyncError::Fatal { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
