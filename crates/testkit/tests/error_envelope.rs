//! Error envelopes crossing crate boundaries.

use blob_sync_shared::{
    ErrorCode, ErrorEnvelope, ErrorKind, RequestContext, RetryPolicy, retry_async,
};
use blob_sync_testkit::errors::{rejected_error, unavailable_error};
use std::sync::atomic::{AtomicU32, Ordering};

#[test]
fn envelope_is_a_std_error() {
    let boxed: Box<dyn std::error::Error> = Box::new(unavailable_error());
    assert!(boxed.to_string().contains("core:unavailable"));
}

#[test]
fn fixtures_carry_http_status() {
    let unavailable = unavailable_error();
    assert!(unavailable.is_retriable());
    assert_eq!(unavailable.kind, ErrorKind::Unexpected);
    assert_eq!(unavailable.metadata.get("status").map(String::as_str), Some("503"));

    let rejected = rejected_error();
    assert!(!rejected.is_retriable());
    assert_eq!(rejected.code, ErrorCode::new("http", "bad_request"));
}

#[tokio::test(start_paused = true)]
async fn retry_gives_up_on_rejection_but_not_on_unavailable() -> Result<(), ErrorEnvelope> {
    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 10,
        max_delay_ms: 10,
        jitter_ratio_pct: 0,
    };
    let ctx = RequestContext::new_request();

    let attempts = AtomicU32::new(0);
    let rejected: Result<(), ErrorEnvelope> = retry_async(&ctx, policy, "batch_upload", || async {
        attempts.fetch_add(1, Ordering::SeqCst);
        Err(rejected_error())
    })
    .await;
    assert!(rejected.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    let attempts = AtomicU32::new(0);
    let recovered = retry_async(&ctx, policy, "find_missing", || async {
        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(unavailable_error())
        } else {
            Ok(7)
        }
    })
    .await?;
    assert_eq!(recovered, 7);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    Ok(())
}
