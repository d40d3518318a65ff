//! # blob-sync-shared
//!
//! Shared primitives for the blob-sync workspace.
//!
//! - Result and error envelope types
//! - Request context, correlation ids and cancellation
//! - Retry with backoff for retriable failures
//! - Work queues (keyed, batch, promise) and the interval kicker that drives them
//! - Bounded integers and secret redaction used by config and logging
//!
//! This crate has no workspace dependencies.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod concurrency;
pub mod errors;
pub mod invariants;
pub mod kicker;
pub mod redaction;
pub mod result;
pub mod retry;
pub mod work_queue;

pub use concurrency::{CancellationToken, CorrelationId, RequestContext};
pub use errors::{
    ErrorClass, ErrorCode, ErrorEnvelope, ErrorKind, ErrorMetadata, REDACTED_VALUE,
};
pub use invariants::{BoundedU32, BoundedU64, BoundsError};
pub use kicker::IntervalKicker;
pub use redaction::{REDACTED, SecretString, is_secret_key};
pub use result::Result;
pub use retry::{RetryPolicy, retry_async, retry_async_with_observer};
pub use work_queue::{
    BatchWorkQueue, BoxFuture, Kick, KeyedWorkQueue, PendingResult, PromiseWorkQueue,
    ResultProcessor, WorkItemProcessor,
};

/// Returns the shared crate version.
#[must_use]
pub const fn shared_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::errors::{ErrorClass, ErrorCode, ErrorEnvelope};
    use super::result::Result;

    #[test]
    fn shared_error_types_are_available() {
        let error = ErrorEnvelope::expected(ErrorCode::invalid_input(), "invalid");
        assert_eq!(error.kind, super::errors::ErrorKind::Expected);
        assert_eq!(error.class, ErrorClass::NonRetriable);
    }

    #[test]
    fn shared_result_defaults_to_envelope() {
        let value: Result<i32> = Err(ErrorEnvelope::cancelled("stop"));
        assert!(value.is_err_and(|error| error.is_cancelled()));
    }
}
