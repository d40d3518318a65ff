//! Request-scoped context: correlation ids and cooperative cancellation.
//!
//! Long-lived components (the probe handler, the uploader) own one
//! `RequestContext` each and cancel it on `dispose`. In-flight RPCs observe
//! cancellation through `cancelled()`, queued work through
//! `ensure_not_cancelled`.

use crate::{ErrorEnvelope, Result};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier attached to logs emitted on behalf of one context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    fn next(prefix: &str) -> Self {
        let n = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        Self(Arc::from(format!("{prefix}_{n}")))
    }

    /// Borrow the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Clonable one-shot cancellation flag that can be awaited.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenState>,
}

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    /// Token in the non-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel and wake every waiter. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Returns true once `cancel` has been called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve when the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            // Register before re-checking so a concurrent cancel is not missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Correlation id plus cancellation, passed to every port call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    correlation_id: CorrelationId,
    cancellation: CancellationToken,
}

impl RequestContext {
    fn with_prefix(prefix: &str) -> Self {
        Self {
            correlation_id: CorrelationId::next(prefix),
            cancellation: CancellationToken::new(),
        }
    }

    /// Context for a single call (`req_*`).
    #[must_use]
    pub fn new_request() -> Self {
        Self::with_prefix("req")
    }

    /// Context owned by a long-lived component (`sync_*`).
    #[must_use]
    pub fn new_sync() -> Self {
        Self::with_prefix("sync")
    }

    /// Return the correlation id.
    #[must_use]
    pub const fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Returns true if the context was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cancel this context and every clone of it.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Await cancellation.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    /// `core:cancelled` (tagged with `operation`) once cancelled.
    pub fn ensure_not_cancelled(&self, operation: &'static str) -> Result<()> {
        if self.is_cancelled() {
            return Err(ErrorEnvelope::cancelled("operation cancelled")
                .with_metadata("operation", operation));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn generated_ids_carry_their_prefix_and_differ() {
        let request = RequestContext::new_request();
        let sync = RequestContext::new_sync();
        assert!(request.correlation_id().as_str().starts_with("req_"));
        assert!(sync.correlation_id().as_str().starts_with("sync_"));
        assert_ne!(
            RequestContext::new_request().correlation_id(),
            request.correlation_id()
        );
    }

    #[test]
    fn clones_share_cancellation() {
        let ctx = RequestContext::new_request();
        let clone = ctx.clone();
        clone.cancel();
        clone.cancel();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_wakes_waiters_and_fails_checks() {
        let ctx = RequestContext::new_sync();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(ctx.ensure_not_cancelled("probe").is_ok());
        ctx.cancel();

        let joined = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(matches!(joined, Ok(Ok(()))));
        let error = ctx.ensure_not_cancelled("probe").err();
        assert!(error.is_some_and(|error| error.is_cancelled()
            && error.metadata.get("operation").map(String::as_str) == Some("probe")));
    }
}
