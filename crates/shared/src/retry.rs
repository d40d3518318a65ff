//! Retry helpers with exponential backoff and jitter.
//!
//! Wraps RPCs (`find_missing`, `batch_upload`). Only envelopes classified as
//! `Retriable` are re-attempted; everything else returns on the first failure.

use crate::{ErrorEnvelope, RequestContext, Result};
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Retry policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts (including the first try).
    pub max_attempts: u32,
    /// Base delay for backoff in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter ratio as percentage (0..=100).
    pub jitter_ratio_pct: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 2_000,
            jitter_ratio_pct: 20,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_ratio_pct: 0,
        }
    }

    /// Delay before attempt `attempt + 1`: doubling from `base_delay_ms`,
    /// capped at `max_delay_ms`, then spread by up to `jitter_ratio_pct`
    /// percent in either direction (never above the cap).
    fn delay_after(self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(30);
        let capped = self
            .base_delay_ms
            .saturating_mul(1 << doublings)
            .min(self.max_delay_ms);
        let spread = capped.saturating_mul(u64::from(self.jitter_ratio_pct.min(100))) / 100;
        if spread == 0 {
            return Duration::from_millis(capped);
        }
        let roll = jitter_roll(attempt) % (spread.saturating_mul(2).saturating_add(1));
        let jittered = capped.saturating_sub(spread).saturating_add(roll);
        Duration::from_millis(jittered.min(self.max_delay_ms))
    }
}

/// Retry a fallible async operation with backoff + jitter.
pub async fn retry_async<T, F, Fut>(
    ctx: &RequestContext,
    policy: RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_async_with_observer(ctx, policy, operation, &mut op, |_, _| {}).await
}

/// Like [`retry_async`], calling `on_retry(attempt, &error)` before each backoff.
pub async fn retry_async_with_observer<T, F, Fut, Obs>(
    ctx: &RequestContext,
    policy: RetryPolicy,
    operation: &'static str,
    op: &mut F,
    mut on_retry: Obs,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    Obs: FnMut(u32, &ErrorEnvelope),
{
    let mut attempt = 1u32;
    loop {
        ctx.ensure_not_cancelled(operation)?;
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retriable() && attempt < policy.max_attempts => error,
            Err(error) => return Err(error),
        };

        on_retry(attempt, &error);
        tokio::select! {
            () = ctx.cancelled() => {
                return Err(ErrorEnvelope::cancelled("operation cancelled")
                    .with_metadata("operation", operation));
            }
            () = tokio::time::sleep(policy.delay_after(attempt)) => {}
        }
        attempt = attempt.saturating_add(1);
    }
}

fn jitter_roll(attempt: u32) -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::from(elapsed.subsec_nanos()));
    nanos ^ u64::from(attempt).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}
