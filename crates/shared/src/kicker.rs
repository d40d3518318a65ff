//! Periodic `kick()` driver for work queues.

use crate::work_queue::Kick;
use crate::CancellationToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Calls `kick()` on a target every `period` until disposed.
///
/// The first kick happens one full period after `start`. Ticks missed while a
/// kick is still running are skipped, not replayed.
#[derive(Debug)]
pub struct IntervalKicker {
    period: Duration,
    cancellation: CancellationToken,
    handle: JoinHandle<()>,
}

impl IntervalKicker {
    /// Spawn the timer task on the current tokio runtime.
    pub fn start(target: Arc<dyn Kick>, period: Duration) -> Self {
        let period = period.max(MIN_PERIOD);
        let cancellation = CancellationToken::new();
        let token = cancellation.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => target.kick().await,
                }
            }
        });

        Self {
            period,
            cancellation,
            handle,
        }
    }

    /// Interval between kicks.
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Stop kicking. A kick already in progress is allowed to finish.
    pub fn dispose(&self) {
        self.cancellation.cancel();
    }

    /// Returns true once `dispose` was called.
    pub fn is_disposed(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl Drop for IntervalKicker {
    fn drop(&mut self) {
        self.cancellation.cancel();
        self.handle.abort();
    }
}
