//! Probe/retry protocol for blobs the server may not know about yet.
//!
//! Blobs flow through three keyed queues:
//!
//! - `to_probe` accumulates entries into a batch and calls `find_missing`.
//! - `probe_waiters` holds entries still within the patience window and is
//!   drained every `retry_wait`.
//! - `long_waiters` holds entries past the patience window and is drained
//!   every `long_retry_wait`.
//!
//! Draining a waiter queue re-inserts its entries into `to_probe` and then
//! kicks it, so retries are re-sent as one batch. Entries are never given up.

use blob_sync_domain::{BlobName, QualifiedPath};
use blob_sync_ports::{
    BlobApiPort, ClockPort, FindMissingResult, LoggerPort, TelemetryPort, WorkspacePort,
    log_fields,
};
use blob_sync_shared::{
    BoxFuture, IntervalKicker, Kick, KeyedWorkQueue, RequestContext, Result, RetryPolicy,
    WorkItemProcessor, retry_async,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

/// Default number of blob names per `find_missing` call.
pub const DEFAULT_PROBE_BATCH_SIZE: usize = 1_000;
/// Default short retry interval.
pub const DEFAULT_PROBE_RETRY_WAIT: Duration = Duration::from_millis(5_000);
/// Default time an entry stays on the short retry queue.
pub const DEFAULT_PROBE_PATIENCE_MS: u64 = 120_000;
/// Default long retry interval.
pub const DEFAULT_LONG_RETRY_WAIT: Duration = Duration::from_millis(60_000);

/// Tuning for [`UnknownBlobHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    /// Blob names per `find_missing` call.
    pub batch_size: usize,
    /// Short retry interval.
    pub retry_wait: Duration,
    /// Entries older than this move to the long retry queue (ms).
    pub patience_ms: u64,
    /// Long retry interval.
    pub long_retry_wait: Duration,
    /// Backoff for a single `find_missing` call.
    pub retry: RetryPolicy,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_PROBE_BATCH_SIZE,
            retry_wait: DEFAULT_PROBE_RETRY_WAIT,
            patience_ms: DEFAULT_PROBE_PATIENCE_MS,
            long_retry_wait: DEFAULT_LONG_RETRY_WAIT,
            retry: RetryPolicy::default(),
        }
    }
}

/// A blob waiting to be probed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeEntry {
    /// Path the blob was computed from.
    pub path: QualifiedPath,
    /// When the blob first entered the pipeline (ms since epoch).
    pub start_ms: u64,
}

/// Which retry queue an entry was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterQueue {
    /// Re-probed every `retry_wait`.
    Short,
    /// Re-probed every `long_retry_wait`.
    Long,
}

/// Queue depths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeQueueStats {
    /// Entries waiting for the next probe drain.
    pub to_probe: usize,
    /// Entries accumulated into the unsent batch.
    pub pending_batch: usize,
    /// Entries on the short retry queue.
    pub probe_waiters: usize,
    /// Entries on the long retry queue.
    pub long_waiters: usize,
}

/// Collaborators of [`UnknownBlobHandler`].
#[derive(Clone)]
pub struct UnknownBlobHandlerDeps {
    /// Remote blob service.
    pub api: Arc<dyn BlobApiPort>,
    /// Current blob names and missing/indexed notifications.
    pub workspace: Arc<dyn WorkspacePort>,
    /// Time source for patience escalation.
    pub clock: Arc<dyn ClockPort>,
    /// Optional logger.
    pub logger: Option<Arc<dyn LoggerPort>>,
    /// Optional telemetry sink.
    pub telemetry: Option<Arc<dyn TelemetryPort>>,
}

type ProbeQueue = KeyedWorkQueue<BlobName, ProbeEntry>;

struct ProbeInner {
    deps: UnknownBlobHandlerDeps,
    settings: ProbeSettings,
    ctx: RequestContext,
    to_probe: ProbeQueue,
    probe_waiters: Arc<ProbeQueue>,
    long_waiters: Arc<ProbeQueue>,
    current_batch: Mutex<BTreeMap<BlobName, ProbeEntry>>,
}

/// Discovers which local blobs the server is missing or still indexing.
///
/// Must be created inside a tokio runtime: the retry queues are driven by
/// [`IntervalKicker`] tasks.
pub struct UnknownBlobHandler {
    inner: Arc<ProbeInner>,
    probe_waiters_kicker: IntervalKicker,
    long_waiters_kicker: IntervalKicker,
}

impl UnknownBlobHandler {
    /// Build the handler and start both retry kickers.
    pub fn new(deps: UnknownBlobHandlerDeps, settings: ProbeSettings) -> Self {
        let settings = ProbeSettings {
            batch_size: settings.batch_size.max(1),
            ..settings
        };
        let inner = Arc::new_cyclic(|weak: &Weak<ProbeInner>| ProbeInner {
            deps,
            settings,
            ctx: RequestContext::new_sync(),
            to_probe: KeyedWorkQueue::new(Arc::new(ProbeStage {
                inner: weak.clone(),
            })),
            probe_waiters: Arc::new(KeyedWorkQueue::new(Arc::new(WaiterStage {
                inner: weak.clone(),
            }))),
            long_waiters: Arc::new(KeyedWorkQueue::new(Arc::new(WaiterStage {
                inner: weak.clone(),
            }))),
            current_batch: Mutex::new(BTreeMap::new()),
        });

        let probe_waiters_kicker = IntervalKicker::start(
            Arc::clone(&inner.probe_waiters) as Arc<dyn Kick>,
            settings.retry_wait,
        );
        let long_waiters_kicker = IntervalKicker::start(
            Arc::clone(&inner.long_waiters) as Arc<dyn Kick>,
            settings.long_retry_wait,
        );

        Self {
            inner,
            probe_waiters_kicker,
            long_waiters_kicker,
        }
    }

    /// Queue blobs for probing and drain the probe queue.
    ///
    /// A blob already waiting keeps its original start time. Returns when the
    /// drain started by this call is done, or right away if one is running.
    pub async fn enqueue<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (BlobName, QualifiedPath)>,
    {
        let now_ms = self.inner.deps.clock.now_ms();
        for (blob_name, path) in entries {
            self.inner.to_probe.insert(
                blob_name,
                ProbeEntry {
                    path,
                    start_ms: now_ms,
                },
                false,
            );
        }
        self.inner.to_probe.kick().await;
    }

    /// Queue depths.
    pub fn stats(&self) -> ProbeQueueStats {
        ProbeQueueStats {
            to_probe: self.inner.to_probe.len(),
            pending_batch: self.inner.batch().len(),
            probe_waiters: self.inner.probe_waiters.len(),
            long_waiters: self.inner.long_waiters.len(),
        }
    }

    /// Stop the kickers and queues; in-flight calls see a cancelled context.
    pub fn dispose(&self) {
        self.probe_waiters_kicker.dispose();
        self.long_waiters_kicker.dispose();
        self.inner.to_probe.dispose();
        self.inner.probe_waiters.dispose();
        self.inner.long_waiters.dispose();
        self.inner.ctx.cancel();
    }
}

impl ProbeInner {
    fn batch(&self) -> MutexGuard<'_, BTreeMap<BlobName, ProbeEntry>> {
        self.current_batch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn take_batch(&self) -> Vec<(BlobName, ProbeEntry)> {
        std::mem::take(&mut *self.batch()).into_iter().collect()
    }

    fn count(&self, name: &str, value: usize) {
        if value == 0 {
            return;
        }
        if let Some(telemetry) = self.deps.telemetry.as_ref() {
            telemetry.increment_counter(name, u64::try_from(value).unwrap_or(u64::MAX), None);
        }
    }

    async fn probe(&self, blob_name: BlobName, entry: ProbeEntry) {
        let current = self.deps.workspace.get_blob_name(&entry.path);
        if current.as_ref() != Some(&blob_name) {
            self.count("sync.probe.stale", 1);
            if let Some(logger) = self.deps.logger.as_ref() {
                logger.debug(
                    "sync.probe.stale",
                    "Dropping probe for outdated blob",
                    Some(log_fields([
                        ("blobName", Value::from(blob_name.as_str())),
                        ("path", Value::from(entry.path.to_string())),
                    ])),
                );
            }
            return;
        }

        let full = {
            let mut batch = self.batch();
            batch.insert(blob_name, entry);
            batch.len() >= self.settings.batch_size
        };
        if full {
            let batch = self.take_batch();
            self.flush(batch).await;
        }
    }

    async fn flush(&self, batch: Vec<(BlobName, ProbeEntry)>) {
        if batch.is_empty() {
            return;
        }
        self.count("sync.probe.batches", 1);
        let names: Vec<BlobName> = batch.iter().map(|(name, _)| name.clone()).collect();
        let api = Arc::clone(&self.deps.api);
        let result = retry_async(
            &self.ctx,
            self.settings.retry,
            "unknown_blob_handler.find_missing",
            || api.find_missing(&self.ctx, names.clone()),
        )
        .await;

        match result {
            Ok(found) => self.classify(batch, found).await,
            Err(error) => {
                if error.is_cancelled() {
                    return;
                }
                self.count("sync.probe.rpc_failed", 1);
                if let Some(logger) = self.deps.logger.as_ref() {
                    logger.warn_error(
                        "sync.probe.rpc_failed",
                        "find-missing failed; scheduling retry",
                        Some(log_fields([
                            ("batchSize", Value::from(batch.len())),
                            ("correlationId", Value::from(self.ctx.correlation_id().as_str())),
                        ])),
                        &error,
                    );
                }
                for (blob_name, entry) in batch {
                    self.add_retry_waiter(blob_name, entry);
                }
            },
        }
    }

    async fn classify(&self, batch: Vec<(BlobName, ProbeEntry)>, found: FindMissingResult) {
        let unknown: HashSet<BlobName> = found.unknown_blob_names.into_iter().collect();
        let nonindexed: HashSet<BlobName> = found.nonindexed_blob_names.into_iter().collect();
        let (mut unknown_count, mut nonindexed_count, mut resolved_count) = (0, 0, 0);

        for (blob_name, entry) in batch {
            if unknown.contains(&blob_name) {
                unknown_count += 1;
                self.deps
                    .workspace
                    .notify_blob_missing(entry.path, blob_name)
                    .await;
            } else if nonindexed.contains(&blob_name) {
                nonindexed_count += 1;
                self.add_retry_waiter(blob_name, entry);
            } else {
                resolved_count += 1;
                self.deps
                    .workspace
                    .notify_blob_indexed(entry.path, blob_name)
                    .await;
            }
        }

        self.count("sync.probe.unknown", unknown_count);
        self.count("sync.probe.nonindexed", nonindexed_count);
        self.count("sync.probe.resolved", resolved_count);
        if let Some(logger) = self.deps.logger.as_ref() {
            logger.debug(
                "sync.probe.batch_done",
                "find-missing batch classified",
                Some(log_fields([
                    ("unknown", Value::from(unknown_count)),
                    ("nonindexed", Value::from(nonindexed_count)),
                    ("resolved", Value::from(resolved_count)),
                ])),
            );
        }
    }

    fn add_retry_waiter(&self, blob_name: BlobName, entry: ProbeEntry) -> WaiterQueue {
        let waited_ms = self.deps.clock.now_ms().saturating_sub(entry.start_ms);
        if waited_ms < self.settings.patience_ms {
            self.probe_waiters.insert(blob_name, entry, false);
            WaiterQueue::Short
        } else {
            self.long_waiters.insert(blob_name, entry, false);
            WaiterQueue::Long
        }
    }
}

struct ProbeStage {
    inner: Weak<ProbeInner>,
}

impl WorkItemProcessor<(BlobName, ProbeEntry)> for ProbeStage {
    fn process_item(&self, item: (BlobName, ProbeEntry)) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Some(inner) = self.inner.upgrade() {
                let (blob_name, entry) = item;
                inner.probe(blob_name, entry).await;
            }
            Ok(())
        })
    }

    fn drain_complete(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(inner) = self.inner.upgrade() {
                let batch = inner.take_batch();
                inner.flush(batch).await;
            }
        })
    }
}

/// Shared by both retry queues: hand entries back to the probe queue.
struct WaiterStage {
    inner: Weak<ProbeInner>,
}

impl WorkItemProcessor<(BlobName, ProbeEntry)> for WaiterStage {
    fn process_item(&self, item: (BlobName, ProbeEntry)) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Some(inner) = self.inner.upgrade() {
                let (blob_name, entry) = item;
                inner.to_probe.insert(blob_name, entry, false);
            }
            Ok(())
        })
    }

    fn drain_complete(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(inner) = self.inner.upgrade() {
                inner.to_probe.kick().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blob_sync_shared::ErrorEnvelope;
    use blob_sync_testkit::errors::unavailable_error;
    use blob_sync_testkit::in_memory::{
        FakeBlobApi, FakeWorkspace, ManualClock, RecordingLogger, RecordingTelemetry,
        ServerBlobState,
    };

    struct Harness {
        api: Arc<FakeBlobApi>,
        workspace: Arc<FakeWorkspace>,
        clock: Arc<ManualClock>,
        telemetry: Arc<RecordingTelemetry>,
        logger: RecordingLogger,
        handler: UnknownBlobHandler,
    }

    fn harness(settings: ProbeSettings) -> Harness {
        let api = Arc::new(FakeBlobApi::new());
        let workspace = Arc::new(FakeWorkspace::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let telemetry = Arc::new(RecordingTelemetry::default());
        let logger = RecordingLogger::default();
        let handler = UnknownBlobHandler::new(
            UnknownBlobHandlerDeps {
                api: Arc::clone(&api) as Arc<dyn BlobApiPort>,
                workspace: Arc::clone(&workspace) as Arc<dyn WorkspacePort>,
                clock: Arc::clone(&clock) as Arc<dyn ClockPort>,
                logger: Some(Arc::new(logger.clone())),
                telemetry: Some(Arc::clone(&telemetry) as Arc<dyn TelemetryPort>),
            },
            settings,
        );
        Harness {
            api,
            workspace,
            clock,
            telemetry,
            logger,
            handler,
        }
    }

    fn fast_settings() -> ProbeSettings {
        ProbeSettings {
            retry: RetryPolicy::no_retry(),
            ..ProbeSettings::default()
        }
    }

    fn path(rel: &str) -> Result<QualifiedPath> {
        QualifiedPath::new("ws", rel).map_err(ErrorEnvelope::from)
    }

    fn name(raw: &str) -> Result<BlobName> {
        BlobName::parse(raw).map_err(ErrorEnvelope::from)
    }

    /// Registers `blob` as the current name of `rel` and returns the pair.
    fn tracked(h: &Harness, blob: &str, rel: &str) -> Result<(BlobName, QualifiedPath)> {
        let (blob, file) = (name(blob)?, path(rel)?);
        h.workspace.set_blob_name(&file, &blob);
        Ok((blob, file))
    }

    #[tokio::test(start_paused = true)]
    async fn stale_probe_is_never_sent() -> Result<()> {
        let h = harness(fast_settings());
        let (h1, file) = tracked(&h, "h1", "a.rs")?;

        h.handler.inner.to_probe.insert(
            h1.clone(),
            ProbeEntry {
                path: file.clone(),
                start_ms: 0,
            },
            false,
        );
        h.workspace.set_blob_name(&file, &name("h2")?);
        h.handler.inner.to_probe.kick().await;

        assert!(!h.api.was_probed(&h1));
        assert!(h.api.find_missing_calls().is_empty());
        assert_eq!(h.telemetry.counter("sync.probe.stale"), 1);
        assert!(h.logger.contains("sync.probe.stale"));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn patience_boundary_selects_the_retry_queue() -> Result<()> {
        let h = harness(fast_settings());
        let now = h.clock.now_ms();
        let patience = h.handler.inner.settings.patience_ms;

        let old = ProbeEntry {
            path: path("old.rs")?,
            start_ms: now - patience - 1,
        };
        let fresh = ProbeEntry {
            path: path("new.rs")?,
            start_ms: now,
        };
        let edge = ProbeEntry {
            path: path("edge.rs")?,
            start_ms: now - patience,
        };

        assert_eq!(h.handler.inner.add_retry_waiter(name("old")?, old), WaiterQueue::Long);
        assert_eq!(h.handler.inner.add_retry_waiter(name("new")?, fresh), WaiterQueue::Short);
        assert_eq!(h.handler.inner.add_retry_waiter(name("edge")?, edge), WaiterQueue::Long);

        let stats = h.handler.stats();
        assert_eq!(stats.probe_waiters, 1);
        assert_eq!(stats.long_waiters, 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn results_are_routed_by_classification() -> Result<()> {
        let h = harness(fast_settings());
        let unknown = tracked(&h, "unknown", "u.rs")?;
        let pending = tracked(&h, "pending", "p.rs")?;
        let done = tracked(&h, "done", "d.rs")?;
        h.api.set_state(&pending.0, ServerBlobState::Stored);
        h.api.set_state(&done.0, ServerBlobState::Indexed);

        h.handler
            .enqueue([unknown.clone(), pending.clone(), done.clone()])
            .await;

        assert_eq!(h.api.find_missing_calls().len(), 1);
        assert_eq!(h.workspace.missing(), vec![(unknown.1, unknown.0)]);
        assert_eq!(h.workspace.indexed(), vec![(done.1, done.0)]);
        assert_eq!(h.handler.inner.probe_waiters.get(&pending.0).map(|e| e.path), Some(pending.1));
        assert_eq!(h.telemetry.counter("sync.probe.unknown"), 1);
        assert_eq!(h.telemetry.counter("sync.probe.nonindexed"), 1);
        assert_eq!(h.telemetry.counter("sync.probe.resolved"), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn full_batches_flush_early_and_partial_batch_flushes_at_drain_end() -> Result<()> {
        let h = harness(ProbeSettings {
            batch_size: 2,
            ..fast_settings()
        });
        let entries = vec![
            tracked(&h, "a", "a.rs")?,
            tracked(&h, "b", "b.rs")?,
            tracked(&h, "c", "c.rs")?,
        ];

        h.handler.enqueue(entries).await;

        assert_eq!(
            h.api.find_missing_calls(),
            vec![vec![name("a")?, name("b")?], vec![name("c")?]]
        );
        assert_eq!(h.telemetry.counter("sync.probe.batches"), 2);
        assert_eq!(h.handler.stats().pending_batch, 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn rpc_failure_moves_whole_batch_to_retry() -> Result<()> {
        let h = harness(fast_settings());
        h.api.fail_next_find_missing(unavailable_error());
        let entries = vec![tracked(&h, "a", "a.rs")?, tracked(&h, "b", "b.rs")?];

        h.handler.enqueue(entries).await;

        assert_eq!(h.handler.stats().probe_waiters, 2);
        assert!(h.workspace.missing().is_empty());
        assert_eq!(h.telemetry.counter("sync.probe.rpc_failed"), 1);
        assert!(h.logger.contains("sync.probe.rpc_failed"));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn retriable_rpc_failure_is_retried_inline() -> Result<()> {
        let h = harness(ProbeSettings {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 10,
                max_delay_ms: 10,
                jitter_ratio_pct: 0,
            },
            ..ProbeSettings::default()
        });
        h.api.fail_next_find_missing(unavailable_error());
        let entry = tracked(&h, "a", "a.rs")?;

        h.handler.enqueue([entry.clone()]).await;

        assert_eq!(h.api.find_missing_calls().len(), 2);
        assert_eq!(h.workspace.missing(), vec![(entry.1, entry.0)]);
        assert_eq!(h.telemetry.counter("sync.probe.rpc_failed"), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn short_waiters_are_reprobed_by_their_kicker() -> Result<()> {
        let h = harness(fast_settings());
        let entry = tracked(&h, "a", "a.rs")?;
        h.api.set_state(&entry.0, ServerBlobState::Stored);

        h.handler.enqueue([entry.clone()]).await;
        assert_eq!(h.handler.stats().probe_waiters, 1);

        h.api.index_all();
        tokio::time::sleep(DEFAULT_PROBE_RETRY_WAIT + Duration::from_millis(100)).await;

        assert_eq!(h.api.find_missing_calls().len(), 2);
        assert_eq!(h.workspace.indexed(), vec![(entry.1, entry.0)]);
        assert_eq!(h.handler.stats(), ProbeQueueStats::default());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn entries_past_patience_wait_for_the_long_kicker() -> Result<()> {
        let h = harness(fast_settings());
        let entry = tracked(&h, "a", "a.rs")?;
        h.api.set_state(&entry.0, ServerBlobState::Stored);
        h.handler.enqueue([entry.clone()]).await;

        h.clock.advance(DEFAULT_PROBE_PATIENCE_MS);
        tokio::time::sleep(DEFAULT_PROBE_RETRY_WAIT + Duration::from_millis(100)).await;
        assert_eq!(h.api.find_missing_calls().len(), 2);
        assert_eq!(h.handler.stats().long_waiters, 1);

        h.api.index_all();
        tokio::time::sleep(DEFAULT_LONG_RETRY_WAIT).await;
        assert_eq!(h.api.find_missing_calls().len(), 3);
        assert_eq!(h.workspace.indexed(), vec![(entry.1, entry.0)]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn requeued_blob_keeps_its_start_time() -> Result<()> {
        let h = harness(fast_settings());
        let (blob, file) = tracked(&h, "a", "a.rs")?;
        h.api.set_state(&blob, ServerBlobState::Stored);
        h.handler.inner.to_probe.insert(
            blob.clone(),
            ProbeEntry {
                path: file.clone(),
                start_ms: 5,
            },
            false,
        );

        // Enqueueing again must not reset the start time, so the entry has
        // already outlived its patience when it comes back nonindexed.
        h.handler.enqueue([(blob, file)]).await;
        let stats = h.handler.stats();
        assert_eq!(stats.long_waiters, 1);
        assert_eq!(stats.probe_waiters, 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_stops_probing() -> Result<()> {
        let h = harness(fast_settings());
        h.handler.dispose();

        h.handler.enqueue([tracked(&h, "a", "a.rs")?]).await;
        tokio::time::sleep(DEFAULT_LONG_RETRY_WAIT * 2).await;

        assert!(h.api.find_missing_calls().is_empty());
        assert!(h.handler.inner.ctx.is_cancelled());
        Ok(())
    }
}
