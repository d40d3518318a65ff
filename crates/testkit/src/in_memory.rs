//! In-memory adapter implementations for port contracts.
//!
//! These implementations are intended for:
//! - Unit/integration tests of the sync engine
//! - Deterministic contract tests for the ports layer
//! - Local experimentation without a blob service

use blob_sync_ports::{
    BlobApiPort, BlobName, BlobNameCalculatorPort, BoxFuture, ClockPort, ContentSourcePort,
    FindMissingResult, LogEvent, LogFields, LogLevel, LoggerPort, QualifiedPath, TelemetryPort,
    TelemetryTags, TelemetryTimer, UploadBlob, WorkspacePort,
};
use blob_sync_shared::{ErrorEnvelope, RequestContext, Result};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A no-op logger implementation.
#[derive(Debug, Default)]
pub struct NoopLogger;

impl LoggerPort for NoopLogger {
    fn log(&self, _event: LogEvent) {}

    fn child(&self, _fields: LogFields) -> Box<dyn LoggerPort> {
        Box::new(Self)
    }
}

/// Logger that keeps every event for assertions.
#[derive(Debug, Clone, Default)]
pub struct RecordingLogger {
    events: Arc<Mutex<Vec<LogEvent>>>,
}

impl RecordingLogger {
    /// Snapshot of recorded events.
    pub fn events(&self) -> Vec<LogEvent> {
        lock(&self.events).clone()
    }

    /// Event names at `level`, in order.
    pub fn event_names(&self, level: LogLevel) -> Vec<String> {
        lock(&self.events)
            .iter()
            .filter(|event| event.level == level)
            .map(|event| event.event.to_string())
            .collect()
    }

    /// True when an event named `name` was logged.
    pub fn contains(&self, name: &str) -> bool {
        lock(&self.events)
            .iter()
            .any(|event| event.event.as_ref() == name)
    }
}

impl LoggerPort for RecordingLogger {
    fn log(&self, event: LogEvent) {
        lock(&self.events).push(event);
    }

    fn child(&self, _fields: LogFields) -> Box<dyn LoggerPort> {
        Box::new(self.clone())
    }
}

/// A no-op telemetry timer.
#[derive(Debug, Default)]
pub struct NoopTimer;

impl TelemetryTimer for NoopTimer {
    fn stop(&self) {}
}

/// A no-op telemetry implementation.
#[derive(Debug, Default)]
pub struct NoopTelemetry;

impl TelemetryPort for NoopTelemetry {
    fn increment_counter(&self, _name: &str, _value: u64, _tags: Option<&TelemetryTags>) {}

    fn record_timer_ms(&self, _name: &str, _duration_ms: u64, _tags: Option<&TelemetryTags>) {}

    fn start_timer(&self, _name: &str, _tags: Option<&TelemetryTags>) -> Box<dyn TelemetryTimer> {
        Box::new(NoopTimer)
    }
}

/// Telemetry sink that sums counters by name.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    counters: Mutex<BTreeMap<String, u64>>,
}

impl RecordingTelemetry {
    /// Current value of `name` (0 when never incremented).
    pub fn counter(&self, name: &str) -> u64 {
        lock(&self.counters).get(name).copied().unwrap_or(0)
    }

    /// Snapshot of every counter.
    pub fn counters(&self) -> BTreeMap<String, u64> {
        lock(&self.counters).clone()
    }
}

impl TelemetryPort for RecordingTelemetry {
    fn increment_counter(&self, name: &str, value: u64, _tags: Option<&TelemetryTags>) {
        let mut counters = lock(&self.counters);
        let entry = counters.entry(name.to_owned()).or_insert(0);
        *entry = entry.saturating_add(value);
    }

    fn record_timer_ms(&self, _name: &str, _duration_ms: u64, _tags: Option<&TelemetryTags>) {}

    fn start_timer(&self, _name: &str, _tags: Option<&TelemetryTags>) -> Box<dyn TelemetryTimer> {
        Box::new(NoopTimer)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// Clock starting at `now_ms`.
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    /// Jump to `now_ms`.
    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Move forward by `delta_ms`.
    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl ClockPort for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Deterministic blob-name calculator for tests.
///
/// Names are `"{rel_path}@{fnv64(content):016x}"`, so equal content at equal
/// paths always collides and a test can predict names without hashing.
#[derive(Debug, Clone)]
pub struct FakeBlobNameCalculator {
    max_len: usize,
}

impl FakeBlobNameCalculator {
    /// Calculator refusing content longer than `max_len` bytes.
    pub const fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    /// Name the calculator would produce.
    pub fn name_for(path: &QualifiedPath, content: &str) -> BlobName {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in content.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        BlobName::parse(format!("{}@{hash:016x}", path.rel_path()))
            .expect("generated blob names are non-empty")
    }
}

impl Default for FakeBlobNameCalculator {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

impl BlobNameCalculatorPort for FakeBlobNameCalculator {
    fn calculate(&self, path: &QualifiedPath, content: &str) -> Option<BlobName> {
        if content.len() > self.max_len {
            return None;
        }
        Some(Self::name_for(path, content))
    }
}

/// Files held in memory.
#[derive(Debug, Default)]
pub struct InMemoryContentSource {
    files: Mutex<HashMap<QualifiedPath, Box<str>>>,
}

impl InMemoryContentSource {
    /// Create or replace a file.
    pub fn write(&self, path: &QualifiedPath, content: &str) {
        lock(&self.files).insert(path.clone(), content.into());
    }

    /// Delete a file.
    pub fn delete(&self, path: &QualifiedPath) {
        lock(&self.files).remove(path);
    }
}

impl ContentSourcePort for InMemoryContentSource {
    fn read_text(
        &self,
        ctx: &RequestContext,
        path: &QualifiedPath,
    ) -> BoxFuture<'_, Result<Option<Box<str>>>> {
        let ctx = ctx.clone();
        let content = lock(&self.files).get(path).cloned();
        Box::pin(async move {
            ctx.ensure_not_cancelled("in_memory_content.read_text")?;
            Ok(content)
        })
    }
}

/// What the fake server knows about a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerBlobState {
    /// Bytes received, indexing pending.
    Stored,
    /// Indexed and searchable.
    Indexed,
}

/// In-memory blob service.
///
/// `find_missing` classifies names by server state: absent names are unknown,
/// `Stored` names are nonindexed, `Indexed` names are resolved.
#[derive(Debug, Default)]
pub struct FakeBlobApi {
    blobs: Mutex<HashMap<BlobName, ServerBlobState>>,
    find_missing_calls: Mutex<Vec<Vec<BlobName>>>,
    find_missing_failures: Mutex<VecDeque<ErrorEnvelope>>,
    uploads: Mutex<Vec<UploadBlob>>,
    upload_failures: Mutex<VecDeque<ErrorEnvelope>>,
    index_on_upload: AtomicBool,
    hang_uploads: AtomicBool,
}

impl FakeBlobApi {
    /// Empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploaded blobs become `Indexed` immediately instead of `Stored`.
    pub fn index_on_upload(&self, enabled: bool) {
        self.index_on_upload.store(enabled, Ordering::SeqCst);
    }

    /// `batch_upload` never completes while enabled.
    pub fn hang_uploads(&self, enabled: bool) {
        self.hang_uploads.store(enabled, Ordering::SeqCst);
    }

    /// Force a server state for `blob_name`.
    pub fn set_state(&self, blob_name: &BlobName, state: ServerBlobState) {
        lock(&self.blobs).insert(blob_name.clone(), state);
    }

    /// Server state for `blob_name`.
    pub fn state(&self, blob_name: &BlobName) -> Option<ServerBlobState> {
        lock(&self.blobs).get(blob_name).copied()
    }

    /// Mark every stored blob as indexed.
    pub fn index_all(&self) {
        for state in lock(&self.blobs).values_mut() {
            *state = ServerBlobState::Indexed;
        }
    }

    /// Next `find_missing` call fails with `error`; calls queue up.
    pub fn fail_next_find_missing(&self, error: ErrorEnvelope) {
        lock(&self.find_missing_failures).push_back(error);
    }

    /// Next `batch_upload` call fails with `error`; calls queue up.
    pub fn fail_next_upload(&self, error: ErrorEnvelope) {
        lock(&self.upload_failures).push_back(error);
    }

    /// Blob names of every `find_missing` call, in call order.
    pub fn find_missing_calls(&self) -> Vec<Vec<BlobName>> {
        lock(&self.find_missing_calls).clone()
    }

    /// True when any `find_missing` call asked about `blob_name`.
    pub fn was_probed(&self, blob_name: &BlobName) -> bool {
        lock(&self.find_missing_calls)
            .iter()
            .any(|call| call.contains(blob_name))
    }

    /// Every accepted upload, in order.
    pub fn uploads(&self) -> Vec<UploadBlob> {
        lock(&self.uploads).clone()
    }
}

impl BlobApiPort for FakeBlobApi {
    fn find_missing(
        &self,
        ctx: &RequestContext,
        blob_names: Vec<BlobName>,
    ) -> BoxFuture<'_, Result<FindMissingResult>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("fake_blob_api.find_missing")?;
            lock(&self.find_missing_calls).push(blob_names.clone());
            if let Some(error) = lock(&self.find_missing_failures).pop_front() {
                return Err(error);
            }

            let blobs = lock(&self.blobs);
            let mut result = FindMissingResult::default();
            for name in blob_names {
                match blobs.get(&name) {
                    None => result.unknown_blob_names.push(name),
                    Some(ServerBlobState::Stored) => result.nonindexed_blob_names.push(name),
                    Some(ServerBlobState::Indexed) => {},
                }
            }
            Ok(result)
        })
    }

    fn batch_upload(
        &self,
        ctx: &RequestContext,
        blobs: Vec<UploadBlob>,
    ) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("fake_blob_api.batch_upload")?;
            if self.hang_uploads.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if let Some(error) = lock(&self.upload_failures).pop_front() {
                return Err(error);
            }

            let state = if self.index_on_upload.load(Ordering::SeqCst) {
                ServerBlobState::Indexed
            } else {
                ServerBlobState::Stored
            };
            let mut known = lock(&self.blobs);
            for blob in &blobs {
                known.insert(blob.blob_name.clone(), state);
            }
            drop(known);
            lock(&self.uploads).extend(blobs);
            Ok(())
        })
    }
}

/// Workspace manager double with scripted current blob names.
#[derive(Debug, Default)]
pub struct FakeWorkspace {
    current: Mutex<HashMap<QualifiedPath, BlobName>>,
    missing: Mutex<Vec<(QualifiedPath, BlobName)>>,
    indexed: Mutex<Vec<(QualifiedPath, BlobName)>>,
}

impl FakeWorkspace {
    /// Empty workspace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the blob `get_blob_name(path)` reports.
    pub fn set_blob_name(&self, path: &QualifiedPath, blob_name: &BlobName) {
        lock(&self.current).insert(path.clone(), blob_name.clone());
    }

    /// Forget `path`.
    pub fn remove(&self, path: &QualifiedPath) {
        lock(&self.current).remove(path);
    }

    /// Every `notify_blob_missing` call, in order.
    pub fn missing(&self) -> Vec<(QualifiedPath, BlobName)> {
        lock(&self.missing).clone()
    }

    /// Every `notify_blob_indexed` call, in order.
    pub fn indexed(&self) -> Vec<(QualifiedPath, BlobName)> {
        lock(&self.indexed).clone()
    }
}

impl WorkspacePort for FakeWorkspace {
    fn get_blob_name(&self, path: &QualifiedPath) -> Option<BlobName> {
        lock(&self.current).get(path).cloned()
    }

    fn notify_blob_missing(&self, path: QualifiedPath, blob_name: BlobName) -> BoxFuture<'_, ()> {
        lock(&self.missing).push((path, blob_name));
        Box::pin(async {})
    }

    fn notify_blob_indexed(&self, path: QualifiedPath, blob_name: BlobName) -> BoxFuture<'_, ()> {
        lock(&self.indexed).push((path, blob_name));
        Box::pin(async {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blob_sync_shared::ErrorClass;

    fn path(rel: &str) -> QualifiedPath {
        QualifiedPath::new("ws", rel).expect("valid path")
    }

    #[tokio::test]
    async fn fake_api_classifies_by_server_state() -> Result<()> {
        let api = FakeBlobApi::new();
        let ctx = RequestContext::new_request();
        let stored = BlobName::parse("stored").expect("name");
        let indexed = BlobName::parse("indexed").expect("name");
        let unknown = BlobName::parse("unknown").expect("name");
        api.set_state(&stored, ServerBlobState::Stored);
        api.set_state(&indexed, ServerBlobState::Indexed);

        let result = api
            .find_missing(&ctx, vec![stored.clone(), indexed, unknown.clone()])
            .await?;
        assert_eq!(result.unknown_blob_names, vec![unknown]);
        assert_eq!(result.nonindexed_blob_names, vec![stored]);
        Ok(())
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let api = FakeBlobApi::new();
        let ctx = RequestContext::new_request();
        api.fail_next_find_missing(ErrorEnvelope::unexpected(
            blob_sync_shared::ErrorCode::unavailable(),
            "down",
            ErrorClass::Retriable,
        ));

        assert!(api.find_missing(&ctx, Vec::new()).await.is_err());
        assert!(api.find_missing(&ctx, Vec::new()).await.is_ok());
        assert_eq!(api.find_missing_calls().len(), 2);
    }

    #[test]
    fn fake_calculator_respects_size_limit() {
        let calculator = FakeBlobNameCalculator::new(3);
        let file = path("a.rs");
        assert!(calculator.calculate(&file, "abcd").is_none());
        assert_eq!(
            calculator.calculate(&file, "abc"),
            Some(FakeBlobNameCalculator::name_for(&file, "abc"))
        );
    }

    #[test]
    fn manual_clock_moves_only_on_request() {
        let clock = ManualClock::new(10);
        clock.advance(5);
        assert_eq!(clock.now_ms(), 15);
        clock.set(3);
        assert_eq!(clock.now_ms(), 3);
    }
}
