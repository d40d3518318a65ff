//! Path ↔ blob ↔ lifecycle bookkeeping with embargo support.
//!
//! Records live in a table keyed by a monotonically increasing [`RecordId`].
//! Secondary indexes by blob name, path and status answer every query
//! without scanning the whole table. `RecordId` order also breaks timestamp
//! ties: of two records with the same `upload_requested_at_ms`, the later
//! insert is considered newer.

use blob_sync_domain::{BlobName, BlobQuery, BlobRecord, BlobStatus, QualifiedPath};
use blob_sync_ports::{ClockPort, LogFields, LoggerPort, log_fields};
use blob_sync_shared::{ErrorCode, ErrorEnvelope, Result};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct RecordId(u64);

/// Result of [`BlobStatusStore::update_blob_indexed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// The record is now the indexed blob for its path.
    Indexed,
    /// The record was already indexed; nothing changed.
    AlreadyIndexed,
    /// A newer upload for the same path is already indexed; the record was dropped.
    DiscardedStale,
    /// No record exists for the blob name.
    NotFound,
}

/// Record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobStoreStats {
    /// Total records.
    pub records: usize,
    /// Records still waiting for indexing.
    pub uploaded: usize,
    /// Indexed records.
    pub indexed: usize,
    /// Embargoed paths.
    pub embargoed: usize,
}

#[derive(Debug, Default)]
struct StoreState {
    next_id: u64,
    records: HashMap<RecordId, BlobRecord>,
    by_blob: HashMap<BlobName, RecordId>,
    by_path: HashMap<QualifiedPath, BTreeSet<RecordId>>,
    by_status: HashMap<BlobStatus, BTreeSet<RecordId>>,
    embargoed: HashSet<QualifiedPath>,
}

impl StoreState {
    fn insert(&mut self, record: BlobRecord) -> RecordId {
        self.next_id = self.next_id.saturating_add(1);
        let id = RecordId(self.next_id);
        self.by_blob.insert(record.blob_name.clone(), id);
        self.by_path
            .entry(record.path.clone())
            .or_default()
            .insert(id);
        self.by_status.entry(record.status).or_default().insert(id);
        self.records.insert(id, record);
        id
    }

    fn remove(&mut self, id: RecordId) -> Option<BlobRecord> {
        let record = self.records.remove(&id)?;
        self.by_blob.remove(&record.blob_name);
        if let Some(ids) = self.by_path.get_mut(&record.path) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_path.remove(&record.path);
            }
        }
        if let Some(ids) = self.by_status.get_mut(&record.status) {
            ids.remove(&id);
        }
        Some(record)
    }

    fn mark_indexed(&mut self, id: RecordId, now_ms: u64) {
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        let previous = record.status;
        record.status = BlobStatus::Indexed;
        record.indexed_at_ms = Some(now_ms);
        if let Some(ids) = self.by_status.get_mut(&previous) {
            ids.remove(&id);
        }
        self.by_status
            .entry(BlobStatus::Indexed)
            .or_default()
            .insert(id);
    }

    fn remove_path(&mut self, path: &QualifiedPath) -> usize {
        let ids: Vec<RecordId> = self
            .by_path
            .get(path)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        for id in &ids {
            self.remove(*id);
        }
        ids.len()
    }

    fn path_ids(&self, path: &QualifiedPath) -> impl Iterator<Item = RecordId> + '_ {
        self.by_path.get(path).into_iter().flatten().copied()
    }

    fn indexed_ids_for_path(&self, path: &QualifiedPath) -> Vec<RecordId> {
        self.path_ids(path)
            .filter(|id| {
                self.records
                    .get(id)
                    .is_some_and(|record| record.status == BlobStatus::Indexed)
            })
            .collect()
    }

    /// Upload order key: requested-at timestamp, then insertion order.
    fn upload_key(&self, id: RecordId) -> (u64, RecordId) {
        let requested = self
            .records
            .get(&id)
            .and_then(|record| record.upload_requested_at_ms)
            .unwrap_or(0);
        (requested, id)
    }

    /// Index order key: indexed-at timestamp, then insertion order.
    fn indexed_key(&self, id: RecordId) -> (u64, RecordId) {
        let indexed = self
            .records
            .get(&id)
            .and_then(|record| record.indexed_at_ms)
            .unwrap_or(0);
        (indexed, id)
    }

    fn blob_name(&self, id: RecordId) -> Option<BlobName> {
        self.records.get(&id).map(|record| record.blob_name.clone())
    }
}

/// Single source of truth mapping paths to blob names and their lifecycle.
///
/// All operations take `&self`; state sits behind one mutex that is never held
/// across an `.await`.
pub struct BlobStatusStore {
    state: Mutex<StoreState>,
    clock: Arc<dyn ClockPort>,
    logger: Option<Arc<dyn LoggerPort>>,
}

impl BlobStatusStore {
    /// Empty store.
    pub fn new(clock: Arc<dyn ClockPort>, logger: Option<Arc<dyn LoggerPort>>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            clock,
            logger,
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a freshly requested upload.
    ///
    /// Fails with `store:blob_already_tracked` when `blob_name` is already
    /// present; the store is left unchanged in that case.
    pub fn add_uploaded_blob(&self, blob_name: BlobName, path: QualifiedPath) -> Result<()> {
        let now_ms = self.clock.now_ms();
        let mut state = self.state();
        if state.by_blob.contains_key(&blob_name) {
            return Err(already_tracked(&blob_name));
        }
        state.insert(BlobRecord::uploaded(blob_name, path, now_ms));
        Ok(())
    }

    /// Track a blob and mark it indexed right away.
    pub fn add_indexed_blob(&self, blob_name: BlobName, path: QualifiedPath) -> Result<()> {
        self.add_uploaded_blob(blob_name.clone(), path)?;
        self.update_blob_indexed(&blob_name);
        Ok(())
    }

    /// Mark `blob_name` indexed, keeping at most one indexed blob per path.
    ///
    /// When another blob of the same path is already indexed, the newer upload
    /// wins: an older record being indexed late is dropped, otherwise the
    /// previously indexed records are deleted.
    pub fn update_blob_indexed(&self, blob_name: &BlobName) -> IndexOutcome {
        let now_ms = self.clock.now_ms();
        let (outcome, path, superseded) = {
            let mut state = self.state();
            let Some(id) = state.by_blob.get(blob_name).copied() else {
                drop(state);
                self.log_error(
                    "sync.store.update_blob_indexed.not_found",
                    "Cannot mark unknown blob as indexed",
                    log_fields([("blobName", Value::from(blob_name.as_str()))]),
                );
                return IndexOutcome::NotFound;
            };
            let Some(record) = state.records.get(&id) else {
                return IndexOutcome::NotFound;
            };
            let path = record.path.clone();

            if record.status == BlobStatus::Indexed {
                (IndexOutcome::AlreadyIndexed, path, 0)
            } else {
                let others = state.indexed_ids_for_path(&path);
                let newest_other = others
                    .iter()
                    .copied()
                    .max_by_key(|other| state.upload_key(*other));
                match newest_other {
                    None => {
                        state.mark_indexed(id, now_ms);
                        (IndexOutcome::Indexed, path, 0)
                    },
                    Some(other) if state.upload_key(other) > state.upload_key(id) => {
                        state.remove(id);
                        (IndexOutcome::DiscardedStale, path, 0)
                    },
                    Some(_) => {
                        for other in &others {
                            state.remove(*other);
                        }
                        state.mark_indexed(id, now_ms);
                        (IndexOutcome::Indexed, path, others.len())
                    },
                }
            }
        };

        let fields = log_fields([
            ("blobName", Value::from(blob_name.as_str())),
            ("path", Value::from(path.to_string())),
        ]);
        match outcome {
            IndexOutcome::AlreadyIndexed => self.log_warn(
                "sync.store.update_blob_indexed.already_indexed",
                "Blob is already indexed",
                fields,
            ),
            IndexOutcome::DiscardedStale => self.log_debug(
                "sync.store.update_blob_indexed.discarded_stale",
                "Newer upload already indexed; dropping stale blob",
                fields,
            ),
            IndexOutcome::Indexed if superseded > 0 => self.log_debug(
                "sync.store.update_blob_indexed.superseded",
                "Replaced older indexed blob",
                fields,
            ),
            IndexOutcome::Indexed | IndexOutcome::NotFound => {},
        }
        outcome
    }

    /// Indexed blob for `path`; `None` when embargoed or nothing is indexed.
    pub fn get_indexed_blob_name(&self, path: &QualifiedPath) -> Option<BlobName> {
        let state = self.state();
        if state.embargoed.contains(path) {
            return None;
        }
        let indexed = state.indexed_ids_for_path(path);
        let newest = indexed
            .iter()
            .copied()
            .max_by_key(|id| state.indexed_key(*id))
            .and_then(|id| state.blob_name(id));
        let count = indexed.len();
        drop(state);

        if count > 1 {
            self.log_warn(
                "sync.store.get_indexed_blob_name.multiple",
                "Multiple indexed blobs for one path",
                log_fields([
                    ("path", Value::from(path.to_string())),
                    ("count", Value::from(count)),
                ]),
            );
        }
        newest
    }

    /// Most recently requested blob for `path`, whatever its status.
    pub fn get_last_blob_name_for_path(&self, path: &QualifiedPath) -> Option<BlobName> {
        let state = self.state();
        state
            .path_ids(path)
            .max_by_key(|id| state.upload_key(*id))
            .and_then(|id| state.blob_name(id))
    }

    /// Returns true when a record exists for `blob_name`.
    pub fn is_tracking_blob(&self, blob_name: &BlobName) -> bool {
        self.state().by_blob.contains_key(blob_name)
    }

    /// Returns true when `path` has records or is embargoed.
    pub fn is_tracking_path(&self, path: &QualifiedPath) -> bool {
        let state = self.state();
        state.by_path.contains_key(path) || state.embargoed.contains(path)
    }

    /// Returns true when `path` is embargoed.
    pub fn is_embargoed(&self, path: &QualifiedPath) -> bool {
        self.state().embargoed.contains(path)
    }

    /// Forget every record for `path` and lift its embargo.
    pub fn remove_path(&self, path: &QualifiedPath) {
        let mut state = self.state();
        state.remove_path(path);
        state.embargoed.remove(path);
    }

    /// Clear `path` and keep it out of indexed lookups until removed.
    pub fn embargo_path(&self, path: &QualifiedPath) {
        let mut state = self.state();
        if state.embargoed.contains(path) {
            drop(state);
            self.log_debug(
                "sync.store.embargo_path.already_embargoed",
                "Path is already embargoed",
                log_fields([("path", Value::from(path.to_string()))]),
            );
            return;
        }
        state.remove_path(path);
        state.embargoed.insert(path.clone());
    }

    /// Re-key the record for `old_name` as `new_name`.
    ///
    /// A missing `old_name` is logged and ignored. Fails with
    /// `store:blob_already_tracked` when `new_name` belongs to another record.
    pub fn update_blob_name(&self, old_name: &BlobName, new_name: BlobName) -> Result<()> {
        if *old_name == new_name {
            return Ok(());
        }
        let mut state = self.state();
        if state.by_blob.contains_key(&new_name) {
            return Err(already_tracked(&new_name));
        }
        let Some(id) = state.by_blob.get(old_name).copied() else {
            drop(state);
            self.log_warn(
                "sync.store.update_blob_name.not_found",
                "Cannot rename unknown blob",
                log_fields([
                    ("oldBlobName", Value::from(old_name.as_str())),
                    ("newBlobName", Value::from(new_name.as_str())),
                ]),
            );
            return Ok(());
        };
        if let Some(mut record) = state.remove(id) {
            record.blob_name = new_name;
            state.insert(record);
        }
        Ok(())
    }

    /// Indexed blob of every non-embargoed path.
    pub fn get_all_path_to_indexed_blob(&self) -> BTreeMap<QualifiedPath, BlobName> {
        let state = self.state();
        let mut newest: BTreeMap<QualifiedPath, (u64, RecordId)> = BTreeMap::new();
        for id in state.by_status.get(&BlobStatus::Indexed).into_iter().flatten() {
            let Some(record) = state.records.get(id) else {
                continue;
            };
            if state.embargoed.contains(&record.path) {
                continue;
            }
            let key = state.indexed_key(*id);
            newest
                .entry(record.path.clone())
                .and_modify(|current| {
                    if key > *current {
                        *current = key;
                    }
                })
                .or_insert(key);
        }
        newest
            .into_iter()
            .filter_map(|(path, (_, id))| state.blob_name(id).map(|name| (path, name)))
            .collect()
    }

    /// Paths with records plus embargoed paths.
    pub fn get_tracked_paths(&self) -> BTreeSet<QualifiedPath> {
        let state = self.state();
        state
            .by_path
            .keys()
            .chain(state.embargoed.iter())
            .cloned()
            .collect()
    }

    /// Snapshot of the record for `blob_name`.
    pub fn get_record(&self, blob_name: &BlobName) -> Option<BlobRecord> {
        let state = self.state();
        state
            .by_blob
            .get(blob_name)
            .and_then(|id| state.records.get(id))
            .cloned()
    }

    /// Records matching `query`, in insertion order.
    pub fn search(&self, query: &BlobQuery) -> Vec<BlobRecord> {
        let state = self.state();
        let candidates: Vec<RecordId> = match (&query.path, query.status) {
            (Some(path), _) => state.path_ids(path).collect(),
            (None, Some(status)) => state
                .by_status
                .get(&status)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default(),
            (None, None) => {
                let mut ids: Vec<RecordId> = state.records.keys().copied().collect();
                ids.sort_unstable();
                ids
            },
        };
        candidates
            .into_iter()
            .filter_map(|id| state.records.get(&id))
            .filter(|record| query.matches(record))
            .cloned()
            .collect()
    }

    /// Every blob still waiting for indexing on a non-embargoed path.
    pub fn get_unindexed_blobs(&self) -> Vec<(BlobName, QualifiedPath)> {
        let state = self.state();
        state
            .by_status
            .get(&BlobStatus::Uploaded)
            .into_iter()
            .flatten()
            .filter_map(|id| state.records.get(id))
            .filter(|record| !state.embargoed.contains(&record.path))
            .map(|record| (record.blob_name.clone(), record.path.clone()))
            .collect()
    }

    /// Record counts.
    pub fn stats(&self) -> BlobStoreStats {
        let state = self.state();
        let count = |status: BlobStatus| state.by_status.get(&status).map_or(0, BTreeSet::len);
        BlobStoreStats {
            records: state.records.len(),
            uploaded: count(BlobStatus::Uploaded),
            indexed: count(BlobStatus::Indexed),
            embargoed: state.embargoed.len(),
        }
    }

    /// Drop every record and embargo.
    pub fn clear(&self) {
        *self.state() = StoreState::default();
    }

    fn log_debug(&self, event: &str, message: &str, fields: LogFields) {
        if let Some(logger) = self.logger.as_ref() {
            logger.debug(event, message, Some(fields));
        }
    }

    fn log_warn(&self, event: &str, message: &str, fields: LogFields) {
        if let Some(logger) = self.logger.as_ref() {
            logger.warn(event, message, Some(fields));
        }
    }

    fn log_error(&self, event: &str, message: &str, fields: LogFields) {
        if let Some(logger) = self.logger.as_ref() {
            logger.error(event, message, Some(fields));
        }
    }
}

fn already_tracked(blob_name: &BlobName) -> ErrorEnvelope {
    ErrorEnvelope::invariant(
        ErrorCode::new("store", "blob_already_tracked"),
        "blob name is already tracked",
    )
    .with_metadata("blob_name", blob_name.as_str())
}
