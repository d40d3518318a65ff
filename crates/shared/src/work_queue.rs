//! Drain-on-kick work queues.
//!
//! Three flavours share one execution model: items accumulate while idle, and
//! `kick()` drains them sequentially through a processor. A `kick()` that
//! arrives while another drain is running is a no-op; the running drain
//! re-checks the buffer before exiting, so items inserted mid-drain are handled
//! by the same call. After a drain loop exits the processor's
//! `drain_complete` hook runs exactly once.
//!
//! - [`KeyedWorkQueue`]: keyed by `K`, later inserts may overwrite the payload.
//! - [`BatchWorkQueue`]: deduplicated set of items.
//! - [`PromiseWorkQueue`]: every insert gets a [`PendingResult`] for its item.
//!
//! Per-item failures never escape `kick()`.

use crate::{ErrorCode, ErrorEnvelope, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Boxed future used by queue processors.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Consumer of drained items.
pub trait WorkItemProcessor<T>: Send + Sync {
    /// Process one drained item. Errors are counted and dropped by the queue.
    fn process_item(&self, item: T) -> BoxFuture<'_, Result<()>>;

    /// Called once after every drain loop, after the queue is idle again.
    fn drain_complete(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// Consumer for [`PromiseWorkQueue`]: every item produces a result for its caller.
pub trait ResultProcessor<T, R>: Send + Sync {
    /// Process one item.
    fn process(&self, item: T) -> BoxFuture<'_, Result<R>>;

    /// Called once after every drain loop.
    fn drain_complete(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// Anything that can be kicked by an [`crate::IntervalKicker`].
pub trait Kick: Send + Sync {
    /// Start draining, if not already running.
    fn kick(&self) -> BoxFuture<'_, ()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pending-item storage behind a drain loop.
trait Buffer: Send {
    type Item: Send;

    fn take_all(&mut self) -> Vec<Self::Item>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Queue state carrying the single-drainer flag.
trait RunFlag {
    fn running(&mut self) -> &mut bool;
}

struct QueueState<B> {
    buffer: B,
    running: bool,
    stopping: bool,
}

impl<B> RunFlag for QueueState<B> {
    fn running(&mut self) -> &mut bool {
        &mut self.running
    }
}

/// Clears `running` even when the drain future is dropped mid-way.
///
/// A drain that finds nothing left clears the flag itself, under the same
/// lock as the emptiness check, and disarms the guard.
struct RunningGuard<'a, S: RunFlag> {
    state: &'a Mutex<S>,
    armed: bool,
}

impl<'a, S: RunFlag> RunningGuard<'a, S> {
    fn new(state: &'a Mutex<S>) -> Self {
        Self { state, armed: true }
    }

    fn release(&mut self, state: &mut S) {
        *state.running() = false;
        self.armed = false;
    }
}

impl<S: RunFlag> Drop for RunningGuard<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            *lock(self.state).running() = false;
        }
    }
}

struct DrainQueue<B: Buffer> {
    state: Mutex<QueueState<B>>,
    processor: Arc<dyn WorkItemProcessor<B::Item>>,
    failed_items: AtomicU64,
}

impl<B: Buffer> DrainQueue<B> {
    fn new(buffer: B, processor: Arc<dyn WorkItemProcessor<B::Item>>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                buffer,
                running: false,
                stopping: false,
            }),
            processor,
            failed_items: AtomicU64::new(0),
        }
    }

    fn with_buffer<R>(&self, op: impl FnOnce(&mut B, bool) -> R) -> R {
        let mut state = lock(&self.state);
        let stopping = state.stopping;
        op(&mut state.buffer, stopping)
    }

    fn is_stopping(&self) -> bool {
        lock(&self.state).stopping
    }

    fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    fn try_start(&self) -> bool {
        let mut state = lock(&self.state);
        if state.running || state.stopping {
            return false;
        }
        state.running = true;
        true
    }

    fn next_batch(&self, guard: &mut RunningGuard<'_, QueueState<B>>) -> Option<Vec<B::Item>> {
        let mut state = lock(&self.state);
        if state.stopping || state.buffer.is_empty() {
            guard.release(&mut *state);
            return None;
        }
        Some(state.buffer.take_all())
    }

    async fn kick(&self) {
        if !self.try_start() {
            return;
        }
        let mut guard = RunningGuard::new(&self.state);

        while let Some(batch) = self.next_batch(&mut guard) {
            for item in batch {
                if self.is_stopping() {
                    break;
                }
                if self.processor.process_item(item).await.is_err() {
                    self.failed_items.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        drop(guard);
        self.processor.drain_complete().await;
    }

    fn dispose(&self) {
        let mut state = lock(&self.state);
        state.stopping = true;
        drop(state.buffer.take_all());
    }
}

struct KeyedBuffer<K, V> {
    order: VecDeque<K>,
    values: HashMap<K, V>,
}

impl<K, V> Buffer for KeyedBuffer<K, V>
where
    K: Hash + Eq + Clone + Send,
    V: Send,
{
    type Item = (K, V);

    fn take_all(&mut self) -> Vec<(K, V)> {
        let mut values = std::mem::take(&mut self.values);
        std::mem::take(&mut self.order)
            .into_iter()
            .filter_map(|key| values.remove(&key).map(|value| (key, value)))
            .collect()
    }

    fn len(&self) -> usize {
        self.values.len()
    }
}

/// Queue keyed by `K`; re-inserting a pending key replaces its value only on request.
pub struct KeyedWorkQueue<K, V>
where
    K: Hash + Eq + Clone + Send,
    V: Send,
{
    inner: DrainQueue<KeyedBuffer<K, V>>,
}

impl<K, V> KeyedWorkQueue<K, V>
where
    K: Hash + Eq + Clone + Send,
    V: Clone + Send,
{
    /// Create an idle queue draining into `processor`.
    pub fn new(processor: Arc<dyn WorkItemProcessor<(K, V)>>) -> Self {
        Self {
            inner: DrainQueue::new(
                KeyedBuffer {
                    order: VecDeque::new(),
                    values: HashMap::new(),
                },
                processor,
            ),
        }
    }

    /// Insert `value` under `key`.
    ///
    /// Returns `true` when the value was stored: the key was absent, or it was
    /// present and `overwrite` is set. An overwritten key keeps its position.
    /// Inserts after `dispose` are rejected.
    pub fn insert(&self, key: K, value: V, overwrite: bool) -> bool {
        self.inner.with_buffer(|buffer, stopping| {
            if stopping {
                return false;
            }
            match buffer.values.get_mut(&key) {
                Some(existing) if overwrite => {
                    *existing = value;
                    true
                },
                Some(_) => false,
                None => {
                    buffer.order.push_back(key.clone());
                    buffer.values.insert(key, value);
                    true
                },
            }
        })
    }

    /// Peek at the pending value for `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner
            .with_buffer(|buffer, _| buffer.values.get(key).cloned())
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.inner.with_buffer(|buffer, _| buffer.len())
    }

    /// Returns true when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true while a drain loop is running.
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Items whose processing returned an error since creation.
    pub fn failed_items(&self) -> u64 {
        self.inner.failed_items.load(Ordering::Relaxed)
    }

    /// Drain pending items; no-op when already running or disposed.
    pub async fn kick(&self) {
        self.inner.kick().await;
    }

    /// Stop draining and drop pending items. An in-flight item finishes.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl<K, V> Kick for KeyedWorkQueue<K, V>
where
    K: Hash + Eq + Clone + Send,
    V: Send,
{
    fn kick(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.inner.kick())
    }
}

struct DedupBuffer<T> {
    items: Vec<T>,
    seen: HashSet<T>,
}

impl<T> Buffer for DedupBuffer<T>
where
    T: Hash + Eq + Clone + Send,
{
    type Item = T;

    fn take_all(&mut self) -> Vec<T> {
        self.seen.clear();
        std::mem::take(&mut self.items)
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Deduplicating queue that drains everything pending on each `kick()`.
pub struct BatchWorkQueue<T>
where
    T: Hash + Eq + Clone + Send,
{
    inner: DrainQueue<DedupBuffer<T>>,
}

impl<T> BatchWorkQueue<T>
where
    T: Hash + Eq + Clone + Send,
{
    /// Create an idle queue draining into `processor`.
    pub fn new(processor: Arc<dyn WorkItemProcessor<T>>) -> Self {
        Self {
            inner: DrainQueue::new(
                DedupBuffer {
                    items: Vec::new(),
                    seen: HashSet::new(),
                },
                processor,
            ),
        }
    }

    /// Add `item` unless an equal item is already pending.
    pub fn insert(&self, item: T) -> bool {
        self.inner.with_buffer(|buffer, stopping| {
            if stopping || !buffer.seen.insert(item.clone()) {
                return false;
            }
            buffer.items.push(item);
            true
        })
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.inner.with_buffer(|buffer, _| buffer.len())
    }

    /// Returns true when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true while a drain loop is running.
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Items whose processing returned an error since creation.
    pub fn failed_items(&self) -> u64 {
        self.inner.failed_items.load(Ordering::Relaxed)
    }

    /// Drain pending items; no-op when already running or disposed.
    pub async fn kick(&self) {
        self.inner.kick().await;
    }

    /// Stop draining and drop pending items. An in-flight item finishes.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl<T> Kick for BatchWorkQueue<T>
where
    T: Hash + Eq + Clone + Send,
{
    fn kick(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.inner.kick())
    }
}

/// Result handle for one [`PromiseWorkQueue`] item.
///
/// Resolves with the processor's result, or with a `core:cancelled` error when
/// the queue was disposed before the item ran.
#[derive(Debug)]
pub struct PendingResult<R> {
    receiver: oneshot::Receiver<Result<R>>,
}

impl<R> Future for PendingResult<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(dropped_error())))
    }
}

fn dropped_error() -> ErrorEnvelope {
    ErrorEnvelope::cancelled("work queue disposed before item was processed")
        .with_metadata("reason", ErrorCode::disposed().to_string())
}

struct PromiseState<T, R> {
    items: Vec<PromiseItem<T, R>>,
    running: bool,
    stopping: bool,
}

impl<T, R> RunFlag for PromiseState<T, R> {
    fn running(&mut self) -> &mut bool {
        &mut self.running
    }
}

type PromiseItem<T, R> = (T, oneshot::Sender<Result<R>>);

/// Queue where each caller awaits the result of its own item.
///
/// Items are taken from the end of the pending list, so the most recently
/// inserted item runs first.
pub struct PromiseWorkQueue<T, R> {
    state: Mutex<PromiseState<T, R>>,
    processor: Arc<dyn ResultProcessor<T, R>>,
}

impl<T, R> PromiseWorkQueue<T, R>
where
    T: Send,
    R: Send,
{
    /// Create an idle queue.
    pub fn new(processor: Arc<dyn ResultProcessor<T, R>>) -> Self {
        Self {
            state: Mutex::new(PromiseState {
                items: Vec::new(),
                running: false,
                stopping: false,
            }),
            processor,
        }
    }

    /// Queue `item`; the returned handle resolves once it has been processed.
    pub fn insert(&self, item: T) -> PendingResult<R> {
        let (sender, receiver) = oneshot::channel();
        let mut state = lock(&self.state);
        if !state.stopping {
            state.items.push((item, sender));
        }
        PendingResult { receiver }
    }

    /// Insert, kick and wait for this item's result.
    pub async fn insert_and_kick(&self, item: T) -> Result<R> {
        let pending = self.insert(item);
        self.kick().await;
        pending.await
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        lock(&self.state).items.len()
    }

    /// Returns true when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn try_start(&self) -> bool {
        let mut state = lock(&self.state);
        if state.running || state.stopping {
            return false;
        }
        state.running = true;
        true
    }

    fn pop(&self, guard: &mut RunningGuard<'_, PromiseState<T, R>>) -> Option<PromiseItem<T, R>> {
        let mut state = lock(&self.state);
        let next = if state.stopping {
            None
        } else {
            state.items.pop()
        };
        if next.is_none() {
            guard.release(&mut *state);
        }
        next
    }

    /// Process pending items one at a time; no-op when already running or disposed.
    ///
    /// Dropping the returned future mid-item releases the queue for the next
    /// kick; the interrupted item's handle resolves with `core:cancelled`.
    pub async fn kick(&self) {
        if !self.try_start() {
            return;
        }
        let mut guard = RunningGuard::new(&self.state);

        while let Some((item, sender)) = self.pop(&mut guard) {
            let result = self.processor.process(item).await;
            // The caller may have stopped waiting.
            let _unclaimed = sender.send(result);
        }

        drop(guard);
        self.processor.drain_complete().await;
    }

    /// Stop processing; pending handles resolve with `core:cancelled`.
    pub fn dispose(&self) {
        let mut state = lock(&self.state);
        state.stopping = true;
        state.items.clear();
    }
}

impl<T, R> Kick for PromiseWorkQueue<T, R>
where
    T: Send,
    R: Send,
{
    fn kick(&self) -> BoxFuture<'_, ()> {
        Box::pin(Self::kick(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{OnceLock, Weak};

    #[derive(Default)]
    struct Recorder {
        processed: Mutex<Vec<String>>,
        drains: AtomicUsize,
        fail_on: Option<&'static str>,
        inject: Option<(&'static str, &'static str)>,
        queue: OnceLock<Weak<BatchWorkQueue<String>>>,
    }

    impl Recorder {
        fn processed(&self) -> Vec<String> {
            lock(&self.processed).clone()
        }
    }

    impl WorkItemProcessor<String> for Recorder {
        fn process_item(&self, item: String) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                tokio::task::yield_now().await;
                lock(&self.processed).push(item.clone());
                if let Some((trigger, injected)) = self.inject {
                    if item == trigger {
                        if let Some(queue) = self.queue.get().and_then(Weak::upgrade) {
                            queue.insert(injected.to_owned());
                        }
                    }
                }
                if self.fail_on == Some(item.as_str()) {
                    return Err(ErrorEnvelope::expected(ErrorCode::invalid_input(), "boom"));
                }
                Ok(())
            })
        }

        fn drain_complete(&self) -> BoxFuture<'_, ()> {
            self.drains.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    fn batch_queue(recorder: Recorder) -> (Arc<Recorder>, Arc<BatchWorkQueue<String>>) {
        let recorder = Arc::new(recorder);
        let queue = Arc::new(BatchWorkQueue::new(
            Arc::clone(&recorder) as Arc<dyn WorkItemProcessor<String>>
        ));
        let _already_set = recorder.queue.set(Arc::downgrade(&queue));
        (recorder, queue)
    }

    #[tokio::test]
    async fn batch_insert_during_drain_is_processed_by_same_kick() {
        let (recorder, queue) = batch_queue(Recorder {
            inject: Some(("b", "d")),
            ..Recorder::default()
        });
        for key in ["a", "b", "c"] {
            assert!(queue.insert(key.to_owned()));
        }

        queue.kick().await;

        assert_eq!(recorder.processed(), vec!["a", "b", "c", "d"]);
        assert_eq!(recorder.drains.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
        assert!(!queue.is_running());
    }

    #[tokio::test]
    async fn batch_duplicate_insert_is_processed_once() {
        let (recorder, queue) = batch_queue(Recorder::default());
        assert!(queue.insert("x".to_owned()));
        assert!(!queue.insert("x".to_owned()));

        queue.kick().await;

        assert_eq!(recorder.processed(), vec!["x"]);
    }

    #[tokio::test]
    async fn drain_complete_runs_once_per_cycle() {
        let (recorder, queue) = batch_queue(Recorder::default());
        let items = ["a", "b", "c"];
        for key in items {
            queue.insert(key.to_owned());
        }

        queue.kick().await;

        let calls = recorder.processed().len() + recorder.drains.load(Ordering::SeqCst);
        assert_eq!(calls, items.len() + 1);
    }

    #[tokio::test]
    async fn batch_item_failure_does_not_stop_the_drain() {
        let (recorder, queue) = batch_queue(Recorder {
            fail_on: Some("a"),
            ..Recorder::default()
        });
        queue.insert("a".to_owned());
        queue.insert("b".to_owned());

        queue.kick().await;

        assert_eq!(recorder.processed(), vec!["a", "b"]);
        assert_eq!(queue.failed_items(), 1);
    }

    #[tokio::test]
    async fn processed_item_can_be_inserted_again() {
        let (recorder, queue) = batch_queue(Recorder::default());
        queue.insert("x".to_owned());
        queue.kick().await;
        assert!(queue.insert("x".to_owned()));
        queue.kick().await;

        assert_eq!(recorder.processed(), vec!["x", "x"]);
        assert_eq!(recorder.drains.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn disposed_batch_queue_ignores_kicks_and_inserts() {
        let (recorder, queue) = batch_queue(Recorder::default());
        queue.insert("a".to_owned());
        queue.dispose();

        assert!(!queue.insert("b".to_owned()));
        queue.kick().await;

        assert!(recorder.processed().is_empty());
        assert_eq!(recorder.drains.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_insert_and_kick_never_strands_items() {
        let (recorder, queue) = batch_queue(Recorder::default());
        for round in 0..200 {
            let tasks: Vec<_> = (0..8)
                .map(|task| {
                    let queue = Arc::clone(&queue);
                    tokio::spawn(async move {
                        queue.insert(format!("{round}-{task}"));
                        queue.kick().await;
                    })
                })
                .collect();
            for task in tasks {
                assert!(task.await.is_ok());
            }
            while queue.is_running() {
                tokio::task::yield_now().await;
            }
            assert!(queue.is_empty(), "round {round} left items behind");
        }
        assert_eq!(recorder.processed().len(), 200 * 8);
    }

    struct Gate {
        processed: Mutex<Vec<(String, u32)>>,
        release: tokio::sync::Semaphore,
        started: tokio::sync::Notify,
        drains: AtomicUsize,
    }

    impl WorkItemProcessor<(String, u32)> for Gate {
        fn process_item(&self, item: (String, u32)) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.started.notify_one();
                if let Ok(permit) = self.release.acquire().await {
                    permit.forget();
                }
                lock(&self.processed).push(item);
                Ok(())
            })
        }

        fn drain_complete(&self) -> BoxFuture<'_, ()> {
            self.drains.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    fn gate() -> Arc<Gate> {
        Arc::new(Gate {
            processed: Mutex::new(Vec::new()),
            release: tokio::sync::Semaphore::new(0),
            started: tokio::sync::Notify::new(),
            drains: AtomicUsize::new(0),
        })
    }

    #[test]
    fn keyed_insert_respects_overwrite_flag_and_order() {
        let queue: KeyedWorkQueue<String, u32> =
            KeyedWorkQueue::new(gate() as Arc<dyn WorkItemProcessor<(String, u32)>>);

        assert!(queue.insert("a".to_owned(), 1, false));
        assert!(queue.insert("b".to_owned(), 2, false));
        assert!(!queue.insert("a".to_owned(), 10, false));
        assert_eq!(queue.get(&"a".to_owned()), Some(1));

        assert!(queue.insert("a".to_owned(), 11, true));
        assert_eq!(queue.get(&"a".to_owned()), Some(11));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get(&"zzz".to_owned()), None);
    }

    #[tokio::test]
    async fn keyed_kick_while_running_is_a_noop_and_new_items_join_the_drain() {
        let gate = gate();
        let queue = Arc::new(KeyedWorkQueue::new(
            Arc::clone(&gate) as Arc<dyn WorkItemProcessor<(String, u32)>>
        ));
        queue.insert("a".to_owned(), 1, false);
        queue.insert("b".to_owned(), 2, false);

        let started = gate.started.notified();
        let running = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.kick().await }
        });
        started.await;
        assert!(queue.is_running());

        queue.insert("c".to_owned(), 3, false);
        queue.kick().await;
        assert_eq!(gate.drains.load(Ordering::SeqCst), 0);

        gate.release.add_permits(3);
        let joined = tokio::time::timeout(std::time::Duration::from_secs(1), running).await;
        assert!(matches!(joined, Ok(Ok(()))));

        let processed = lock(&gate.processed).clone();
        assert_eq!(
            processed,
            vec![
                ("a".to_owned(), 1),
                ("b".to_owned(), 2),
                ("c".to_owned(), 3)
            ]
        );
        assert_eq!(gate.drains.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn keyed_dispose_mid_drain_finishes_in_flight_item_only() {
        let gate = gate();
        let queue = Arc::new(KeyedWorkQueue::new(
            Arc::clone(&gate) as Arc<dyn WorkItemProcessor<(String, u32)>>
        ));
        for (key, value) in [("a", 1), ("b", 2), ("c", 3)] {
            queue.insert(key.to_owned(), value, false);
        }

        let started = gate.started.notified();
        let running = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.kick().await }
        });
        started.await;
        queue.dispose();
        gate.release.add_permits(3);

        let joined = tokio::time::timeout(std::time::Duration::from_secs(1), running).await;
        assert!(matches!(joined, Ok(Ok(()))));
        assert_eq!(lock(&gate.processed).clone(), vec![("a".to_owned(), 1)]);
        assert!(queue.is_empty());
        assert!(!queue.is_running());
    }

    struct Doubler {
        order: Mutex<Vec<u32>>,
        drains: AtomicUsize,
    }

    impl ResultProcessor<u32, u32> for Doubler {
        fn process(&self, item: u32) -> BoxFuture<'_, Result<u32>> {
            Box::pin(async move {
                lock(&self.order).push(item);
                if item == 0 {
                    return Err(ErrorEnvelope::expected(ErrorCode::invalid_input(), "zero"));
                }
                Ok(item * 2)
            })
        }

        fn drain_complete(&self) -> BoxFuture<'_, ()> {
            self.drains.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    fn doubler() -> Arc<Doubler> {
        Arc::new(Doubler {
            order: Mutex::new(Vec::new()),
            drains: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn promise_queue_resolves_each_item_and_runs_newest_first() -> Result<()> {
        let processor = doubler();
        let queue = PromiseWorkQueue::new(Arc::clone(&processor) as Arc<dyn ResultProcessor<u32, u32>>);

        let first = queue.insert(1);
        let second = queue.insert(2);
        let failing = queue.insert(0);
        queue.kick().await;

        assert_eq!(first.await?, 2);
        assert_eq!(second.await?, 4);
        assert!(failing.await.is_err_and(|error| error.code == ErrorCode::invalid_input()));
        assert_eq!(lock(&processor.order).clone(), vec![0, 2, 1]);
        assert_eq!(processor.drains.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn promise_insert_and_kick_returns_own_result() -> Result<()> {
        let queue = PromiseWorkQueue::new(doubler() as Arc<dyn ResultProcessor<u32, u32>>);
        assert_eq!(queue.insert_and_kick(21).await?, 42);
        Ok(())
    }

    #[tokio::test]
    async fn promise_dispose_cancels_pending_items() {
        let processor = doubler();
        let queue = PromiseWorkQueue::new(Arc::clone(&processor) as Arc<dyn ResultProcessor<u32, u32>>);
        let pending = queue.insert(5);

        queue.dispose();
        queue.kick().await;

        assert!(pending.await.is_err_and(|error| error.is_cancelled()));
        assert!(queue.insert(6).await.is_err_and(|error| error.is_cancelled()));
        assert!(lock(&processor.order).is_empty());
    }

    struct Sleeper;

    impl ResultProcessor<u32, u32> for Sleeper {
        fn process(&self, item: u32) -> BoxFuture<'_, Result<u32>> {
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                Ok(item * 2)
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_promise_kick_releases_the_queue() {
        let queue = PromiseWorkQueue::new(Arc::new(Sleeper) as Arc<dyn ResultProcessor<u32, u32>>);

        let abandoned =
            tokio::time::timeout(std::time::Duration::from_millis(10), queue.insert_and_kick(1))
                .await;
        assert!(abandoned.is_err());

        let next =
            tokio::time::timeout(std::time::Duration::from_secs(60), queue.insert_and_kick(2))
                .await;
        assert!(matches!(next, Ok(Ok(4))));
    }
}
