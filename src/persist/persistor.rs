//! Coalescing background snapshot writer.

use std::{collections::HashSet, future::Future, sync::Arc, time::Duration};

use itertools::Itertools;
use tokio::{
    sync::{Mutex, Notify},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use super::SnapshotStore;
use crate::{
    classify::{ClassificationCounts, ClassificationSets, SetId, TraderHash},
    error::Result,
    types::Cursor,
};

/// Default number of batches between two snapshot saves.
pub const DEFAULT_SAVE_INTERVAL_BATCHES: u64 = 30;

/// Default interval [`SnapshotPersistor::flush`] checks for completion at.
const DEFAULT_FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug)]
pub struct PersistorConfig {
    /// Minimum number of processed batches between two regular saves.
    pub save_interval_batches: u64,

    /// Interval [`SnapshotPersistor::flush`] polls the writer state at.
    pub flush_poll_interval: Duration,
}

impl Default for PersistorConfig {
    fn default() -> Self {
        Self {
            save_interval_batches: DEFAULT_SAVE_INTERVAL_BATCHES,
            flush_poll_interval: DEFAULT_FLUSH_POLL_INTERVAL,
        }
    }
}

/// Unsaved hashes of one classification set with its cumulative count.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetDelta {
    pub hashes: HashSet<TraderHash>,
    pub cumulative_count: u64,
}

/// Classification state to be made durable up to `cursor`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveTask {
    pub cursor: Cursor,
    pub insider: SetDelta,
    pub not_insider: SetDelta,
}

impl SaveTask {
    /// Moves unsaved deltas out of `sets` into a new task.
    ///
    /// Sets start collecting a fresh delta right away, so members added while
    /// the task is being written are never lost.
    pub fn capture(
        sets: &mut ClassificationSets,
        counts: ClassificationCounts,
        cursor: Cursor,
    ) -> Self {
        Self {
            cursor,
            insider: SetDelta {
                hashes: sets.insider.take_unsaved(),
                cumulative_count: counts.insider,
            },
            not_insider: SetDelta {
                hashes: sets.not_insider.take_unsaved(),
                cumulative_count: counts.not_insider,
            },
        }
    }

    pub fn delta(&self, set_id: SetId) -> &SetDelta {
        match set_id {
            SetId::Insider => &self.insider,
            SetId::NotInsider => &self.not_insider,
        }
    }

    /// Number of hashes across both deltas.
    pub fn len(&self) -> usize {
        self.insider.hashes.len() + self.not_insider.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes over the deltas of an older task that will not be written.
    /// Counts and cursor of `self` are kept as they are more recent.
    fn absorb(&mut self, older: SaveTask) {
        self.insider.hashes.extend(older.insider.hashes);
        self.not_insider.hashes.extend(older.not_insider.hashes);
    }
}

/// Snapshot writer state exposed for observability.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PersistorStatus {
    /// Number of tasks waiting for the writer, 0 or 1.
    pub queued: usize,
    pub in_flight: bool,
    pub batches_processed: u64,
    pub batches_since_save: u64,
    pub saves_completed: u64,
    pub saves_failed: u64,
    /// Number of hashes from failed writes waiting for the next task.
    pub carried_hashes: usize,
    pub last_saved_cursor: Option<Cursor>,
}

#[derive(Debug, Default)]
struct WriterState {
    pending: Option<SaveTask>,
    carry: Option<SaveTask>,
    in_flight: bool,
    closed: bool,
    batches_processed: u64,
    last_save_batch: u64,
    saves_completed: u64,
    saves_failed: u64,
    last_saved_cursor: Option<Cursor>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<WriterState>,
    wakeup: Notify,
}

/// Single-slot snapshot writer running on a background task.
///
/// At most one write is in flight. A task enqueued while another one is
/// pending replaces it, inheriting its deltas, so the writer never builds a
/// backlog. Each write appends both set deltas to the [`SnapshotStore`] in
/// parallel and, once both succeeded, hands the task cursor to the cursor
/// callback. Failed writes are logged and their deltas carried over to the
/// next task.
#[derive(derive_more::Debug)]
pub struct SnapshotPersistor {
    config: PersistorConfig,
    shared: Arc<Shared>,
    #[debug(skip)]
    worker: JoinHandle<()>,
}

impl SnapshotPersistor {
    /// Spawns the writer task on the current tokio runtime.
    ///
    /// `on_cursor` is invoked with the task cursor after its deltas are durable.
    pub fn spawn<S, F, Fut>(store: Arc<S>, on_cursor: F, config: PersistorConfig) -> Self
    where
        S: SnapshotStore,
        F: Fn(Cursor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let shared = Arc::new(Shared::default());
        let worker = tokio::spawn(run_writer(shared.clone(), store, on_cursor));
        Self {
            config,
            shared,
            worker,
        }
    }

    pub fn config(&self) -> &PersistorConfig {
        &self.config
    }

    /// Counts a processed batch and enqueues the task built by `build` once
    /// at least `save_interval_batches` batches passed since the last save.
    ///
    /// Returns `true` if a task was enqueued.
    pub async fn on_batch_processed<B>(&self, build: B) -> bool
    where
        B: FnOnce() -> SaveTask,
    {
        let mut state = self.shared.state.lock().await;
        state.batches_processed += 1;
        if state.batches_processed - state.last_save_batch < self.config.save_interval_batches {
            return false;
        }
        state.last_save_batch = state.batches_processed;
        Self::enqueue(&mut state, build());
        drop(state);
        self.shared.wakeup.notify_one();
        true
    }

    /// Enqueues `task` regardless of the save interval.
    pub async fn force_save(&self, task: SaveTask) {
        let mut state = self.shared.state.lock().await;
        state.last_save_batch = state.batches_processed;
        Self::enqueue(&mut state, task);
        drop(state);
        self.shared.wakeup.notify_one();
    }

    /// Waits until no task is pending and no write is in flight.
    pub async fn flush(&self) {
        loop {
            {
                let state = self.shared.state.lock().await;
                if state.pending.is_none() && !state.in_flight {
                    return;
                }
            }
            tokio::time::sleep(self.config.flush_poll_interval).await;
        }
    }

    pub async fn status(&self) -> PersistorStatus {
        let state = self.shared.state.lock().await;
        PersistorStatus {
            queued: usize::from(state.pending.is_some()),
            in_flight: state.in_flight,
            batches_processed: state.batches_processed,
            batches_since_save: state.batches_processed - state.last_save_batch,
            saves_completed: state.saves_completed,
            saves_failed: state.saves_failed,
            carried_hashes: state.carry.as_ref().map_or(0, SaveTask::len),
            last_saved_cursor: state.last_saved_cursor,
        }
    }

    /// Flushes outstanding writes and stops the writer task.
    pub async fn shutdown(self) {
        self.flush().await;
        self.shared.state.lock().await.closed = true;
        self.shared.wakeup.notify_one();
        if let Err(e) = self.worker.await {
            error!(?e, "Snapshot writer task failed");
        }
    }

    fn enqueue(state: &mut WriterState, mut task: SaveTask) {
        if let Some(replaced) = state.pending.take() {
            debug!(
                replaced_block = replaced.cursor.number(),
                block = task.cursor.number(),
                "Replacing pending snapshot task"
            );
            task.absorb(replaced);
        }
        if let Some(carry) = state.carry.take() {
            task.absorb(carry);
        }
        state.pending = Some(task);
    }
}

async fn run_writer<S, F, Fut>(shared: Arc<Shared>, store: Arc<S>, on_cursor: F)
where
    S: SnapshotStore,
    F: Fn(Cursor) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    loop {
        let task = {
            let mut state = shared.state.lock().await;
            match state.pending.take() {
                Some(task) => {
                    state.in_flight = true;
                    Some(task)
                }
                None if state.closed => return,
                None => None,
            }
        };
        let Some(task) = task else {
            shared.wakeup.notified().await;
            continue;
        };

        let result = write_deltas(store.as_ref(), &task).await;

        let cursor = task.cursor;
        match result {
            Ok(()) => {
                if let Err(e) = on_cursor(cursor).await {
                    warn!(?e, block = cursor.number(), "Failed to persist cursor");
                }
                let mut state = shared.state.lock().await;
                state.in_flight = false;
                state.saves_completed += 1;
                state.last_saved_cursor = Some(cursor);
                info!(
                    block = cursor.number(),
                    insider_delta = task.insider.hashes.len(),
                    not_insider_delta = task.not_insider.hashes.len(),
                    insider_total = task.insider.cumulative_count,
                    not_insider_total = task.not_insider.cumulative_count,
                    "Snapshot saved"
                );
            }
            Err(e) => {
                warn!(
                    ?e,
                    block = cursor.number(),
                    "Snapshot save failed, deltas kept for next save"
                );
                let mut state = shared.state.lock().await;
                state.in_flight = false;
                state.saves_failed += 1;
                match state.pending.as_mut() {
                    Some(pending) => pending.absorb(task),
                    None => match state.carry.as_mut() {
                        Some(carry) => carry.absorb(task),
                        None => state.carry = Some(task),
                    },
                }
            }
        }
    }
}

async fn write_deltas<S: SnapshotStore>(store: &S, task: &SaveTask) -> Result<()> {
    let insider = task.insider.hashes.iter().copied().sorted().collect_vec();
    let not_insider = task.not_insider.hashes.iter().copied().sorted().collect_vec();
    futures::try_join!(
        store.save(
            SetId::Insider,
            &insider,
            task.insider.cumulative_count,
            task.cursor
        ),
        store.save(
            SetId::NotInsider,
            &not_insider,
            task.not_insider.cumulative_count,
            task.cursor
        ),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex as StdMutex,
        atomic::{AtomicBool, Ordering},
    };

    use tokio::sync::Semaphore;

    use super::*;
    use crate::persist::{MemoryStore, Snapshot};

    /// Store that can hold writes until released and fail on demand.
    struct ControlledStore {
        inner: MemoryStore,
        gated: bool,
        gate: Semaphore,
        failing: AtomicBool,
    }

    impl ControlledStore {
        fn new(gated: bool) -> Self {
            Self {
                inner: MemoryStore::new(),
                gated,
                gate: Semaphore::new(0),
                failing: AtomicBool::new(false),
            }
        }

        fn release(&self, writes: usize) {
            self.gate.add_permits(writes);
        }
    }

    impl SnapshotStore for ControlledStore {
        async fn save(
            &self,
            set_id: SetId,
            delta: &[TraderHash],
            cumulative_count: u64,
            cursor: Cursor,
        ) -> Result<()> {
            if self.gated {
                self.gate.acquire().await.unwrap().forget();
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("disk full").into());
            }
            self.inner.save(set_id, delta, cumulative_count, cursor).await
        }

        async fn load(&self, set_id: SetId) -> Result<Option<Snapshot>> {
            self.inner.load(set_id).await
        }
    }

    type Cursors = Arc<StdMutex<Vec<Cursor>>>;

    fn spawn(store: Arc<ControlledStore>, interval: u64) -> (SnapshotPersistor, Cursors) {
        let cursors = Cursors::default();
        let persistor = SnapshotPersistor::spawn(
            store,
            {
                let cursors = cursors.clone();
                move |cursor| {
                    let cursors = cursors.clone();
                    async move {
                        cursors.lock().unwrap().push(cursor);
                        Ok(())
                    }
                }
            },
            PersistorConfig {
                save_interval_batches: interval,
                flush_poll_interval: Duration::from_millis(1),
            },
        );
        (persistor, cursors)
    }

    fn task(block: u64, insider: &[TraderHash], not_insider: &[TraderHash]) -> SaveTask {
        SaveTask {
            cursor: Cursor::at(block),
            insider: SetDelta {
                hashes: insider.iter().copied().collect(),
                cumulative_count: insider.len() as u64,
            },
            not_insider: SetDelta {
                hashes: not_insider.iter().copied().collect(),
                cumulative_count: not_insider.len() as u64,
            },
        }
    }

    async fn wait_in_flight(persistor: &SnapshotPersistor) {
        while !persistor.status().await.in_flight {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_interval_gates_saves() {
        let store = Arc::new(ControlledStore::new(false));
        let (persistor, cursors) = spawn(store.clone(), 3);

        assert!(!persistor.on_batch_processed(|| task(1, &[1], &[])).await);
        assert!(!persistor.on_batch_processed(|| task(2, &[1], &[])).await);
        persistor.flush().await;
        assert!(store.inner.records(SetId::Insider).is_empty());

        assert!(persistor.on_batch_processed(|| task(3, &[1], &[2])).await);
        persistor.flush().await;

        let insider = store.inner.records(SetId::Insider);
        assert_eq!(insider.len(), 1);
        assert_eq!(insider[0].hashes, vec![1]);
        assert_eq!(insider[0].cursor, Some(Cursor::at(3)));
        assert_eq!(store.inner.records(SetId::NotInsider).len(), 1);
        assert_eq!(*cursors.lock().unwrap(), vec![Cursor::at(3)]);

        let status = persistor.status().await;
        assert_eq!(status.batches_processed, 3);
        assert_eq!(status.batches_since_save, 0);
        assert_eq!(status.saves_completed, 1);
        persistor.shutdown().await;
    }

    #[tokio::test]
    async fn test_pending_task_is_replaced() {
        let store = Arc::new(ControlledStore::new(true));
        let (persistor, cursors) = spawn(store.clone(), 30);

        persistor.force_save(task(1, &[1], &[])).await;
        wait_in_flight(&persistor).await;

        persistor.force_save(task(2, &[2], &[])).await;
        persistor.force_save(task(3, &[3], &[30])).await;
        assert_eq!(persistor.status().await.queued, 1);

        store.release(4);
        persistor.flush().await;

        let insider = store.inner.records(SetId::Insider);
        assert_eq!(insider.len(), 2);
        assert_eq!(insider[0].cursor, Some(Cursor::at(1)));
        assert_eq!(insider[1].cursor, Some(Cursor::at(3)));
        assert_eq!(insider[1].hashes, vec![2, 3]);
        assert_eq!(*cursors.lock().unwrap(), vec![Cursor::at(1), Cursor::at(3)]);
        persistor.shutdown().await;
    }

    #[tokio::test]
    async fn test_cursor_waits_for_both_deltas() {
        let store = Arc::new(ControlledStore::new(true));
        let (persistor, cursors) = spawn(store.clone(), 30);

        persistor.force_save(task(9, &[1], &[2])).await;
        wait_in_flight(&persistor).await;

        store.release(1);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(cursors.lock().unwrap().is_empty());

        store.release(1);
        persistor.flush().await;
        assert_eq!(*cursors.lock().unwrap(), vec![Cursor::at(9)]);
        persistor.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_deltas_carry_over() {
        let store = Arc::new(ControlledStore::new(false));
        store.failing.store(true, Ordering::SeqCst);
        let (persistor, cursors) = spawn(store.clone(), 30);

        persistor.force_save(task(5, &[1], &[7])).await;
        persistor.flush().await;

        let status = persistor.status().await;
        assert_eq!(status.saves_failed, 1);
        assert_eq!(status.carried_hashes, 2);
        assert!(cursors.lock().unwrap().is_empty());

        store.failing.store(false, Ordering::SeqCst);
        persistor.force_save(task(6, &[2], &[])).await;
        persistor.flush().await;

        let insider = store.inner.load(SetId::Insider).await.unwrap().unwrap();
        assert_eq!(insider.hashes, HashSet::from([1, 2]));
        let not_insider = store.inner.load(SetId::NotInsider).await.unwrap().unwrap();
        assert_eq!(not_insider.hashes, HashSet::from([7]));
        assert_eq!(*cursors.lock().unwrap(), vec![Cursor::at(6)]);
        assert_eq!(persistor.status().await.carried_hashes, 0);
        persistor.shutdown().await;
    }

    #[test]
    fn test_capture_swaps_unsaved() {
        use alloy::primitives::address;

        let trader = address!("0x3333333333333333333333333333333333333333");
        let mut sets = ClassificationSets::new();
        sets.insider.add(&trader);

        let task = SaveTask::capture(&mut sets, ClassificationCounts::new(1, 0), Cursor::at(4));
        assert_eq!(task.insider.hashes.len(), 1);
        assert_eq!(task.delta(SetId::Insider).cumulative_count, 1);
        assert!(sets.insider.unsaved().is_empty());
        assert!(sets.insider.has(&trader));
    }
}
