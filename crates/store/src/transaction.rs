//! Snapshot bookkeeping for copy-on-write isolation.
//!
//! - `SnapshotId`: version number of a committed state
//! - `CommittedState`: the table roots readers capture
//! - `TransactionTracker`: reader reference counts and the writer flag
//! - `PendingFrees`: retired blocks waiting for their readers to finish

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::{error::BlockId, quad::TableRoots};

/// Version of a committed store state.
///
/// Every successful commit publishes `previous + 1`. A fresh store starts
/// at 0.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Default)]
pub struct SnapshotId(pub u64);

impl SnapshotId {
    /// Creates a snapshot ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Returns the following version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// The committed state that readers snapshot.
///
/// Immutable once published; commit swaps in a new one atomically.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommittedState {
    /// Index roots and quad count.
    pub roots: TableRoots,
    /// Version of this state.
    pub snapshot_id: SnapshotId,
}

/// Writer state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No write transaction is open.
    Idle,
    /// A write transaction is open.
    Writing,
}

/// Tracks live transactions so retired blocks are only reused once no
/// reader can reach them.
///
/// ```text
/// Time    Action                                live_readers
/// ----    ------                                ------------
/// T1      Read starts (snapshot 1)              {1: 1}
/// T2      Commit snapshot 2, retires {7, 9}     {1: 1}
/// T3      Read starts (snapshot 2)              {1: 1, 2: 1}
/// T4      First read ends                       {2: 1}
/// T5      Blocks retired by 2 reclaimed         {2: 1}
/// ```
///
/// Blocks retired by commit `v` were last reachable at `v - 1`; they become
/// reusable once the oldest live reader is at `v` or later.
#[derive(Default)]
pub struct TransactionTracker {
    state: Mutex<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    /// Reference count of read transactions per snapshot.
    live_readers: BTreeMap<SnapshotId, u64>,
    /// Whether a write transaction is open.
    writing: bool,
}

impl TransactionTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures a snapshot with `load` and registers a reader for it.
    ///
    /// Both happen under the tracker lock, so a concurrent reclamation
    /// either sees this reader or ran before `load` could return the old
    /// state.
    pub fn register_reader<F>(&self, load: F) -> CommittedState
    where
        F: FnOnce() -> CommittedState,
    {
        let mut state = self.state.lock();
        let snapshot = load();
        *state.live_readers.entry(snapshot.snapshot_id).or_insert(0) += 1;
        snapshot
    }

    /// Unregisters one reader of `snapshot_id`.
    pub fn unregister_reader(&self, snapshot_id: SnapshotId) {
        let mut state = self.state.lock();
        if let Some(count) = state.live_readers.get_mut(&snapshot_id) {
            *count -= 1;
            if *count == 0 {
                state.live_readers.remove(&snapshot_id);
            }
        }
    }

    /// Marks the writer as active. The caller holds the write lock.
    pub fn start_write(&self) {
        let mut state = self.state.lock();
        debug_assert!(!state.writing, "Only one write transaction allowed at a time");
        state.writing = true;
    }

    /// Marks the writer as finished.
    pub fn end_write(&self) {
        self.state.lock().writing = false;
    }

    /// Current writer state.
    pub fn coordinator_state(&self) -> CoordinatorState {
        if self.state.lock().writing { CoordinatorState::Writing } else { CoordinatorState::Idle }
    }

    /// Oldest snapshot that still has a reader.
    pub fn oldest_reader(&self) -> Option<SnapshotId> {
        self.state.lock().live_readers.keys().next().copied()
    }

    /// Runs `reclaim` with the oldest live reader while holding the tracker
    /// lock, so no reader can register against a stale snapshot meanwhile.
    pub fn with_oldest_reader<R>(&self, reclaim: impl FnOnce(Option<SnapshotId>) -> R) -> R {
        let state = self.state.lock();
        reclaim(state.live_readers.keys().next().copied())
    }

    /// Number of live read transactions.
    pub fn reader_count(&self) -> usize {
        self.state.lock().live_readers.values().sum::<u64>() as usize
    }
}

/// Blocks retired by commits, keyed by the version that retired them.
#[derive(Default)]
pub struct PendingFrees {
    retired_by_snapshot: BTreeMap<SnapshotId, Vec<BlockId>>,
}

impl PendingFrees {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records blocks retired by the commit that published `snapshot_id`.
    pub fn record(&mut self, snapshot_id: SnapshotId, blocks: Vec<BlockId>) {
        if !blocks.is_empty() {
            self.retired_by_snapshot.entry(snapshot_id).or_default().extend(blocks);
        }
    }

    /// Removes and returns blocks no live reader can reach.
    ///
    /// With no readers everything is reclaimable; otherwise blocks retired by
    /// versions up to and including `oldest_reader` are.
    pub fn drain_reclaimable(&mut self, oldest_reader: Option<SnapshotId>) -> Vec<BlockId> {
        let reclaimable: Vec<SnapshotId> = match oldest_reader {
            None => self.retired_by_snapshot.keys().copied().collect(),
            Some(oldest) => self.retired_by_snapshot.range(..=oldest).map(|(k, _)| *k).collect(),
        };

        let mut blocks = Vec::new();
        for snapshot_id in reclaimable {
            if let Some(mut retired) = self.retired_by_snapshot.remove(&snapshot_id) {
                blocks.append(&mut retired);
            }
        }
        blocks
    }

    /// True if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.retired_by_snapshot.is_empty()
    }

    /// Number of blocks waiting.
    pub fn pending_count(&self) -> usize {
        self.retired_by_snapshot.values().map(Vec::len).sum()
    }
}
