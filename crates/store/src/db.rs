//! Store and transaction management.
//!
//! A [`Store`] owns one quad table and coordinates access to it: any number
//! of concurrent readers, each pinned to the snapshot that was current when
//! it began, and at most one writer.
//!
//! # Example
//!
//! ```no_run
//! use graphvault_store::{Quad, QuadPattern, Store};
//!
//! let store = Store::create("data.gv")?;
//!
//! let mut txn = store.write()?;
//! txn.add(&Quad::new(1u64, 10u64, 20u64, 30u64))?;
//! txn.commit()?;
//!
//! let txn = store.read()?;
//! for quad in txn.find(&QuadPattern::any().with_subject(10u64)) {
//!     println!("{}", quad?);
//! }
//! # Ok::<(), graphvault_store::Error>(())
//! ```

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use arc_swap::ArcSwap;
use graphvault_types::{
    Quad, QuadPattern,
    config::{LockWait, StoreConfig},
};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::{
    backend::{BlockChannel, FileChannel, MemoryChannel},
    block::{Block, BlockStore},
    btree::{BlockProvider, BlockProviderMut},
    error::{BlockId, Error, Result},
    header::{CommitSlot, HEADER_BLOCK, StoreHeader},
    integrity::{IntegrityReport, IntegrityScrubber},
    quad::{GraphIter, QuadIter, QuadTable, TableRoots, TripleIter},
    transaction::{CommittedState, CoordinatorState, PendingFrees, SnapshotId, TransactionTracker},
};

/// A transactional quad store.
///
/// Generic over [`BlockChannel`]: use [`Store<FileChannel>`] for durable
/// stores and [`Store<MemoryChannel>`] for tests and scratch data.
///
/// # Transaction Isolation (Copy-on-Write)
///
/// - Read transactions capture an immutable snapshot at start and hold no
///   locks; they never block and are never blocked.
/// - The write transaction copies every block it changes to a new block.
/// - Commit publishes the new roots with one atomic pointer swap.
/// - Replaced blocks are reused only after the last reader that could reach
///   them has finished.
pub struct Store<C: BlockChannel> {
    /// Block pool over the channel.
    blocks: BlockStore<C>,
    /// Last header written to block 0.
    header: Mutex<StoreHeader>,
    /// Published snapshot, swapped on commit.
    committed_state: ArcSwap<CommittedState>,
    /// Reader refcounts and writer flag.
    tracker: TransactionTracker,
    /// Blocks retired by commits, waiting for readers.
    pending_frees: Mutex<PendingFrees>,
    config: StoreConfig,
    /// Held by the single write transaction.
    write_lock: Mutex<()>,
    /// Set after a commit fails past the point of no return.
    closed: AtomicBool,
    node_splits: AtomicU64,
    commits: AtomicU64,
    aborts: AtomicU64,
}

impl Store<FileChannel> {
    /// Creates a new store file, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with_config(path, StoreConfig::default())
    }

    /// Creates a new store file with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    /// Returns [`Error::Io`] if the file cannot be created.
    pub fn create_with_config(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let channel = FileChannel::create(path, config.block_size)?;
        Self::from_channel(channel, config)
    }

    /// Opens an existing store file.
    ///
    /// Recovers the committed state from the dual-slot header; after an
    /// unclean shutdown the free list is rebuilt automatically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened.
    /// Returns [`Error::SizeMismatch`] if the file was written with another
    /// block size.
    /// Returns [`Error::Corrupted`], [`Error::InvalidMagic`] or
    /// [`Error::UnsupportedVersion`] if the header is unusable.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens an existing store file with a custom configuration.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open), plus [`Error::Config`].
    pub fn open_with_config(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let channel = FileChannel::open(path, config.block_size)?;
        Self::from_channel(channel, config)
    }
}

impl Store<MemoryChannel> {
    /// Creates an empty in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if channel initialization fails.
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_config(StoreConfig::default())
    }

    /// Creates an empty in-memory store with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn open_in_memory_with_config(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let channel = MemoryChannel::new(config.block_size)?;
        Self::from_channel(channel, config)
    }
}

impl<C: BlockChannel> Store<C> {
    /// Opens a store over an arbitrary channel.
    ///
    /// An empty channel is initialized as a new store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SizeMismatch`] if the channel's or the stored block
    /// size differs from `config.block_size`.
    /// Returns [`Error::Corrupted`], [`Error::InvalidMagic`] or
    /// [`Error::UnsupportedVersion`] if the header is unusable.
    pub fn from_channel(channel: C, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        if channel.block_size() != config.block_size {
            return Err(Error::SizeMismatch {
                expected: config.block_size,
                actual: channel.block_size(),
            });
        }

        let block_count = channel.block_count()?;
        if block_count == 0 {
            return Self::initialize(channel, config);
        }

        let header = StoreHeader::from_block(&channel.read_block(HEADER_BLOCK)?)?;
        if header.block_size() != config.block_size {
            return Err(Error::SizeMismatch {
                expected: config.block_size,
                actual: header.block_size(),
            });
        }

        let slot_index = header.validate_and_choose_slot()?;
        let fell_back = slot_index != header.primary_slot_index();
        let recovery_required = header.recovery_required() || fell_back;
        let slot = *header.slot(slot_index);

        let total_blocks = slot.total_blocks.max(1);
        if total_blocks > block_count {
            return Err(Error::Corrupted {
                reason: format!(
                    "Header records {total_blocks} blocks but the medium holds {block_count}"
                ),
            });
        }

        let mut header = header;
        if fell_back {
            // Later commits must overwrite the damaged slot, not the one we recovered from.
            header.flip_primary_slot();
        }

        let state = CommittedState { roots: slot.roots, snapshot_id: SnapshotId(slot.version) };
        let blocks = BlockStore::with_high_water(channel, total_blocks, config.cache_blocks);
        let store = Self::assemble(blocks, header, state, config);

        if recovery_required {
            warn!(
                version = slot.version,
                fell_back, "Recovery required - rebuilding free list from index walk"
            );
            store.rebuild_free_list()?;
        } else if slot.free_list_head != 0 {
            match store.load_free_list(slot.free_list_head) {
                Ok(free) => store.blocks.allocator().init_free_list(free),
                Err(e) => {
                    warn!(error = %e, "Persisted free list unusable - rebuilding from index walk");
                    store.rebuild_free_list()?;
                },
            }
        }

        info!(
            version = slot.version,
            quads = slot.roots.quad_count,
            total_blocks,
            free_blocks = store.blocks.allocator().free_count(),
            "Opened store"
        );
        Ok(store)
    }

    fn initialize(channel: C, config: StoreConfig) -> Result<Self> {
        let blocks = BlockStore::new(channel, config.cache_blocks)?;
        let header_block = blocks.allocate()?;
        if header_block.id != HEADER_BLOCK {
            return Err(Error::Corrupted {
                reason: format!("Fresh store allocated block {} for its header", header_block.id),
            });
        }
        let header = StoreHeader::new(config.block_size);
        blocks.write(&Block::from_bytes(HEADER_BLOCK, header.to_block(config.block_size)))?;
        blocks.sync()?;
        blocks.publish();

        info!(block_size = config.block_size, "Created store");
        Ok(Self::assemble(blocks, header, CommittedState::default(), config))
    }

    fn assemble(
        blocks: BlockStore<C>,
        header: StoreHeader,
        state: CommittedState,
        config: StoreConfig,
    ) -> Self {
        Self {
            blocks,
            header: Mutex::new(header),
            committed_state: ArcSwap::from_pointee(state),
            tracker: TransactionTracker::new(),
            pending_frees: Mutex::new(PendingFrees::new()),
            config,
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            node_splits: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            aborts: AtomicU64::new(0),
        }
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the published snapshot version.
    pub fn version(&self) -> SnapshotId {
        self.committed_state.load().snapshot_id
    }

    /// Returns whether a write transaction is open.
    pub fn state(&self) -> CoordinatorState {
        self.tracker.coordinator_state()
    }

    /// Returns true once the store has been closed by a failed commit.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.blocks.is_closed()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Begins a read transaction on the latest published snapshot.
    ///
    /// Never blocks. The snapshot stays readable until the transaction is
    /// dropped, whatever writers commit meanwhile.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the store is closed.
    pub fn read(&self) -> Result<ReadTransaction<'_, C>> {
        self.ensure_open()?;
        let snapshot = self.tracker.register_reader(|| **self.committed_state.load());
        Ok(ReadTransaction { store: self, snapshot })
    }

    /// Begins the write transaction, waiting as configured by
    /// [`StoreConfig::write_lock`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockTimeout`] if another writer holds the lock past
    /// the wait budget.
    /// Returns [`Error::Closed`] if the store is closed.
    pub fn write(&self) -> Result<WriteTransaction<'_, C>> {
        self.write_with(self.config.write_lock)
    }

    /// Begins the write transaction without waiting.
    ///
    /// # Errors
    ///
    /// Same as [`write`](Self::write).
    pub fn try_write(&self) -> Result<WriteTransaction<'_, C>> {
        self.write_with(LockWait::FailFast)
    }

    /// Begins the write transaction with an explicit wait policy.
    ///
    /// # Errors
    ///
    /// Same as [`write`](Self::write).
    pub fn write_with(&self, wait: LockWait) -> Result<WriteTransaction<'_, C>> {
        self.ensure_open()?;
        let guard = self.acquire_write_lock(wait)?;
        // The store may have closed while we waited.
        self.ensure_open()?;
        Ok(self.begin_write_locked(guard))
    }

    fn acquire_write_lock(&self, wait: LockWait) -> Result<MutexGuard<'_, ()>> {
        match wait {
            LockWait::Block => Ok(self.write_lock.lock()),
            LockWait::FailFast => {
                self.write_lock.try_lock().ok_or(Error::LockTimeout { waited: Duration::ZERO })
            },
            LockWait::Timeout { after } => {
                self.write_lock.try_lock_for(after).ok_or(Error::LockTimeout { waited: after })
            },
        }
    }

    fn begin_write_locked<'db>(&'db self, guard: MutexGuard<'db, ()>) -> WriteTransaction<'db, C> {
        let base = **self.committed_state.load();
        self.tracker.start_write();
        WriteTransaction {
            store: self,
            base,
            roots: base.roots,
            dirty: HashMap::new(),
            retired: Vec::new(),
            splits: 0,
            poisoned: false,
            finished: false,
            _write_guard: guard,
        }
    }

    /// Returns store statistics.
    pub fn stats(&self) -> StoreStats {
        let cache = self.blocks.cache_stats();
        let allocator = self.blocks.allocator();
        // Each lock is released before the next is taken: reclaim holds the
        // tracker lock while it locks the pending frees.
        let pending_reclaim = self.pending_frees.lock().pending_count();
        let live_readers = self.tracker.reader_count();
        StoreStats {
            block_size: self.blocks.block_size(),
            total_blocks: allocator.next_block(),
            free_blocks: allocator.free_count(),
            pending_reclaim,
            cached_blocks: cache.size,
            cache_hits: cache.hits,
            cache_misses: cache.misses,
            node_splits: self.node_splits.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            live_readers,
            version: self.version().raw(),
            state: self.state(),
        }
    }

    /// Verifies checksums, tree structure and cross-index agreement of the
    /// latest snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the store is closed. Corruption is
    /// reported in the returned [`IntegrityReport`], not as an error.
    pub fn check_integrity(&self) -> Result<IntegrityReport> {
        let txn = self.read()?;
        Ok(IntegrityScrubber::new(&self.blocks, txn.snapshot.roots).run())
    }

    #[cfg(test)]
    pub(crate) fn blocks_for_test(&self) -> &BlockStore<C> {
        &self.blocks
    }

    /// Closes the store cleanly.
    ///
    /// Reclaims every retired block, persists the free list and clears the
    /// recovery flag so the next open skips the rebuild.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the final writes or syncs fail; the next open
    /// then runs recovery.
    pub fn close(self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return self.blocks.close();
        }

        let retired = self.pending_frees.lock().drain_reclaimable(None);
        self.blocks.reclaim(&retired);
        let free_list_head = self.persist_free_list()?;

        let mut header = self.header.lock().clone();
        let slot = CommitSlot {
            free_list_head,
            total_blocks: self.blocks.total_blocks(),
            timestamp: unix_now(),
            ..*header.primary_slot()
        };
        header.stage_secondary(slot);
        self.write_header(&header)?;
        self.blocks.sync()?;
        header.flip_primary_slot();
        header.set_recovery_required(false);
        self.write_header(&header)?;
        self.blocks.sync()?;

        self.closed.store(true, Ordering::Release);
        self.blocks.close()?;
        info!(
            version = slot.version,
            free_blocks = self.blocks.allocator().free_count(),
            "Closed store"
        );
        Ok(())
    }

    fn write_header(&self, header: &StoreHeader) -> Result<()> {
        let data = header.to_block(self.blocks.block_size());
        self.blocks.write(&Block::from_bytes(HEADER_BLOCK, data))
    }

    /// Runs the dual-slot commit sequence for `version`.
    fn write_commit_header(&self, version: SnapshotId, roots: TableRoots) -> Result<()> {
        let mut current = self.header.lock();
        let mut header = current.clone();
        header.stage_secondary(CommitSlot {
            roots,
            version: version.raw(),
            total_blocks: self.blocks.total_blocks(),
            free_list_head: 0,
            timestamp: unix_now(),
            checksum: 0,
        });
        header.set_recovery_required(true);
        self.write_header(&header)?;
        if self.config.sync_on_commit {
            self.blocks.sync()?;
        }

        header.flip_primary_slot();
        self.write_header(&header)?;
        if self.config.sync_on_commit {
            self.blocks.sync()?;
        }
        *current = header;
        Ok(())
    }

    fn fail_stop(&self, err: &Error) {
        self.closed.store(true, Ordering::Release);
        error!(error = %err, "Commit failed after the header write began; store closed");
    }

    /// Returns retired blocks that no live reader can reach to the free list.
    fn reclaim(&self) {
        let reclaimable = self
            .tracker
            .with_oldest_reader(|oldest| self.pending_frees.lock().drain_reclaimable(oldest));
        self.blocks.reclaim(&reclaimable);
    }

    /// Writes the free list as a chain through the free blocks themselves.
    /// Each link holds the next block ID in its first eight bytes.
    fn persist_free_list(&self) -> Result<BlockId> {
        let free = self.blocks.allocator().free_list();
        let block_size = self.blocks.block_size();
        for (i, &block_id) in free.iter().enumerate() {
            let next = free.get(i + 1).copied().unwrap_or(0);
            let mut data = vec![0u8; block_size];
            data[..8].copy_from_slice(&next.to_le_bytes());
            self.blocks.channel().write_block(block_id, &data)?;
        }
        self.blocks.sync()?;
        Ok(free.first().copied().unwrap_or(0))
    }

    fn load_free_list(&self, head: BlockId) -> Result<Vec<BlockId>> {
        let total = self.blocks.total_blocks();
        let mut free = Vec::new();
        let mut seen = HashSet::new();
        let mut next = head;
        while next != 0 {
            if next >= total || !seen.insert(next) {
                return Err(Error::Corrupted {
                    reason: format!("Free list is damaged at block {next}"),
                });
            }
            free.push(next);
            let data = self.blocks.channel().read_block(next)?;
            let mut link = [0u8; 8];
            link.copy_from_slice(&data[..8]);
            next = BlockId::from_le_bytes(link);
        }
        Ok(free)
    }

    /// Rebuilds the free list: every block below the high-water mark that
    /// is neither the header nor reachable from an index root is free.
    fn rebuild_free_list(&self) -> Result<()> {
        let roots = self.committed_state.load().roots;
        let mut reachable = HashSet::from([HEADER_BLOCK]);
        QuadTable::new(SnapshotBlocks { blocks: &self.blocks }, roots)
            .collect_blocks(&mut reachable)?;

        // Highest first, so the lowest IDs are handed out first.
        let free: Vec<BlockId> =
            (1..self.blocks.total_blocks()).rev().filter(|id| !reachable.contains(id)).collect();
        debug!(reachable = reachable.len(), free = free.len(), "Rebuilt free list");
        self.blocks.allocator().init_free_list(free);
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Store statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Block size in bytes.
    pub block_size: usize,
    /// High-water mark of allocated blocks, header included.
    pub total_blocks: BlockId,
    /// Blocks on the free list.
    pub free_blocks: usize,
    /// Retired blocks waiting for readers to finish.
    pub pending_reclaim: usize,
    /// Blocks currently cached.
    pub cached_blocks: usize,
    /// Cache hits since open.
    pub cache_hits: u64,
    /// Cache misses since open.
    pub cache_misses: u64,
    /// B-tree node splits since open.
    pub node_splits: u64,
    /// Committed write transactions since open.
    pub commits: u64,
    /// Aborted write transactions since open.
    pub aborts: u64,
    /// Live read transactions.
    pub live_readers: usize,
    /// Published snapshot version.
    pub version: u64,
    /// Writer state.
    pub state: CoordinatorState,
}

/// Committed blocks only; what readers see.
pub struct SnapshotBlocks<'a, C: BlockChannel> {
    blocks: &'a BlockStore<C>,
}

impl<C: BlockChannel> Clone for SnapshotBlocks<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: BlockChannel> Copy for SnapshotBlocks<'_, C> {}

impl<C: BlockChannel> BlockProvider for SnapshotBlocks<'_, C> {
    fn read_block(&self, block_id: BlockId) -> Result<Block> {
        self.blocks.read(block_id)
    }

    fn block_size(&self) -> usize {
        self.blocks.block_size()
    }
}

/// A read-only transaction.
///
/// Sees the snapshot that was published when it began, for its whole
/// lifetime. Dropping it releases the snapshot.
pub struct ReadTransaction<'db, C: BlockChannel> {
    store: &'db Store<C>,
    snapshot: CommittedState,
}

impl<'db, C: BlockChannel> ReadTransaction<'db, C> {
    /// Version of the snapshot this transaction reads.
    pub fn version(&self) -> SnapshotId {
        self.snapshot.snapshot_id
    }

    /// Index roots and quad count of the snapshot.
    pub fn roots(&self) -> TableRoots {
        self.snapshot.roots
    }

    fn table(&self) -> QuadTable<SnapshotBlocks<'_, C>> {
        QuadTable::new(SnapshotBlocks { blocks: &self.store.blocks }, self.snapshot.roots)
    }

    /// Number of quads in the snapshot.
    pub fn len(&self) -> u64 {
        self.snapshot.roots.quad_count
    }

    /// True if the snapshot holds no quads.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `quad` is in the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if a block read fails.
    pub fn contains(&self, quad: &Quad) -> Result<bool> {
        self.table().contains(quad)
    }

    /// Lazily finds quads matching `pattern`.
    pub fn find(&self, pattern: &QuadPattern) -> QuadIter<SnapshotBlocks<'_, C>> {
        self.table().find(pattern)
    }

    /// Lazily finds distinct triples across all named graphs.
    pub fn find_union_triples(&self, pattern: &QuadPattern) -> TripleIter<SnapshotBlocks<'_, C>> {
        self.table().find_union_triples(pattern)
    }

    /// Lazily lists named graphs that hold at least one quad.
    pub fn list_graph_nodes(&self) -> GraphIter<SnapshotBlocks<'_, C>> {
        self.table().list_graph_nodes()
    }

    /// Promotes to a write transaction on the same snapshot.
    ///
    /// Never waits. The read transaction stays open; drop it once the write
    /// transaction is in hand.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PromotionConflict`] if another writer is active or a
    /// commit has happened since this transaction began.
    pub fn promote(&self) -> Result<WriteTransaction<'db, C>> {
        self.store.ensure_open()?;
        let guard = self.store.write_lock.try_lock().ok_or(Error::PromotionConflict)?;
        if self.store.version() != self.snapshot.snapshot_id {
            return Err(Error::PromotionConflict);
        }
        Ok(self.store.begin_write_locked(guard))
    }

    /// Promotes to a write transaction on the latest snapshot, waiting for
    /// the writer lock as configured. Changes committed since this
    /// transaction began become visible.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockTimeout`] if the wait budget runs out.
    pub fn promote_read_committed(&self) -> Result<WriteTransaction<'db, C>> {
        self.store.write_with(self.store.config.write_lock)
    }

    /// Ends the transaction. Same as dropping it.
    pub fn end(self) {}
}

impl<C: BlockChannel> Drop for ReadTransaction<'_, C> {
    fn drop(&mut self) {
        self.store.tracker.unregister_reader(self.snapshot.snapshot_id);
        self.store.reclaim();
    }
}

/// Blocks as seen from inside the write transaction: its own uncommitted
/// blocks first, committed blocks otherwise.
pub struct WriterView<'a, C: BlockChannel> {
    blocks: &'a BlockStore<C>,
    dirty: &'a HashMap<BlockId, Block>,
}

impl<C: BlockChannel> Clone for WriterView<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: BlockChannel> Copy for WriterView<'_, C> {}

impl<C: BlockChannel> BlockProvider for WriterView<'_, C> {
    fn read_block(&self, block_id: BlockId) -> Result<Block> {
        match self.dirty.get(&block_id) {
            Some(block) => Ok(block.clone()),
            None => self.blocks.read(block_id),
        }
    }

    fn block_size(&self) -> usize {
        self.blocks.block_size()
    }
}

/// Mutable block access for one write transaction.
struct WriterBlocks<'a, C: BlockChannel> {
    blocks: &'a BlockStore<C>,
    dirty: &'a mut HashMap<BlockId, Block>,
    retired: &'a mut Vec<BlockId>,
    txn_id: u64,
}

impl<C: BlockChannel> BlockProvider for WriterBlocks<'_, C> {
    fn read_block(&self, block_id: BlockId) -> Result<Block> {
        match self.dirty.get(&block_id) {
            Some(block) => Ok(block.clone()),
            None => self.blocks.read(block_id),
        }
    }

    fn block_size(&self) -> usize {
        self.blocks.block_size()
    }
}

impl<C: BlockChannel> BlockProviderMut for WriterBlocks<'_, C> {
    fn allocate_block(&mut self) -> Result<Block> {
        self.blocks.allocate()
    }

    fn write_block(&mut self, block: Block) -> Result<()> {
        self.dirty.insert(block.id, block);
        Ok(())
    }

    fn retire_block(&mut self, block_id: BlockId) -> Result<()> {
        if self.dirty.remove(&block_id).is_some() || self.blocks.is_pending(block_id) {
            return self.blocks.free(block_id);
        }
        self.retired.push(block_id);
        Ok(())
    }

    fn is_private(&self, block_id: BlockId) -> bool {
        self.dirty.contains_key(&block_id)
    }

    fn txn_id(&self) -> u64 {
        self.txn_id
    }
}

/// The write transaction.
///
/// Changes are buffered in private blocks until commit, which makes them
/// visible atomically. Readers that began earlier keep their snapshot.
///
/// # Invariants
///
/// **Lock ordering:** the store's `write_lock` is acquired first and held for
/// the transaction's lifetime, so at most one `WriteTransaction` exists. The
/// allocator, tracker and pending-free locks are taken inside individual
/// operations and released before returning.
///
/// **Failure:** an error while changing the table poisons the transaction;
/// every later call returns [`Error::TransactionAborted`] and the published
/// snapshot is untouched.
pub struct WriteTransaction<'db, C: BlockChannel> {
    store: &'db Store<C>,
    /// Snapshot the transaction started from.
    base: CommittedState,
    /// Working roots.
    roots: TableRoots,
    /// Blocks written by this transaction, not yet on the channel.
    dirty: HashMap<BlockId, Block>,
    /// Published blocks replaced by this transaction.
    retired: Vec<BlockId>,
    splits: u64,
    poisoned: bool,
    finished: bool,
    _write_guard: MutexGuard<'db, ()>,
}

impl<'db, C: BlockChannel> WriteTransaction<'db, C> {
    /// Version of the snapshot this transaction started from.
    pub fn base_version(&self) -> SnapshotId {
        self.base.snapshot_id
    }

    fn ensure_active(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::TransactionAborted);
        }
        Ok(())
    }

    fn view(&self) -> QuadTable<WriterView<'_, C>> {
        QuadTable::new(WriterView { blocks: &self.store.blocks, dirty: &self.dirty }, self.roots)
    }

    /// Applies a change to the working table, poisoning the transaction if
    /// it fails partway.
    fn apply<R>(
        &mut self,
        change: impl FnOnce(&mut QuadTable<WriterBlocks<'_, C>>) -> Result<R>,
    ) -> Result<R> {
        self.ensure_active()?;
        let provider = WriterBlocks {
            blocks: &self.store.blocks,
            dirty: &mut self.dirty,
            retired: &mut self.retired,
            txn_id: self.base.snapshot_id.next().raw(),
        };
        let mut table = QuadTable::new(provider, self.roots);
        let result = change(&mut table);
        let splits = table.split_count();
        let (_, roots) = table.into_parts();
        match result {
            Ok(value) => {
                self.roots = roots;
                self.splits += splits;
                Ok(value)
            },
            Err(e @ Error::InvalidQuad { .. }) => Err(e),
            Err(e) => {
                warn!(error = %e, "Write transaction failed; it must be aborted");
                self.poisoned = true;
                Err(e)
            },
        }
    }

    /// Adds a quad. Returns false if it was already present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidQuad`] for a union-graph quad.
    /// Returns [`Error::TransactionAborted`] if the transaction is poisoned.
    /// Other errors poison the transaction.
    pub fn add(&mut self, quad: &Quad) -> Result<bool> {
        self.apply(|table| table.add(quad))
    }

    /// Deletes a quad. Returns false if it was absent.
    ///
    /// # Errors
    ///
    /// Same as [`add`](Self::add).
    pub fn delete(&mut self, quad: &Quad) -> Result<bool> {
        self.apply(|table| table.delete(quad))
    }

    /// Deletes every quad matching `pattern`. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Same as [`add`](Self::add).
    pub fn delete_matching(&mut self, pattern: &QuadPattern) -> Result<u64> {
        self.apply(|table| table.delete_matching(pattern))
    }

    /// Removes every quad.
    ///
    /// # Errors
    ///
    /// Same as [`add`](Self::add).
    pub fn clear(&mut self) -> Result<()> {
        self.apply(|table| table.clear())
    }

    /// Number of quads, including this transaction's changes.
    pub fn len(&self) -> u64 {
        self.roots.quad_count
    }

    /// True if the working table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `quad` is present, including this transaction's changes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransactionAborted`] if the transaction is poisoned.
    pub fn contains(&self, quad: &Quad) -> Result<bool> {
        self.ensure_active()?;
        self.view().contains(quad)
    }

    /// Lazily finds quads matching `pattern`, including this transaction's
    /// changes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransactionAborted`] if the transaction is poisoned.
    pub fn find(&self, pattern: &QuadPattern) -> Result<QuadIter<WriterView<'_, C>>> {
        self.ensure_active()?;
        Ok(self.view().find(pattern))
    }

    /// Lazily finds distinct triples across all named graphs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransactionAborted`] if the transaction is poisoned.
    pub fn find_union_triples(
        &self,
        pattern: &QuadPattern,
    ) -> Result<TripleIter<WriterView<'_, C>>> {
        self.ensure_active()?;
        Ok(self.view().find_union_triples(pattern))
    }

    /// Lazily lists named graphs that hold at least one quad.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransactionAborted`] if the transaction is poisoned.
    pub fn list_graph_nodes(&self) -> Result<GraphIter<WriterView<'_, C>>> {
        self.ensure_active()?;
        Ok(self.view().list_graph_nodes())
    }

    /// Commits the transaction and publishes the next snapshot version.
    ///
    /// # Commit sequence
    ///
    /// 1. Write every private block, sync
    /// 2. Write the inactive header slot, sync
    /// 3. Flip the god byte, sync (the commit point)
    /// 4. Swap the published snapshot
    /// 5. Queue replaced blocks for reclamation
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransactionAborted`] if the transaction is poisoned.
    /// An I/O error in step 1 aborts the transaction and leaves the store
    /// usable. An I/O error in steps 2-3 leaves the on-disk state undecided;
    /// the store closes and every later call fails with [`Error::Closed`].
    pub fn commit(mut self) -> Result<SnapshotId> {
        if self.poisoned {
            self.rollback();
            return Err(Error::TransactionAborted);
        }
        let store = self.store;
        if let Err(e) = store.ensure_open() {
            self.rollback();
            return Err(e);
        }

        let version = self.base.snapshot_id.next();
        let dirty = std::mem::take(&mut self.dirty);
        let dirty_count = dirty.len();
        let staged = dirty.values().try_for_each(|block| store.blocks.write(block)).and_then(|()| {
            if store.config.sync_on_commit { store.blocks.sync() } else { Ok(()) }
        });
        if let Err(e) = staged {
            warn!(error = %e, "Failed to write transaction blocks; aborting");
            self.rollback();
            return Err(e);
        }

        if let Err(e) = store.write_commit_header(version, self.roots) {
            self.finished = true;
            store.tracker.end_write();
            store.fail_stop(&e);
            return Err(e);
        }

        store.blocks.publish();
        store.committed_state.store(Arc::new(CommittedState { roots: self.roots, snapshot_id: version }));
        let retired = std::mem::take(&mut self.retired);
        let retired_count = retired.len();
        store.pending_frees.lock().record(version, retired);

        self.finished = true;
        store.tracker.end_write();
        store.node_splits.fetch_add(self.splits, Ordering::Relaxed);
        store.commits.fetch_add(1, Ordering::Relaxed);
        store.reclaim();

        debug!(
            version = version.raw(),
            quads = self.roots.quad_count,
            written = dirty_count,
            retired = retired_count,
            "Committed write transaction"
        );
        Ok(version)
    }

    /// Abandons every change. Blocks allocated by the transaction return to
    /// the free list and the published snapshot is unchanged.
    pub fn abort(mut self) {
        self.rollback();
    }

    fn rollback(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.dirty.clear();
        self.retired.clear();
        let freed = self.store.blocks.discard_pending();
        self.store.tracker.end_write();
        self.store.aborts.fetch_add(1, Ordering::Relaxed);
        debug!(base = self.base.snapshot_id.raw(), freed, "Aborted write transaction");
    }
}

impl<C: BlockChannel> Drop for WriteTransaction<'_, C> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                base = self.base.snapshot_id.raw(),
                "Write transaction dropped without commit or abort; rolling back"
            );
            self.rollback();
        }
    }
}
