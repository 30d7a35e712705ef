//! Crash recovery tests for the dual-slot commit protocol.
//!
//! Two families of tests:
//!
//! 1. Header surgery: commit normally, then damage a commit slot on disk and
//!    check which state a reopen recovers.
//! 2. Fault injection: run the commit over a [`FaultyChannel`] that dies at
//!    a chosen [`CrashPoint`], then reopen the file with a healthy channel.
//!
//! # Crash Points in Dual-Slot Commit
//!
//! ```text
//! commit():
//!   1. Write private blocks               ← CrashPoint::DuringBlockWrite
//!   2. SYNC                               ← CrashPoint::BeforeDataSync
//!   3. Write inactive slot                ← CrashPoint::BeforeSlotWrite
//!   4. SYNC                               ← CrashPoint::BeforeSlotSync
//!   5. Write header with flipped god byte ← CrashPoint::BeforeGodByteFlip
//!   6. SYNC                               ← CrashPoint::BeforeFinalSync
//! ```

// Test code is allowed to use unwrap for simplicity
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::BTreeSet,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use graphvault_store::{
    BlockChannel, BlockId, Error, FileChannel, Quad, QuadPattern, Result, SnapshotId, Store,
    StoreConfig, StoreHeader, header::CommitSlot,
};
use graphvault_test_utils::{CrashInjector, CrashPoint, TestDir};

const BLOCK_SIZE: usize = 512;

fn config() -> StoreConfig {
    StoreConfig::builder()
        .block_size(BLOCK_SIZE)
        .cache_blocks(32)
        .sync_on_commit(true)
        .build()
        .unwrap()
}

/// Routes store logs to the test harness; set `RUST_LOG` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn quad(graph: u64, n: u64) -> Quad {
    Quad::new(graph, n, n % 7, n * 3)
}

fn contents<C: BlockChannel>(store: &Store<C>) -> BTreeSet<Quad> {
    let txn = store.read().unwrap();
    txn.find(&QuadPattern::any()).map(|q| q.unwrap()).collect()
}

/// Commit 1 adds graph 1, commit 2 adds graph 2. Dropped without close.
fn setup_two_commits(dir: &TestDir) -> PathBuf {
    let path = dir.store_file("crash_test");
    let store = Store::create_with_config(&path, config()).unwrap();

    let mut txn = store.write().unwrap();
    for n in 0..50 {
        txn.add(&quad(1, n)).unwrap();
    }
    txn.commit().unwrap();

    let mut txn = store.write().unwrap();
    for n in 50..100 {
        txn.add(&quad(2, n)).unwrap();
    }
    txn.commit().unwrap();
    path
}

fn read_header(path: &Path) -> (Vec<u8>, StoreHeader) {
    let bytes = std::fs::read(path).unwrap();
    let block = bytes[..BLOCK_SIZE].to_vec();
    let header = StoreHeader::from_block(&block).unwrap();
    (block, header)
}

fn write_raw_header(path: &Path, block: &[u8]) {
    let channel = FileChannel::open(path, BLOCK_SIZE).unwrap();
    channel.write_block(0, block).unwrap();
    channel.sync().unwrap();
}

/// Flips a checksum byte of one slot to simulate a torn header write.
fn corrupt_slot_checksum(block: &mut [u8], slot_index: usize) {
    let checksum_offset = 16 + slot_index * CommitSlot::SIZE + 88;
    block[checksum_offset] ^= 0xFF;
}

// ============================================================================
// Header Slot Tests
// ============================================================================

#[test]
fn test_corrupt_primary_falls_back_to_secondary() {
    init_tracing();
    let dir = TestDir::new();
    let path = setup_two_commits(&dir);

    let (mut block, header) = read_header(&path);
    corrupt_slot_checksum(&mut block, header.primary_slot_index());
    write_raw_header(&path, &block);

    let store = Store::open_with_config(&path, config()).unwrap();
    assert_eq!(store.version(), SnapshotId(1));
    assert_eq!(contents(&store), (0..50).map(|n| quad(1, n)).collect());
    assert!(store.check_integrity().unwrap().is_healthy());

    // The damaged slot is the next one written.
    let mut txn = store.write().unwrap();
    txn.add(&quad(3, 1)).unwrap();
    assert_eq!(txn.commit().unwrap(), SnapshotId(2));
    drop(store);

    let store = Store::open_with_config(&path, config()).unwrap();
    assert_eq!(store.version(), SnapshotId(2));
    assert_eq!(store.read().unwrap().len(), 51);
}

#[test]
fn test_corrupt_secondary_primary_still_works() {
    let dir = TestDir::new();
    let path = setup_two_commits(&dir);

    let (mut block, header) = read_header(&path);
    corrupt_slot_checksum(&mut block, header.secondary_slot_index());
    write_raw_header(&path, &block);

    let store = Store::open_with_config(&path, config()).unwrap();
    assert_eq!(store.version(), SnapshotId(2));
    assert_eq!(store.read().unwrap().len(), 100);
}

#[test]
fn test_both_slots_corrupt_returns_error() {
    let dir = TestDir::new();
    let path = setup_two_commits(&dir);

    let (mut block, _) = read_header(&path);
    corrupt_slot_checksum(&mut block, 0);
    corrupt_slot_checksum(&mut block, 1);
    write_raw_header(&path, &block);

    let result = Store::open_with_config(&path, config());
    assert!(matches!(result, Err(Error::Corrupted { .. })), "{:?}", result.err());
}

#[test]
fn test_invalid_magic_is_rejected() {
    let dir = TestDir::new();
    let path = setup_two_commits(&dir);

    let (mut block, _) = read_header(&path);
    block[0] ^= 0xFF;
    write_raw_header(&path, &block);

    assert!(matches!(Store::open_with_config(&path, config()), Err(Error::InvalidMagic)));
}

#[test]
fn test_corrupt_block_size_is_rejected() {
    let dir = TestDir::new();
    let path = setup_two_commits(&dir);

    let (mut block, _) = read_header(&path);
    block[10] = 200;
    write_raw_header(&path, &block);

    let result = Store::open_with_config(&path, config());
    assert!(matches!(result, Err(Error::Corrupted { .. })), "{:?}", result.err());

    // A supported but different size is a mismatch, not corruption.
    block[10] = 12;
    write_raw_header(&path, &block);
    let result = Store::open_with_config(&path, config());
    assert!(matches!(result, Err(Error::SizeMismatch { .. })), "{:?}", result.err());
}

#[test]
fn test_commits_alternate_primary_slot() {
    let dir = TestDir::new();
    let path = dir.store_file("alternate");
    let store = Store::create_with_config(&path, config()).unwrap();

    let mut previous = read_header(&path).1.primary_slot_index();
    for n in 0..4 {
        let mut txn = store.write().unwrap();
        txn.add(&quad(1, n)).unwrap();
        txn.commit().unwrap();

        let (_, header) = read_header(&path);
        assert_ne!(header.primary_slot_index(), previous);
        assert!(header.recovery_required());
        assert_eq!(header.primary_slot().version, n + 1);
        // The previous commit survives in the other slot.
        assert_eq!(header.slot(header.secondary_slot_index()).version, n);
        previous = header.primary_slot_index();
    }
}

// ============================================================================
// Clean Close and Free List Tests
// ============================================================================

#[test]
fn test_clean_close_persists_free_list() {
    let dir = TestDir::new();
    let path = dir.store_file("close");
    let free_before_close = {
        let store = Store::create_with_config(&path, config()).unwrap();
        let mut txn = store.write().unwrap();
        for n in 0..300 {
            txn.add(&quad(n % 3, n)).unwrap();
        }
        txn.commit().unwrap();
        let mut txn = store.write().unwrap();
        txn.delete_matching(&QuadPattern::any().with_graph(1u64)).unwrap();
        txn.commit().unwrap();

        let free = store.stats().free_blocks;
        assert!(free > 0);
        store.close().unwrap();
        free
    };

    let (_, header) = read_header(&path);
    assert!(!header.recovery_required());
    assert_ne!(header.primary_slot().free_list_head, 0);

    let store = Store::open_with_config(&path, config()).unwrap();
    assert_eq!(store.stats().free_blocks, free_before_close);
    assert_eq!(store.read().unwrap().len(), 200);
    assert!(store.check_integrity().unwrap().is_healthy());
}

#[test]
fn test_free_list_rebuild_allows_subsequent_writes() {
    let dir = TestDir::new();
    let path = dir.store_file("rebuild");
    {
        let store = Store::create_with_config(&path, config()).unwrap();
        let mut txn = store.write().unwrap();
        for n in 0..300 {
            txn.add(&quad(1, n)).unwrap();
        }
        txn.commit().unwrap();
        let mut txn = store.write().unwrap();
        txn.clear().unwrap();
        txn.commit().unwrap();
    }

    let store = Store::open_with_config(&path, config()).unwrap();
    let stats = store.stats();
    assert!(store.read().unwrap().is_empty());
    // Everything but the header is free after the rebuild.
    assert_eq!(stats.free_blocks as BlockId, stats.total_blocks - 1);

    let mut txn = store.write().unwrap();
    for n in 0..50 {
        txn.add(&quad(2, n)).unwrap();
    }
    txn.commit().unwrap();
    assert_eq!(store.stats().total_blocks, stats.total_blocks, "freed blocks are reused");
    assert!(store.check_integrity().unwrap().is_healthy());
}

#[test]
fn test_repeated_crash_recovery() {
    let dir = TestDir::new();
    let path = dir.store_file("repeated");
    Store::create_with_config(&path, config()).unwrap();

    for round in 0..5u64 {
        let store = Store::open_with_config(&path, config()).unwrap();
        assert_eq!(store.version(), SnapshotId(round));
        assert_eq!(store.read().unwrap().len(), round * 20);

        let mut txn = store.write().unwrap();
        for n in 0..20 {
            txn.add(&quad(round + 1, n)).unwrap();
        }
        txn.commit().unwrap();
        // Dropped without close.
    }
}

// ============================================================================
// Fault Injection Tests
// ============================================================================

/// File channel that dies at the injector's crash point.
///
/// The write or sync at the crash point is not performed, and every later
/// operation fails, as if the process had stopped there.
struct FaultyChannel {
    inner: FileChannel,
    injector: Arc<CrashInjector>,
    block_threshold: u32,
}

impl FaultyChannel {
    fn crashed() -> Error {
        Error::Io { source: io::Error::other("simulated crash") }
    }

    fn check(&self) -> Result<()> {
        if self.injector.has_crashed() {
            return Err(Self::crashed());
        }
        Ok(())
    }
}

impl BlockChannel for FaultyChannel {
    fn block_size(&self) -> usize {
        self.inner.block_size()
    }

    fn block_count(&self) -> Result<BlockId> {
        self.check()?;
        self.inner.block_count()
    }

    fn read_block(&self, block_id: BlockId) -> Result<Vec<u8>> {
        self.check()?;
        self.inner.read_block(block_id)
    }

    fn write_block(&self, block_id: BlockId, data: &[u8]) -> Result<()> {
        self.check()?;
        let crash = if block_id == 0 {
            self.injector.on_header_write()
        } else {
            self.injector.on_block_write(self.block_threshold)
        };
        if crash {
            return Err(Self::crashed());
        }
        self.inner.write_block(block_id, data)
    }

    fn extend(&self, new_count: BlockId) -> Result<()> {
        self.check()?;
        self.inner.extend(new_count)
    }

    fn sync(&self) -> Result<()> {
        self.check()?;
        if self.injector.on_sync() {
            return Err(Self::crashed());
        }
        self.inner.sync()
    }

    fn durable_blocks(&self) -> BlockId {
        self.inner.durable_blocks()
    }

    fn close(&self) -> Result<()> {
        self.check()?;
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Commits a baseline, crashes the second commit at `point`, reopens and
/// returns the recovered store with the two candidate states.
fn crash_second_commit(
    dir: &TestDir,
    point: CrashPoint,
) -> (Store<FileChannel>, BTreeSet<Quad>, BTreeSet<Quad>) {
    let path = dir.store_file(&format!("{point:?}"));
    let injector = CrashInjector::new(point);
    let channel = FaultyChannel {
        inner: FileChannel::create(&path, BLOCK_SIZE).unwrap(),
        injector: Arc::clone(&injector),
        block_threshold: 2,
    };
    let store = Store::from_channel(channel, config()).unwrap();

    let mut txn = store.write().unwrap();
    for n in 0..120 {
        txn.add(&quad(1 + n % 2, n)).unwrap();
    }
    txn.commit().unwrap();
    let before = contents(&store);

    let mut txn = store.write().unwrap();
    txn.delete_matching(&QuadPattern::any().with_graph(2u64)).unwrap();
    for n in 200..260 {
        txn.add(&quad(3, n)).unwrap();
    }
    let mut after = before.clone();
    after.retain(|q| q.graph.value() != 2);
    after.extend((200..260).map(|n| quad(3, n)));

    injector.arm();
    let result = txn.commit();
    assert!(injector.has_crashed(), "{point:?} never fired");
    assert!(result.is_err(), "{point:?}: commit should fail");
    let header_phase = !matches!(point, CrashPoint::DuringBlockWrite | CrashPoint::BeforeDataSync);
    assert_eq!(store.is_closed(), header_phase, "{point:?}");
    drop(store);

    let recovered = Store::open_with_config(&path, config()).unwrap();
    (recovered, before, after)
}

#[test]
fn test_crash_at_every_commit_point() {
    init_tracing();
    let dir = TestDir::new();
    for point in CrashPoint::ALL {
        let (store, before, after) = crash_second_commit(&dir, point);
        let recovered = contents(&store);

        if point.must_recover_previous() {
            assert_eq!(store.version(), SnapshotId(1), "{point:?}");
            assert_eq!(recovered, before, "{point:?}");
        } else {
            // Never a mix of the two.
            assert!(recovered == before || recovered == after, "{point:?}");
        }
        let report = store.check_integrity().unwrap();
        assert!(report.is_healthy(), "{point:?}: {:?}", report.errors);

        // The recovered store accepts new commits.
        let mut txn = store.write().unwrap();
        txn.add(&quad(9, 9)).unwrap();
        let version = txn.commit().unwrap();
        assert_eq!(version, store.version());
        assert!(store.check_integrity().unwrap().is_healthy(), "{point:?}");
    }
}

#[test]
fn test_failed_block_write_leaves_store_usable() {
    let dir = TestDir::new();
    let path = dir.store_file("usable");
    let injector = CrashInjector::new(CrashPoint::DuringBlockWrite);
    let channel = FaultyChannel {
        inner: FileChannel::create(&path, BLOCK_SIZE).unwrap(),
        injector: Arc::clone(&injector),
        block_threshold: 0,
    };
    let store = Store::from_channel(channel, config()).unwrap();

    let mut txn = store.write().unwrap();
    txn.add(&quad(1, 1)).unwrap();
    injector.arm();
    assert!(txn.commit().is_err());

    // Rolled back: the writer lock is free and nothing was published.
    assert_eq!(store.version(), SnapshotId(0));
    assert_eq!(store.stats().aborts, 1);
    assert!(!store.is_closed());
}
