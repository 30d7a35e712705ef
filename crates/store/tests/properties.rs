//! Behavioural tests for the quad store against an in-memory model.
//!
//! Random transaction sequences are applied to a [`Store`] and to a
//! `BTreeSet<Quad>`; every query shape must agree after each step. The
//! remaining tests pin down snapshot isolation, the single-writer lock,
//! promotion and block reclamation.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::BTreeSet,
    sync::{
        Barrier,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use graphvault_store::{
    BlockChannel, Error, LockWait, MemoryChannel, PlainDataset, Quad, QuadAccess, QuadPattern,
    SnapshotId, Store, StoreConfig, TermId, Triple, WriteTransaction,
};
use graphvault_test_utils::{
    TestDir,
    strategies::{QuadOp, arb_quad_ops, arb_quad_pattern, arb_transactions},
};
use proptest::prelude::*;

fn small_blocks() -> StoreConfig {
    StoreConfig::builder().block_size(512).cache_blocks(16).build().unwrap()
}

fn memory_store() -> Store<MemoryChannel> {
    Store::open_in_memory_with_config(small_blocks()).unwrap()
}

fn apply_to_txn<C: BlockChannel>(txn: &mut WriteTransaction<'_, C>, op: &QuadOp) -> u64 {
    match op {
        QuadOp::Add(quad) => u64::from(txn.add(quad).unwrap()),
        QuadOp::Delete(quad) => u64::from(txn.delete(quad).unwrap()),
        QuadOp::DeleteMatching(pattern) => txn.delete_matching(pattern).unwrap(),
    }
}

fn apply_to_model(model: &mut BTreeSet<Quad>, op: &QuadOp) -> u64 {
    match op {
        QuadOp::Add(quad) => u64::from(model.insert(*quad)),
        QuadOp::Delete(quad) => u64::from(model.remove(quad)),
        QuadOp::DeleteMatching(pattern) => {
            let before = model.len();
            model.retain(|quad| !pattern.matches(quad));
            (before - model.len()) as u64
        },
    }
}

fn model_graphs(model: &BTreeSet<Quad>) -> Vec<TermId> {
    let graphs: BTreeSet<TermId> =
        model.iter().map(|q| q.graph).filter(|g| !g.is_default_graph()).collect();
    graphs.into_iter().collect()
}

fn model_union_triples(model: &BTreeSet<Quad>, pattern: &QuadPattern) -> BTreeSet<Triple> {
    let union = QuadPattern { graph: Some(TermId::UNION_GRAPH), ..*pattern };
    model.iter().filter(|q| union.matches(q)).map(Quad::triple).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Committed transactions show up, aborted ones leave no trace.
    #[test]
    fn prop_store_matches_model(txns in arb_transactions(40), probes in proptest::collection::vec(arb_quad_pattern(), 8)) {
        let store = memory_store();
        let mut model = BTreeSet::new();

        for (ops, commit) in &txns {
            let mut txn = store.write().unwrap();
            let mut staged = model.clone();
            for op in ops {
                prop_assert_eq!(apply_to_txn(&mut txn, op), apply_to_model(&mut staged, op), "{:?}", op);
            }
            prop_assert_eq!(txn.len(), staged.len() as u64);
            if *commit {
                txn.commit().unwrap();
                model = staged;
            } else {
                txn.abort();
            }
        }

        let read = store.read().unwrap();
        prop_assert_eq!(read.len(), model.len() as u64);
        for pattern in &probes {
            let found: Vec<Quad> = read.find(pattern).map(|q| q.unwrap()).collect();
            let distinct: BTreeSet<Quad> = found.iter().copied().collect();
            prop_assert_eq!(found.len(), distinct.len(), "duplicates for {:?}", pattern);
            let expected: BTreeSet<Quad> = model.iter().filter(|q| pattern.matches(q)).copied().collect();
            prop_assert_eq!(distinct, expected, "pattern {:?}", pattern);

            let triples: Vec<Triple> = read.find_union_triples(pattern).map(|t| t.unwrap()).collect();
            let distinct: BTreeSet<Triple> = triples.iter().copied().collect();
            prop_assert_eq!(triples.len(), distinct.len());
            prop_assert_eq!(distinct, model_union_triples(&model, pattern));
        }
        for quad in model.iter().take(10) {
            prop_assert!(read.contains(quad).unwrap());
        }

        let graphs: Vec<TermId> = read.list_graph_nodes().map(|g| g.unwrap()).collect();
        prop_assert_eq!(graphs, model_graphs(&model));
        drop(read);

        prop_assert!(store.check_integrity().unwrap().is_healthy());
        let stats = store.stats();
        prop_assert_eq!(stats.pending_reclaim, 0, "no readers left, nothing pending");
    }

    /// The store and the non-transactional dataset agree on the same changes.
    #[test]
    fn prop_store_matches_plain_dataset(ops in arb_quad_ops(60), pattern in arb_quad_pattern()) {
        let store = memory_store();
        let mut plain = PlainDataset::new();

        let mut txn = store.write().unwrap();
        for op in &ops {
            let expected = match op {
                QuadOp::Add(quad) => u64::from(plain.add(quad).unwrap()),
                QuadOp::Delete(quad) => u64::from(plain.delete(quad).unwrap()),
                QuadOp::DeleteMatching(pattern) => plain.delete_matching(pattern).unwrap(),
            };
            prop_assert_eq!(apply_to_txn(&mut txn, op), expected);
        }

        // Read-your-writes before commit.
        let from_writer: BTreeSet<Quad> = txn.find(&pattern).unwrap().map(|q| q.unwrap()).collect();
        let from_plain: BTreeSet<Quad> = plain.find(&pattern).unwrap().map(|q| q.unwrap()).collect();
        prop_assert_eq!(&from_writer, &from_plain);
        let writer_graphs: Vec<TermId> = txn.list_graph_nodes().unwrap().map(|g| g.unwrap()).collect();
        let plain_graphs: Vec<TermId> = plain.list_graph_nodes().unwrap().map(|g| g.unwrap()).collect();
        prop_assert_eq!(writer_graphs, plain_graphs);
        txn.commit().unwrap();

        prop_assert_eq!(store.read().unwrap().len(), plain.size().unwrap());
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_add_find_list_delete() {
    let store = memory_store();
    let (g, s, p, o) = (10u64, 11u64, 12u64, 13u64);
    let quad = Quad::new(g, s, p, o);

    let mut txn = store.write().unwrap();
    assert!(txn.add(&quad).unwrap());
    txn.commit().unwrap();

    let read = store.read().unwrap();
    let found: Vec<Quad> =
        read.find(&QuadPattern::any().with_predicate(p)).map(|q| q.unwrap()).collect();
    assert_eq!(found, vec![quad]);
    let graphs: Vec<TermId> = read.list_graph_nodes().map(|g| g.unwrap()).collect();
    assert_eq!(graphs, vec![TermId::new(g)]);
    read.end();

    let mut txn = store.write().unwrap();
    assert!(txn.delete(&quad).unwrap());
    txn.commit().unwrap();

    let read = store.read().unwrap();
    assert_eq!(read.len(), 0);
    assert_eq!(read.list_graph_nodes().count(), 0);
}

#[test]
fn test_reader_keeps_snapshot_across_commit() {
    let store = memory_store();
    let quad = Quad::new(1u64, 2u64, 3u64, 4u64);

    let t1 = store.read().unwrap();
    assert_eq!(t1.version(), SnapshotId(0));

    let mut w = store.write().unwrap();
    w.add(&quad).unwrap();
    assert_eq!(w.commit().unwrap(), SnapshotId(1));

    assert_eq!(t1.find(&QuadPattern::any()).count(), 0);
    let fresh = store.read().unwrap();
    let found: Vec<Quad> = fresh.find(&QuadPattern::any()).map(|q| q.unwrap()).collect();
    assert_eq!(found, vec![quad]);
}

#[test]
fn test_default_graph_is_not_listed_or_in_union() {
    let store = memory_store();
    let mut txn = store.write().unwrap();
    txn.add(&Quad::new(TermId::DEFAULT_GRAPH, 1u64, 2u64, 3u64)).unwrap();
    txn.add(&Quad::new(5u64, 1u64, 2u64, 3u64)).unwrap();
    txn.add(&Quad::new(6u64, 1u64, 2u64, 3u64)).unwrap();
    txn.commit().unwrap();

    let read = store.read().unwrap();
    assert_eq!(read.find(&QuadPattern::union_graph()).count(), 2);
    assert_eq!(read.find(&QuadPattern::any()).count(), 3);
    // Same triple in two named graphs appears once.
    assert_eq!(read.find_union_triples(&QuadPattern::any()).count(), 1);
    let graphs: Vec<TermId> = read.list_graph_nodes().map(|g| g.unwrap()).collect();
    assert_eq!(graphs, vec![TermId::new(5), TermId::new(6)]);
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_readers_see_stable_snapshots_while_writer_commits() {
    let store = memory_store();
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    let read = store.read().unwrap();
                    let version = read.version().raw();
                    // Every commit adds exactly ten quads.
                    let expected = version * 10;
                    assert_eq!(read.len(), expected);
                    assert_eq!(read.find(&QuadPattern::any()).count() as u64, expected);
                    thread::yield_now();
                    assert_eq!(read.find(&QuadPattern::any()).count() as u64, expected);
                }
            });
        }

        for round in 0..25u64 {
            let mut txn = store.write().unwrap();
            for n in 0..10 {
                txn.add(&Quad::new(round % 4 + 1, round * 10 + n, 1u64, 2u64)).unwrap();
            }
            txn.commit().unwrap();
        }
        done.store(true, Ordering::Release);
    });

    assert_eq!(store.read().unwrap().len(), 250);
    assert!(store.check_integrity().unwrap().is_healthy());
}

#[test]
fn test_single_writer_blocks_second_writer() {
    let store = memory_store();
    let barrier = Barrier::new(2);

    thread::scope(|scope| {
        let first = store.write().unwrap();
        scope.spawn(|| {
            assert!(matches!(store.try_write(), Err(Error::LockTimeout { .. })));
            barrier.wait();
            // Blocks until the first writer commits.
            let mut second = store.write().unwrap();
            assert_eq!(second.base_version(), SnapshotId(1));
            second.add(&Quad::new(2u64, 1u64, 1u64, 1u64)).unwrap();
            second.commit().unwrap();
        });

        barrier.wait();
        thread::sleep(Duration::from_millis(20));
        let mut first = first;
        first.add(&Quad::new(1u64, 1u64, 1u64, 1u64)).unwrap();
        first.commit().unwrap();
    });

    assert_eq!(store.version(), SnapshotId(2));
    assert_eq!(store.read().unwrap().len(), 2);
}

#[test]
fn test_write_lock_timeout() {
    let store = memory_store();
    let _held = store.write().unwrap();
    let result = store.write_with(LockWait::Timeout { after: Duration::from_millis(10) });
    assert!(matches!(result, Err(Error::LockTimeout { .. })));
    assert!(result.err().is_some_and(|e| e.is_retryable()));
}

// ============================================================================
// Promotion and reclamation
// ============================================================================

#[test]
fn test_promotion_conflict_after_foreign_commit() {
    let store = memory_store();
    let read = store.read().unwrap();

    let mut other = store.write().unwrap();
    other.add(&Quad::new(1u64, 1u64, 1u64, 1u64)).unwrap();
    other.commit().unwrap();

    assert!(matches!(read.promote(), Err(Error::PromotionConflict)));
    // Read-committed promotion moves to the latest version instead.
    let mut write = read.promote_read_committed().unwrap();
    assert_eq!(write.base_version(), SnapshotId(1));
    write.add(&Quad::new(1u64, 2u64, 2u64, 2u64)).unwrap();
    write.commit().unwrap();
}

#[test]
fn test_blocks_reclaimed_after_last_reader() {
    let store = memory_store();
    let mut txn = store.write().unwrap();
    for n in 0..200u64 {
        txn.add(&Quad::new(n % 3 + 1, n, 1u64, 1u64)).unwrap();
    }
    txn.commit().unwrap();

    let reader = store.read().unwrap();
    let mut txn = store.write().unwrap();
    txn.delete_matching(&QuadPattern::any().with_graph(1u64)).unwrap();
    txn.commit().unwrap();

    let pending = store.stats().pending_reclaim;
    assert!(pending > 0);
    // The reader still walks the replaced blocks.
    assert_eq!(reader.find(&QuadPattern::any()).count(), 200);

    let free_before = store.stats().free_blocks;
    drop(reader);
    let stats = store.stats();
    assert_eq!(stats.pending_reclaim, 0);
    assert_eq!(stats.free_blocks, free_before + pending);
}

#[test]
fn test_reopen_after_close_preserves_contents() {
    let dir = TestDir::new();
    let path = dir.store_file("reopen");
    let mut model = BTreeSet::new();
    {
        let store = Store::create_with_config(&path, small_blocks()).unwrap();
        for round in 0..4u64 {
            let mut txn = store.write().unwrap();
            for n in 0..40 {
                let quad = Quad::new(round % 2, n, round, n * round);
                txn.add(&quad).unwrap();
                model.insert(quad);
            }
            txn.commit().unwrap();
        }
        store.close().unwrap();
    }

    let store = Store::open_with_config(&path, small_blocks()).unwrap();
    assert_eq!(store.version(), SnapshotId(4));
    let found: BTreeSet<Quad> =
        store.read().unwrap().find(&QuadPattern::any()).map(|q| q.unwrap()).collect();
    assert_eq!(found, model);
    assert!(store.check_integrity().unwrap().is_healthy());
}
