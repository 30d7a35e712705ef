//! graphvault-store: a transactional copy-on-write quad store.
//!
//! Stores RDF-style quads (graph, subject, predicate, object) of fixed-width
//! term IDs in six permutation indexes over a copy-on-write B+ tree, with:
//!
//! - **Snapshot reads**: readers see one consistent version for their whole
//!   lifetime and never block
//! - **Single writer**: at most one write transaction, with blocking,
//!   fail-fast or timed acquisition
//! - **Checksummed blocks**: every tree node carries an XXH3 checksum
//! - **Dual-slot commit**: atomic commits via shadow paging (no WAL)
//! - **Deferred reclamation**: replaced blocks are reused only once no reader
//!   can reach them
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        Capability (Transactional)            │
//! │   (Dataset, PlainDataset, txn helpers)      │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │             Store / Transactions             │
//! │  (ReadTransaction: snapshot, Write: COW)    │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │               Quad Table                     │
//! │  (six indexes, union graph, graph listing)  │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │              B+ Tree Layer                   │
//! │     (seek, range, COW insert/delete)        │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │              Block Layer                     │
//! │      (allocator, cache, lifecycle)          │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │             Block Channel                    │
//! │      (FileChannel / MemoryChannel)          │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use graphvault_store::{Quad, QuadPattern, Store, TermId};
//!
//! let store = Store::open_in_memory()?;
//!
//! let mut txn = store.write()?;
//! txn.add(&Quad::new(7u64, 1u64, 2u64, 3u64))?;
//! txn.commit()?;
//!
//! let txn = store.read()?;
//! let in_named_graphs = txn.find(&QuadPattern::union_graph()).count();
//! assert_eq!(in_named_graphs, 1);
//! let graphs: Vec<TermId> = txn.list_graph_nodes().collect::<Result<_, _>>()?;
//! assert_eq!(graphs, vec![TermId::new(7)]);
//! # Ok::<(), graphvault_store::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
// Test code style - allow field reassignment after default
#![cfg_attr(test, allow(clippy::field_reassign_with_default))]

pub mod backend;
pub mod block;
pub mod btree;
pub mod capability;
pub mod db;
pub mod error;
pub mod header;
pub mod integrity;
pub mod quad;
pub mod transaction;

// Re-export commonly used types
pub use backend::{BlockChannel, DEFAULT_BLOCK_SIZE, FileChannel, MemoryChannel};
pub use block::{Block, BlockAllocator, BlockCache, BlockStore, CacheStats};
pub use btree::{BTree, BlockProvider, BlockProviderMut};
pub use capability::{
    Dataset, NonTransactional, PlainDataset, QuadAccess, ReadWrite, Transactional, TxnType,
};
pub use db::{ReadTransaction, Store, StoreStats, WriteTransaction};
pub use error::{BlockId, BlockKind, Error, Result};
pub use graphvault_types::{
    Quad, QuadPattern, TermId, Triple,
    config::{LockWait, StoreConfig},
};
pub use header::{FORMAT_VERSION, MAGIC, StoreHeader};
pub use integrity::{IntegrityError, IntegrityReport, IntegrityScrubber};
pub use quad::{IndexKind, QuadTable, TableRoots};
pub use transaction::{CoordinatorState, SnapshotId};
