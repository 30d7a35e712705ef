//! Uniform transaction contract.
//!
//! [`Transactional`] is what higher-level code programs against. Two
//! implementations exist:
//!
//! | Type | Isolation | Abort |
//! |------|-----------|-------|
//! | [`Dataset`] | snapshot reads, single writer | rolls back |
//! | [`NonTransactional`] (via [`PlainDataset`]) | none, changes apply at once | [`Error::UnsupportedOperation`] |
//!
//! Callers that rely on isolation or rollback check
//! [`supports_transactions`](Transactional::supports_transactions) and
//! [`supports_transaction_abort`](Transactional::supports_transaction_abort)
//! first. [`QuadAccess`] gives both implementations one quad API, and the
//! [`txn`] helpers wrap a closure in begin/commit/abort.

mod dataset;
mod non_transactional;
pub mod txn;

pub use dataset::Dataset;
use graphvault_types::{Quad, QuadPattern, TermId};
pub use non_transactional::{NonTransactional, PlainDataset};

use crate::error::{Error, Result};

/// How a transaction is begun.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnType {
    /// Read-only; writes fail.
    Read,
    /// Exclusive writer.
    Write,
    /// Read that may become the writer while its snapshot is still the latest.
    ReadPromote,
    /// Read that may become the writer on the latest snapshot, seeing
    /// whatever was committed meanwhile.
    ReadCommittedPromote,
}

impl TxnType {
    /// Mode a transaction of this type starts in.
    pub fn initial_mode(self) -> ReadWrite {
        match self {
            TxnType::Write => ReadWrite::Write,
            TxnType::Read | TxnType::ReadPromote | TxnType::ReadCommittedPromote => {
                ReadWrite::Read
            },
        }
    }
}

/// Current mode of an active transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadWrite {
    /// Reading a snapshot.
    Read,
    /// Holding the writer.
    Write,
}

/// Begin/commit/abort contract shared by transactional and plain datasets.
pub trait Transactional {
    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyInTransaction`] if one is active.
    fn begin(&mut self, txn_type: TxnType) -> Result<()>;

    /// Starts a read transaction.
    ///
    /// # Errors
    ///
    /// Same as [`begin`](Self::begin).
    fn begin_read(&mut self) -> Result<()> {
        self.begin(TxnType::Read)
    }

    /// Starts a write transaction.
    ///
    /// # Errors
    ///
    /// Same as [`begin`](Self::begin).
    fn begin_write(&mut self) -> Result<()> {
        self.begin(TxnType::Write)
    }

    /// Commits the active transaction. Committing a read ends it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInTransaction`] if none is active.
    fn commit(&mut self) -> Result<()>;

    /// Abandons the active transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInTransaction`] if none is active, or
    /// [`Error::UnsupportedOperation`] where rollback is impossible.
    fn abort(&mut self) -> Result<()>;

    /// Finishes the active transaction, aborting an uncommitted write.
    /// A no-op outside a transaction.
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn end(&mut self) -> Result<()>;

    /// True while a transaction is active.
    fn is_in_transaction(&self) -> bool {
        self.transaction_type().is_some()
    }

    /// Current mode, if a transaction is active.
    fn transaction_mode(&self) -> Option<ReadWrite>;

    /// Type the active transaction was begun with.
    fn transaction_type(&self) -> Option<TxnType>;

    /// Tries to turn the active read into the write transaction. Returns
    /// true if the transaction is now writing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInTransaction`] if none is active.
    fn promote(&mut self) -> Result<bool>;

    /// False for implementations without isolation.
    fn supports_transactions(&self) -> bool;

    /// False for implementations that cannot roll back.
    fn supports_transaction_abort(&self) -> bool;
}

/// Boxed lazy quad sequence.
pub type Quads<'a> = Box<dyn Iterator<Item = Result<Quad>> + 'a>;

/// Boxed lazy graph-name sequence.
pub type GraphNodes<'a> = Box<dyn Iterator<Item = Result<TermId>> + 'a>;

/// Quad operations shared by every dataset flavor.
pub trait QuadAccess {
    /// Adds a quad. Returns false if it was already present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidQuad`] for a union-graph quad.
    fn add(&mut self, quad: &Quad) -> Result<bool>;

    /// Deletes a quad. Returns false if it was absent.
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn delete(&mut self, quad: &Quad) -> Result<bool>;

    /// Deletes every quad matching `pattern`, returning how many went.
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn delete_matching(&mut self, pattern: &QuadPattern) -> Result<u64>;

    /// True if `quad` is present.
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn contains(&self, quad: &Quad) -> Result<bool>;

    /// Lazily finds quads matching `pattern`.
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn find(&self, pattern: &QuadPattern) -> Result<Quads<'_>>;

    /// Number of quads.
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn size(&self) -> Result<u64>;

    /// True if there are no quads.
    ///
    /// # Errors
    ///
    /// Same as [`size`](Self::size).
    fn is_empty(&self) -> Result<bool> {
        Ok(self.size()? == 0)
    }

    /// Lazily lists named graphs holding at least one quad, in ID order.
    ///
    /// # Errors
    ///
    /// Implementation specific.
    fn list_graph_nodes(&self) -> Result<GraphNodes<'_>>;
}

pub(crate) fn reject_union_graph(quad: &Quad) -> Result<()> {
    if quad.graph.is_union_graph() {
        return Err(Error::InvalidQuad {
            reason: "the union graph is a query-time view and cannot hold quads".to_string(),
        });
    }
    Ok(())
}
