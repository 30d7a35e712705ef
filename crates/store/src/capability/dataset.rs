use graphvault_types::{Quad, QuadPattern};
use tracing::debug;

use super::{GraphNodes, QuadAccess, Quads, ReadWrite, Transactional, TxnType};
use crate::{
    backend::BlockChannel,
    db::{ReadTransaction, Store, WriteTransaction},
    error::{Error, Result},
};

enum Active<'s, C: BlockChannel> {
    Read(ReadTransaction<'s, C>),
    Write(WriteTransaction<'s, C>),
}

/// A [`Store`] seen through the [`Transactional`] contract.
///
/// Holds at most one transaction at a time. Quad operations run inside it
/// and fail with [`Error::NotInTransaction`] outside one.
///
/// ```no_run
/// use graphvault_store::{Quad, Store};
/// use graphvault_store::capability::{Dataset, QuadAccess, Transactional};
///
/// let store = Store::open_in_memory()?;
/// let mut dataset = Dataset::new(&store);
/// dataset.begin_write()?;
/// dataset.add(&Quad::new(1u64, 2u64, 3u64, 4u64))?;
/// dataset.commit()?;
/// # Ok::<(), graphvault_store::Error>(())
/// ```
pub struct Dataset<'s, C: BlockChannel> {
    store: &'s Store<C>,
    active: Option<Active<'s, C>>,
    txn_type: Option<TxnType>,
}

impl<'s, C: BlockChannel> Dataset<'s, C> {
    /// Wraps a store.
    pub fn new(store: &'s Store<C>) -> Self {
        Self { store, active: None, txn_type: None }
    }

    /// The underlying store.
    pub fn store(&self) -> &'s Store<C> {
        self.store
    }

    fn finish(&mut self) -> Option<Active<'s, C>> {
        self.txn_type = None;
        self.active.take()
    }

    /// The write transaction, promoting a promotable read first.
    fn writer(&mut self) -> Result<&mut WriteTransaction<'s, C>> {
        let reading = matches!(self.active, Some(Active::Read(_)));
        match self.txn_type {
            None => return Err(Error::NotInTransaction),
            Some(TxnType::Read) if reading => return Err(Error::ReadOnlyTransaction),
            Some(_) if reading => {
                if !self.promote()? {
                    return Err(Error::PromotionConflict);
                }
            },
            Some(_) => {},
        }
        match &mut self.active {
            Some(Active::Write(txn)) => Ok(txn),
            Some(Active::Read(_)) => Err(Error::ReadOnlyTransaction),
            None => Err(Error::NotInTransaction),
        }
    }

    fn active(&self) -> Result<&Active<'s, C>> {
        self.active.as_ref().ok_or(Error::NotInTransaction)
    }
}

impl<C: BlockChannel> Transactional for Dataset<'_, C> {
    fn begin(&mut self, txn_type: TxnType) -> Result<()> {
        if self.active.is_some() {
            return Err(Error::AlreadyInTransaction);
        }
        let active = match txn_type {
            TxnType::Write => Active::Write(self.store.write()?),
            TxnType::Read | TxnType::ReadPromote | TxnType::ReadCommittedPromote => {
                Active::Read(self.store.read()?)
            },
        };
        self.active = Some(active);
        self.txn_type = Some(txn_type);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        match self.finish() {
            Some(Active::Write(txn)) => txn.commit().map(|_| ()),
            Some(Active::Read(txn)) => {
                txn.end();
                Ok(())
            },
            None => Err(Error::NotInTransaction),
        }
    }

    fn abort(&mut self) -> Result<()> {
        match self.finish() {
            Some(Active::Write(txn)) => {
                txn.abort();
                Ok(())
            },
            Some(Active::Read(txn)) => {
                txn.end();
                Ok(())
            },
            None => Err(Error::NotInTransaction),
        }
    }

    fn end(&mut self) -> Result<()> {
        match self.finish() {
            Some(Active::Write(txn)) => {
                debug!("Ending uncommitted write transaction");
                txn.abort();
            },
            Some(Active::Read(txn)) => txn.end(),
            None => {},
        }
        Ok(())
    }

    fn transaction_mode(&self) -> Option<ReadWrite> {
        match self.active.as_ref()? {
            Active::Read(_) => Some(ReadWrite::Read),
            Active::Write(_) => Some(ReadWrite::Write),
        }
    }

    fn transaction_type(&self) -> Option<TxnType> {
        self.txn_type
    }

    fn promote(&mut self) -> Result<bool> {
        let (txn_type, reader) = match (self.txn_type, &self.active) {
            (Some(_), Some(Active::Write(_))) => return Ok(true),
            (Some(txn_type), Some(Active::Read(reader))) => (txn_type, reader),
            _ => return Err(Error::NotInTransaction),
        };
        let promoted = match txn_type {
            TxnType::ReadCommittedPromote => reader.promote_read_committed(),
            _ => reader.promote(),
        };
        match promoted {
            Ok(writer) => {
                // Replacing the reader drops it, releasing its snapshot.
                self.active = Some(Active::Write(writer));
                Ok(true)
            },
            Err(Error::PromotionConflict) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    fn supports_transaction_abort(&self) -> bool {
        true
    }
}

impl<C: BlockChannel> QuadAccess for Dataset<'_, C> {
    fn add(&mut self, quad: &Quad) -> Result<bool> {
        self.writer()?.add(quad)
    }

    fn delete(&mut self, quad: &Quad) -> Result<bool> {
        self.writer()?.delete(quad)
    }

    fn delete_matching(&mut self, pattern: &QuadPattern) -> Result<u64> {
        self.writer()?.delete_matching(pattern)
    }

    fn contains(&self, quad: &Quad) -> Result<bool> {
        match self.active()? {
            Active::Read(txn) => txn.contains(quad),
            Active::Write(txn) => txn.contains(quad),
        }
    }

    fn find(&self, pattern: &QuadPattern) -> Result<Quads<'_>> {
        Ok(match self.active()? {
            Active::Read(txn) => Box::new(txn.find(pattern)),
            Active::Write(txn) => Box::new(txn.find(pattern)?),
        })
    }

    fn size(&self) -> Result<u64> {
        Ok(match self.active()? {
            Active::Read(txn) => txn.len(),
            Active::Write(txn) => txn.len(),
        })
    }

    fn list_graph_nodes(&self) -> Result<GraphNodes<'_>> {
        Ok(match self.active()? {
            Active::Read(txn) => Box::new(txn.list_graph_nodes()),
            Active::Write(txn) => Box::new(txn.list_graph_nodes()?),
        })
    }
}
