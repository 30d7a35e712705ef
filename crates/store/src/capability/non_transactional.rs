use std::collections::BTreeSet;

use graphvault_types::{Quad, QuadPattern, TermId};

use super::{
    GraphNodes, QuadAccess, Quads, ReadWrite, Transactional, TxnType, reject_union_graph,
};
use crate::error::{Error, Result};

/// Fixed-answer [`Transactional`] for data that cannot transact.
///
/// Tracks a single implicit transaction so begin/commit/end bracketing works,
/// but gives no isolation: every change is visible at once, and
/// [`abort`](Transactional::abort) fails because there is nothing to undo.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NonTransactional {
    txn_type: Option<TxnType>,
    writing: bool,
}

impl NonTransactional {
    /// Creates the capability outside any transaction.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transactional for NonTransactional {
    fn begin(&mut self, txn_type: TxnType) -> Result<()> {
        if self.txn_type.is_some() {
            return Err(Error::AlreadyInTransaction);
        }
        self.txn_type = Some(txn_type);
        self.writing = txn_type == TxnType::Write;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.txn_type.take().is_none() {
            return Err(Error::NotInTransaction);
        }
        self.writing = false;
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        Err(Error::UnsupportedOperation { operation: "abort" })
    }

    fn end(&mut self) -> Result<()> {
        self.txn_type = None;
        self.writing = false;
        Ok(())
    }

    fn transaction_mode(&self) -> Option<ReadWrite> {
        self.txn_type?;
        Some(if self.writing { ReadWrite::Write } else { ReadWrite::Read })
    }

    fn transaction_type(&self) -> Option<TxnType> {
        self.txn_type
    }

    fn promote(&mut self) -> Result<bool> {
        if self.txn_type.is_none() {
            return Err(Error::NotInTransaction);
        }
        Ok(self.writing)
    }

    fn supports_transactions(&self) -> bool {
        false
    }

    fn supports_transaction_abort(&self) -> bool {
        false
    }
}

/// In-memory quad set without transactions.
///
/// Every operation applies immediately whether or not a transaction is
/// bracketed around it. Useful as a reference model and for callers that
/// only need the [`QuadAccess`] surface.
#[derive(Debug, Default, Clone)]
pub struct PlainDataset {
    quads: BTreeSet<Quad>,
    capability: NonTransactional,
}

impl PlainDataset {
    /// Creates an empty dataset.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transactional for PlainDataset {
    fn begin(&mut self, txn_type: TxnType) -> Result<()> {
        self.capability.begin(txn_type)
    }

    fn commit(&mut self) -> Result<()> {
        self.capability.commit()
    }

    fn abort(&mut self) -> Result<()> {
        self.capability.abort()
    }

    fn end(&mut self) -> Result<()> {
        self.capability.end()
    }

    fn transaction_mode(&self) -> Option<ReadWrite> {
        self.capability.transaction_mode()
    }

    fn transaction_type(&self) -> Option<TxnType> {
        self.capability.transaction_type()
    }

    fn promote(&mut self) -> Result<bool> {
        self.capability.promote()
    }

    fn supports_transactions(&self) -> bool {
        self.capability.supports_transactions()
    }

    fn supports_transaction_abort(&self) -> bool {
        self.capability.supports_transaction_abort()
    }
}

impl QuadAccess for PlainDataset {
    fn add(&mut self, quad: &Quad) -> Result<bool> {
        reject_union_graph(quad)?;
        Ok(self.quads.insert(*quad))
    }

    fn delete(&mut self, quad: &Quad) -> Result<bool> {
        Ok(self.quads.remove(quad))
    }

    fn delete_matching(&mut self, pattern: &QuadPattern) -> Result<u64> {
        let before = self.quads.len();
        self.quads.retain(|quad| !pattern.matches(quad));
        Ok((before - self.quads.len()) as u64)
    }

    fn contains(&self, quad: &Quad) -> Result<bool> {
        Ok(self.quads.contains(quad))
    }

    fn find(&self, pattern: &QuadPattern) -> Result<Quads<'_>> {
        let pattern = *pattern;
        Ok(Box::new(self.quads.iter().filter(move |quad| pattern.matches(quad)).map(|q| Ok(*q))))
    }

    fn size(&self) -> Result<u64> {
        Ok(self.quads.len() as u64)
    }

    fn list_graph_nodes(&self) -> Result<GraphNodes<'_>> {
        let graphs: BTreeSet<TermId> = self
            .quads
            .iter()
            .map(|quad| quad.graph)
            .filter(|graph| !graph.is_default_graph())
            .collect();
        Ok(Box::new(graphs.into_iter().map(Ok)))
    }
}
