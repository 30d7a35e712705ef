//! Iterators produced by [`QuadTable`](super::QuadTable) lookups.

use graphvault_types::{Quad, QuadPattern, TermId, Triple};

use super::index::{IndexKind, KEY_WIDTH};
use crate::{
    btree::{BTree, BlockProvider, cursor::KeyIter},
    error::{BlockId, Result},
};

/// Quads matching a pattern, in the chosen index's key order.
pub struct QuadIter<P: BlockProvider> {
    keys: KeyIter<P>,
    index: IndexKind,
    pattern: QuadPattern,
}

impl<P: BlockProvider> QuadIter<P> {
    pub(super) fn new(keys: KeyIter<P>, index: IndexKind, pattern: QuadPattern) -> Self {
        Self { keys, index, pattern }
    }

    /// The index this scan runs over.
    pub fn index(&self) -> IndexKind {
        self.index
    }
}

impl<P: BlockProvider> Iterator for QuadIter<P> {
    type Item = Result<Quad>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let key = match self.keys.next()? {
                Ok(key) => key,
                Err(e) => return Some(Err(e)),
            };
            let quad = self.index.decode(&key);
            if self.pattern.matches(&quad) {
                return Some(Ok(quad));
            }
        }
    }
}

/// Distinct triples across all named graphs.
///
/// Runs over a graph-last index, where every copy of a triple is adjacent,
/// so duplicates are dropped by comparing with the previous triple.
pub struct TripleIter<P: BlockProvider> {
    quads: QuadIter<P>,
    last: Option<Triple>,
}

impl<P: BlockProvider> TripleIter<P> {
    pub(super) fn new(quads: QuadIter<P>) -> Self {
        Self { quads, last: None }
    }
}

impl<P: BlockProvider> Iterator for TripleIter<P> {
    type Item = Result<Triple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let quad = match self.quads.next()? {
                Ok(quad) => quad,
                Err(e) => return Some(Err(e)),
            };
            let triple = quad.triple();
            if self.last != Some(triple) {
                self.last = Some(triple);
                return Some(Ok(triple));
            }
        }
    }
}

/// Named graphs that hold at least one quad, in ascending order.
///
/// Skips from graph to graph with one seek on the GSPO index each, so the
/// cost is proportional to the number of graphs, not quads.
pub struct GraphIter<P: BlockProvider> {
    provider: P,
    root: BlockId,
    next_graph: Option<u64>,
}

impl<P: BlockProvider> GraphIter<P> {
    pub(super) fn new(provider: P, gspo_root: BlockId) -> Self {
        // The default graph is not a named graph.
        let next_graph = (gspo_root != 0).then_some(TermId::DEFAULT_GRAPH.value() + 1);
        Self { provider, root: gspo_root, next_graph }
    }
}

impl<P: BlockProvider> Iterator for GraphIter<P> {
    type Item = Result<TermId>;

    fn next(&mut self) -> Option<Self::Item> {
        let graph = self.next_graph.take()?;
        let mut lower = [0u8; KEY_WIDTH];
        lower[..TermId::WIDTH].copy_from_slice(&graph.to_be_bytes());

        let tree = BTree::new(self.root, KEY_WIDTH, &self.provider);
        match tree.seek(&lower) {
            Ok(Some(key)) => {
                let found = IndexKind::Gspo.decode(&key).graph;
                self.next_graph = found.value().checked_add(1);
                Some(Ok(found))
            },
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
