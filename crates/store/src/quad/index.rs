//! The six permutation indexes and their key encoding.
//!
//! Every quad is stored once per index, as four 8-byte big-endian terms in
//! that index's position order. Big-endian keeps byte order equal to numeric
//! order, so a bound prefix of terms is a byte prefix of the key.

use std::fmt;

use graphvault_types::{Quad, QuadPattern, TermId};

/// Width of an index key in bytes.
pub const KEY_WIDTH: usize = 4 * TermId::WIDTH;

/// Positions within a quad in G, S, P, O order.
const G: usize = 0;
const S: usize = 1;
const P: usize = 2;
const O: usize = 3;

/// A permutation index over quads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexKind {
    /// Graph, subject, predicate, object.
    Gspo,
    /// Graph, predicate, object, subject.
    Gpos,
    /// Graph, object, subject, predicate.
    Gosp,
    /// Subject, predicate, object, graph.
    Spog,
    /// Predicate, object, subject, graph.
    Posg,
    /// Object, subject, predicate, graph.
    Ospg,
}

impl IndexKind {
    /// Every index, in selection tie-break order.
    pub const ALL: [IndexKind; 6] = [
        IndexKind::Gspo,
        IndexKind::Gpos,
        IndexKind::Gosp,
        IndexKind::Spog,
        IndexKind::Posg,
        IndexKind::Ospg,
    ];

    /// Indexes that keep the graph last; triples group together across graphs.
    pub const GRAPH_LAST: [IndexKind; 3] = [IndexKind::Spog, IndexKind::Posg, IndexKind::Ospg];

    /// Slot of this index in a root array.
    pub const fn slot(self) -> usize {
        self as usize
    }

    /// Quad positions (G=0, S=1, P=2, O=3) in key order.
    pub const fn order(self) -> [usize; 4] {
        match self {
            IndexKind::Gspo => [G, S, P, O],
            IndexKind::Gpos => [G, P, O, S],
            IndexKind::Gosp => [G, O, S, P],
            IndexKind::Spog => [S, P, O, G],
            IndexKind::Posg => [P, O, S, G],
            IndexKind::Ospg => [O, S, P, G],
        }
    }

    /// Short uppercase name, e.g. `GSPO`.
    pub const fn name(self) -> &'static str {
        match self {
            IndexKind::Gspo => "GSPO",
            IndexKind::Gpos => "GPOS",
            IndexKind::Gosp => "GOSP",
            IndexKind::Spog => "SPOG",
            IndexKind::Posg => "POSG",
            IndexKind::Ospg => "OSPG",
        }
    }

    /// Encodes a quad as this index's key.
    pub fn encode(self, quad: &Quad) -> [u8; KEY_WIDTH] {
        let terms = quad.terms();
        let mut key = [0u8; KEY_WIDTH];
        for (slot, &position) in self.order().iter().enumerate() {
            key[slot * TermId::WIDTH..(slot + 1) * TermId::WIDTH]
                .copy_from_slice(&terms[position].to_be_bytes());
        }
        key
    }

    /// Decodes a key of this index back into a quad.
    ///
    /// `key` must be [`KEY_WIDTH`] bytes; index trees enforce this.
    pub fn decode(self, key: &[u8]) -> Quad {
        let mut terms = [TermId::DEFAULT_GRAPH; 4];
        for (slot, &position) in self.order().iter().enumerate() {
            let mut bytes = [0u8; TermId::WIDTH];
            bytes.copy_from_slice(&key[slot * TermId::WIDTH..(slot + 1) * TermId::WIDTH]);
            terms[position] = TermId::from_be_bytes(bytes);
        }
        Quad::from_terms(terms)
    }

    /// Number of leading key positions bound in `bound` (G, S, P, O order).
    pub fn leading_bound(self, bound: &[Option<TermId>; 4]) -> usize {
        self.order().iter().take_while(|&&position| bound[position].is_some()).count()
    }

    /// Key prefix covering the first `len` positions of `bound`.
    ///
    /// Only meaningful when `len <= leading_bound(bound)`.
    pub fn prefix(self, bound: &[Option<TermId>; 4], len: usize) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(len * TermId::WIDTH);
        for &position in self.order().iter().take(len) {
            if let Some(term) = bound[position] {
                prefix.extend_from_slice(&term.to_be_bytes());
            }
        }
        prefix
    }

    /// Picks the index with the longest bound prefix for `pattern`.
    ///
    /// Ties go to the earliest index in [`ALL`](Self::ALL). A union-graph
    /// pattern is planned with the graph position unbound.
    pub fn select(pattern: &QuadPattern) -> (IndexKind, usize) {
        Self::select_from(&Self::ALL, &pattern.bound_terms())
    }

    /// Like [`select`](Self::select) over a restricted set of indexes.
    pub fn select_from(candidates: &[IndexKind], bound: &[Option<TermId>; 4]) -> (IndexKind, usize) {
        let mut best = (candidates[0], candidates[0].leading_bound(bound));
        for &kind in &candidates[1..] {
            let len = kind.leading_bound(bound);
            if len > best.1 {
                best = (kind, len);
            }
        }
        best
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
