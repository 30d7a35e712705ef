use std::collections::HashSet;

use graphvault_types::{Quad, QuadPattern, TermId};

use super::{
    index::{IndexKind, KEY_WIDTH},
    iter::{GraphIter, QuadIter, TripleIter},
};
use crate::{
    btree::{BTree, BlockProvider, BlockProviderMut, cursor::KeyRange},
    error::{BlockId, Error, Result},
};

/// Root blocks of the six indexes plus the quad count.
///
/// This is the whole logical state of a table; a snapshot is one of these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableRoots {
    /// Root block per index, by [`IndexKind::slot`]. 0 means empty.
    pub roots: [BlockId; 6],
    /// Number of distinct quads.
    pub quad_count: u64,
}

impl TableRoots {
    /// Root block of one index.
    pub fn root(&self, index: IndexKind) -> BlockId {
        self.roots[index.slot()]
    }
}

/// A quad table over some block provider.
///
/// With a read-only provider it answers lookups; with a
/// [`BlockProviderMut`] it also applies changes, keeping every index in
/// step with the others.
pub struct QuadTable<P> {
    provider: P,
    roots: TableRoots,
    split_count: u64,
}

impl<P> QuadTable<P> {
    /// Opens the table described by `roots`.
    pub fn new(provider: P, roots: TableRoots) -> Self {
        Self { provider, roots, split_count: 0 }
    }

    /// Current roots and count.
    pub fn roots(&self) -> TableRoots {
        self.roots
    }

    /// Number of quads. Constant time.
    pub fn len(&self) -> u64 {
        self.roots.quad_count
    }

    /// True if the table holds no quads.
    pub fn is_empty(&self) -> bool {
        self.roots.quad_count == 0
    }

    /// Node splits performed by changes made through this table.
    pub fn split_count(&self) -> u64 {
        self.split_count
    }

    /// Consumes the table, returning the provider and final roots.
    pub fn into_parts(self) -> (P, TableRoots) {
        (self.provider, self.roots)
    }
}

impl<P: BlockProvider> QuadTable<P> {
    /// Returns true if `quad` is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if a block read or decode fails.
    pub fn contains(&self, quad: &Quad) -> Result<bool> {
        if quad.graph.is_union_graph() {
            return Ok(false);
        }
        let tree = BTree::new(self.roots.root(IndexKind::Gspo), KEY_WIDTH, &self.provider);
        tree.contains(&IndexKind::Gspo.encode(quad))
    }

    /// Checks that every index agrees with the others and with the count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] on the first disagreement, or the error of
    /// a failed block read.
    pub fn verify(&self) -> Result<()> {
        let mut reference: Option<Vec<Quad>> = None;
        for index in IndexKind::ALL {
            let tree = BTree::new(self.roots.root(index), KEY_WIDTH, &self.provider);
            let mut quads = tree
                .range(KeyRange::all())
                .map(|key| key.map(|key| index.decode(&key)))
                .collect::<Result<Vec<_>>>()?;
            quads.sort_unstable();
            if quads.len() as u64 != self.roots.quad_count {
                return Err(Error::Corrupted {
                    reason: format!(
                        "{index} holds {} quads, count says {}",
                        quads.len(),
                        self.roots.quad_count
                    ),
                });
            }
            match &reference {
                None => reference = Some(quads),
                Some(expected) if *expected != quads => {
                    return Err(Error::Corrupted {
                        reason: format!("{index} disagrees with {}", IndexKind::Gspo),
                    });
                },
                Some(_) => {},
            }
        }
        Ok(())
    }

    /// Adds every block reachable from any index root to `blocks`.
    ///
    /// # Errors
    ///
    /// Returns an error if a block read or decode fails.
    pub fn collect_blocks(&self, blocks: &mut HashSet<BlockId>) -> Result<()> {
        for index in IndexKind::ALL {
            BTree::new(self.roots.root(index), KEY_WIDTH, &self.provider).collect_blocks(blocks)?;
        }
        Ok(())
    }
}

impl<P: BlockProvider + Clone> QuadTable<P> {
    /// Lazily finds quads matching `pattern`.
    ///
    /// The scan runs over the index with the longest bound prefix; positions
    /// outside the prefix are filtered. A union-graph pattern never yields
    /// default-graph quads.
    pub fn find(&self, pattern: &QuadPattern) -> QuadIter<P> {
        let bound = pattern.bound_terms();
        let (index, len) = IndexKind::select(pattern);
        let range = if len == 0 && pattern.is_union_graph() {
            // Nothing bound but "named graphs only": start past the default graph.
            let mut start = vec![0u8; KEY_WIDTH];
            start[..TermId::WIDTH]
                .copy_from_slice(&(TermId::DEFAULT_GRAPH.value() + 1).to_be_bytes());
            KeyRange::from(start)
        } else {
            KeyRange::prefix(&index.prefix(&bound, len))
        };
        self.scan(index, range, *pattern)
    }

    /// Lazily finds distinct triples matching the subject, predicate and
    /// object of `pattern` in any named graph. The graph position of
    /// `pattern` is ignored.
    pub fn find_union_triples(&self, pattern: &QuadPattern) -> TripleIter<P> {
        let union = QuadPattern { graph: Some(TermId::UNION_GRAPH), ..*pattern };
        let bound = union.bound_terms();
        let (index, len) = IndexKind::select_from(&IndexKind::GRAPH_LAST, &bound);
        let range = KeyRange::prefix(&index.prefix(&bound, len));
        TripleIter::new(self.scan(index, range, union))
    }

    /// Lazily lists the named graphs that hold at least one quad.
    pub fn list_graph_nodes(&self) -> GraphIter<P> {
        GraphIter::new(self.provider.clone(), self.roots.root(IndexKind::Gspo))
    }

    fn scan(&self, index: IndexKind, range: KeyRange, pattern: QuadPattern) -> QuadIter<P> {
        let keys =
            BTree::new(self.roots.root(index), KEY_WIDTH, self.provider.clone()).into_range(range);
        QuadIter::new(keys, index, pattern)
    }
}

impl<P: BlockProviderMut> QuadTable<P> {
    /// Adds a quad. Returns false if it was already present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidQuad`] if the quad names the union graph.
    /// Any other error leaves the table in an unspecified state and the
    /// enclosing transaction must be abandoned.
    pub fn add(&mut self, quad: &Quad) -> Result<bool> {
        if quad.graph.is_union_graph() {
            return Err(Error::InvalidQuad {
                reason: "the union graph is a query-time view and cannot hold quads".to_string(),
            });
        }
        if self.contains(quad)? {
            return Ok(false);
        }
        for index in IndexKind::ALL {
            self.update_index(index, quad, true)?;
        }
        self.roots.quad_count += 1;
        Ok(true)
    }

    /// Deletes a quad. Returns false if it was absent.
    ///
    /// # Errors
    ///
    /// Same as [`add`](Self::add), minus the union-graph check: deleting a
    /// union-graph quad is a no-op.
    pub fn delete(&mut self, quad: &Quad) -> Result<bool> {
        if !self.contains(quad)? {
            return Ok(false);
        }
        for index in IndexKind::ALL {
            self.update_index(index, quad, false)?;
        }
        self.roots.quad_count -= 1;
        Ok(true)
    }

    /// Deletes every quad matching `pattern`. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Same as [`delete`](Self::delete).
    pub fn delete_matching(&mut self, pattern: &QuadPattern) -> Result<u64> {
        let quads = QuadTable::new(&self.provider, self.roots)
            .find(pattern)
            .collect::<Result<Vec<_>>>()?;
        let mut removed = 0;
        for quad in &quads {
            if self.delete(quad)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Removes every quad by retiring every index block.
    ///
    /// # Errors
    ///
    /// Returns an error if a block read or retire fails.
    pub fn clear(&mut self) -> Result<()> {
        let mut blocks = HashSet::new();
        self.collect_blocks(&mut blocks)?;
        for block_id in blocks {
            self.provider.retire_block(block_id)?;
        }
        self.roots = TableRoots::default();
        Ok(())
    }

    fn update_index(&mut self, index: IndexKind, quad: &Quad, insert: bool) -> Result<()> {
        let key = index.encode(quad);
        let mut tree = BTree::new(self.roots.root(index), KEY_WIDTH, &mut self.provider);
        let changed = if insert { tree.insert(&key)? } else { tree.delete(&key)? };
        let (root, splits) = (tree.root(), tree.split_count());
        self.roots.roots[index.slot()] = root;
        self.split_count += splits;
        if !changed {
            return Err(Error::Corrupted {
                reason: format!("{index} is out of step with {} for {quad}", IndexKind::Gspo),
            });
        }
        Ok(())
    }
}
