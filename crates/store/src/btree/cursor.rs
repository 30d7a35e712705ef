//! Range scans over a B+ tree.
//!
//! Nodes carry no sibling links (copy-on-write would have to rewrite every
//! left neighbour), so iteration keeps the root-to-leaf path on a stack and
//! climbs back up when a leaf is exhausted. Blocks are read lazily: a scan
//! that stops early touches only the leaves it actually visited.

use std::ops::Bound;

use super::{
    BlockProvider,
    node::{BranchNode, LeafNode, Node},
};
use crate::error::{BlockId, Result};

/// A key range for scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    /// Lower bound.
    pub start: Bound<Vec<u8>>,
    /// Upper bound.
    pub end: Bound<Vec<u8>>,
}

impl KeyRange {
    /// Every key.
    pub fn all() -> Self {
        Self { start: Bound::Unbounded, end: Bound::Unbounded }
    }

    /// Keys `>= start`.
    pub fn from(start: Vec<u8>) -> Self {
        Self { start: Bound::Included(start), end: Bound::Unbounded }
    }

    /// Keys that begin with `prefix`.
    pub fn prefix(prefix: &[u8]) -> Self {
        if prefix.is_empty() {
            return Self::all();
        }
        let end = match prefix_successor(prefix) {
            Some(successor) => Bound::Excluded(successor),
            None => Bound::Unbounded,
        };
        Self { start: Bound::Included(prefix.to_vec()), end }
    }

    /// Keys that begin with `prefix` and are `>= start`.
    pub fn prefix_from(prefix: &[u8], start: Vec<u8>) -> Self {
        Self { start: Bound::Included(start), end: Self::prefix(prefix).end }
    }

    /// True if `key` is not below the lower bound.
    pub fn above_start(&self, key: &[u8]) -> bool {
        match &self.start {
            Bound::Unbounded => true,
            Bound::Included(start) => key >= start.as_slice(),
            Bound::Excluded(start) => key > start.as_slice(),
        }
    }

    /// True if `key` is not past the upper bound.
    pub fn below_end(&self, key: &[u8]) -> bool {
        match &self.end {
            Bound::Unbounded => true,
            Bound::Included(end) => key <= end.as_slice(),
            Bound::Excluded(end) => key < end.as_slice(),
        }
    }

    /// True if `key` lies inside the range.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.above_start(key) && self.below_end(key)
    }

    fn seek_key(&self) -> Option<&[u8]> {
        match &self.start {
            Bound::Unbounded => None,
            Bound::Included(start) | Bound::Excluded(start) => Some(start),
        }
    }
}

/// Smallest byte string greater than every string starting with `prefix`,
/// or `None` if `prefix` is all `0xFF`.
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut successor = prefix.to_vec();
    while let Some(last) = successor.pop() {
        if last < u8::MAX {
            successor.push(last + 1);
            return Some(successor);
        }
    }
    None
}

/// Forward iterator over the keys of one tree that fall inside a range.
///
/// Yields `Err` once and then stops if a block cannot be read or decoded.
pub struct KeyIter<P: BlockProvider> {
    provider: P,
    key_width: usize,
    range: KeyRange,
    /// Branches on the current path with the next child to visit.
    stack: Vec<(BranchNode, usize)>,
    /// Current leaf and position within it.
    leaf: Option<(LeafNode, usize)>,
    root: BlockId,
    started: bool,
    done: bool,
}

impl<P: BlockProvider> KeyIter<P> {
    /// Creates an iterator over `range` in the tree rooted at `root`.
    pub fn new(provider: P, root: BlockId, key_width: usize, range: KeyRange) -> Self {
        Self {
            provider,
            key_width,
            range,
            stack: Vec::new(),
            leaf: None,
            root,
            started: false,
            done: root == 0,
        }
    }

    fn descend(&mut self, mut block_id: BlockId, seek: Option<&[u8]>) -> Result<()> {
        loop {
            let block = self.provider.read_block(block_id)?;
            match Node::decode(block_id, &block.data, self.key_width)? {
                Node::Branch(branch) => {
                    let index = seek.map_or(0, |key| branch.child_index(key));
                    block_id = branch.children[index];
                    self.stack.push((branch, index + 1));
                },
                Node::Leaf(leaf) => {
                    let position = seek.map_or(0, |key| leaf.keys.lower_bound(key));
                    self.leaf = Some((leaf, position));
                    return Ok(());
                },
            }
        }
    }

    /// Moves to the leftmost leaf of the next unvisited subtree.
    /// Returns false when the tree is exhausted.
    fn advance_leaf(&mut self) -> Result<bool> {
        loop {
            let Some((branch, next)) = self.stack.last_mut() else {
                return Ok(false);
            };
            if *next < branch.children.len() {
                let child = branch.children[*next];
                *next += 1;
                self.descend(child, None)?;
                return Ok(true);
            }
            self.stack.pop();
        }
    }

    fn next_key(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.started {
            self.started = true;
            let seek = self.range.seek_key().map(<[u8]>::to_vec);
            self.descend(self.root, seek.as_deref())?;
        }
        loop {
            if let Some((leaf, position)) = &mut self.leaf {
                if *position < leaf.keys.len() {
                    let key = leaf.keys.get(*position).to_vec();
                    *position += 1;
                    if !self.range.above_start(&key) {
                        continue;
                    }
                    if !self.range.below_end(&key) {
                        return Ok(None);
                    }
                    return Ok(Some(key));
                }
            }
            self.leaf = None;
            if !self.advance_leaf()? {
                return Ok(None);
            }
        }
    }
}

impl<P: BlockProvider> Iterator for KeyIter<P> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_key() {
            Ok(Some(key)) => Some(Ok(key)),
            Ok(None) => {
                self.done = true;
                None
            },
            Err(e) => {
                self.done = true;
                Some(Err(e))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor(&[1, 2, 3]), Some(vec![1, 2, 4]));
        assert_eq!(prefix_successor(&[1, 0xFF]), Some(vec![2]));
        assert_eq!(prefix_successor(&[0xFF, 0xFF]), None);
    }

    #[test]
    fn test_prefix_range_contains() {
        let range = KeyRange::prefix(&[5]);
        assert!(range.contains(&[5, 0, 0]));
        assert!(range.contains(&[5, 0xFF, 0xFF]));
        assert!(!range.contains(&[4, 0xFF]));
        assert!(!range.contains(&[6, 0]));
    }

    #[test]
    fn test_all_ff_prefix_is_unbounded_above() {
        let range = KeyRange::prefix(&[0xFF]);
        assert_eq!(range.end, Bound::Unbounded);
        assert!(range.contains(&[0xFF, 0xFF]));
    }

    #[test]
    fn test_prefix_from() {
        let range = KeyRange::prefix_from(&[1], vec![1, 5]);
        assert!(!range.contains(&[1, 4]));
        assert!(range.contains(&[1, 5]));
        assert!(!range.contains(&[2, 0]));
    }
}
