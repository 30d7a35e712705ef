//! Integrity scrubber for detecting silent data corruption.
//!
//! Walks every index of one snapshot reading raw blocks from the channel
//! (bypassing the cache, so what is checked is what is stored) and verifies:
//!
//! - block checksums
//! - strictly ascending keys within each node
//! - every key lies between the separators that route to its node
//! - all leaves of an index sit at the same depth
//! - no block is reachable twice
//! - all six indexes hold the same quads, and as many as the stored count

use std::collections::HashSet;

use crate::{
    backend::BlockChannel,
    block::{Block, BlockStore},
    btree::{BlockProvider, node::Node},
    error::{BlockId, Error, Result},
    quad::{IndexKind, KEY_WIDTH, QuadTable, TableRoots},
};

/// Result of an integrity scrub.
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    /// Number of blocks checked.
    pub blocks_checked: u64,
    /// Number of checksum errors detected.
    pub checksum_errors: u64,
    /// Number of structural errors detected.
    pub structural_errors: u64,
    /// Detailed error descriptions.
    pub errors: Vec<IntegrityError>,
}

impl IntegrityReport {
    /// True if no error of any kind was found.
    pub fn is_healthy(&self) -> bool {
        self.errors.is_empty()
    }

    fn structural(&mut self, block_id: BlockId, index: Option<IndexKind>, description: String) {
        self.structural_errors += 1;
        self.errors.push(IntegrityError { block_id, index, description });
    }
}

/// A single integrity error.
#[derive(Debug, Clone)]
pub struct IntegrityError {
    /// The block where the error was detected (0 for table-level errors).
    pub block_id: BlockId,
    /// The index the block belongs to, if known.
    pub index: Option<IndexKind>,
    /// Human-readable description of the error.
    pub description: String,
}

/// Integrity scrubber for one snapshot of a quad table.
pub struct IntegrityScrubber<'a, C: BlockChannel> {
    blocks: &'a BlockStore<C>,
    roots: TableRoots,
}

/// Separator bounds inherited from the parent: `lower <= key < upper`.
struct Bounds<'k> {
    lower: Option<&'k [u8]>,
    upper: Option<&'k [u8]>,
}

impl<'a, C: BlockChannel> IntegrityScrubber<'a, C> {
    /// Creates a scrubber for the snapshot described by `roots`.
    pub fn new(blocks: &'a BlockStore<C>, roots: TableRoots) -> Self {
        Self { blocks, roots }
    }

    /// Runs every check and collects the findings.
    pub fn run(&self) -> IntegrityReport {
        let mut report = IntegrityReport::default();
        let mut seen = HashSet::new();

        for index in IndexKind::ALL {
            let root = self.roots.root(index);
            if root == 0 {
                continue;
            }
            let mut leaf_depth = None;
            let bounds = Bounds { lower: None, upper: None };
            self.verify_subtree(root, index, &bounds, 0, &mut leaf_depth, &mut seen, &mut report);
        }

        // Cross-index comparison reads every key again; skip it when the
        // trees themselves are broken.
        if report.is_healthy() {
            let table = QuadTable::new(RawBlocks { blocks: self.blocks }, self.roots);
            if let Err(e) = table.verify() {
                report.structural(0, None, format!("Index disagreement: {e}"));
            }
        }

        if !report.is_healthy() {
            tracing::warn!(
                checksum_errors = report.checksum_errors,
                structural_errors = report.structural_errors,
                "Integrity check found errors"
            );
        }
        report
    }

    #[allow(clippy::too_many_arguments)]
    fn verify_subtree(
        &self,
        block_id: BlockId,
        index: IndexKind,
        bounds: &Bounds<'_>,
        depth: u32,
        leaf_depth: &mut Option<u32>,
        seen: &mut HashSet<BlockId>,
        report: &mut IntegrityReport,
    ) {
        if !seen.insert(block_id) {
            report.structural(block_id, Some(index), format!("Block {block_id} is reachable twice"));
            return;
        }

        let node = match self.read_node(block_id) {
            Ok(node) => node,
            Err(Error::BlockChecksumMismatch { .. }) => {
                report.blocks_checked += 1;
                report.checksum_errors += 1;
                report.errors.push(IntegrityError {
                    block_id,
                    index: Some(index),
                    description: format!("Checksum mismatch on block {block_id}"),
                });
                return;
            },
            Err(e) => {
                report.structural(
                    block_id,
                    Some(index),
                    format!("Cannot read block {block_id} in {index}: {e}"),
                );
                return;
            },
        };
        report.blocks_checked += 1;

        let keys = match &node {
            Node::Leaf(leaf) => &leaf.keys,
            Node::Branch(branch) => &branch.keys,
        };

        for i in 1..keys.len() {
            if keys.get(i - 1) >= keys.get(i) {
                report.structural(
                    block_id,
                    Some(index),
                    format!("Key ordering violation in block {block_id}: key[{}] >= key[{i}]", i - 1),
                );
                // One error per node.
                return;
            }
        }

        if let Some(first) = (!keys.is_empty()).then(|| keys.get(0)) {
            let last = keys.get(keys.len() - 1);
            let below = bounds.lower.is_some_and(|lower| first < lower);
            let above = bounds.upper.is_some_and(|upper| last >= upper);
            if below || above {
                report.structural(
                    block_id,
                    Some(index),
                    format!("Block {block_id} holds keys outside its separator range"),
                );
                return;
            }
        }

        match node {
            Node::Leaf(leaf) => {
                if leaf.keys.is_empty() && depth > 0 {
                    report.structural(block_id, Some(index), format!("Empty leaf {block_id}"));
                }
                match *leaf_depth {
                    None => *leaf_depth = Some(depth),
                    Some(expected) if expected != depth => report.structural(
                        block_id,
                        Some(index),
                        format!("Leaf {block_id} at depth {depth}, expected {expected}"),
                    ),
                    Some(_) => {},
                }
            },
            Node::Branch(branch) => {
                if branch.children.len() != branch.keys.len() + 1 {
                    report.structural(
                        block_id,
                        Some(index),
                        format!("Branch {block_id} has mismatched child count"),
                    );
                    return;
                }
                for (i, &child) in branch.children.iter().enumerate() {
                    let child_bounds = Bounds {
                        lower: if i == 0 { bounds.lower } else { Some(branch.keys.get(i - 1)) },
                        upper: if i == branch.keys.len() {
                            bounds.upper
                        } else {
                            Some(branch.keys.get(i))
                        },
                    };
                    self.verify_subtree(
                        child,
                        index,
                        &child_bounds,
                        depth + 1,
                        leaf_depth,
                        seen,
                        report,
                    );
                }
            },
        }
    }

    fn read_node(&self, block_id: BlockId) -> Result<Node> {
        let data = self.blocks.channel().read_block(block_id)?;
        Node::decode(block_id, &data, KEY_WIDTH)
    }
}

/// Uncached reads straight from the channel.
#[derive(Clone, Copy)]
struct RawBlocks<'a, C: BlockChannel> {
    blocks: &'a BlockStore<C>,
}

impl<C: BlockChannel> BlockProvider for RawBlocks<'_, C> {
    fn read_block(&self, block_id: BlockId) -> Result<Block> {
        let data = self.blocks.channel().read_block(block_id)?;
        Ok(Block::from_bytes(block_id, data))
    }

    fn block_size(&self) -> usize {
        self.blocks.block_size()
    }
}
