//! Copy-on-write B+ tree over fixed-width keys.
//!
//! Each quad index is one of these trees. The tree is a sorted set: keys
//! carry no values, and ordering is plain byte order.
//!
//! Writes never modify a block that belongs to a committed snapshot. A node
//! on the update path is either *private* (allocated by the current write
//! transaction, rewritten in place) or *shared* (copied to a fresh block,
//! with the replaced block retired for reclamation once no reader can reach it).
//! A split adds at most one level per insert. Deletes never merge siblings;
//! an emptied node is unlinked from its parent and a root with a single
//! child collapses.
//!
//! ## Structure
//!
//! - `node.rs`: block layout and (de)serialization
//! - `cursor.rs`: ranges and lazy iteration

/// Key ranges and lazy iteration.
pub mod cursor;
/// Node layout and (de)serialization.
pub mod node;

use std::collections::HashSet;

use cursor::{KeyIter, KeyRange};
use node::{BranchNode, KeyArray, LeafNode, Node, branch_capacity, leaf_capacity};

use crate::{
    block::Block,
    error::{BlockId, Error, Result},
};

/// Read access to tree blocks.
///
/// Implemented by snapshot readers (committed blocks only) and by write
/// transactions (their own uncommitted blocks first).
pub trait BlockProvider {
    /// Reads a block by ID.
    fn read_block(&self, block_id: BlockId) -> Result<Block>;

    /// Returns the block size.
    fn block_size(&self) -> usize;
}

/// Write access to tree blocks, scoped to one write transaction.
pub trait BlockProviderMut: BlockProvider {
    /// Allocates a fresh zeroed block owned by the transaction.
    fn allocate_block(&mut self) -> Result<Block>;

    /// Stores a block owned by the transaction.
    fn write_block(&mut self, block: Block) -> Result<()>;

    /// Drops a block that is no longer referenced by the tree being built.
    ///
    /// Private blocks are freed at once; shared blocks are deferred until no
    /// snapshot can reach them.
    fn retire_block(&mut self, block_id: BlockId) -> Result<()>;

    /// True if the block was allocated by this transaction.
    fn is_private(&self, block_id: BlockId) -> bool;

    /// Transaction ID stamped into written nodes.
    fn txn_id(&self) -> u64;
}

impl<P: BlockProvider + ?Sized> BlockProvider for &P {
    fn read_block(&self, block_id: BlockId) -> Result<Block> {
        (**self).read_block(block_id)
    }

    fn block_size(&self) -> usize {
        (**self).block_size()
    }
}

impl<P: BlockProvider + ?Sized> BlockProvider for &mut P {
    fn read_block(&self, block_id: BlockId) -> Result<Block> {
        (**self).read_block(block_id)
    }

    fn block_size(&self) -> usize {
        (**self).block_size()
    }
}

impl<P: BlockProviderMut + ?Sized> BlockProviderMut for &mut P {
    fn allocate_block(&mut self) -> Result<Block> {
        (**self).allocate_block()
    }

    fn write_block(&mut self, block: Block) -> Result<()> {
        (**self).write_block(block)
    }

    fn retire_block(&mut self, block_id: BlockId) -> Result<()> {
        (**self).retire_block(block_id)
    }

    fn is_private(&self, block_id: BlockId) -> bool {
        (**self).is_private(block_id)
    }

    fn txn_id(&self) -> u64 {
        (**self).txn_id()
    }
}

enum InsertOutcome {
    Present,
    Updated(BlockId),
    Split { left: BlockId, separator: Vec<u8>, right: BlockId },
}

enum DeleteOutcome {
    Absent,
    Updated(BlockId),
    Emptied,
}

/// B+ tree accessor for one index.
///
/// Holds only the root ID; all state lives in blocks reached through the
/// provider. Root 0 denotes the empty tree (block 0 is never a node).
pub struct BTree<P: BlockProvider> {
    provider: P,
    root: BlockId,
    key_width: usize,
    /// Number of node splits performed by this accessor.
    split_count: u64,
}

impl<P: BlockProvider> BTree<P> {
    /// Creates an accessor for the tree rooted at `root`.
    pub fn new(root: BlockId, key_width: usize, provider: P) -> Self {
        Self { provider, root, key_width, split_count: 0 }
    }

    /// Returns the current root block (0 if empty).
    pub fn root(&self) -> BlockId {
        self.root
    }

    /// Returns true if the tree holds no keys.
    pub fn is_empty(&self) -> bool {
        self.root == 0
    }

    /// Returns the number of node splits performed through this accessor.
    pub fn split_count(&self) -> u64 {
        self.split_count
    }

    fn read_node(&self, block_id: BlockId) -> Result<Node> {
        let block = self.provider.read_block(block_id)?;
        Node::decode(block_id, &block.data, self.key_width)
    }

    fn check_width(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_width {
            return Err(Error::Corrupted {
                reason: format!("Key is {} bytes, index expects {}", key.len(), self.key_width),
            });
        }
        Ok(())
    }

    /// Returns true if `key` is present.
    ///
    /// # Errors
    ///
    /// Returns an error if a block read or decode fails.
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        self.check_width(key)?;
        if self.root == 0 {
            return Ok(false);
        }
        let mut block_id = self.root;
        loop {
            match self.read_node(block_id)? {
                Node::Branch(branch) => block_id = branch.children[branch.child_index(key)],
                Node::Leaf(leaf) => return Ok(leaf.keys.search(key).is_ok()),
            }
        }
    }

    /// Returns the smallest key `>= key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if a block read or decode fails.
    pub fn seek(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.range(KeyRange::from(key.to_vec())).next().transpose()
    }

    /// Iterates keys in `range` in ascending order.
    pub fn range(&self, range: KeyRange) -> KeyIter<&P> {
        KeyIter::new(&self.provider, self.root, self.key_width, range)
    }

    /// Consumes the accessor into an iterator over `range`.
    pub fn into_range(self, range: KeyRange) -> KeyIter<P> {
        KeyIter::new(self.provider, self.root, self.key_width, range)
    }

    /// Iterates keys that begin with `prefix`.
    pub fn prefix(&self, prefix: &[u8]) -> KeyIter<&P> {
        self.range(KeyRange::prefix(prefix))
    }

    /// Counts every key. Walks the whole tree.
    ///
    /// # Errors
    ///
    /// Returns an error if a block read or decode fails.
    pub fn len(&self) -> Result<u64> {
        let mut count = 0u64;
        for key in self.range(KeyRange::all()) {
            key?;
            count += 1;
        }
        Ok(count)
    }

    /// Computes the depth (0 = empty, 1 = root is a leaf).
    ///
    /// # Errors
    ///
    /// Returns an error if a block read or decode fails.
    pub fn depth(&self) -> Result<u32> {
        if self.root == 0 {
            return Ok(0);
        }
        let mut depth = 1u32;
        let mut block_id = self.root;
        while let Node::Branch(branch) = self.read_node(block_id)? {
            block_id = branch.children[0];
            depth += 1;
        }
        Ok(depth)
    }

    /// Adds every block reachable from the root to `blocks`.
    ///
    /// # Errors
    ///
    /// Returns an error if a block read or decode fails.
    pub fn collect_blocks(&self, blocks: &mut HashSet<BlockId>) -> Result<()> {
        if self.root == 0 {
            return Ok(());
        }
        let mut pending = vec![self.root];
        while let Some(block_id) = pending.pop() {
            if !blocks.insert(block_id) {
                return Err(Error::Corrupted {
                    reason: format!("Block {block_id} is reachable twice"),
                });
            }
            if let Node::Branch(branch) = self.read_node(block_id)? {
                pending.extend(branch.children.iter().copied());
            }
        }
        Ok(())
    }

    /// Consumes the accessor, returning the provider.
    pub fn into_provider(self) -> P {
        self.provider
    }
}

impl<P: BlockProviderMut> BTree<P> {
    fn leaf_capacity(&self) -> usize {
        leaf_capacity(self.provider.block_size(), self.key_width)
    }

    fn branch_capacity(&self) -> usize {
        branch_capacity(self.provider.block_size(), self.key_width)
    }

    /// Writes `node` into a fresh block.
    fn write_new(&mut self, node: &Node) -> Result<BlockId> {
        let mut block = self.provider.allocate_block()?;
        node.encode(&mut block.data, self.provider.txn_id());
        let block_id = block.id;
        self.provider.write_block(block)?;
        Ok(block_id)
    }

    /// Stores the new version of the node at `old_id`: in place if the
    /// transaction owns the block, otherwise copied with `old_id` retired.
    fn store_node(&mut self, old_id: BlockId, node: &Node) -> Result<BlockId> {
        if self.provider.is_private(old_id) {
            let mut block = Block::zeroed(old_id, self.provider.block_size());
            node.encode(&mut block.data, self.provider.txn_id());
            self.provider.write_block(block)?;
            return Ok(old_id);
        }
        let new_id = self.write_new(node)?;
        self.provider.retire_block(old_id)?;
        Ok(new_id)
    }

    /// Inserts `key`. Returns false if it was already present.
    ///
    /// # Errors
    ///
    /// Returns an error if a block read, decode, allocation or write fails.
    /// The tree is left in an unspecified state; the caller must abandon
    /// the transaction.
    pub fn insert(&mut self, key: &[u8]) -> Result<bool> {
        self.check_width(key)?;
        if self.root == 0 {
            let mut keys = KeyArray::new(self.key_width);
            keys.insert(0, key);
            self.root = self.write_new(&Node::Leaf(LeafNode { keys }))?;
            return Ok(true);
        }
        match self.insert_into(self.root, key)? {
            InsertOutcome::Present => Ok(false),
            InsertOutcome::Updated(root) => {
                self.root = root;
                Ok(true)
            },
            InsertOutcome::Split { left, separator, right } => {
                let mut keys = KeyArray::new(self.key_width);
                keys.insert(0, &separator);
                let branch = BranchNode { keys, children: vec![left, right] };
                self.root = self.write_new(&Node::Branch(branch))?;
                Ok(true)
            },
        }
    }

    fn insert_into(&mut self, block_id: BlockId, key: &[u8]) -> Result<InsertOutcome> {
        match self.read_node(block_id)? {
            Node::Leaf(mut leaf) => {
                let position = match leaf.keys.search(key) {
                    Ok(_) => return Ok(InsertOutcome::Present),
                    Err(position) => position,
                };
                leaf.keys.insert(position, key);
                if leaf.keys.len() <= self.leaf_capacity() {
                    let new_id = self.store_node(block_id, &Node::Leaf(leaf))?;
                    return Ok(InsertOutcome::Updated(new_id));
                }

                let right = LeafNode { keys: leaf.keys.split_off(leaf.keys.len() / 2) };
                let separator = right.keys.get(0).to_vec();
                let left = self.store_node(block_id, &Node::Leaf(leaf))?;
                let right = self.write_new(&Node::Leaf(right))?;
                self.split_count += 1;
                Ok(InsertOutcome::Split { left, separator, right })
            },
            Node::Branch(mut branch) => {
                let index = branch.child_index(key);
                let child = branch.children[index];
                match self.insert_into(child, key)? {
                    InsertOutcome::Present => Ok(InsertOutcome::Present),
                    InsertOutcome::Updated(new_child) if new_child == child => {
                        Ok(InsertOutcome::Updated(block_id))
                    },
                    InsertOutcome::Updated(new_child) => {
                        branch.children[index] = new_child;
                        let new_id = self.store_node(block_id, &Node::Branch(branch))?;
                        Ok(InsertOutcome::Updated(new_id))
                    },
                    InsertOutcome::Split { left, separator, right } => {
                        branch.insert_split(index, left, &separator, right);
                        if branch.keys.len() <= self.branch_capacity() {
                            let new_id = self.store_node(block_id, &Node::Branch(branch))?;
                            return Ok(InsertOutcome::Updated(new_id));
                        }

                        let (promoted, right_branch) = branch.split();
                        let left = self.store_node(block_id, &Node::Branch(branch))?;
                        let right = self.write_new(&Node::Branch(right_branch))?;
                        self.split_count += 1;
                        Ok(InsertOutcome::Split { left, separator: promoted, right })
                    },
                }
            },
        }
    }

    /// Deletes `key`. Returns false if it was absent.
    ///
    /// # Errors
    ///
    /// Same as [`insert`](Self::insert).
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        self.check_width(key)?;
        if self.root == 0 {
            return Ok(false);
        }
        match self.delete_from(self.root, key)? {
            DeleteOutcome::Absent => return Ok(false),
            DeleteOutcome::Emptied => self.root = 0,
            DeleteOutcome::Updated(root) => self.root = root,
        }
        self.collapse_root()?;
        Ok(true)
    }

    fn delete_from(&mut self, block_id: BlockId, key: &[u8]) -> Result<DeleteOutcome> {
        match self.read_node(block_id)? {
            Node::Leaf(mut leaf) => {
                let Ok(position) = leaf.keys.search(key) else {
                    return Ok(DeleteOutcome::Absent);
                };
                leaf.keys.remove(position);
                if leaf.keys.is_empty() {
                    self.provider.retire_block(block_id)?;
                    return Ok(DeleteOutcome::Emptied);
                }
                Ok(DeleteOutcome::Updated(self.store_node(block_id, &Node::Leaf(leaf))?))
            },
            Node::Branch(mut branch) => {
                let index = branch.child_index(key);
                let child = branch.children[index];
                match self.delete_from(child, key)? {
                    DeleteOutcome::Absent => Ok(DeleteOutcome::Absent),
                    DeleteOutcome::Updated(new_child) if new_child == child => {
                        Ok(DeleteOutcome::Updated(block_id))
                    },
                    DeleteOutcome::Updated(new_child) => {
                        branch.children[index] = new_child;
                        Ok(DeleteOutcome::Updated(self.store_node(block_id, &Node::Branch(branch))?))
                    },
                    DeleteOutcome::Emptied => {
                        branch.remove_child(index);
                        if branch.children.is_empty() {
                            self.provider.retire_block(block_id)?;
                            return Ok(DeleteOutcome::Emptied);
                        }
                        Ok(DeleteOutcome::Updated(self.store_node(block_id, &Node::Branch(branch))?))
                    },
                }
            },
        }
    }

    /// Replaces a root branch that has a single child by that child.
    fn collapse_root(&mut self) -> Result<()> {
        while self.root != 0 {
            match self.read_node(self.root)? {
                Node::Branch(branch) if branch.children.len() == 1 => {
                    self.provider.retire_block(self.root)?;
                    self.root = branch.children[0];
                },
                _ => break,
            }
        }
        Ok(())
    }
}
