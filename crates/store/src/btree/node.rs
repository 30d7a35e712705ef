//! Node layout and (de)serialization for B+ tree blocks.
//!
//! Every node block starts with a 16-byte header:
//!
//! ```text
//! Offset  Size   Field
//! ------  ----   -----
//! 0       1      Block kind (BlockKind::BTreeBranch or BTreeLeaf)
//! 1       1      Flags (reserved)
//! 2       2      Key count
//! 4       4      Checksum (XXH3-64 truncated to 32 bits, bytes after header)
//! 8       8      Transaction ID that wrote this node
//! ```
//!
//! Leaves store `count` fixed-width keys in ascending order. Branches store
//! `count` separator keys followed by `count + 1` child block IDs
//! (little-endian u64). Child `i` holds keys in `[sep[i-1], sep[i])`.

use crate::error::{BlockId, BlockKind, Error, Result};

/// Node header size in bytes.
pub const NODE_HEADER_SIZE: usize = 16;

const CHILD_SIZE: usize = 8;

/// Decoded node header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    /// Node kind.
    pub kind: BlockKind,
    /// Flags (reserved).
    pub flags: u8,
    /// Number of keys in the node.
    pub count: u16,
    /// Truncated XXH3-64 of the node body.
    pub checksum: u32,
    /// Transaction that wrote this node.
    pub txn_id: u64,
}

impl NodeHeader {
    /// Serializes the header.
    pub fn to_bytes(&self) -> [u8; NODE_HEADER_SIZE] {
        let mut buf = [0u8; NODE_HEADER_SIZE];
        buf[0] = self.kind as u8;
        buf[1] = self.flags;
        buf[2..4].copy_from_slice(&self.count.to_le_bytes());
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf[8..16].copy_from_slice(&self.txn_id.to_le_bytes());
        buf
    }

    /// Deserializes a header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the buffer is too short or the kind
    /// byte is invalid.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < NODE_HEADER_SIZE {
            return Err(Error::Corrupted { reason: "Node header too short".to_string() });
        }
        Ok(Self {
            kind: BlockKind::try_from(buf[0])?,
            flags: buf[1],
            count: u16::from_le_bytes([buf[2], buf[3]]),
            checksum: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            txn_id: read_u64(buf, 8),
        })
    }
}

/// Computes the checksum of a node body.
pub fn body_checksum(data: &[u8]) -> u32 {
    xxhash_rust::xxh3::xxh3_64(&data[NODE_HEADER_SIZE..]) as u32
}

/// Maximum number of keys in a leaf.
pub fn leaf_capacity(block_size: usize, key_width: usize) -> usize {
    ((block_size - NODE_HEADER_SIZE) / key_width).min(u16::MAX as usize)
}

/// Maximum number of separator keys in a branch.
pub fn branch_capacity(block_size: usize, key_width: usize) -> usize {
    ((block_size - NODE_HEADER_SIZE - CHILD_SIZE) / (key_width + CHILD_SIZE)).min(u16::MAX as usize)
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

/// Fixed-width keys packed back to back in ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyArray {
    width: usize,
    bytes: Vec<u8>,
}

impl KeyArray {
    /// Creates an empty array for keys of `width` bytes.
    pub fn new(width: usize) -> Self {
        Self { width, bytes: Vec::new() }
    }

    fn from_bytes(width: usize, bytes: &[u8]) -> Self {
        Self { width, bytes: bytes.to_vec() }
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.bytes.len() / self.width
    }

    /// True if there are no keys.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Key at `index`.
    pub fn get(&self, index: usize) -> &[u8] {
        &self.bytes[index * self.width..(index + 1) * self.width]
    }

    /// Binary search: `Ok(i)` if found at `i`, `Err(i)` for the insert position.
    pub fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        let (mut lo, mut hi) = (0, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.get(mid).cmp(key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }

    /// Number of keys `<= key`.
    pub fn upper_bound(&self, key: &[u8]) -> usize {
        match self.search(key) {
            Ok(i) => i + 1,
            Err(i) => i,
        }
    }

    /// Number of keys `< key`.
    pub fn lower_bound(&self, key: &[u8]) -> usize {
        match self.search(key) {
            Ok(i) | Err(i) => i,
        }
    }

    /// Inserts `key` at `index`.
    pub fn insert(&mut self, index: usize, key: &[u8]) {
        let at = index * self.width;
        self.bytes.splice(at..at, key.iter().copied());
    }

    /// Removes the key at `index`.
    pub fn remove(&mut self, index: usize) {
        let at = index * self.width;
        self.bytes.drain(at..at + self.width);
    }

    /// Splits off keys `[index..]` into a new array.
    pub fn split_off(&mut self, index: usize) -> Self {
        Self { width: self.width, bytes: self.bytes.split_off(index * self.width) }
    }

    /// Drops keys `[index..]`.
    pub fn truncate(&mut self, index: usize) {
        self.bytes.truncate(index * self.width);
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Leaf node: sorted keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    /// Keys in ascending order.
    pub keys: KeyArray,
}

/// Branch node: separators and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchNode {
    /// Separator keys in ascending order.
    pub keys: KeyArray,
    /// Child block IDs; always one more than `keys`.
    pub children: Vec<BlockId>,
}

impl BranchNode {
    /// Index of the child whose range contains `key`.
    pub fn child_index(&self, key: &[u8]) -> usize {
        self.keys.upper_bound(key)
    }

    /// Replaces child `index` by `left` and inserts `separator`/`right` after it.
    pub fn insert_split(&mut self, index: usize, left: BlockId, separator: &[u8], right: BlockId) {
        self.children[index] = left;
        self.keys.insert(index, separator);
        self.children.insert(index + 1, right);
    }

    /// Unlinks child `index` along with one adjacent separator.
    pub fn remove_child(&mut self, index: usize) {
        self.children.remove(index);
        if !self.keys.is_empty() {
            self.keys.remove(index.saturating_sub(1));
        }
    }

    /// Splits an overfull branch. Returns the separator promoted to the
    /// parent and the new right sibling.
    pub fn split(&mut self) -> (Vec<u8>, BranchNode) {
        let mid = self.keys.len() / 2;
        let promoted = self.keys.get(mid).to_vec();
        let right_keys = self.keys.split_off(mid + 1);
        self.keys.truncate(mid);
        let right_children = self.children.split_off(mid + 1);
        (promoted, BranchNode { keys: right_keys, children: right_children })
    }
}

/// A decoded B+ tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Leaf node.
    Leaf(LeafNode),
    /// Branch node.
    Branch(BranchNode),
}

impl Node {
    /// Decodes and verifies a node block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockChecksumMismatch`] if the stored checksum does
    /// not match the body.
    /// Returns [`Error::Corrupted`] if the header is invalid or the key count
    /// does not fit the block.
    pub fn decode(block_id: BlockId, data: &[u8], key_width: usize) -> Result<Self> {
        let header = NodeHeader::from_bytes(data)?;
        if header.checksum != body_checksum(data) {
            return Err(Error::BlockChecksumMismatch { block_id });
        }
        let count = header.count as usize;
        let body = &data[NODE_HEADER_SIZE..];
        match header.kind {
            BlockKind::BTreeLeaf => {
                if count > leaf_capacity(data.len(), key_width) {
                    return Err(overfull(block_id, count));
                }
                let keys = KeyArray::from_bytes(key_width, &body[..count * key_width]);
                Ok(Node::Leaf(LeafNode { keys }))
            },
            BlockKind::BTreeBranch => {
                if count > branch_capacity(data.len(), key_width) {
                    return Err(overfull(block_id, count));
                }
                let keys_len = count * key_width;
                let keys = KeyArray::from_bytes(key_width, &body[..keys_len]);
                let children = (0..=count)
                    .map(|i| read_u64(body, keys_len + i * CHILD_SIZE))
                    .collect();
                Ok(Node::Branch(BranchNode { keys, children }))
            },
            BlockKind::Free => Err(Error::Corrupted {
                reason: format!("Block {block_id} is not a B-tree node"),
            }),
        }
    }

    /// Encodes the node into `data` (one full block), stamping `txn_id`.
    pub fn encode(&self, data: &mut [u8], txn_id: u64) {
        data.fill(0);
        let (kind, count) = match self {
            Node::Leaf(leaf) => {
                let keys = leaf.keys.as_bytes();
                data[NODE_HEADER_SIZE..NODE_HEADER_SIZE + keys.len()].copy_from_slice(keys);
                (BlockKind::BTreeLeaf, leaf.keys.len())
            },
            Node::Branch(branch) => {
                let keys = branch.keys.as_bytes();
                let mut offset = NODE_HEADER_SIZE;
                data[offset..offset + keys.len()].copy_from_slice(keys);
                offset += keys.len();
                for child in &branch.children {
                    data[offset..offset + CHILD_SIZE].copy_from_slice(&child.to_le_bytes());
                    offset += CHILD_SIZE;
                }
                (BlockKind::BTreeBranch, branch.keys.len())
            },
        };
        let mut header = NodeHeader { kind, flags: 0, count: count as u16, checksum: 0, txn_id };
        header.checksum = body_checksum(data);
        data[..NODE_HEADER_SIZE].copy_from_slice(&header.to_bytes());
    }
}

fn overfull(block_id: BlockId, count: usize) -> Error {
    Error::Corrupted { reason: format!("Block {block_id} claims {count} keys, more than fit") }
}
