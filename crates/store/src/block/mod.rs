//! Block allocation layer.
//!
//! [`BlockStore`] turns a raw [`BlockChannel`](crate::backend::BlockChannel)
//! into a managed pool of blocks: allocation from a free list, a shared read
//! cache, and the bookkeeping that decides when a block may be reused.
//!
//! A block moves through three states:
//!
//! ```text
//!   allocate()            publish()               retire + reclaim()
//! ─────────────▶ pending ──────────▶ published ─────────────────────▶ free
//!                   │                                                  ▲
//!                   └──────────────── free() / discard_pending() ──────┘
//! ```
//!
//! Only pending blocks (allocated by the open write transaction and not yet
//! part of any committed snapshot) can be freed directly. Published blocks
//! return to the free list through epoch-based reclamation once no reader
//! can reach them.

mod allocator;
mod cache;
mod store;

pub use allocator::BlockAllocator;
pub use cache::{BlockCache, CacheStats};
pub use store::BlockStore;

use crate::error::BlockId;

/// A block of data read from or destined for the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block identifier.
    pub id: BlockId,
    /// Raw block contents. Always exactly one block long.
    pub data: Vec<u8>,
}

impl Block {
    /// Creates a zero-filled block.
    pub fn zeroed(id: BlockId, block_size: usize) -> Self {
        Self { id, data: vec![0u8; block_size] }
    }

    /// Wraps raw bytes read from the channel.
    pub fn from_bytes(id: BlockId, data: Vec<u8>) -> Self {
        Self { id, data }
    }

    /// Returns the block size.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}
