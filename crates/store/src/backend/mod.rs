//! Block channel abstraction for the store engine.
//!
//! A channel is the raw medium underneath block allocation: a dense array of
//! fixed-size blocks addressed by [`BlockId`]. Block *i* occupies bytes
//! `[i * block_size, (i + 1) * block_size)`. Channels know nothing about
//! block contents, free lists or snapshots; that is the job of
//! [`BlockStore`](crate::block::BlockStore) and the transaction layer.
//!
//! Two implementations are provided: [`FileChannel`] (durable, `sync` is an
//! fsync) and [`MemoryChannel`] (volatile, `sync` is a no-op). Both give the
//! same read-after-write guarantees.

mod file;
mod memory;

pub use file::FileChannel;
pub use memory::MemoryChannel;

use graphvault_types::config::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};

use crate::error::{BlockId, Error, Result};

/// Default block size: 4KB (4096 bytes).
pub const DEFAULT_BLOCK_SIZE: usize = graphvault_types::config::DEFAULT_BLOCK_SIZE;

/// Block-addressed storage medium.
pub trait BlockChannel: Send + Sync {
    /// Returns the fixed block size for this channel.
    fn block_size(&self) -> usize;

    /// Returns the number of blocks currently allocated in the medium.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    fn block_count(&self) -> Result<BlockId>;

    /// Reads a block by its ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `block_id >= block_count()`.
    /// Returns [`Error::Io`] if the read fails.
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    fn read_block(&self, block_id: BlockId) -> Result<Vec<u8>>;

    /// Writes a block at the given ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SizeMismatch`] if `data.len()` differs from the block size.
    /// Returns [`Error::NotFound`] if `block_id >= block_count()`.
    /// Returns [`Error::Io`] if the write fails.
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    fn write_block(&self, block_id: BlockId, data: &[u8]) -> Result<()>;

    /// Grows the medium to `new_count` zero-filled blocks. Never shrinks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the medium cannot be extended.
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    fn extend(&self, new_count: BlockId) -> Result<()>;

    /// Durability barrier: every prior write survives a crash once this returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the sync fails.
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    fn sync(&self) -> Result<()>;

    /// Number of blocks covered by the last successful [`sync`](Self::sync).
    fn durable_blocks(&self) -> BlockId;

    /// Syncs and closes the channel. Later operations fail with [`Error::Closed`].
    ///
    /// Closing an already closed channel is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the final sync fails.
    fn close(&self) -> Result<()>;

    /// Returns true once [`close`](Self::close) has been called.
    fn is_closed(&self) -> bool;

    /// Calculates the byte offset for a block ID.
    fn block_offset(&self, block_id: BlockId) -> u64 {
        block_id * self.block_size() as u64
    }
}

/// Checks that `block_size` is a power of two in the supported range.
///
/// # Errors
///
/// Returns [`Error::InvalidBlockSize`] otherwise.
pub fn validate_block_size(block_size: usize) -> Result<()> {
    if !block_size.is_power_of_two() || block_size < MIN_BLOCK_SIZE || block_size > MAX_BLOCK_SIZE
    {
        return Err(Error::InvalidBlockSize { size: block_size });
    }
    Ok(())
}
