//! In-memory block channel for ephemeral stores and tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use super::{BlockChannel, DEFAULT_BLOCK_SIZE, validate_block_size};
use crate::error::{BlockId, Error, Result};

/// In-memory block channel.
///
/// All data is stored in memory and lost when the channel is dropped.
/// `sync` is a no-op that only advances the durability boundary.
pub struct MemoryChannel {
    /// Blocks indexed by block ID.
    blocks: RwLock<Vec<Box<[u8]>>>,
    /// Block size in bytes.
    block_size: usize,
    /// Block count at the last sync.
    durable_blocks: AtomicU64,
    /// Set by `close`.
    closed: AtomicBool,
}

impl MemoryChannel {
    /// Creates an empty channel with the given block size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlockSize`] if `block_size` is unsupported.
    pub fn new(block_size: usize) -> Result<Self> {
        validate_block_size(block_size)?;
        Ok(Self {
            blocks: RwLock::new(Vec::new()),
            block_size,
            durable_blocks: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Creates an empty channel with 4KB blocks.
    pub fn with_default_block_size() -> Self {
        Self {
            blocks: RwLock::new(Vec::new()),
            block_size: DEFAULT_BLOCK_SIZE,
            durable_blocks: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::with_default_block_size()
    }
}

impl BlockChannel for MemoryChannel {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> Result<BlockId> {
        self.ensure_open()?;
        Ok(self.blocks.read().len() as BlockId)
    }

    fn read_block(&self, block_id: BlockId) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let blocks = self.blocks.read();
        blocks
            .get(block_id as usize)
            .map(|block| block.to_vec())
            .ok_or(Error::NotFound { block_id })
    }

    fn write_block(&self, block_id: BlockId, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if data.len() != self.block_size {
            return Err(Error::SizeMismatch { expected: self.block_size, actual: data.len() });
        }

        let mut blocks = self.blocks.write();
        let block = blocks.get_mut(block_id as usize).ok_or(Error::NotFound { block_id })?;
        block.copy_from_slice(data);
        Ok(())
    }

    fn extend(&self, new_count: BlockId) -> Result<()> {
        self.ensure_open()?;
        let mut blocks = self.blocks.write();
        while (blocks.len() as BlockId) < new_count {
            blocks.push(vec![0u8; self.block_size].into_boxed_slice());
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.ensure_open()?;
        let covered = self.blocks.read().len() as BlockId;
        self.durable_blocks.store(covered, Ordering::Release);
        Ok(())
    }

    fn durable_blocks(&self) -> BlockId {
        self.durable_blocks.load(Ordering::Acquire)
    }

    fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.sync()?;
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
