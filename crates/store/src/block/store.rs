use tracing::debug;

use super::{Block, BlockAllocator, BlockCache, CacheStats};
use crate::{
    backend::BlockChannel,
    error::{BlockId, Error, Result},
};

/// Managed block pool over a [`BlockChannel`].
///
/// Implements the block access contract: allocate, read, write, free, sync,
/// emptiness and close. Reads go through a shared [`BlockCache`]; writes go
/// straight to the channel and refresh the cached copy.
pub struct BlockStore<C: BlockChannel> {
    channel: C,
    allocator: BlockAllocator,
    cache: BlockCache,
}

impl<C: BlockChannel> BlockStore<C> {
    /// Wraps a channel. The allocator's high-water mark starts at the
    /// channel's current block count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the channel is already closed.
    pub fn new(channel: C, cache_blocks: usize) -> Result<Self> {
        let next_block = channel.block_count()?;
        Ok(Self::with_high_water(channel, next_block, cache_blocks))
    }

    /// Wraps a channel whose committed high-water mark is `next_block`.
    ///
    /// Blocks at or past `next_block` that exist in the channel are leftovers
    /// from an interrupted transaction and are reused by later allocations.
    pub fn with_high_water(channel: C, next_block: BlockId, cache_blocks: usize) -> Self {
        Self {
            channel,
            allocator: BlockAllocator::new(next_block),
            cache: BlockCache::new(cache_blocks),
        }
    }

    /// Returns the channel's block size.
    pub fn block_size(&self) -> usize {
        self.channel.block_size()
    }

    /// Returns the underlying channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Returns the allocator.
    pub fn allocator(&self) -> &BlockAllocator {
        &self.allocator
    }

    /// Allocates a zero-filled block and marks it pending.
    ///
    /// The block is zeroed on the channel as well, so a read before the first
    /// write observes zeros.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the channel cannot grow.
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    pub fn allocate(&self) -> Result<Block> {
        if self.channel.is_closed() {
            return Err(Error::Closed);
        }
        let block_id = self.allocator.allocate();
        let block = Block::zeroed(block_id, self.block_size());
        let result = self
            .ensure_capacity(block_id)
            .and_then(|()| self.channel.write_block(block_id, &block.data));
        if let Err(e) = result {
            // Give the ID back so a failed allocation leaks nothing.
            let _ = self.allocator.free(block_id);
            return Err(e);
        }
        self.cache.remove(block_id);
        Ok(block)
    }

    fn ensure_capacity(&self, block_id: BlockId) -> Result<()> {
        if block_id >= self.channel.block_count()? {
            self.channel.extend(block_id + 1)?;
        }
        Ok(())
    }

    /// Reads an allocated block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the block is not allocated.
    /// Returns [`Error::Io`] if the read fails.
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    pub fn read(&self, block_id: BlockId) -> Result<Block> {
        if self.channel.is_closed() {
            return Err(Error::Closed);
        }
        if !self.allocator.is_allocated(block_id) {
            return Err(Error::NotFound { block_id });
        }
        if let Some(block) = self.cache.get(block_id) {
            return Ok(block);
        }
        let block = Block::from_bytes(block_id, self.channel.read_block(block_id)?);
        self.cache.insert(block.clone());
        Ok(block)
    }

    /// Writes an allocated block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SizeMismatch`] if the payload is not one block long.
    /// Returns [`Error::NotFound`] if the block is not allocated.
    /// Returns [`Error::Io`] if the write fails.
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    pub fn write(&self, block: &Block) -> Result<()> {
        if block.data.len() != self.block_size() {
            return Err(Error::SizeMismatch { expected: self.block_size(), actual: block.data.len() });
        }
        if self.channel.is_closed() {
            return Err(Error::Closed);
        }
        if !self.allocator.is_allocated(block.id) {
            return Err(Error::NotFound { block_id: block.id });
        }
        if let Err(e) = self.channel.write_block(block.id, &block.data) {
            self.cache.remove(block.id);
            return Err(e);
        }
        self.cache.insert(block.clone());
        Ok(())
    }

    /// Frees a block allocated since the last publish.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the block is not allocated.
    /// Returns [`Error::BlockInUse`] if the block belongs to a committed
    /// snapshot.
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    pub fn free(&self, block_id: BlockId) -> Result<()> {
        if self.channel.is_closed() {
            return Err(Error::Closed);
        }
        self.allocator.free(block_id)?;
        self.cache.remove(block_id);
        Ok(())
    }

    /// Returns true if the block was allocated since the last publish.
    pub fn is_pending(&self, block_id: BlockId) -> bool {
        self.allocator.is_pending(block_id)
    }

    /// Durability barrier over all prior writes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the sync fails.
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    pub fn sync(&self) -> Result<()> {
        self.channel.sync()
    }

    /// Returns true if no block has ever been allocated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`close`](Self::close).
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.channel.block_count()? == 0 && self.allocator.next_block() == 0)
    }

    /// Syncs and closes the underlying channel and drops the cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the final sync fails.
    pub fn close(&self) -> Result<()> {
        self.cache.clear();
        self.channel.close()
    }

    /// Returns true once the channel is closed.
    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    /// Marks every pending block as part of the committed snapshot.
    pub fn publish(&self) {
        let published = self.allocator.publish();
        debug!(published, "Published pending blocks");
    }

    /// Frees every block allocated since the last publish.
    pub fn discard_pending(&self) -> usize {
        let discarded = self.allocator.discard_pending();
        for &block_id in &discarded {
            self.cache.remove(block_id);
        }
        discarded.len()
    }

    /// Returns unreachable published blocks to the free list.
    pub fn reclaim(&self, block_ids: &[BlockId]) {
        if block_ids.is_empty() {
            return;
        }
        self.allocator.release(block_ids);
        for &block_id in block_ids {
            self.cache.remove(block_id);
        }
        debug!(count = block_ids.len(), "Reclaimed blocks");
    }

    /// Returns the high-water mark of allocated IDs.
    pub fn total_blocks(&self) -> BlockId {
        self.allocator.next_block()
    }

    /// Returns cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::{FileChannel, MemoryChannel};

    fn memory_store() -> BlockStore<MemoryChannel> {
        BlockStore::new(MemoryChannel::new(512).unwrap(), 16).unwrap()
    }

    #[test]
    fn test_fresh_store_is_empty() {
        let store = memory_store();
        assert!(store.is_empty().unwrap());
        store.allocate().unwrap();
        assert!(!store.is_empty().unwrap());
    }

    #[test]
    fn test_allocate_returns_zeroed_readable_block() {
        let store = memory_store();
        let block = store.allocate().unwrap();
        assert_eq!(block.size(), 512);
        assert_eq!(store.read(block.id).unwrap().data, vec![0u8; 512]);
    }

    #[test]
    fn test_write_then_read() {
        let store = memory_store();
        let mut block = store.allocate().unwrap();
        block.data[0..4].copy_from_slice(b"quad");
        store.write(&block).unwrap();
        assert_eq!(&store.read(block.id).unwrap().data[0..4], b"quad");
    }

    #[test]
    fn test_read_unallocated_is_not_found() {
        let store = memory_store();
        assert!(matches!(store.read(3), Err(Error::NotFound { block_id: 3 })));

        let block = store.allocate().unwrap();
        store.free(block.id).unwrap();
        assert!(matches!(store.read(block.id), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_write_wrong_size_is_size_mismatch() {
        let store = memory_store();
        let block = store.allocate().unwrap();
        let short = Block::from_bytes(block.id, vec![1u8; 100]);
        assert!(matches!(
            store.write(&short),
            Err(Error::SizeMismatch { expected: 512, actual: 100 })
        ));
    }

    #[test]
    fn test_free_published_block_is_in_use() {
        let store = memory_store();
        let block = store.allocate().unwrap();
        store.publish();
        assert!(matches!(store.free(block.id), Err(Error::BlockInUse { .. })));
        assert!(store.read(block.id).is_ok());
    }

    #[test]
    fn test_freed_block_is_reused() {
        let store = memory_store();
        let a = store.allocate().unwrap();
        let _b = store.allocate().unwrap();
        store.free(a.id).unwrap();
        assert_eq!(store.allocate().unwrap().id, a.id);
        assert_eq!(store.total_blocks(), 2);
    }

    #[test]
    fn test_reused_block_is_zeroed() {
        let store = memory_store();
        let mut block = store.allocate().unwrap();
        block.data.fill(0xAB);
        store.write(&block).unwrap();
        store.read(block.id).unwrap();
        store.free(block.id).unwrap();

        let reused = store.allocate().unwrap();
        assert_eq!(reused.id, block.id);
        assert_eq!(store.read(reused.id).unwrap().data, vec![0u8; 512]);
    }

    #[test]
    fn test_reclaim_returns_published_blocks() {
        let store = memory_store();
        let a = store.allocate().unwrap();
        store.publish();
        store.reclaim(&[a.id]);
        assert!(matches!(store.read(a.id), Err(Error::NotFound { .. })));
        assert_eq!(store.allocate().unwrap().id, a.id);
    }

    #[test]
    fn test_discard_pending() {
        let store = memory_store();
        let kept = store.allocate().unwrap();
        store.publish();
        store.allocate().unwrap();
        store.allocate().unwrap();
        assert_eq!(store.discard_pending(), 2);
        assert!(store.read(kept.id).is_ok());
        assert_eq!(store.allocator().free_count(), 2);
    }

    #[test]
    fn test_closed_store_rejects_everything() {
        let store = memory_store();
        let block = store.allocate().unwrap();
        store.close().unwrap();
        assert!(matches!(store.allocate(), Err(Error::Closed)));
        assert!(matches!(store.read(block.id), Err(Error::Closed)));
        assert!(matches!(store.write(&block), Err(Error::Closed)));
        assert!(matches!(store.free(block.id), Err(Error::Closed)));
        assert!(matches!(store.sync(), Err(Error::Closed)));
        assert!(matches!(store.is_empty(), Err(Error::Closed)));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.gv");
        let id = {
            let store = BlockStore::new(FileChannel::create(&path, 512).unwrap(), 16).unwrap();
            let mut block = store.allocate().unwrap();
            block.data[10] = 42;
            store.write(&block).unwrap();
            store.close().unwrap();
            block.id
        };

        let store = BlockStore::new(FileChannel::open(&path, 512).unwrap(), 16).unwrap();
        assert_eq!(store.read(id).unwrap().data[10], 42);
    }

    #[test]
    fn test_reopen_with_other_block_size_is_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.gv");
        {
            let store = BlockStore::new(FileChannel::create(&path, 4096).unwrap(), 16).unwrap();
            store.allocate().unwrap();
            store.close().unwrap();
        }
        assert!(matches!(
            FileChannel::open(&path, 8192),
            Err(Error::SizeMismatch { expected: 8192, actual: 4096 })
        ));
    }
}
