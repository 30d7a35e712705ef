//! Free-list block allocator with pending-block tracking.
//!
//! Every block has the same size, and there is only ever one writer, so a
//! LIFO free list is enough. The free list can always be rebuilt from a walk
//! of the committed indexes, which is what recovery does.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::error::{BlockId, Error, Result};

/// Free-list based block allocator.
///
/// Blocks are handed out from the free list first. When it is empty the
/// high-water mark advances and the caller extends the channel.
pub struct BlockAllocator {
    state: Mutex<AllocState>,
}

struct AllocState {
    /// Free blocks available for reuse (LIFO).
    free: Vec<BlockId>,
    /// Membership index over `free`.
    free_set: HashSet<BlockId>,
    /// Next block ID to hand out if the free list is empty.
    next_block: BlockId,
    /// Blocks allocated since the last publish.
    pending: HashSet<BlockId>,
}

impl BlockAllocator {
    /// Creates an allocator whose high-water mark is `next_block`.
    pub fn new(next_block: BlockId) -> Self {
        Self {
            state: Mutex::new(AllocState {
                free: Vec::new(),
                free_set: HashSet::new(),
                next_block,
                pending: HashSet::new(),
            }),
        }
    }

    /// Allocates a block and marks it pending.
    ///
    /// Prefers reusing freed blocks over growing the medium.
    pub fn allocate(&self) -> BlockId {
        let mut state = self.state.lock();
        let block_id = match state.free.pop() {
            Some(block_id) => {
                state.free_set.remove(&block_id);
                block_id
            },
            None => {
                let block_id = state.next_block;
                state.next_block += 1;
                block_id
            },
        };
        state.pending.insert(block_id);
        block_id
    }

    /// Returns true if `block_id` is currently allocated.
    pub fn is_allocated(&self, block_id: BlockId) -> bool {
        let state = self.state.lock();
        block_id < state.next_block && !state.free_set.contains(&block_id)
    }

    /// Returns true if `block_id` was allocated since the last publish.
    pub fn is_pending(&self, block_id: BlockId) -> bool {
        self.state.lock().pending.contains(&block_id)
    }

    /// Frees a pending block immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the block is not allocated.
    /// Returns [`Error::BlockInUse`] if the block belongs to a published
    /// snapshot; those blocks go through [`release`](Self::release) instead.
    pub fn free(&self, block_id: BlockId) -> Result<()> {
        let mut state = self.state.lock();
        if block_id >= state.next_block || state.free_set.contains(&block_id) {
            return Err(Error::NotFound { block_id });
        }
        if !state.pending.remove(&block_id) {
            return Err(Error::BlockInUse { block_id });
        }
        state.push_free(block_id);
        Ok(())
    }

    /// Returns published blocks to the free list once no reader can reach
    /// them. Already-free IDs are ignored.
    pub fn release(&self, block_ids: &[BlockId]) {
        let mut state = self.state.lock();
        for &block_id in block_ids {
            if block_id < state.next_block && !state.free_set.contains(&block_id) {
                state.pending.remove(&block_id);
                state.push_free(block_id);
            }
        }
    }

    /// Marks every pending block as published.
    pub fn publish(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.pending.len();
        state.pending.clear();
        count
    }

    /// Frees every pending block. Returns the freed IDs.
    pub fn discard_pending(&self) -> Vec<BlockId> {
        let mut state = self.state.lock();
        let mut discarded: Vec<BlockId> = state.pending.drain().collect();
        discarded.sort_unstable();
        for &block_id in &discarded {
            state.push_free(block_id);
        }
        discarded
    }

    /// Returns the number of pending blocks.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns the high-water mark: one past the largest ID ever handed out.
    pub fn next_block(&self) -> BlockId {
        self.state.lock().next_block
    }

    /// Returns the number of blocks on the free list.
    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Returns a copy of the free list in allocation order (last is next).
    pub fn free_list(&self) -> Vec<BlockId> {
        self.state.lock().free.clone()
    }

    /// Replaces the free list. Used when opening a store.
    pub fn init_free_list(&self, free: Vec<BlockId>) {
        let mut state = self.state.lock();
        state.free_set = free.iter().copied().collect();
        state.free = free;
    }
}

impl AllocState {
    fn push_free(&mut self, block_id: BlockId) {
        if self.free_set.insert(block_id) {
            self.free.push(block_id);
        }
    }
}
