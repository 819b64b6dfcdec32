//! Block pool for the buddy tree
//!
//! Provides a single arena of block slots. Vacant slots form a free list so
//! handles of discarded blocks are recycled by later splits.

use alloc::vec::Vec;
use core::ops::{Index, IndexMut};

use super::buddy_block::{BlockId, BuddyBlock};

enum Slot {
    Occupied(BuddyBlock),
    Vacant { next: Option<u32> },
}

/// Block pool - every block of one allocator lives here
///
/// Handles stay valid until [`BlockPool::dealloc`] is called on them. Using a
/// handle after that is a bookkeeping bug and panics.
pub struct BlockPool {
    slots: Vec<Slot>,
    /// Free list head - first vacant slot
    free_head: Option<u32>,
    /// Current number of live blocks
    live: usize,
    /// Allocation statistics
    total_allocations: usize,
    total_deallocations: usize,
}

impl BlockPool {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            live: 0,
            total_allocations: 0,
            total_deallocations: 0,
        }
    }

    /// Store a block and return its handle
    ///
    /// Returns `None` when the pool cannot grow.
    pub fn alloc(&mut self, block: BuddyBlock) -> Option<BlockId> {
        let idx = match self.free_head {
            Some(idx) => {
                let slot = &mut self.slots[idx as usize];
                self.free_head = match slot {
                    Slot::Vacant { next } => *next,
                    Slot::Occupied(_) => panic!("block pool: free slot {} is occupied", idx),
                };
                *slot = Slot::Occupied(block);
                idx
            }
            None => {
                let idx = u32::try_from(self.slots.len()).ok()?;
                self.slots.try_reserve(1).ok()?;
                self.slots.push(Slot::Occupied(block));
                idx
            }
        };

        self.live += 1;
        self.total_allocations += 1;
        Some(BlockId(idx))
    }

    /// Discard a block and return its last contents
    pub fn dealloc(&mut self, id: BlockId) -> BuddyBlock {
        let slot = core::mem::replace(
            &mut self.slots[id.index()],
            Slot::Vacant {
                next: self.free_head,
            },
        );
        match slot {
            Slot::Occupied(block) => {
                self.free_head = Some(id.0);
                self.live -= 1;
                self.total_deallocations += 1;
                block
            }
            Slot::Vacant { .. } => panic!("block pool: double discard of block {:?}", id),
        }
    }

    pub fn get(&self, id: BlockId) -> Option<&BuddyBlock> {
        match self.slots.get(id.index()) {
            Some(Slot::Occupied(block)) => Some(block),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: BlockId) -> Option<&mut BuddyBlock> {
        match self.slots.get_mut(id.index()) {
            Some(Slot::Occupied(block)) => Some(block),
            _ => None,
        }
    }

    /// Get the number of live blocks
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Drop every block at once
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free_head = None;
        self.live = 0;
    }

    /// Get pool statistics
    pub fn get_stats(&self) -> BlockPoolStats {
        BlockPoolStats {
            capacity: self.slots.len(),
            live_blocks: self.live,
            total_allocations: self.total_allocations,
            total_deallocations: self.total_deallocations,
        }
    }
}

impl Default for BlockPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<BlockId> for BlockPool {
    type Output = BuddyBlock;

    fn index(&self, id: BlockId) -> &BuddyBlock {
        match self.get(id) {
            Some(block) => block,
            None => panic!("block pool: dangling block handle {:?}", id),
        }
    }
}

impl IndexMut<BlockId> for BlockPool {
    fn index_mut(&mut self, id: BlockId) -> &mut BuddyBlock {
        match self.get_mut(id) {
            Some(block) => block,
            None => panic!("block pool: dangling block handle {:?}", id),
        }
    }
}

/// Block pool statistics
#[derive(Debug, Default, Clone)]
pub struct BlockPoolStats {
    pub capacity: usize,
    pub live_blocks: usize,
    pub total_allocations: usize,
    pub total_deallocations: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(start: u64) -> BuddyBlock {
        BuddyBlock::new(start, start + 0x1000, 0, None)
    }

    #[test]
    fn test_alloc_dealloc() {
        let mut pool = BlockPool::new();

        let id1 = pool.alloc(block(0x1000)).unwrap();
        let id2 = pool.alloc(block(0x2000)).unwrap();
        assert_ne!(id1, id2);
        assert_eq!(pool.live_count(), 2);
        assert_eq!(pool[id2].start, 0x2000);

        let old = pool.dealloc(id1);
        assert_eq!(old.start, 0x1000);
        assert_eq!(pool.live_count(), 1);
        assert!(pool.get(id1).is_none());
    }

    #[test]
    fn test_slot_reuse() {
        let mut pool = BlockPool::new();

        let id1 = pool.alloc(block(0x1000)).unwrap();
        let _id2 = pool.alloc(block(0x2000)).unwrap();
        pool.dealloc(id1);

        let id3 = pool.alloc(block(0x3000)).unwrap();
        assert_eq!(id3, id1);
        assert_eq!(pool[id3].start, 0x3000);
        assert_eq!(pool.get_stats().capacity, 2);
    }

    #[test]
    fn test_stats() {
        let mut pool = BlockPool::new();

        let id1 = pool.alloc(block(0x1000)).unwrap();
        let _id2 = pool.alloc(block(0x2000)).unwrap();

        let stats = pool.get_stats();
        assert_eq!(stats.live_blocks, 2);
        assert_eq!(stats.total_allocations, 2);
        assert_eq!(stats.total_deallocations, 0);

        pool.dealloc(id1);
        let stats2 = pool.get_stats();
        assert_eq!(stats2.live_blocks, 1);
        assert_eq!(stats2.total_deallocations, 1);
    }

    #[test]
    #[should_panic]
    fn test_double_discard_panics() {
        let mut pool = BlockPool::new();
        let id = pool.alloc(block(0x1000)).unwrap();
        pool.dealloc(id);
        pool.dealloc(id);
    }

    #[test]
    fn test_index_mut() {
        let mut pool = BlockPool::new();
        let id = pool.alloc(block(0x1000)).unwrap();
        pool[id].order = 3;
        assert_eq!(pool.get(id).map(|b| b.order), Some(3));
    }
}
