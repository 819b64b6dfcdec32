//! Fixed allocations
//!
//! A fixed allocation pins a caller-chosen range. The range is cut into the
//! largest buddy-aligned chunks that fit, and each chunk is carved out of
//! the tree by splitting the free block that currently covers it.

use alloc::vec::Vec;

use crate::{is_aligned, AllocError, AllocResult};

#[cfg(feature = "log")]
use log::{debug, error, warn};

use super::{buddy_allocator::BuddyAllocator, buddy_block::BlockId, pte::PteClass};

/// A caller-chosen range and the blocks that make it up
#[derive(Debug)]
pub struct FixedAlloc {
    pub start: u64,
    pub end: u64,
    /// Blocks in address order, of possibly different orders
    pub blocks: Vec<BlockId>,
}

impl BuddyAllocator {
    /// Allocate exactly `[base, base + len)`
    ///
    /// `len` is rounded up to the block size. Fails with
    /// [`AllocError::MemoryOverlap`] if any part of the range is in use and
    /// with [`AllocError::PteSizeMismatch`] if the covering PDE region is
    /// committed to another page size.
    pub fn alloc_fixed(&mut self, base: u64, len: u64, page_size: u64) -> AllocResult<u64> {
        if !self.is_initialized() {
            return Err(AllocError::NoMemory);
        }
        let Some(pte) = self.geometry.classify(page_size) else {
            warn!("buddy allocator: unsupported page size {:#x}", page_size);
            return Err(AllocError::InvalidParam);
        };

        let addr = self.alloc_fixed_pte(base, len, pte)?;
        self.alloc_made = true;
        Ok(addr)
    }

    pub(super) fn alloc_fixed_pte(&mut self, base: u64, len: u64, pte: PteClass) -> AllocResult<u64> {
        let blk_size = self.geometry.blk_size;
        if !is_aligned(base, blk_size) {
            error!(
                "buddy allocator: fixed base {:#x} is not aligned to {:#x}",
                base, blk_size
            );
            return Err(AllocError::InvalidParam);
        }
        if len == 0 {
            return Err(AllocError::InvalidParam);
        }

        let end = len
            .checked_next_multiple_of(blk_size)
            .and_then(|len| base.checked_add(len))
            .ok_or(AllocError::InvalidParam)?;
        if !self.geometry.contains_range(base, end) {
            error!(
                "buddy allocator: fixed range [{:#x}, {:#x}) outside [{:#x}, {:#x})",
                base, end, self.geometry.start, self.geometry.end
            );
            return Err(AllocError::InvalidParam);
        }
        if !self.range_is_free(base, end) {
            warn!(
                "buddy allocator: fixed range [{:#x}, {:#x}) is in use",
                base, end
            );
            return Err(AllocError::MemoryOverlap);
        }

        let mut falloc = FixedAlloc {
            start: base,
            end,
            blocks: Vec::new(),
        };
        self.do_alloc_fixed(&mut falloc, pte)?;

        let real_bytes: u64 = falloc.blocks.iter().map(|&id| self.blocks[id].len()).sum();
        debug!(
            "buddy allocator: fixed [{:#x}, {:#x}) in {} blocks, pte {:?}",
            base,
            end,
            falloc.blocks.len(),
            pte
        );
        let inserted = self.fixed.insert(base, end, falloc);
        assert!(
            inserted,
            "buddy allocator: fixed range [{:#x}, {:#x}) already indexed",
            base, end
        );

        self.bytes_alloced += len;
        self.bytes_alloced_real += real_bytes;
        Ok(base)
    }

    /// Whether `[base, end)` is clear of allocated blocks and fixed ranges
    fn range_is_free(&self, base: u64, end: u64) -> bool {
        !self.allocated.overlaps(base, end) && !self.fixed.overlaps(base, end)
    }

    /// Materialize every chunk of `falloc`; on failure the chunks made so far
    /// go back to the free lists.
    fn do_alloc_fixed(&mut self, falloc: &mut FixedAlloc, pte: PteClass) -> AllocResult {
        let mut addr = falloc.start;

        while addr < falloc.end {
            let order = self
                .geometry
                .fixed_chunk_order(self.geometry.shift(addr), falloc.end - addr);

            match self.make_fixed(addr, order, pte) {
                Ok(id) => {
                    self.list_remove(id);
                    self.mark_allocated(id);
                    falloc.blocks.push(id);
                }
                Err(err) => {
                    warn!(
                        "buddy allocator: fixed chunk {:#x} order {} failed: {:?}",
                        addr, order, err
                    );
                    for id in falloc.blocks.drain(..) {
                        self.release_block(id);
                    }
                    return Err(err);
                }
            }
            addr += self.geometry.order_len(order);
        }
        Ok(())
    }

    /// Produce the free block `[base, base + order_len(order))`
    ///
    /// Walks up from the target order until a free ancestor is found, then
    /// splits it back down toward `base`.
    fn make_fixed(&mut self, base: u64, order: usize, pte: PteClass) -> AllocResult<BlockId> {
        let offset = self.geometry.shift(base);
        let mut cur_order = order;
        let mut cur_base = base;

        let found = loop {
            let hit = self.free_lists[cur_order]
                .iter(&self.blocks)
                .find(|&id| self.blocks[id].start == cur_base);

            if let Some(id) = hit {
                let block = &self.blocks[id];
                if self.geometry.stamps_pte(block.order) && block.pte.conflicts_with(pte) {
                    warn!(
                        "buddy allocator: block {:#x} order {} is {:?}, wanted {:?}",
                        block.start, block.order, block.pte, pte
                    );
                    return Err(AllocError::PteSizeMismatch);
                }
                break id;
            }

            cur_order += 1;
            if cur_order > self.geometry.max_order {
                warn!("buddy allocator: no free block covers {:#x}", base);
                return Err(AllocError::NoMemory);
            }
            let mask = self.geometry.order_len(cur_order) - 1;
            cur_base = self.geometry.start + (offset & !mask);
        };

        let mut id = found;
        loop {
            let block = self.blocks[id];
            if block.start == base && block.order == order {
                return Ok(id);
            }

            if let Err(err) = self.split(id, pte) {
                self.coalesce(id);
                return Err(err);
            }
            let (left, right) = self.children_of(id);
            id = if base < self.blocks[right].start {
                left
            } else {
                right
            };
        }
    }

    /// Free the fixed allocation starting at `base`
    ///
    /// Returns the number of bytes returned to the free lists. Carveouts are
    /// refused; use [`release_carveout`](Self::release_carveout).
    pub fn free_fixed(&mut self, base: u64) -> AllocResult<u64> {
        if !self.is_initialized() {
            return Err(AllocError::NotAllocated);
        }
        if self.carveouts.iter().any(|co| co.base == base) {
            warn!(
                "buddy allocator: {:#x} is a carveout, release it instead",
                base
            );
            return Err(AllocError::InvalidParam);
        }
        self.do_free_fixed(base)
    }

    pub(super) fn do_free_fixed(&mut self, base: u64) -> AllocResult<u64> {
        let Some((_end, falloc)) = self.fixed.remove(base) else {
            warn!("buddy allocator: no fixed allocation at {:#x}", base);
            return Err(AllocError::NotAllocated);
        };
        let freed = self.release_fixed_blocks(falloc);
        debug!(
            "buddy allocator: free fixed [{:#x}, {:#x}), {:#x} bytes",
            base, _end, freed
        );
        Ok(freed)
    }

    /// Release every block of `falloc` and account the freed bytes
    pub(super) fn release_fixed_blocks(&mut self, falloc: FixedAlloc) -> u64 {
        let freed: u64 = falloc
            .blocks
            .into_iter()
            .map(|id| self.release_block(id))
            .sum();
        self.bytes_freed += freed;
        freed
    }
}

#[cfg(test)]
mod tests {
    use crate::buddy::{BuddyAllocator, BuddyFlags};
    use crate::AllocError;

    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;

    fn allocator() -> BuddyAllocator {
        let mut allocator = BuddyAllocator::new();
        allocator
            .init(MB, 4 * MB, 4 * KB, None, BuddyFlags::empty(), None)
            .unwrap();
        allocator
    }

    #[test]
    fn test_fixed_single_block() {
        let mut allocator = allocator();
        assert_eq!(allocator.alloc_fixed(2 * MB, 64 * KB, 0), Ok(2 * MB));
        assert!(allocator.is_allocated(2 * MB));
        assert!(allocator.is_allocated(2 * MB + 64 * KB - 1));
        assert!(!allocator.is_allocated(2 * MB + 64 * KB));
        assert!(allocator.is_consistent());

        let stats = allocator.stats();
        assert_eq!(stats.fixed_allocs, 1);
        assert_eq!(stats.orders[4].allocated, 1);
    }

    #[test]
    fn test_fixed_multi_block_decomposition() {
        let mut allocator = allocator();
        // 4K at +4K, 8K at +8K, 16K at +16K, 4K at +32K
        let base = MB + 4 * KB;
        allocator.alloc_fixed(base, 32 * KB, 0).unwrap();

        let stats = allocator.stats();
        assert_eq!(stats.orders[0].allocated, 2);
        assert_eq!(stats.orders[1].allocated, 1);
        assert_eq!(stats.orders[2].allocated, 1);
        assert_eq!(stats.bytes_alloced_real, 32 * KB);
        assert!(allocator.is_consistent());

        // Everything around it is still usable
        let addr = allocator.alloc(4 * KB).unwrap();
        assert!(!(base..base + 32 * KB).contains(&addr));
        assert!(allocator.is_consistent());
    }

    #[test]
    fn test_fixed_rounds_length() {
        let mut allocator = allocator();
        allocator.alloc_fixed(2 * MB, 5 * KB, 0).unwrap();
        let stats = allocator.stats();
        assert_eq!(stats.bytes_alloced, 5 * KB);
        assert_eq!(stats.bytes_alloced_real, 8 * KB);
        assert!(allocator.is_allocated(2 * MB + 8 * KB - 1));
    }

    #[test]
    fn test_fixed_free_accounting() {
        let mut allocator = allocator();
        let before = allocator.stats().bytes_freed;
        allocator.alloc_fixed(MB + 12 * KB, 20 * KB, 0).unwrap();
        let real = allocator.stats().bytes_alloced_real;
        assert_eq!(real, 20 * KB);

        assert_eq!(allocator.free_fixed(MB + 12 * KB), Ok(20 * KB));
        assert_eq!(allocator.stats().bytes_freed - before, real);
        assert_eq!(allocator.stats().orders[10].free, 1);
        assert_eq!(allocator.stats().fixed_allocs, 0);
        assert!(allocator.is_consistent());
    }

    #[test]
    fn test_fixed_rejects_invalid_ranges() {
        let mut allocator = allocator();
        assert_eq!(
            allocator.alloc_fixed(2 * MB + 1, 4 * KB, 0),
            Err(AllocError::InvalidParam)
        );
        assert_eq!(allocator.alloc_fixed(2 * MB, 0, 0), Err(AllocError::InvalidParam));
        assert_eq!(
            allocator.alloc_fixed(MB - 4 * KB, 8 * KB, 0),
            Err(AllocError::InvalidParam)
        );
        assert_eq!(
            allocator.alloc_fixed(5 * MB - 4 * KB, 8 * KB, 0),
            Err(AllocError::InvalidParam)
        );
        assert_eq!(
            allocator.alloc_fixed(2 * MB, u64::MAX, 0),
            Err(AllocError::InvalidParam)
        );
    }

    #[test]
    fn test_fixed_overlap() {
        let mut allocator = allocator();
        let addr = allocator.alloc(16 * KB).unwrap();
        assert_eq!(addr, MB);
        let before = allocator.stats();

        assert_eq!(
            allocator.alloc_fixed(MB + 8 * KB, 16 * KB, 0),
            Err(AllocError::MemoryOverlap)
        );
        allocator.alloc_fixed(2 * MB, 16 * KB, 0).unwrap();
        assert_eq!(
            allocator.alloc_fixed(2 * MB - 4 * KB, 8 * KB, 0),
            Err(AllocError::MemoryOverlap)
        );
        assert_eq!(
            allocator.alloc_fixed(MB, 4 * MB, 0),
            Err(AllocError::MemoryOverlap)
        );
        assert_eq!(allocator.stats().orders[2].allocated, before.orders[2].allocated + 1);
        assert!(allocator.is_consistent());
    }

    #[test]
    fn test_free_handles_fixed_base() {
        let mut allocator = allocator();
        allocator.alloc_fixed(3 * MB, 12 * KB, 0).unwrap();
        allocator.free(3 * MB);
        assert_eq!(allocator.stats().fixed_allocs, 0);
        assert_eq!(allocator.free_fixed(3 * MB), Err(AllocError::NotAllocated));
        assert_eq!(allocator.free_space(), 4 * MB);
        assert!(allocator.is_consistent());
    }

    #[test]
    fn test_fixed_then_general_allocations_avoid_it() {
        let mut allocator = allocator();
        allocator.alloc_fixed(MB, 2 * MB, 0).unwrap();
        for _ in 0..16 {
            let addr = allocator.alloc(64 * KB).unwrap();
            assert!(addr >= 3 * MB);
        }
        assert!(allocator.is_consistent());
    }
}
