//! Buddy allocator over a single address range
//!
//! Blocks live in an arena and form one binary tree per top-level tile.
//! Free blocks are kept in per-order lists, allocated single blocks in an
//! interval index keyed by start address. Fixed allocations and carveouts are
//! built on top in `fixed.rs` and `carveout.rs`.

use alloc::vec::Vec;

use crate::{AllocError, AllocResult};

#[cfg(feature = "log")]
use log::{debug, error, info, warn};

use super::{
    block_pool::{BlockPool, BlockPoolStats},
    buddy_block::{BlockId, BlockState, BuddyBlock},
    carveout::Carveout,
    fixed::FixedAlloc,
    geometry::{BuddyFlags, Geometry, ORDER_LIST_LEN},
    interval_index::IntervalIndex,
    order_list::OrderList,
    pte::{AddressSpace, PteClass},
    stats::{BuddyStats, OrderCounters},
};

#[cfg(feature = "tracking")]
use super::stats::MemoryStatsReporter;

/// Buddy allocator for one address range
///
/// All mutating calls take `&mut self`; wrap the allocator in a
/// [`LockedBuddyAllocator`](crate::LockedBuddyAllocator) to share it.
pub struct BuddyAllocator {
    pub(super) geometry: Geometry,
    pub(super) blocks: BlockPool,
    /// Free lists for each order
    pub(super) free_lists: [OrderList; ORDER_LIST_LEN],
    pub(super) counters: [OrderCounters; ORDER_LIST_LEN],
    /// Top-level tiles in address order; never discarded before teardown
    pub(super) roots: Vec<BlockId>,
    pub(super) allocated: IntervalIndex<BlockId>,
    pub(super) fixed: IntervalIndex<FixedAlloc>,
    pub(super) carveouts: Vec<Carveout>,
    pub(super) bytes_alloced: u64,
    pub(super) bytes_alloced_real: u64,
    pub(super) bytes_freed: u64,
    /// Set by the first successful public allocation; closes carveout setup
    pub(super) alloc_made: bool,
    initialized: bool,
}

impl BuddyAllocator {
    /// Create an uninitialized allocator, must call init()
    pub const fn new() -> Self {
        Self {
            geometry: Geometry::empty(),
            blocks: BlockPool::new(),
            free_lists: [const { OrderList::new() }; ORDER_LIST_LEN],
            counters: [OrderCounters::new(); ORDER_LIST_LEN],
            roots: Vec::new(),
            allocated: IntervalIndex::new(),
            fixed: IntervalIndex::new(),
            carveouts: Vec::new(),
            bytes_alloced: 0,
            bytes_alloced_real: 0,
            bytes_freed: 0,
            alloc_made: false,
            initialized: false,
        }
    }

    /// Initialize the allocator over `[base, base + size)`
    ///
    /// `max_order` of `None` lets the range decide. GVA allocators need the
    /// owning address space to classify page sizes.
    pub fn init(
        &mut self,
        base: u64,
        size: u64,
        blk_size: u64,
        max_order: Option<usize>,
        flags: BuddyFlags,
        aspace: Option<&dyn AddressSpace>,
    ) -> AllocResult {
        if self.initialized {
            error!("buddy allocator: already initialized");
            return Err(AllocError::InvalidParam);
        }

        let geometry = Geometry::new(base, size, blk_size, max_order, flags, aspace)?;
        self.reset();
        self.geometry = geometry;

        if let Err(err) = self.init_lists() {
            error!("buddy allocator: failed to populate free lists");
            self.reset();
            return Err(err);
        }
        self.initialized = true;

        debug!(
            "buddy allocator: init [{:#x}, {:#x}) blk {:#x} max order {} flags {:?}",
            geometry.start, geometry.end, geometry.blk_size, geometry.max_order, geometry.flags
        );
        if let Some(pte_order) = geometry.pte_blk_order {
            debug!("buddy allocator: PTE block order {}", pte_order);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.geometry = Geometry::empty();
        self.blocks.clear();
        for list in &mut self.free_lists {
            list.clear();
        }
        self.counters = [OrderCounters::new(); ORDER_LIST_LEN];
        self.roots.clear();
        self.allocated = IntervalIndex::new();
        self.fixed = IntervalIndex::new();
        self.carveouts.clear();
        self.bytes_alloced = 0;
        self.bytes_alloced_real = 0;
        self.bytes_freed = 0;
        self.alloc_made = false;
        self.initialized = false;
    }

    /// Tile `[start, end)` with the largest blocks that fit
    fn init_lists(&mut self) -> AllocResult {
        let end = self.geometry.end;
        let mut addr = self.geometry.start;

        while addr < end {
            let order = self.geometry.max_order_in(addr, end);
            let len = self.geometry.order_len(order);
            let id = self
                .blocks
                .alloc(BuddyBlock::new(addr, addr + len, order, None))
                .ok_or(AllocError::NoMemory)?;
            self.roots.push(id);
            self.list_add(id);
            addr += len;
        }
        Ok(())
    }

    /// Tear the allocator down
    ///
    /// Frees fixed allocations, then single blocks, then drops the free
    /// blocks. Panics if the per-order counters disagree afterwards.
    pub fn destroy(&mut self) {
        if !self.initialized {
            return;
        }

        while let Some((_, _, falloc)) = self.fixed.pop_first() {
            self.release_fixed_blocks(falloc);
        }
        self.carveouts.clear();

        while let Some((_, _, id)) = self.allocated.pop_first() {
            let freed = self.release_block(id);
            self.bytes_freed += freed;
        }

        for order in 0..ORDER_LIST_LEN {
            assert_eq!(
                self.counters[order].allocated, 0,
                "buddy allocator: excess alloced blocks at order {}",
                order
            );
            while let Some(id) = self.free_lists[order].front() {
                self.list_remove(id);
                self.blocks.dealloc(id);
            }
            assert_eq!(
                self.counters[order].free, 0,
                "buddy allocator: excess free blocks at order {}",
                order
            );
            assert_eq!(
                self.counters[order].split, 0,
                "buddy allocator: excess split blocks at order {}",
                order
            );
        }
        assert_eq!(
            self.blocks.live_count(),
            0,
            "buddy allocator: blocks leaked at teardown"
        );
        debug_assert!(self.allocated.is_empty() && self.fixed.is_empty());
        debug_assert!(self.free_lists.iter().all(OrderList::is_empty));

        debug!(
            "buddy allocator: destroyed [{:#x}, {:#x})",
            self.geometry.start, self.geometry.end
        );
        self.reset();
    }

    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// First managed address
    pub const fn base(&self) -> u64 {
        self.geometry.start
    }

    /// Managed length in bytes
    pub const fn length(&self) -> u64 {
        self.geometry.end - self.geometry.start
    }

    /// One past the last managed address
    pub const fn end(&self) -> u64 {
        self.geometry.end
    }

    pub const fn block_size(&self) -> u64 {
        self.geometry.blk_size
    }

    pub const fn max_order(&self) -> usize {
        self.geometry.max_order
    }

    pub const fn flags(&self) -> BuddyFlags {
        self.geometry.flags
    }

    /// Bytes not covered by any allocation
    pub fn free_space(&self) -> u64 {
        if !self.initialized {
            return 0;
        }
        self.length() - self.used_space()
    }

    /// Bytes covered by allocations, rounded to block orders
    pub fn used_space(&self) -> u64 {
        self.bytes_alloced_real - self.bytes_freed
    }

    /// Allocate `len` bytes with no page size preference
    pub fn alloc(&mut self, len: u64) -> AllocResult<u64> {
        self.alloc_pte(len, PteClass::Any, 0)
    }

    /// Allocate `len` bytes to be mapped with `page_size` pages
    ///
    /// With `align_required` the block is at least `align_size` bytes and its
    /// offset from [`base`](Self::base) is a multiple of `align_size`.
    pub fn alloc_with_page_size(
        &mut self,
        len: u64,
        page_size: u64,
        align_required: bool,
        align_size: u64,
    ) -> AllocResult<u64> {
        if !self.initialized {
            return Err(AllocError::NoMemory);
        }

        let Some(pte) = self.geometry.classify(page_size) else {
            warn!("buddy allocator: unsupported page size {:#x}", page_size);
            return Err(AllocError::InvalidParam);
        };

        let align_order = if align_required {
            if align_size == 0 || !align_size.is_power_of_two() {
                error!("buddy allocator: invalid alignment {:#x}", align_size);
                return Err(AllocError::InvalidParam);
            }
            self.geometry.order_of(align_size)
        } else {
            0
        };

        self.alloc_pte(len, pte, align_order)
    }

    fn alloc_pte(&mut self, len: u64, pte: PteClass, align_order: usize) -> AllocResult<u64> {
        if !self.initialized {
            return Err(AllocError::NoMemory);
        }
        if len == 0 {
            return Err(AllocError::InvalidParam);
        }

        let order = self.geometry.order_of(len).max(align_order);
        if order > self.geometry.max_order {
            debug!(
                "buddy allocator: request {:#x} needs order {} > max order {}",
                len, order, self.geometry.max_order
            );
            return Err(AllocError::NoMemory);
        }

        match self.do_alloc(order, pte) {
            Ok(id) => {
                let block = self.blocks[id];
                self.bytes_alloced += len;
                self.bytes_alloced_real += block.len();
                self.alloc_made = true;
                debug!(
                    "buddy allocator: alloc {:#x} -> [{:#x}, {:#x}) order {} pte {:?}",
                    len, block.start, block.end, order, block.pte
                );
                Ok(block.start)
            }
            Err(err) => {
                debug!(
                    "buddy allocator: alloc {:#x} (order {}, pte {:?}) failed",
                    len, order, pte
                );
                #[cfg(feature = "tracking")]
                MemoryStatsReporter::print_alloc_failure_stats(&self.stats(), len, order);
                Err(err)
            }
        }
    }

    /// Find a free block of `order`, split one of a higher order if needed,
    /// and register it in the allocated index.
    fn do_alloc(&mut self, order: usize, pte: PteClass) -> AllocResult<BlockId> {
        let mut id = (order..=self.geometry.max_order)
            .find_map(|split_order| self.find_free(split_order, pte))
            .ok_or(AllocError::NoMemory)?;

        while self.blocks[id].order != order {
            if let Err(err) = self.split(id, pte) {
                self.coalesce(id);
                return Err(err);
            }
            id = self.children_of(id).0;
        }

        self.list_remove(id);
        self.mark_allocated(id);
        let block = self.blocks[id];
        let inserted = self.allocated.insert(block.start, block.end, id);
        assert!(
            inserted,
            "buddy allocator: block [{:#x}, {:#x}) already in allocated index",
            block.start, block.end
        );
        Ok(id)
    }

    /// Free an allocation by its start address; `0` is ignored
    ///
    /// Handles both single-block and fixed allocations. Carveouts must be
    /// dropped with [`release_carveout`](Self::release_carveout).
    pub fn free(&mut self, addr: u64) {
        if addr == 0 || !self.initialized {
            return;
        }

        if self.fixed.get(addr).is_some() {
            if let Err(_err) = self.free_fixed(addr) {
                warn!(
                    "buddy allocator: fixed allocation at {:#x} not freed: {:?}",
                    addr, _err
                );
            }
            return;
        }

        let Some((_end, id)) = self.allocated.remove(addr) else {
            warn!("buddy allocator: free of unallocated address {:#x}", addr);
            return;
        };
        let freed = self.release_block(id);
        self.bytes_freed += freed;
        debug!("buddy allocator: free [{:#x}, {:#x})", addr, _end);
    }

    /// Whether `addr` lies inside an allocation or fixed allocation
    pub fn is_allocated(&self, addr: u64) -> bool {
        self.allocated_range(addr).is_some()
    }

    /// `[start, end)` of the allocation or fixed allocation holding `addr`
    pub fn allocated_range(&self, addr: u64) -> Option<(u64, u64)> {
        if let Some((start, end, _)) = self.allocated.find_containing(addr) {
            return Some((start, end));
        }
        self.fixed
            .find_containing(addr)
            .map(|(start, end, _)| (start, end))
    }

    /// Push a block on the free list of its order
    ///
    /// Big-page blocks of a GVA space go to the tail so big and small
    /// lookups each find their kind at their end of the list.
    pub(super) fn list_add(&mut self, id: BlockId) {
        let (order, pte) = {
            let block = &self.blocks[id];
            (block.order, block.pte)
        };
        if self.geometry.is_gva() && pte == PteClass::Big {
            self.free_lists[order].push_back(&mut self.blocks, id);
        } else {
            self.free_lists[order].push_front(&mut self.blocks, id);
        }
        self.counters[order].free += 1;
    }

    pub(super) fn list_remove(&mut self, id: BlockId) {
        let order = self.blocks[id].order;
        self.free_lists[order].remove(&mut self.blocks, id);
        self.counters[order].free -= 1;
    }

    /// Candidate free block of `order` for a `pte` request
    fn find_free(&self, order: usize, pte: PteClass) -> Option<BlockId> {
        if order > self.geometry.max_order {
            return None;
        }
        let list = &self.free_lists[order];
        let candidate = if self.geometry.is_gva() && pte == PteClass::Big {
            list.back()
        } else {
            list.front()
        }?;

        if self.blocks[candidate].pte.conflicts_with(pte) {
            None
        } else {
            Some(candidate)
        }
    }

    pub(super) fn children_of(&self, id: BlockId) -> (BlockId, BlockId) {
        match self.blocks[id].state {
            BlockState::Split { left, right } => (left, right),
            state => panic!("buddy allocator: block {:?} is not split ({:?})", id, state),
        }
    }

    /// Split a free block into two free halves
    ///
    /// Children at or below the PTE block order commit to `pte`; an `Any`
    /// request keeps the class of the parent.
    pub(super) fn split(&mut self, id: BlockId, pte: PteClass) -> AllocResult {
        let parent = self.blocks[id];
        assert!(
            parent.is_free(),
            "buddy allocator: split of non-free block [{:#x}, {:#x})",
            parent.start,
            parent.end
        );
        if parent.order == 0 {
            error!(
                "buddy allocator: cannot split order 0 block at {:#x}",
                parent.start
            );
            return Err(AllocError::InvalidParam);
        }

        let order = parent.order - 1;
        let half = self.geometry.order_len(order);
        let child_pte = if self.geometry.stamps_pte(order) {
            match pte {
                PteClass::Any => parent.pte,
                pte => pte,
            }
        } else {
            PteClass::Any
        };

        let mut left = BuddyBlock::new(parent.start, parent.start + half, order, Some(id));
        let mut right = BuddyBlock::new(parent.start + half, parent.end, order, Some(id));
        left.pte = child_pte;
        right.pte = child_pte;

        let left = self.blocks.alloc(left).ok_or(AllocError::NoMemory)?;
        let Some(right) = self.blocks.alloc(right) else {
            self.blocks.dealloc(left);
            return Err(AllocError::NoMemory);
        };
        self.blocks[left].buddy = Some(right);
        self.blocks[right].buddy = Some(left);

        self.list_remove(id);
        self.blocks[id].state = BlockState::Split { left, right };
        self.counters[parent.order].split += 1;

        self.list_add(left);
        self.list_add(right);
        Ok(())
    }

    /// Merge a free block with its free buddy, repeatedly, as far up the
    /// tree as possible.
    pub(super) fn coalesce(&mut self, mut id: BlockId) {
        loop {
            let block = self.blocks[id];
            if !block.is_free() {
                return;
            }
            let Some(buddy) = block.buddy else {
                return;
            };
            if !self.blocks[buddy].is_free() {
                return;
            }

            let Some(parent) = block.parent else {
                panic!(
                    "buddy allocator: block [{:#x}, {:#x}) has a buddy but no parent",
                    block.start, block.end
                );
            };
            let (left, right) = self.children_of(parent);
            assert!(
                (left == id && right == buddy) || (left == buddy && right == id),
                "buddy allocator: parent of [{:#x}, {:#x}) does not own it",
                block.start,
                block.end
            );

            self.list_remove(id);
            self.list_remove(buddy);

            let parent_order = self.blocks[parent].order;
            self.blocks[parent].state = BlockState::Free;
            assert!(
                self.counters[parent_order].split > 0,
                "buddy allocator: split counter underflow at order {}",
                parent_order
            );
            self.counters[parent_order].split -= 1;
            self.clear_pte_if_region(parent);
            self.list_add(parent);

            self.blocks.dealloc(id);
            self.blocks.dealloc(buddy);
            id = parent;
        }
    }

    /// Turn a free, unlisted block into an allocated one
    pub(super) fn mark_allocated(&mut self, id: BlockId) {
        let block = &mut self.blocks[id];
        debug_assert!(!block.link.listed);
        block.state = BlockState::Allocated;
        self.counters[block.order].allocated += 1;
    }

    /// Return an allocated block to its free list and coalesce it
    ///
    /// Returns the size of the block.
    pub(super) fn release_block(&mut self, id: BlockId) -> u64 {
        let block = &mut self.blocks[id];
        assert!(
            block.is_allocated(),
            "buddy allocator: double free of [{:#x}, {:#x})",
            block.start,
            block.end
        );
        block.state = BlockState::Free;
        let (order, len) = (block.order, block.len());

        self.counters[order].allocated -= 1;
        self.clear_pte_if_region(id);
        self.list_add(id);
        self.coalesce(id);
        len
    }

    /// A free block spanning a whole PDE region holds no mappings, so the
    /// region is no longer committed to a page size.
    fn clear_pte_if_region(&mut self, id: BlockId) {
        let block = &mut self.blocks[id];
        if self.geometry.pte_blk_order == Some(block.order) {
            block.pte = PteClass::Any;
        }
    }

    /// Snapshot of the allocator counters
    pub fn stats(&self) -> BuddyStats {
        BuddyStats {
            block_size: self.geometry.blk_size,
            max_order: self.geometry.max_order,
            total_bytes: if self.initialized { self.length() } else { 0 },
            free_bytes: self.free_space(),
            bytes_alloced: self.bytes_alloced,
            bytes_alloced_real: self.bytes_alloced_real,
            bytes_freed: self.bytes_freed,
            fixed_allocs: self.fixed.len(),
            carveouts: self.carveouts.len(),
            orders: self.counters,
        }
    }

    /// Block arena usage
    pub fn pool_stats(&self) -> BlockPoolStats {
        self.blocks.get_stats()
    }

    /// Print the allocator layout and block distribution
    pub fn print_stats(&self) {
        let _stats = self.stats();
        info!("========== Buddy Allocator Info ==========");
        info!(
            "Range: [{:#x}, {:#x}) ({} MB)",
            self.geometry.start,
            self.geometry.end,
            _stats.total_bytes / (1024 * 1024)
        );
        info!(
            "Block size: {:#x}, max order: {}, flags: {:?}",
            _stats.block_size, _stats.max_order, self.geometry.flags
        );
        info!(
            "Bytes alloced: {:#x} (real {:#x}), freed: {:#x}, free: {:#x}",
            _stats.bytes_alloced, _stats.bytes_alloced_real, _stats.bytes_freed, _stats.free_bytes
        );
        info!("Blocks by order:");
        for order in 0..=_stats.max_order {
            let _counters = _stats.orders[order];
            if _counters.is_zero() {
                continue;
            }
            info!(
                "  Order {:2}: free {}, split {}, alloced {}",
                order, _counters.free, _counters.split, _counters.allocated
            );
        }
        info!("Fixed allocations: {}", _stats.fixed_allocs);
        for (_start, _end, _falloc) in self.fixed.iter() {
            info!(
                "  [{:#x}, {:#x}) in {} blocks",
                _start,
                _end,
                _falloc.blocks.len()
            );
        }
        info!("Carveouts: {}", _stats.carveouts);
        for _co in &self.carveouts {
            info!(
                "  {}: [{:#x}, {:#x})",
                _co.name,
                _co.base,
                _co.base + _co.length
            );
        }
        info!("==========================================");
    }

    /// Walk every tree and validate the structural invariants
    ///
    /// Checks that leaves tile `[start, end)` without gaps, that split
    /// children partition their parent, that free blocks are listed, that
    /// allocated blocks are indexed, and that the counters match.
    pub fn is_consistent(&self) -> bool {
        if !self.initialized {
            return self.blocks.live_count() == 0;
        }

        let mut counters = [OrderCounters::new(); ORDER_LIST_LEN];
        let mut expected = self.geometry.start;
        let mut stack = Vec::new();

        for &root in &self.roots {
            stack.push(root);
            while let Some(id) = stack.pop() {
                let Some(block) = self.blocks.get(id) else {
                    error!("buddy check: dangling handle {:?}", id);
                    return false;
                };
                match block.state {
                    BlockState::Split { left, right } => {
                        if !self.check_children(id, block, left, right) {
                            return false;
                        }
                        counters[block.order].split += 1;
                        stack.push(right);
                        stack.push(left);
                    }
                    BlockState::Free | BlockState::Allocated => {
                        if block.start != expected {
                            error!(
                                "buddy check: gap or overlap at {:#x}, leaf starts at {:#x}",
                                expected, block.start
                            );
                            return false;
                        }
                        expected = block.end;

                        if block.is_free() {
                            if !block.link.listed {
                                error!("buddy check: free block {:#x} not listed", block.start);
                                return false;
                            }
                            counters[block.order].free += 1;
                        } else {
                            if block.link.listed || !self.is_owned(id, block) {
                                error!(
                                    "buddy check: allocated block {:#x} not indexed",
                                    block.start
                                );
                                return false;
                            }
                            counters[block.order].allocated += 1;
                        }
                    }
                }
            }
        }

        if expected != self.geometry.end {
            error!("buddy check: leaves end at {:#x}", expected);
            return false;
        }
        if counters != self.counters {
            error!("buddy check: counters out of sync");
            return false;
        }
        self.free_lists
            .iter()
            .zip(counters.iter())
            .all(|(list, counters)| list.len() == counters.free)
    }

    fn check_children(
        &self,
        id: BlockId,
        parent: &BuddyBlock,
        left: BlockId,
        right: BlockId,
    ) -> bool {
        let (Some(l), Some(r)) = (self.blocks.get(left), self.blocks.get(right)) else {
            error!("buddy check: split block {:#x} lost a child", parent.start);
            return false;
        };
        let ok = !parent.link.listed
            && l.parent == Some(id)
            && r.parent == Some(id)
            && l.buddy == Some(right)
            && r.buddy == Some(left)
            && l.order + 1 == parent.order
            && r.order + 1 == parent.order
            && l.start == parent.start
            && l.end == r.start
            && r.end == parent.end;
        if !ok {
            error!(
                "buddy check: children of [{:#x}, {:#x}) do not partition it",
                parent.start, parent.end
            );
        }
        ok
    }

    /// Whether an allocated block is recorded in one of the indices
    fn is_owned(&self, id: BlockId, block: &BuddyBlock) -> bool {
        if self.allocated.get(block.start) == Some(&id) {
            return true;
        }
        match self.fixed.find_containing(block.start) {
            Some((_, _, falloc)) => falloc.blocks.contains(&id),
            None => false,
        }
    }
}

impl Default for BuddyAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;

    fn allocator(base: u64, size: u64) -> BuddyAllocator {
        let mut allocator = BuddyAllocator::new();
        allocator
            .init(base, size, 4 * KB, None, BuddyFlags::empty(), None)
            .unwrap();
        allocator
    }

    #[test]
    fn test_buddy_allocator_init() {
        let allocator = allocator(0, MB + 4 * KB);
        assert!(allocator.is_initialized());
        assert_eq!(allocator.base(), 4 * KB);
        assert_eq!(allocator.end(), MB + 4 * KB);
        assert_eq!(allocator.length(), MB);
        assert_eq!(allocator.max_order(), 8);
        assert_eq!(allocator.free_space(), MB);
        assert_eq!(allocator.stats().orders[8].free, 1);
        assert!(allocator.is_consistent());
    }

    #[test]
    fn test_init_tiles_uneven_range() {
        // Base 0 loses one block: 255 = 128 + 64 + ... + 1
        let allocator = allocator(0, MB);
        let stats = allocator.stats();
        assert_eq!(allocator.max_order(), 7);
        for order in 0..=7 {
            assert_eq!(stats.orders[order].free, 1, "order {}", order);
        }
        assert_eq!(allocator.roots.len(), 8);
        assert_eq!(stats.listed_free_bytes(), allocator.length());
        assert!(allocator.is_consistent());
    }

    #[test]
    fn test_init_twice_fails() {
        let mut allocator = allocator(MB, MB);
        assert_eq!(
            allocator.init(MB, MB, 4 * KB, None, BuddyFlags::empty(), None),
            Err(AllocError::InvalidParam)
        );
    }

    #[test]
    fn test_uninitialized_allocator() {
        let mut allocator = BuddyAllocator::new();
        assert_eq!(allocator.alloc(4 * KB), Err(AllocError::NoMemory));
        assert_eq!(allocator.free_space(), 0);
        allocator.free(0x1000);
        assert!(allocator.is_consistent());
    }

    #[test]
    fn test_alloc_and_free_siblings() {
        let mut allocator = allocator(0, MB + 4 * KB);

        let a = allocator.alloc(4 * KB).unwrap();
        assert_eq!(a, 4 * KB);
        let b = allocator.alloc(8 * KB).unwrap();
        assert_eq!(b, 4 * KB + 8 * KB);
        assert!(allocator.is_consistent());

        allocator.free(a);
        let stats = allocator.stats();
        assert_eq!(stats.orders[1].free, 1);
        assert_eq!(stats.orders[1].allocated, 1);

        allocator.free(b);
        let stats = allocator.stats();
        assert_eq!(stats.orders[8].free, 1);
        for order in 0..8 {
            assert!(stats.orders[order].is_zero(), "order {}", order);
        }
        assert!(stats.orders[8].split == 0);
        assert!(allocator.is_consistent());
    }

    #[test]
    fn test_alloc_free_restores_counters() {
        let mut allocator = allocator(MB, 4 * MB);
        let _keep = allocator.alloc(12 * KB).unwrap();
        let before = allocator.stats().orders;

        let addr = allocator.alloc(64 * KB).unwrap();
        assert_ne!(allocator.stats().orders, before);
        allocator.free(addr);
        assert_eq!(allocator.stats().orders, before);
    }

    #[test]
    fn test_alloc_rounds_to_order() {
        let mut allocator = allocator(MB, MB);
        let addr = allocator.alloc(12 * KB).unwrap();
        assert_eq!(addr % (16 * KB), 0);
        assert_eq!(allocator.stats().bytes_alloced, 12 * KB);
        assert_eq!(allocator.stats().bytes_alloced_real, 16 * KB);
        assert_eq!(allocator.free_space(), MB - 16 * KB);

        allocator.free(addr);
        assert_eq!(allocator.stats().bytes_freed, 16 * KB);
        assert_eq!(allocator.free_space(), MB);
    }

    #[test]
    fn test_alloc_rejects_bad_lengths() {
        let mut allocator = allocator(MB, MB);
        assert_eq!(allocator.alloc(0), Err(AllocError::InvalidParam));
        assert_eq!(allocator.alloc(2 * MB), Err(AllocError::NoMemory));
    }

    #[test]
    fn test_exhaustion() {
        let mut allocator = allocator(MB, 64 * KB);
        let mut addrs = vec![];
        for _ in 0..16 {
            addrs.push(allocator.alloc(4 * KB).unwrap());
        }
        assert_eq!(allocator.alloc(4 * KB), Err(AllocError::NoMemory));
        assert_eq!(allocator.free_space(), 0);

        allocator.free(addrs[3]);
        assert_eq!(allocator.alloc(4 * KB), Ok(addrs[3]));
        for addr in addrs {
            allocator.free(addr);
        }
        assert_eq!(allocator.stats().orders[4].free, 1);
        assert!(allocator.is_consistent());
    }

    #[test]
    fn test_free_unknown_address_is_ignored() {
        let mut allocator = allocator(MB, MB);
        let addr = allocator.alloc(8 * KB).unwrap();
        let before = allocator.stats();

        allocator.free(0);
        allocator.free(addr + 4 * KB);
        allocator.free(3 * MB);
        assert_eq!(allocator.stats().orders, before.orders);

        allocator.free(addr);
        allocator.free(addr);
        assert_eq!(allocator.stats().bytes_freed, 8 * KB);
        assert!(allocator.is_consistent());
    }

    #[test]
    fn test_alignment() {
        let mut allocator = allocator(MB, MB);
        let _small = allocator.alloc(4 * KB).unwrap();
        let addr = allocator
            .alloc_with_page_size(4 * KB, 4 * KB, true, 64 * KB)
            .unwrap();
        assert_eq!(addr % (64 * KB), 0);
        assert_eq!(allocator.stats().bytes_alloced_real, 4 * KB + 64 * KB);

        assert_eq!(
            allocator.alloc_with_page_size(4 * KB, 4 * KB, true, 3 * KB),
            Err(AllocError::InvalidParam)
        );
        assert_eq!(
            allocator.alloc_with_page_size(4 * KB, 4 * KB, true, 2 * MB),
            Err(AllocError::NoMemory)
        );
    }

    #[test]
    fn test_alignment_is_relative_to_start() {
        // Start lands at 4K once base 0 is skipped
        let mut allocator = allocator(0, MB + 4 * KB);
        let addr = allocator
            .alloc_with_page_size(4 * KB, 0, true, 64 * KB)
            .unwrap();
        assert_eq!((addr - allocator.base()) % (64 * KB), 0);
        assert_eq!(allocator.stats().bytes_alloced_real, 64 * KB);
        assert!(allocator.is_consistent());
    }

    #[test]
    fn test_split_partitions_parent() {
        let mut allocator = allocator(MB, MB);
        let root = allocator.roots[0];

        for _ in 0..8 {
            let parent = allocator.blocks[root];
            let mut id = root;
            // Walk to the current free leaf on the left edge
            while let BlockState::Split { left, .. } = allocator.blocks[id].state {
                id = left;
            }
            let leaf = allocator.blocks[id];
            allocator.split(id, PteClass::Any).unwrap();

            let (left, right) = allocator.children_of(id);
            let (l, r) = (allocator.blocks[left], allocator.blocks[right]);
            assert_eq!(l.order + 1, leaf.order);
            assert_eq!(r.order + 1, leaf.order);
            assert_eq!(l.start, leaf.start);
            assert_eq!(l.end, r.start);
            assert_eq!(r.end, leaf.end);
            assert_eq!(l.buddy, Some(right));
            assert_eq!(r.buddy, Some(left));
            assert_eq!(parent.start, MB);
            assert!(allocator.is_consistent());
        }

        let mut id = root;
        while let BlockState::Split { left, .. } = allocator.blocks[id].state {
            id = left;
        }
        assert_eq!(allocator.blocks[id].order, 0);
        assert_eq!(
            allocator.split(id, PteClass::Any),
            Err(AllocError::InvalidParam)
        );
    }

    #[test]
    fn test_split_then_coalesce_restores_block() {
        let mut allocator = allocator(MB, MB);
        let root = allocator.roots[0];
        let before = allocator.blocks[root];
        let counters = allocator.counters;

        allocator.split(root, PteClass::Any).unwrap();
        let (left, _) = allocator.children_of(root);
        allocator.coalesce(left);

        let after = allocator.blocks[root];
        assert!(after.is_free());
        assert_eq!((after.start, after.end, after.order), (before.start, before.end, before.order));
        assert_eq!(allocator.counters, counters);
        assert_eq!(allocator.blocks.live_count(), 1);
        assert!(allocator.is_consistent());
    }

    #[test]
    fn test_destroy_releases_everything() {
        let mut allocator = allocator(MB, 4 * MB);
        let _a = allocator.alloc(4 * KB).unwrap();
        let _b = allocator.alloc(100 * KB).unwrap();
        allocator.alloc_fixed(3 * MB, 64 * KB, 0).unwrap();

        allocator.destroy();
        assert!(!allocator.is_initialized());
        assert_eq!(allocator.blocks.live_count(), 0);
        assert!(allocator.is_consistent());

        // Reusable after teardown
        allocator
            .init(MB, MB, 4 * KB, None, BuddyFlags::empty(), None)
            .unwrap();
        assert_eq!(allocator.alloc(4 * KB), Ok(MB));
    }

    #[test]
    fn test_is_allocated() {
        let mut allocator = allocator(MB, MB);
        let addr = allocator.alloc(16 * KB).unwrap();
        assert!(allocator.is_allocated(addr));
        assert!(allocator.is_allocated(addr + 16 * KB - 1));
        assert!(!allocator.is_allocated(addr + 16 * KB));
        assert_eq!(
            allocator.allocated_range(addr + 4 * KB),
            Some((addr, addr + 16 * KB))
        );
        allocator.free(addr);
        assert!(!allocator.is_allocated(addr));
    }
}
