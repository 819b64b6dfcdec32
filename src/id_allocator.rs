//! Resource ID allocator built on the buddy allocator.
//!
//! Each ID is one block of size 1. Contiguous ID runs are rounded up to a
//! power of two, the same way address allocations are.

#[cfg(feature = "log")]
use log::warn;

use crate::buddy::{BuddyAllocator, BuddyFlags};
use crate::{AllocError, AllocResult, IdAllocator};

/// Buddy-backed [`IdAllocator`]
///
/// ID 0 is never handed out, a pool starting at 0 begins at 1. Alignment is
/// relative to the first ID of the pool.
pub struct BuddyIdAllocator {
    inner: BuddyAllocator,
}

impl BuddyIdAllocator {
    pub const fn new() -> Self {
        Self {
            inner: BuddyAllocator::new(),
        }
    }

    /// Manage IDs `[first_id, first_id + count)`
    pub fn init(&mut self, first_id: usize, count: usize) -> AllocResult {
        self.inner.init(
            first_id as u64,
            count as u64,
            1,
            None,
            BuddyFlags::empty(),
            None,
        )
    }

    /// The underlying allocator
    pub fn allocator(&self) -> &BuddyAllocator {
        &self.inner
    }
}

impl Default for BuddyIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator for BuddyIdAllocator {
    fn alloc_id(&mut self, count: usize, alignment: usize) -> AllocResult<usize> {
        if count == 0 || !alignment.is_power_of_two() {
            return Err(AllocError::InvalidParam);
        }
        let id = self.inner.alloc_with_page_size(
            count as u64,
            0,
            alignment > 1,
            alignment as u64,
        )?;
        Ok(id as usize)
    }

    fn dealloc_id(&mut self, start_id: usize, count: usize) {
        let Some((start, end)) = self.inner.allocated_range(start_id as u64) else {
            warn!("id allocator: id {} is not allocated", start_id);
            return;
        };
        if start != start_id as u64 {
            warn!(
                "id allocator: id {} is inside run [{}, {})",
                start_id, start, end
            );
            return;
        }
        if count == 0 || count as u64 > end - start {
            warn!(
                "id allocator: freeing {} ids at {}, run holds {}",
                count,
                start_id,
                end - start
            );
        }
        self.inner.free(start);
    }

    fn is_allocated(&self, id: usize) -> bool {
        self.inner.is_allocated(id as u64)
    }

    fn alloc_fixed_id(&mut self, id: usize) -> AllocResult {
        self.inner.alloc_fixed(id as u64, 1, 0).map(|_| ())
    }

    fn size(&self) -> usize {
        self.inner.length() as usize
    }

    fn used(&self) -> usize {
        self.inner.used_space() as usize
    }

    fn available(&self) -> usize {
        self.inner.free_space() as usize
    }
}
