//! Shared buddy allocator guarded by a spinlock.
//!
//! Every call takes the lock for its whole duration, so the allocator can
//! live in a `static` and be used from several CPUs or interrupt context.

use kspin::{SpinNoIrq, SpinNoIrqGuard};

#[cfg(feature = "log")]
use log::error;

use crate::buddy::{AddressSpace, BuddyAllocator, BuddyFlags, BuddyStats, Carveout};
use crate::{AllocError, AllocResult};

/// [`BuddyAllocator`] behind a [`SpinNoIrq`] lock
///
/// Readiness is read from the inner allocator under the lock, so `init` and
/// `destroy` issued through [`lock`](Self::lock) are seen by every later call.
pub struct LockedBuddyAllocator {
    inner: SpinNoIrq<BuddyAllocator>,
}

impl LockedBuddyAllocator {
    pub const fn new() -> Self {
        Self {
            inner: SpinNoIrq::new(BuddyAllocator::new()),
        }
    }

    /// Initialize the allocator, see [`BuddyAllocator::init`]
    pub fn init(
        &self,
        base: u64,
        size: u64,
        blk_size: u64,
        max_order: Option<usize>,
        flags: BuddyFlags,
        aspace: Option<&dyn AddressSpace>,
    ) -> AllocResult {
        self.inner
            .lock()
            .init(base, size, blk_size, max_order, flags, aspace)
    }

    /// Tear the allocator down, see [`BuddyAllocator::destroy`]
    pub fn destroy(&self) {
        self.inner.lock().destroy();
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().is_initialized()
    }

    /// Hold the lock across several operations
    pub fn lock(&self) -> SpinNoIrqGuard<'_, BuddyAllocator> {
        self.inner.lock()
    }

    /// Take the lock, failing with `NoMemory` before `init`
    fn ready(&self) -> AllocResult<SpinNoIrqGuard<'_, BuddyAllocator>> {
        let inner = self.inner.lock();
        if inner.is_initialized() {
            Ok(inner)
        } else {
            error!("locked allocator: allocator not initialized");
            Err(AllocError::NoMemory)
        }
    }

    pub fn alloc(&self, len: u64) -> AllocResult<u64> {
        self.ready()?.alloc(len)
    }

    pub fn alloc_with_page_size(
        &self,
        len: u64,
        page_size: u64,
        align_required: bool,
        align_size: u64,
    ) -> AllocResult<u64> {
        self.ready()?
            .alloc_with_page_size(len, page_size, align_required, align_size)
    }

    pub fn alloc_fixed(&self, base: u64, len: u64, page_size: u64) -> AllocResult<u64> {
        self.ready()?.alloc_fixed(base, len, page_size)
    }

    pub fn free(&self, addr: u64) {
        self.inner.lock().free(addr);
    }

    pub fn free_fixed(&self, base: u64) -> AllocResult<u64> {
        self.inner.lock().free_fixed(base)
    }

    pub fn reserve_carveout(&self, carveout: &Carveout) -> AllocResult {
        self.ready()?.reserve_carveout(carveout)
    }

    pub fn release_carveout(&self, carveout: &Carveout) -> AllocResult {
        self.inner.lock().release_carveout(carveout)
    }

    pub fn is_allocated(&self, addr: u64) -> bool {
        self.inner.lock().is_allocated(addr)
    }

    pub fn base(&self) -> u64 {
        self.inner.lock().base()
    }

    pub fn length(&self) -> u64 {
        self.inner.lock().length()
    }

    pub fn end(&self) -> u64 {
        self.inner.lock().end()
    }

    pub fn free_space(&self) -> u64 {
        self.inner.lock().free_space()
    }

    pub fn stats(&self) -> BuddyStats {
        self.inner.lock().stats()
    }
}

impl Default for LockedBuddyAllocator {
    fn default() -> Self {
        Self::new()
    }
}
