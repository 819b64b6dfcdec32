//! GPU virtual address buddy allocator
//!
//! This crate implements a binary buddy allocator for address ranges and
//! resource-ID pools, featuring:
//! - Power-of-two block splitting and coalescing with per-order free lists
//! - Caller-chosen ("fixed") allocations spanning several blocks
//! - Named carveouts reserved before general allocation starts
//! - PTE-size aware grouping for GPU virtual address spaces
//! - A spinlock-guarded wrapper for shared use

#![no_std]

extern crate alloc;

use core::fmt;

// Logging support - conditionally import log crate
#[cfg(feature = "log")]
extern crate log;

// Stub macros when log is disabled - these become no-ops
#[cfg(not(feature = "log"))]
macro_rules! error {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! info {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

/// The error type used for allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Invalid size, alignment, page size or allocator configuration.
    InvalidParam,
    /// The requested range overlaps an existing allocation or carveout.
    MemoryOverlap,
    /// No enough space to allocate.
    NoMemory,
    /// Deallocate a range that was never allocated.
    NotAllocated,
    /// A block covering the range is already committed to another PTE size.
    PteSizeMismatch,
    /// Carveouts are only accepted before the first allocation.
    AllocationMade,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::InvalidParam => "invalid parameter",
            Self::MemoryOverlap => "range overlaps an existing allocation",
            Self::NoMemory => "out of space",
            Self::NotAllocated => "range is not allocated",
            Self::PteSizeMismatch => "PTE size mismatch",
            Self::AllocationMade => "allocator already in use",
        };
        f.write_str(msg)
    }
}

/// A [`Result`] type with [`AllocError`] as the error type.
pub type AllocResult<T = ()> = Result<T, AllocError>;

/// Used to allocate unique IDs (e.g., channel or context IDs).
pub trait IdAllocator {
    /// Allocate contiguous IDs with given count and alignment.
    fn alloc_id(&mut self, count: usize, alignment: usize) -> AllocResult<usize>;

    /// Deallocate contiguous IDs with given position and count.
    fn dealloc_id(&mut self, start_id: usize, count: usize);

    /// Whether the given `id` was allocated.
    fn is_allocated(&self, id: usize) -> bool;

    /// Mark the given `id` has been allocated and cannot be reallocated.
    fn alloc_fixed_id(&mut self, id: usize) -> AllocResult;

    /// Returns the maximum number of supported IDs.
    fn size(&self) -> usize;

    /// Returns the number of allocated IDs.
    fn used(&self) -> usize;

    /// Returns the number of available IDs.
    fn available(&self) -> usize;
}

#[inline]
const fn align_down(pos: u64, align: u64) -> u64 {
    pos & !(align - 1)
}

/// Checks whether the address has the demanded alignment.
///
/// Equivalent to `addr % align == 0`, but the alignment must be a power of two.
#[inline]
const fn is_aligned(base_addr: u64, align: u64) -> bool {
    base_addr & (align - 1) == 0
}

// Export our allocator implementations
pub mod buddy;
pub use buddy::{
    AddressSpace, BlockId, BlockState, BuddyAllocator, BuddyFlags, BuddyStats, Carveout,
    PageSizes, PteClass, MAX_ORDER_CEILING,
};

pub mod id_allocator;
pub use id_allocator::BuddyIdAllocator;

pub mod locked_allocator;
pub use locked_allocator::LockedBuddyAllocator;
