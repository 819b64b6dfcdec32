//! Allocator geometry
//!
//! Validates the allocator configuration and derives the managed range,
//! block shift and order limits from it.

use crate::{align_down, is_aligned, AllocError, AllocResult};

#[cfg(feature = "log")]
use log::error;

use super::pte::{AddressSpace, PageSizes, PteClass};

/// Highest order any allocator may use.
pub const MAX_ORDER_CEILING: usize = 63;

/// Number of per-order lists and counters.
pub const ORDER_LIST_LEN: usize = MAX_ORDER_CEILING + 1;

bitflags::bitflags! {
    /// Allocator behaviour flags.
    pub struct BuddyFlags: u64 {
        /// The allocator manages a GPU virtual address space and keeps
        /// PDE regions homogeneous in PTE size.
        const GVA_SPACE = 1 << 0;
    }
}

/// Derived layout of the managed range
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    /// First managed address, block aligned
    pub start: u64,
    /// One past the last managed address, block aligned
    pub end: u64,
    pub blk_size: u64,
    pub blk_shift: u32,
    /// Number of order-0 blocks in `[start, end)`
    pub blks: u64,
    pub max_order: usize,
    /// Highest order whose blocks are committed to a PTE class on creation
    pub pte_blk_order: Option<usize>,
    pub flags: BuddyFlags,
    /// Page sizes of the owning address space, only kept in GVA mode
    pub page_sizes: Option<PageSizes>,
}

impl Geometry {
    pub const fn empty() -> Self {
        Self {
            start: 0,
            end: 0,
            blk_size: 0,
            blk_shift: 0,
            blks: 0,
            max_order: 0,
            pte_blk_order: None,
            flags: BuddyFlags::empty(),
            page_sizes: None,
        }
    }

    /// Validate a configuration and compute its geometry.
    ///
    /// `max_order` of `None` selects the largest order the range can hold.
    pub fn new(
        base: u64,
        size: u64,
        blk_size: u64,
        max_order: Option<usize>,
        flags: BuddyFlags,
        aspace: Option<&dyn AddressSpace>,
    ) -> AllocResult<Self> {
        if blk_size == 0 || !blk_size.is_power_of_two() {
            error!("buddy allocator: invalid block size {:#x}", blk_size);
            return Err(AllocError::InvalidParam);
        }
        if let Some(order) = max_order {
            if order > MAX_ORDER_CEILING {
                error!(
                    "buddy allocator: max order {} exceeds ceiling {}",
                    order, MAX_ORDER_CEILING
                );
                return Err(AllocError::InvalidParam);
            }
        }
        if size == 0 {
            error!("buddy allocator: zero sized range");
            return Err(AllocError::InvalidParam);
        }

        let page_sizes = if flags.contains(BuddyFlags::GVA_SPACE) {
            match aspace {
                Some(aspace) => Some(PageSizes::from_address_space(aspace)),
                None => {
                    error!("buddy allocator: GVA allocator requires an address space");
                    return Err(AllocError::InvalidParam);
                }
            }
        } else {
            None
        };

        if let Some(sizes) = page_sizes {
            if sizes.pde_coverage == 0 || !sizes.pde_coverage.is_power_of_two() {
                error!(
                    "buddy allocator: invalid PDE coverage {:#x}",
                    sizes.pde_coverage
                );
                return Err(AllocError::InvalidParam);
            }
            if sizes.big_pages()
                && (!is_aligned(base, sizes.pde_coverage) || !is_aligned(size, sizes.pde_coverage))
            {
                error!(
                    "buddy allocator: range [{:#x}, +{:#x}) is not aligned to PDE size {:#x}",
                    base, size, sizes.pde_coverage
                );
                return Err(AllocError::InvalidParam);
            }
        }

        // Address 0 is never handed out.
        let (base, length) = if base == 0 {
            (blk_size, size.saturating_sub(blk_size))
        } else {
            (base, size)
        };

        let range_end = base.checked_add(length).ok_or_else(|| {
            error!(
                "buddy allocator: range [{:#x}, +{:#x}) overflows",
                base, length
            );
            AllocError::InvalidParam
        })?;
        let start = base
            .checked_next_multiple_of(blk_size)
            .ok_or(AllocError::InvalidParam)?;
        let end = align_down(range_end, blk_size);
        if end <= start {
            error!(
                "buddy allocator: range [{:#x}, {:#x}) holds no block of {:#x} bytes",
                base, range_end, blk_size
            );
            return Err(AllocError::InvalidParam);
        }

        let blk_shift = blk_size.trailing_zeros();
        let blks = (end - start) >> blk_shift;
        let true_max_order = blks.ilog2() as usize;
        let max_order = max_order
            .unwrap_or(true_max_order)
            .min(true_max_order)
            .min(MAX_ORDER_CEILING);

        let mut geometry = Self {
            start,
            end,
            blk_size,
            blk_shift,
            blks,
            max_order,
            pte_blk_order: None,
            flags,
            page_sizes,
        };
        geometry.pte_blk_order = page_sizes.map(|sizes| geometry.order_of(sizes.pde_coverage));
        Ok(geometry)
    }

    pub const fn is_gva(&self) -> bool {
        self.flags.contains(BuddyFlags::GVA_SPACE)
    }

    /// Order of the smallest block holding `len` bytes.
    pub const fn order_of(&self, len: u64) -> usize {
        if len == 0 {
            return 0;
        }
        let blocks = (len - 1) >> self.blk_shift;
        (u64::BITS - blocks.leading_zeros()) as usize
    }

    /// Size in bytes of a block of `order`.
    pub const fn order_len(&self, order: usize) -> u64 {
        self.blk_size << order
    }

    /// Largest order (up to the max order) fitting in `[start, end)`.
    pub fn max_order_in(&self, start: u64, end: u64) -> usize {
        let blocks = (end - start) >> self.blk_shift;
        if blocks == 0 {
            return 0;
        }
        (blocks.ilog2() as usize).min(self.max_order)
    }

    /// Offset of `addr` from the managed start; blocks are aligned relative to it.
    pub const fn shift(&self, addr: u64) -> u64 {
        addr - self.start
    }

    /// Order of the next chunk of a fixed allocation at `offset` with
    /// `remaining` bytes still to cover.
    pub fn fixed_chunk_order(&self, offset: u64, remaining: u64) -> usize {
        let align_order = if offset == 0 {
            self.max_order
        } else {
            ((offset >> self.blk_shift).trailing_zeros() as usize).min(self.max_order)
        };
        let fit_order = ((remaining >> self.blk_shift).max(1).ilog2() as usize).min(self.max_order);
        align_order.min(fit_order)
    }

    /// Classify a page size request. `None` marks an unsupported size.
    pub fn classify(&self, page_size: u64) -> Option<PteClass> {
        match self.page_sizes {
            Some(sizes) if self.is_gva() => sizes.classify(page_size),
            _ => Some(PteClass::Any),
        }
    }

    /// Whether a block of `order` commits to a PTE class when created.
    pub fn stamps_pte(&self, order: usize) -> bool {
        self.is_gva() && self.pte_blk_order.is_some_and(|pte_order| order <= pte_order)
    }

    pub const fn contains_range(&self, base: u64, end: u64) -> bool {
        base >= self.start && end <= self.end && base < end
    }
}
