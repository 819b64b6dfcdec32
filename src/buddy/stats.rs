//! Statistics and debugging for buddy allocator
//!
//! Provides a snapshot of the allocator counters and failure reporting.

use super::geometry::ORDER_LIST_LEN;

/// Per-order block counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderCounters {
    /// Blocks sitting in the free list
    pub free: usize,
    /// Blocks replaced by their two children
    pub split: usize,
    /// Blocks handed out, single or as part of a fixed allocation
    pub allocated: usize,
}

impl OrderCounters {
    pub const fn new() -> Self {
        Self {
            free: 0,
            split: 0,
            allocated: 0,
        }
    }

    pub const fn is_zero(&self) -> bool {
        self.free == 0 && self.split == 0 && self.allocated == 0
    }
}

/// Buddy allocator statistics
#[derive(Debug, Clone, Copy)]
pub struct BuddyStats {
    pub block_size: u64,
    pub max_order: usize,
    pub total_bytes: u64,
    pub free_bytes: u64,
    /// Bytes requested by callers
    pub bytes_alloced: u64,
    /// Bytes handed out after rounding to block orders
    pub bytes_alloced_real: u64,
    pub bytes_freed: u64,
    pub fixed_allocs: usize,
    pub carveouts: usize,
    pub orders: [OrderCounters; ORDER_LIST_LEN],
}

impl Default for BuddyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl BuddyStats {
    pub const fn new() -> Self {
        Self {
            block_size: 0,
            max_order: 0,
            total_bytes: 0,
            free_bytes: 0,
            bytes_alloced: 0,
            bytes_alloced_real: 0,
            bytes_freed: 0,
            fixed_allocs: 0,
            carveouts: 0,
            orders: [OrderCounters::new(); ORDER_LIST_LEN],
        }
    }

    /// Bytes held by free blocks according to the free lists
    pub fn listed_free_bytes(&self) -> u64 {
        self.orders
            .iter()
            .enumerate()
            .map(|(order, counters)| counters.free as u64 * (self.block_size << order))
            .sum()
    }
}

/// Detailed allocator state reporter
pub struct MemoryStatsReporter;

impl MemoryStatsReporter {
    /// Print detailed allocation failure statistics
    /// This is a standalone function to keep allocation logic clean
    #[allow(unused_variables)]
    pub fn print_alloc_failure_stats(stats: &BuddyStats, request_len: u64, request_order: usize) {
        #[cfg(feature = "log")]
        use log::error;
        error!("========================================");
        error!(
            "Request: {:#x} bytes (order {}, {} KB)",
            request_len,
            request_order,
            (stats.block_size << request_order) / 1024
        );
        Self::print_state(stats);
    }

    /// Print the counters of every populated order
    #[allow(unused_variables)]
    pub fn print_state(stats: &BuddyStats) {
        #[cfg(feature = "log")]
        use log::error;
        error!(
            "  Total: {} KB, free: {} KB",
            stats.total_bytes / 1024,
            stats.free_bytes / 1024
        );
        error!(
            "  Alloced: {:#x} (real {:#x}), freed: {:#x}",
            stats.bytes_alloced, stats.bytes_alloced_real, stats.bytes_freed
        );
        error!(
            "  Fixed allocations: {}, carveouts: {}",
            stats.fixed_allocs, stats.carveouts
        );
        error!("  Blocks by order:");
        for order in (0..=stats.max_order).rev() {
            let counters = stats.orders[order];
            if counters.is_zero() {
                continue;
            }
            error!(
                "    Order {:2} ({} KB): free {}, split {}, alloced {}",
                order,
                (stats.block_size << order) / 1024,
                counters.free,
                counters.split,
                counters.allocated
            );
        }
        error!("========================================");
    }
}
