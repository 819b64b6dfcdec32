//! Buddy allocator module
//!
//! This module provides the buddy system implementation with:
//! - An arena of blocks forming one binary tree per top-level tile
//! - Per-order free lists with PTE-class placement for GPU VA spaces
//! - Fixed allocations and carveouts over caller-chosen ranges
//! - Detailed statistics and consistency checking

mod block_pool;
mod buddy_allocator;
mod buddy_block;
mod carveout;
mod fixed;
mod geometry;
mod interval_index;
mod order_list;
mod pte;
mod stats;

pub use block_pool::BlockPoolStats;
pub use buddy_allocator::BuddyAllocator;
pub use buddy_block::{BlockId, BlockState, BuddyBlock};
pub use carveout::Carveout;
pub use geometry::{BuddyFlags, MAX_ORDER_CEILING, ORDER_LIST_LEN};
pub use pte::{AddressSpace, PageSizes, PteClass, DEFAULT_SMALL_PAGE_SIZE};
pub use stats::{BuddyStats, MemoryStatsReporter, OrderCounters};
