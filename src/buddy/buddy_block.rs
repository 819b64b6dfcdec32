//! Buddy block metadata
//!
//! Represents a block of the managed range in the buddy tree. Tree relations
//! are arena handles; the state enum carries the children of a split block.

use super::pte::PteClass;

/// Stable handle of a block inside the [`BlockPool`](super::block_pool::BlockPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// What a block is currently used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Linked into the free list of its order.
    Free,
    /// Replaced by two half-sized children.
    Split { left: BlockId, right: BlockId },
    /// Handed out, either on its own or as part of a fixed allocation.
    Allocated,
}

/// Free-list linkage, only meaningful while the block is listed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ListLink {
    pub prev: Option<BlockId>,
    pub next: Option<BlockId>,
    pub listed: bool,
}

/// Buddy block metadata
#[derive(Debug, Clone, Copy)]
pub struct BuddyBlock {
    pub start: u64,
    pub end: u64,
    pub order: usize,
    pub pte: PteClass,
    pub parent: Option<BlockId>,
    /// The other half of `parent`; `None` for top-level blocks
    pub buddy: Option<BlockId>,
    pub state: BlockState,
    pub(crate) link: ListLink,
}

impl BuddyBlock {
    /// Create a new free, unlisted block
    pub const fn new(start: u64, end: u64, order: usize, parent: Option<BlockId>) -> Self {
        Self {
            start,
            end,
            order,
            pte: PteClass::Any,
            parent,
            buddy: None,
            state: BlockState::Free,
            link: ListLink {
                prev: None,
                next: None,
                listed: false,
            },
        }
    }

    pub const fn len(&self) -> u64 {
        self.end - self.start
    }

    pub const fn is_free(&self) -> bool {
        matches!(self.state, BlockState::Free)
    }

    pub const fn is_allocated(&self) -> bool {
        matches!(self.state, BlockState::Allocated)
    }
}
