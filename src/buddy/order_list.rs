//! Per-order free lists threaded through the block pool
//!
//! Each list only stores head/tail/len; the links live in the blocks
//! themselves, so insertion and removal at any position are O(1).

use super::{block_pool::BlockPool, buddy_block::BlockId};

/// Doubly linked list of free blocks of one order
pub struct OrderList {
    head: Option<BlockId>,
    tail: Option<BlockId>,
    len: usize,
}

impl OrderList {
    /// Create a new empty list
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub const fn front(&self) -> Option<BlockId> {
        self.head
    }

    pub const fn back(&self) -> Option<BlockId> {
        self.tail
    }

    /// Insert a block at the head
    ///
    /// Panics if the block is already listed: that is a double free.
    pub fn push_front(&mut self, pool: &mut BlockPool, id: BlockId) {
        let old_head = self.head;
        {
            let link = &mut pool[id].link;
            assert!(!link.listed, "order list: block {:?} is already listed", id);
            link.prev = None;
            link.next = old_head;
            link.listed = true;
        }

        match old_head {
            Some(head) => pool[head].link.prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.len += 1;
    }

    /// Insert a block at the tail
    pub fn push_back(&mut self, pool: &mut BlockPool, id: BlockId) {
        let old_tail = self.tail;
        {
            let link = &mut pool[id].link;
            assert!(!link.listed, "order list: block {:?} is already listed", id);
            link.prev = old_tail;
            link.next = None;
            link.listed = true;
        }

        match old_tail {
            Some(tail) => pool[tail].link.next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
    }

    /// Unlink a block from this list
    pub fn remove(&mut self, pool: &mut BlockPool, id: BlockId) {
        let link = pool[id].link;
        assert!(link.listed, "order list: block {:?} is not listed", id);

        match link.prev {
            Some(prev) => pool[prev].link.next = link.next,
            None => {
                debug_assert_eq!(self.head, Some(id));
                self.head = link.next;
            }
        }
        match link.next {
            Some(next) => pool[next].link.prev = link.prev,
            None => {
                debug_assert_eq!(self.tail, Some(id));
                self.tail = link.prev;
            }
        }

        let link = &mut pool[id].link;
        link.prev = None;
        link.next = None;
        link.listed = false;
        self.len -= 1;
    }

    /// Forget every entry without touching the blocks
    pub fn clear(&mut self) {
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    /// Iterate the list from head to tail
    pub fn iter<'a>(&self, pool: &'a BlockPool) -> OrderListIter<'a> {
        OrderListIter {
            pool,
            current: self.head,
            remaining: self.len,
        }
    }
}

impl Default for OrderList {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the handles of an [`OrderList`]
pub struct OrderListIter<'a> {
    pool: &'a BlockPool,
    current: Option<BlockId>,
    remaining: usize,
}

impl Iterator for OrderListIter<'_> {
    type Item = BlockId;

    fn next(&mut self) -> Option<BlockId> {
        let id = self.current?;
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.current = self.pool[id].link.next;
        Some(id)
    }
}
