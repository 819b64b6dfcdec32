//! Interval index keyed by start address
//!
//! Holds non-overlapping `[start, end)` ranges in a `BTreeMap`, giving
//! O(log n) point and overlap queries.

use alloc::collections::BTreeMap;

struct Entry<T> {
    end: u64,
    value: T,
}

/// Ordered map of non-overlapping ranges
pub struct IntervalIndex<T> {
    map: BTreeMap<u64, Entry<T>>,
}

impl<T> IntervalIndex<T> {
    pub const fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Insert `[start, end)`. Returns `false` and leaves the index untouched
    /// if it overlaps a present range.
    pub fn insert(&mut self, start: u64, end: u64, value: T) -> bool {
        if start >= end || self.overlaps(start, end) {
            return false;
        }
        self.map.insert(start, Entry { end, value });
        true
    }

    /// Remove the range starting exactly at `start`
    pub fn remove(&mut self, start: u64) -> Option<(u64, T)> {
        self.map
            .remove(&start)
            .map(|entry| (entry.end, entry.value))
    }

    /// Look up the range starting exactly at `start`
    pub fn get(&self, start: u64) -> Option<&T> {
        self.map.get(&start).map(|entry| &entry.value)
    }

    /// Find the range containing `addr`
    pub fn find_containing(&self, addr: u64) -> Option<(u64, u64, &T)> {
        let (&start, entry) = self.map.range(..=addr).next_back()?;
        (addr < entry.end).then_some((start, entry.end, &entry.value))
    }

    /// Whether any range intersects `[start, end)`
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        if start >= end {
            return false;
        }
        match self.map.range(..end).next_back() {
            Some((_, entry)) => entry.end > start,
            None => false,
        }
    }

    /// Remove and return the lowest range
    pub fn pop_first(&mut self) -> Option<(u64, u64, T)> {
        self.map
            .pop_first()
            .map(|(start, entry)| (start, entry.end, entry.value))
    }

    /// Iterate ranges in address order
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64, &T)> + '_ {
        self.map
            .iter()
            .map(|(&start, entry)| (start, entry.end, &entry.value))
    }
}

impl<T> Default for IntervalIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut index = IntervalIndex::new();
        assert!(index.insert(0x1000, 0x2000, 'a'));
        assert!(index.insert(0x3000, 0x5000, 'b'));
        assert_eq!(index.len(), 2);
        assert_eq!(index.get(0x3000), Some(&'b'));
        assert_eq!(index.get(0x3001), None);
    }

    #[test]
    fn test_rejects_overlap() {
        let mut index = IntervalIndex::new();
        assert!(index.insert(0x2000, 0x4000, ()));
        assert!(!index.insert(0x1000, 0x2001, ()));
        assert!(!index.insert(0x3fff, 0x5000, ()));
        assert!(!index.insert(0x2800, 0x3000, ()));
        assert!(!index.insert(0x1000, 0x8000, ()));
        assert!(index.insert(0x1000, 0x2000, ()));
        assert!(index.insert(0x4000, 0x5000, ()));
        assert!(!index.insert(0x6000, 0x6000, ()));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_find_containing() {
        let mut index = IntervalIndex::new();
        index.insert(0x1000, 0x3000, 1u32);
        index.insert(0x8000, 0x9000, 2u32);

        assert_eq!(index.find_containing(0x1000), Some((0x1000, 0x3000, &1)));
        assert_eq!(index.find_containing(0x2fff), Some((0x1000, 0x3000, &1)));
        assert_eq!(index.find_containing(0x3000), None);
        assert_eq!(index.find_containing(0x0fff), None);
        assert_eq!(index.find_containing(0x8800), Some((0x8000, 0x9000, &2)));
    }

    #[test]
    fn test_remove_and_pop() {
        let mut index = IntervalIndex::new();
        index.insert(0x5000, 0x6000, 'x');
        index.insert(0x1000, 0x2000, 'y');

        assert_eq!(index.remove(0x5000), Some((0x6000, 'x')));
        assert_eq!(index.remove(0x5000), None);
        assert!(!index.overlaps(0x5000, 0x6000));

        assert_eq!(index.pop_first(), Some((0x1000, 0x2000, 'y')));
        assert!(index.is_empty());
        assert_eq!(index.pop_first(), None);
    }
}
