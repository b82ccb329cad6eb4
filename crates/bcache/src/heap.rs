//! Min-heap of free slots ordered by release time
//!
//! Array-backed binary heap: the children of `i` are `2i + 1` and `2i + 2`.
//! Entries compare by `(stamp, slot)`, so equal stamps pop the lower slot
//! index first.

use crate::slot::SlotId;

/// A free slot and the logical time it was released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeEntry {
    /// Logical release time
    pub stamp: u64,
    /// The free slot
    pub slot: SlotId,
}

impl FreeEntry {
    fn precedes(&self, other: &FreeEntry) -> bool {
        (self.stamp, self.slot) < (other.stamp, other.slot)
    }
}

/// Fixed-capacity binary min-heap of free slots
pub(crate) struct FreeHeap {
    entries: Vec<FreeEntry>,
    capacity: usize,
}

impl FreeHeap {
    /// Create an empty heap holding at most `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert an entry, O(log N).
    ///
    /// # Panics
    /// If the heap already holds `capacity` entries.
    pub fn insert(&mut self, entry: FreeEntry) {
        if self.entries.len() == self.capacity {
            panic!("bcache: free pool overflow inserting {}", entry.slot);
        }
        self.entries.push(entry);
        self.sift_up(self.entries.len() - 1);
    }

    /// Remove and return the least recently released entry, O(log N).
    ///
    /// # Panics
    /// If the heap is empty.
    pub fn extract_min(&mut self) -> FreeEntry {
        if self.entries.is_empty() {
            panic!("bcache: free pool underflow");
        }
        let root = self.entries.swap_remove(0);
        if !self.entries.is_empty() {
            self.sift_down(0);
        }
        root
    }

    /// Number of free entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no slot is free
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in heap order (not sorted)
    pub fn iter(&self) -> impl Iterator<Item = &FreeEntry> {
        self.entries.iter()
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !self.entries[idx].precedes(&self.entries[parent]) {
                break;
            }
            self.entries.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;
            let mut smallest = idx;

            if left < len && self.entries[left].precedes(&self.entries[smallest]) {
                smallest = left;
            }
            if right < len && self.entries[right].precedes(&self.entries[smallest]) {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.entries.swap(idx, smallest);
            idx = smallest;
        }
    }
}
