//! Hash buckets of active slots
//!
//! A block lives in bucket `blockno % buckets`. Each bucket has its own lock
//! and holds the reference counts of its resident slots.

use blockdev::{BlockKey, BlockNo};
use parking_lot::{Mutex, MutexGuard};

use crate::slot::SlotId;

/// An active slot and its holders
#[derive(Debug, Clone, Copy)]
pub(crate) struct Resident {
    pub key: BlockKey,
    pub slot: SlotId,
    pub refs: u32,
}

#[derive(Default)]
pub(crate) struct Bucket {
    residents: Vec<Resident>,
}

impl Bucket {
    pub fn find(&self, key: BlockKey) -> Option<&Resident> {
        self.residents.iter().find(|r| r.key == key)
    }

    /// Take a reference on `key` if it is resident
    pub fn retain(&mut self, key: BlockKey) -> Option<SlotId> {
        let resident = self.residents.iter_mut().find(|r| r.key == key)?;
        resident.refs += 1;
        Some(resident.slot)
    }

    /// Make `slot` resident for `key` with one reference
    pub fn insert(&mut self, key: BlockKey, slot: SlotId) {
        debug_assert!(self.find(key).is_none(), "duplicate resident {}", key);
        self.residents.push(Resident { key, slot, refs: 1 });
    }

    /// Add a reference to a resident slot
    ///
    /// # Panics
    /// If `slot` is not resident in this bucket.
    pub fn pin(&mut self, slot: SlotId) -> u32 {
        let resident = self.resident_mut(slot, "pin");
        resident.refs += 1;
        resident.refs
    }

    /// Drop a reference; at zero the slot leaves the bucket.
    ///
    /// Returns the remaining count.
    ///
    /// # Panics
    /// If `slot` is not resident in this bucket.
    pub fn unref(&mut self, slot: SlotId) -> u32 {
        let resident = self.resident_mut(slot, "unref");
        resident.refs -= 1;
        let refs = resident.refs;
        if refs == 0 {
            if let Some(pos) = self.residents.iter().position(|r| r.slot == slot) {
                self.residents.swap_remove(pos);
            }
        }
        refs
    }

    pub fn len(&self) -> usize {
        self.residents.len()
    }

    pub fn residents(&self) -> &[Resident] {
        &self.residents
    }

    fn resident_mut(&mut self, slot: SlotId, op: &str) -> &mut Resident {
        match self.residents.iter_mut().find(|r| r.slot == slot) {
            Some(resident) => resident,
            None => panic!("bcache: {}: {} not resident", op, slot),
        }
    }
}

pub(crate) struct BucketTable {
    buckets: Box<[Mutex<Bucket>]>,
}

impl BucketTable {
    pub fn new(n: usize) -> Self {
        Self {
            buckets: (0..n).map(|_| Mutex::new(Bucket::default())).collect(),
        }
    }

    /// Bucket index for a block number
    pub fn index(&self, blockno: BlockNo) -> usize {
        blockno as usize % self.buckets.len()
    }

    /// Lock the bucket owning `blockno`
    pub fn lock(&self, blockno: BlockNo) -> MutexGuard<'_, Bucket> {
        self.buckets[self.index(blockno)].lock()
    }

    pub fn lock_index(&self, index: usize) -> MutexGuard<'_, Bucket> {
        self.buckets[index].lock()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_is_modulo() {
        let table = BucketTable::new(13);
        assert_eq!(table.index(5), 5);
        assert_eq!(table.index(18), 5);
        assert_eq!(table.index(31), 5);
        assert_eq!(table.index(99), 8);
    }

    #[test]
    fn test_retain_counts() {
        let mut bucket = Bucket::default();
        let key = BlockKey::new(1, 5);
        assert_eq!(bucket.retain(key), None);

        bucket.insert(key, SlotId::new(2));
        assert_eq!(bucket.retain(key), Some(SlotId::new(2)));
        assert_eq!(bucket.find(key).unwrap().refs, 2);
        // same block number on another device is a different key
        assert_eq!(bucket.retain(BlockKey::new(2, 5)), None);
    }

    #[test]
    fn test_unref_removes_at_zero() {
        let mut bucket = Bucket::default();
        let key = BlockKey::new(1, 5);
        bucket.insert(key, SlotId::new(0));
        assert_eq!(bucket.pin(SlotId::new(0)), 2);

        assert_eq!(bucket.unref(SlotId::new(0)), 1);
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.unref(SlotId::new(0)), 0);
        assert_eq!(bucket.len(), 0);
        assert!(bucket.find(key).is_none());
    }

    #[test]
    #[should_panic(expected = "not resident")]
    fn test_unref_missing_panics() {
        let mut bucket = Bucket::default();
        bucket.unref(SlotId::new(4));
    }
}
