//! Point-in-time view of slot membership, used to check cache invariants

use std::collections::HashSet;
use std::fmt;

use blockdev::BlockKey;

use crate::slot::SlotId;

/// Where a slot currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// In the free pool, unreferenced
    Free,
    /// Referenced and resident in a bucket
    Active {
        /// Bucket index
        bucket: usize,
    },
}

/// One slot as seen by `BufferCache::audit`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAudit {
    /// The slot
    pub slot: SlotId,
    /// Free or active
    pub membership: Membership,
    /// Bound block, if any
    pub key: Option<BlockKey>,
    /// Outstanding holders and pins
    pub ref_count: u32,
    /// Release time, for free slots
    pub stamp: Option<u64>,
}

/// Snapshot of every slot in a cache
#[derive(Debug, Clone)]
pub struct CacheAudit {
    /// Total slots
    pub capacity: usize,
    /// Bucket count
    pub buckets: usize,
    /// Slots sorted by id
    pub slots: Vec<SlotAudit>,
}

impl CacheAudit {
    /// Number of active slots
    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s.membership, Membership::Active { .. }))
            .count()
    }

    /// Number of free slots
    pub fn free_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.membership == Membership::Free)
            .count()
    }

    /// Look up one slot
    pub fn slot(&self, slot: SlotId) -> Option<&SlotAudit> {
        self.slots.iter().find(|s| s.slot == slot)
    }

    /// Verify the cache invariants, reporting the first violation
    pub fn check(&self) -> Result<(), AuditViolation> {
        let (active, free) = (self.active_count(), self.free_count());
        if active + free != self.capacity {
            return Err(AuditViolation::SlotCount {
                active,
                free,
                capacity: self.capacity,
            });
        }

        let mut seen = HashSet::new();
        let mut keys = HashSet::new();
        for s in &self.slots {
            if s.slot.index() >= self.capacity || !seen.insert(s.slot) {
                return Err(AuditViolation::DuplicateSlot(s.slot));
            }

            match s.membership {
                Membership::Free => {
                    if s.ref_count != 0 {
                        return Err(AuditViolation::FreeReferenced {
                            slot: s.slot,
                            refs: s.ref_count,
                        });
                    }
                }
                Membership::Active { bucket } => {
                    if s.ref_count == 0 {
                        return Err(AuditViolation::ActiveUnreferenced(s.slot));
                    }
                    let Some(key) = s.key else {
                        return Err(AuditViolation::ActiveUnbound(s.slot));
                    };
                    if !keys.insert(key) {
                        return Err(AuditViolation::DuplicateKey(key));
                    }
                    let expected = key.blockno as usize % self.buckets;
                    if bucket != expected {
                        return Err(AuditViolation::WrongBucket {
                            key,
                            bucket,
                            expected,
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

/// First invariant violation found by `CacheAudit::check`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditViolation {
    /// Active and free slots do not add up to the arena size
    SlotCount {
        /// Active slots
        active: usize,
        /// Free slots
        free: usize,
        /// Arena size
        capacity: usize,
    },

    /// Slot listed twice or outside the arena
    DuplicateSlot(SlotId),

    /// Free slot with outstanding references
    FreeReferenced {
        /// The slot
        slot: SlotId,
        /// Its reference count
        refs: u32,
    },

    /// Active slot with no references
    ActiveUnreferenced(SlotId),

    /// Active slot not bound to a block
    ActiveUnbound(SlotId),

    /// Block bound to more than one active slot
    DuplicateKey(BlockKey),

    /// Block resident in a bucket its number does not hash to
    WrongBucket {
        /// The block
        key: BlockKey,
        /// Bucket it was found in
        bucket: usize,
        /// Bucket it belongs in
        expected: usize,
    },
}

impl fmt::Display for AuditViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditViolation::SlotCount {
                active,
                free,
                capacity,
            } => write!(f, "{} active + {} free != {} slots", active, free, capacity),
            AuditViolation::DuplicateSlot(slot) => {
                write!(f, "{} listed twice or out of range", slot)
            }
            AuditViolation::FreeReferenced { slot, refs } => {
                write!(f, "free {} has {} references", slot, refs)
            }
            AuditViolation::ActiveUnreferenced(slot) => {
                write!(f, "active {} has no references", slot)
            }
            AuditViolation::ActiveUnbound(slot) => write!(f, "active {} has no key", slot),
            AuditViolation::DuplicateKey(key) => {
                write!(f, "block {} bound to two active slots", key)
            }
            AuditViolation::WrongBucket {
                key,
                bucket,
                expected,
            } => write!(f, "block {} in bucket {}, expected {}", key, bucket, expected),
        }
    }
}

impl std::error::Error for AuditViolation {}
