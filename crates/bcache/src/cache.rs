//! BufferCache: hash-bucketed block cache over a `BlockDevice`
//!
//! # Locking
//!
//! - bucket locks guard residency and reference counts; at most one is held
//!   at a time
//! - the pool lock guards the free heap; it is only taken inside a bucket
//!   lock for a single push
//! - a slot's exclusive lock guards its payload; it is never acquired while
//!   a bucket or pool lock is held, and no bucket or pool lock is held
//!   across device I/O

use std::fmt;

use blockdev::{Block, BlockDevice, BlockKey, BlockNo, DeviceId, Result};
use parking_lot::MutexGuard;
use tracing::{debug, trace, warn};

use crate::audit::{CacheAudit, Membership, SlotAudit};
use crate::bucket::BucketTable;
use crate::config::CacheConfig;
use crate::heap::FreeEntry;
use crate::pool::FreePool;
use crate::slot::{self, Content, Slot, SlotId};
use crate::stats::CacheStats;

/// Fixed-capacity block cache
pub struct BufferCache<D> {
    /// Backing device
    device: D,

    /// Slot arena
    slots: Box<[Slot]>,

    /// Active slots by block number
    buckets: BucketTable,

    /// Unreferenced slots, least recently released first
    pool: FreePool,

    /// Cache statistics
    stats: CacheStats,

    config: CacheConfig,
}

impl<D: BlockDevice> BufferCache<D> {
    /// Create a cache over `device`
    ///
    /// # Panics
    /// If the configured slot or bucket count is zero.
    pub fn new(device: D, config: CacheConfig) -> Self {
        assert!(config.slots > 0, "Slot count must be greater than 0");
        assert!(config.buckets > 0, "Bucket count must be greater than 0");
        assert!(config.slots <= u32::MAX as usize, "Slot count exceeds u32");

        debug!(slots = config.slots, buckets = config.buckets, "buffer cache initialised");

        Self {
            device,
            slots: slot::arena(config.slots),
            buckets: BucketTable::new(config.buckets),
            pool: FreePool::full(config.slots, config.exhaustion_timeout),
            stats: CacheStats::new(),
            config,
        }
    }

    /// Create a cache with the default configuration
    pub fn with_defaults(device: D) -> Self {
        Self::new(device, CacheConfig::default())
    }

    /// Get exclusive access to a block's buffer.
    ///
    /// The payload is only meaningful after `load`. Blocks until no other
    /// holder has the buffer locked, and while every slot is referenced.
    pub fn acquire(&self, dev: DeviceId, blockno: BlockNo) -> BufGuard<'_, D> {
        let key = BlockKey::new(dev, blockno);

        let hit = self.buckets.lock(blockno).retain(key);
        if let Some(slot) = hit {
            self.stats.record_hit();
            trace!(%key, %slot, "hit");
            return self.lock_slot(slot, key);
        }

        self.stats.record_miss();
        let (entry, waited) = self.pool.take();
        if waited {
            self.stats.record_pool_wait();
        }

        self.bind_free(key, entry)
    }

    /// Acquire a block and make sure its payload reflects the device
    pub fn read(&self, dev: DeviceId, blockno: BlockNo) -> Result<BufGuard<'_, D>> {
        let mut buf = self.acquire(dev, blockno);
        buf.load()?;
        Ok(buf)
    }

    /// Read the block from the device unless the payload is already valid
    pub fn load(&self, buf: &mut BufGuard<'_, D>) -> Result<()> {
        self.check_owner(buf.cache);
        buf.load()
    }

    /// Write the payload to the device
    pub fn store(&self, buf: &BufGuard<'_, D>) -> Result<()> {
        self.check_owner(buf.cache);
        buf.store()
    }

    /// Give up exclusive access and this holder's reference
    pub fn release(&self, buf: BufGuard<'_, D>) {
        self.check_owner(buf.cache);
        drop(buf);
    }

    /// Keep the block resident until the returned token is unpinned
    pub fn pin<'a>(&'a self, buf: &BufGuard<'a, D>) -> PinnedBlock<'a, D> {
        self.check_owner(buf.cache);
        buf.pin()
    }

    /// Drop a pin taken with `pin`
    pub fn unpin(&self, pin: PinnedBlock<'_, D>) {
        self.check_owner(pin.cache);
        drop(pin);
    }

    /// Reference count of a resident block
    pub fn ref_count(&self, dev: DeviceId, blockno: BlockNo) -> Option<u32> {
        let key = BlockKey::new(dev, blockno);
        self.buckets.lock(blockno).find(key).map(|r| r.refs)
    }

    /// Check if a block is bound to an active slot
    pub fn is_resident(&self, dev: DeviceId, blockno: BlockNo) -> bool {
        self.ref_count(dev, blockno).is_some()
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots in the free pool
    pub fn free_count(&self) -> usize {
        self.pool.len()
    }

    /// Number of referenced slots, summed one bucket at a time
    pub fn active_count(&self) -> usize {
        (0..self.buckets.len())
            .map(|i| self.buckets.lock_index(i).len())
            .sum()
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Get the configuration the cache was built with
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get the backing device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Snapshot every slot's membership and counts.
    ///
    /// Buckets are visited one lock at a time, then the pool, so the result
    /// is only consistent when no other thread is using the cache.
    pub fn audit(&self) -> CacheAudit {
        let mut slots = Vec::with_capacity(self.slots.len());

        for index in 0..self.buckets.len() {
            let bucket = self.buckets.lock_index(index);
            slots.extend(bucket.residents().iter().map(|r| SlotAudit {
                slot: r.slot,
                membership: Membership::Active { bucket: index },
                key: Some(r.key),
                ref_count: r.refs,
                stamp: None,
            }));
        }

        for entry in self.pool.entries() {
            // unheld when quiescent; report no key rather than wait
            let key = self.slots[entry.slot.index()]
                .content
                .try_lock()
                .and_then(|content| content.key);
            slots.push(SlotAudit {
                slot: entry.slot,
                membership: Membership::Free,
                key,
                ref_count: 0,
                stamp: Some(entry.stamp),
            });
        }

        slots.sort_by_key(|s| s.slot);
        CacheAudit {
            capacity: self.slots.len(),
            buckets: self.buckets.len(),
            slots,
        }
    }

    /// Shut the cache down and hand back the device
    pub fn into_device(self) -> D {
        let free = self.free_count();
        if free != self.capacity() {
            warn!(
                active = self.capacity() - free,
                "buffer cache shut down with referenced slots"
            );
        }
        self.device
    }

    /// Bind a slot taken from the pool to `key`.
    ///
    /// If a concurrent miss inserted `key` first, the slot goes back to the
    /// pool untouched and the caller joins the winner as a hit.
    fn bind_free(&self, key: BlockKey, entry: FreeEntry) -> BufGuard<'_, D> {
        // A free slot has no holders, so this never blocks
        let mut content = self.slots[entry.slot.index()].content.lock();

        let mut bucket = self.buckets.lock(key.blockno);
        if let Some(winner) = bucket.retain(key) {
            drop(bucket);
            drop(content);
            self.pool.restore(entry);
            self.stats.record_race();
            debug!(%key, %winner, "concurrent miss inserted first");
            return self.lock_slot(winner, key);
        }
        bucket.insert(key, entry.slot);
        drop(bucket);

        match content.rebind(key) {
            Some(old) => {
                self.stats.record_eviction();
                debug!(%key, slot = %entry.slot, evicted = %old, released = entry.stamp, "miss");
            }
            None => debug!(%key, slot = %entry.slot, "miss"),
        }

        BufGuard {
            cache: self,
            slot: entry.slot,
            key,
            content: Some(content),
        }
    }

    fn lock_slot(&self, slot: SlotId, key: BlockKey) -> BufGuard<'_, D> {
        let content = self.slots[slot.index()].content.lock();
        debug_assert_eq!(content.key, Some(key), "{} bound to another block", slot);
        BufGuard {
            cache: self,
            slot,
            key,
            content: Some(content),
        }
    }

    fn pin_slot(&self, slot: SlotId, key: BlockKey) {
        let refs = self.buckets.lock(key.blockno).pin(slot);
        trace!(%key, %slot, refs, "pin");
    }

    fn unref(&self, slot: SlotId, key: BlockKey) {
        let mut bucket = self.buckets.lock(key.blockno);
        if bucket.unref(slot) == 0 {
            let stamp = self.pool.release(slot);
            trace!(%key, %slot, stamp, "returned to free pool");
        }
    }

    fn check_owner(&self, cache: &BufferCache<D>) {
        assert!(
            std::ptr::eq(self, cache),
            "bcache: buffer belongs to another cache"
        );
    }
}

/// Exclusive access to one cached block.
///
/// Dropping the guard releases the exclusive lock and then the reference.
pub struct BufGuard<'a, D: BlockDevice> {
    cache: &'a BufferCache<D>,
    slot: SlotId,
    key: BlockKey,
    /// Always `Some` until drop
    content: Option<MutexGuard<'a, Content>>,
}

impl<'a, D: BlockDevice> BufGuard<'a, D> {
    /// Block address
    pub fn key(&self) -> BlockKey {
        self.key
    }

    /// Device id
    pub fn dev(&self) -> DeviceId {
        self.key.dev
    }

    /// Block number
    pub fn blockno(&self) -> BlockNo {
        self.key.blockno
    }

    /// Slot holding the block
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Whether the payload reflects the device contents
    pub fn is_valid(&self) -> bool {
        self.content().valid
    }

    /// Block payload
    pub fn data(&self) -> &Block {
        &self.content().data
    }

    /// Mutable block payload; call `store` to persist changes
    pub fn data_mut(&mut self) -> &mut Block {
        &mut self.content_mut().data
    }

    /// Read the block from the device unless already valid.
    ///
    /// A failed read leaves the payload invalid.
    pub fn load(&mut self) -> Result<()> {
        let cache = self.cache;
        let key = self.key;
        let content = self.content_mut();
        if !content.valid {
            cache.device.read_block(key.dev, key.blockno, &mut *content.data)?;
            content.valid = true;
            cache.stats.record_read();
        }
        Ok(())
    }

    /// Write the payload to the device
    pub fn store(&self) -> Result<()> {
        self.cache
            .device
            .write_block(self.key.dev, self.key.blockno, &self.content().data)?;
        self.cache.stats.record_write();
        Ok(())
    }

    /// Take an extra reference that outlives this guard
    pub fn pin(&self) -> PinnedBlock<'a, D> {
        self.cache.pin_slot(self.slot, self.key);
        PinnedBlock {
            cache: self.cache,
            slot: self.slot,
            key: self.key,
        }
    }

    /// Release the buffer; same as dropping it
    pub fn release(self) {}

    fn content(&self) -> &Content {
        match &self.content {
            Some(content) => content,
            None => unreachable!("buffer used after release"),
        }
    }

    fn content_mut(&mut self) -> &mut Content {
        match &mut self.content {
            Some(content) => content,
            None => unreachable!("buffer used after release"),
        }
    }
}

impl<D: BlockDevice> Drop for BufGuard<'_, D> {
    fn drop(&mut self) {
        // unlock before touching the bucket so waiters can proceed
        drop(self.content.take());
        self.cache.unref(self.slot, self.key);
    }
}

impl<D: BlockDevice> fmt::Debug for BufGuard<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufGuard")
            .field("key", &self.key)
            .field("slot", &self.slot)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// A reference keeping a block resident without exclusive access.
///
/// Dropping the token unpins the block.
#[must_use = "dropping a PinnedBlock unpins it immediately"]
pub struct PinnedBlock<'a, D: BlockDevice> {
    cache: &'a BufferCache<D>,
    slot: SlotId,
    key: BlockKey,
}

impl<D: BlockDevice> PinnedBlock<'_, D> {
    /// Block address
    pub fn key(&self) -> BlockKey {
        self.key
    }

    /// Slot holding the block
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Drop the pin; same as dropping the token
    pub fn unpin(self) {}
}

impl<D: BlockDevice> Drop for PinnedBlock<'_, D> {
    fn drop(&mut self) {
        self.cache.unref(self.slot, self.key);
    }
}

impl<D: BlockDevice> fmt::Debug for PinnedBlock<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedBlock")
            .field("key", &self.key)
            .field("slot", &self.slot)
            .finish()
    }
}
