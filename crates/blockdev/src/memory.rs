//! In-memory block devices
//!
//! Blocks are stored sparsely; a block that was never written reads as
//! zeros. Any number of device ids can be served by one `MemDisk`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::RandomState;
use parking_lot::{Mutex, RwLock};

use crate::block::{Block, BlockDevice, BlockKey, BlockNo, DeviceId, BLOCK_SIZE};
use crate::error::{Error, Result};

/// Sparse in-memory block device set
pub struct MemDisk {
    /// Written blocks
    blocks: RwLock<HashMap<BlockKey, Box<Block>, RandomState>>,

    /// Per-device block limit; `None` means unbounded
    nblocks: Option<u32>,

    /// Keys whose transfers fail
    faults: Mutex<HashSet<BlockKey, RandomState>>,

    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemDisk {
    /// Create an unbounded in-memory device set
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(HashMap::with_hasher(RandomState::new())),
            nblocks: None,
            faults: Mutex::new(HashSet::with_hasher(RandomState::new())),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Create a device set where every device holds `nblocks` blocks
    pub fn with_blocks(nblocks: u32) -> Self {
        Self {
            nblocks: Some(nblocks),
            ..Self::new()
        }
    }

    /// Make transfers of this block fail (or succeed again)
    pub fn set_fault(&self, dev: DeviceId, blockno: BlockNo, failing: bool) {
        let key = BlockKey::new(dev, blockno);
        let mut faults = self.faults.lock();
        if failing {
            faults.insert(key);
        } else {
            faults.remove(&key);
        }
    }

    /// Number of completed block reads
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of completed block writes
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Copy of a block's current contents, bypassing the counters
    pub fn peek(&self, dev: DeviceId, blockno: BlockNo) -> Block {
        self.blocks
            .read()
            .get(&BlockKey::new(dev, blockno))
            .map(|b| **b)
            .unwrap_or([0u8; BLOCK_SIZE])
    }

    /// Number of blocks that have been written at least once
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    /// Check if no block has been written
    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    fn check(&self, dev: DeviceId, blockno: BlockNo) -> Result<BlockKey> {
        if let Some(nblocks) = self.nblocks {
            if blockno >= nblocks {
                return Err(Error::OutOfRange { dev, blockno, nblocks });
            }
        }
        let key = BlockKey::new(dev, blockno);
        if self.faults.lock().contains(&key) {
            return Err(Error::DeviceFault { dev, blockno });
        }
        Ok(key)
    }
}

impl Default for MemDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, dev: DeviceId, blockno: BlockNo, buf: &mut Block) -> Result<()> {
        let key = self.check(dev, blockno)?;
        match self.blocks.read().get(&key) {
            Some(block) => buf.copy_from_slice(&block[..]),
            None => buf.fill(0),
        }
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_block(&self, dev: DeviceId, blockno: BlockNo, buf: &Block) -> Result<()> {
        let key = self.check(dev, blockno)?;
        self.blocks.write().insert(key, Box::new(*buf));
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
