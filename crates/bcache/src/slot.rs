//! Buffer slots
//!
//! The slot arena is a fixed boxed slice built once per cache. A slot's
//! content (key, valid flag, payload) sits behind its exclusive lock; the
//! reference count and membership live in the bucket or the free pool that
//! currently owns the slot.

use std::fmt;

use blockdev::{Block, BlockKey, BLOCK_SIZE};
use parking_lot::Mutex;

/// Index of a slot in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u32);

impl SlotId {
    /// Slot at position `index`
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Position of the slot in the arena
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// State guarded by a slot's exclusive lock
pub(crate) struct Content {
    /// Block currently bound to the slot; `None` until first use
    pub key: Option<BlockKey>,

    /// Whether `data` reflects the device contents
    pub valid: bool,

    pub data: Box<Block>,
}

impl Content {
    fn new() -> Self {
        Self {
            key: None,
            valid: false,
            data: Box::new([0u8; BLOCK_SIZE]),
        }
    }

    /// Bind the slot to `key`, invalidating the payload.
    ///
    /// Returns the previously bound key.
    pub fn rebind(&mut self, key: BlockKey) -> Option<BlockKey> {
        self.valid = false;
        self.key.replace(key)
    }
}

pub(crate) struct Slot {
    /// Exclusive ("sleep") lock: contenders park until the holder releases
    pub content: Mutex<Content>,
}

/// Build the arena of `n` free, unbound slots
pub(crate) fn arena(n: usize) -> Box<[Slot]> {
    (0..n)
        .map(|_| Slot {
            content: Mutex::new(Content::new()),
        })
        .collect()
}
