//! # bcache
//!
//! Block buffer cache between a block device and filesystem code.
//!
//! ## Architecture
//! - **Slot arena**: fixed pool of one-block buffers, each behind its own
//!   exclusive lock
//! - **Buckets**: active slots hashed by block number, one lock per bucket
//! - **Free pool**: min-heap of unreferenced slots by release time; the
//!   least recently released slot is reused first
//! - **BufferCache**: acquire / load / store / release / pin / unpin
//!
//! ## Example
//! ```
//! use bcache::{BufferCache, CacheConfig};
//! use blockdev::MemDisk;
//!
//! let cache = BufferCache::new(MemDisk::new(), CacheConfig::new(8));
//!
//! let mut buf = cache.read(1, 42)?;
//! buf.data_mut()[0] = 7;
//! buf.store()?;
//! buf.release();
//!
//! assert_eq!(cache.device().peek(1, 42)[0], 7);
//! # Ok::<(), blockdev::Error>(())
//! ```

#![warn(missing_docs)]

mod audit;
mod bucket;
mod cache;
mod config;
mod heap;
mod pool;
mod slot;
mod stats;

pub use audit::{AuditViolation, CacheAudit, Membership, SlotAudit};
pub use blockdev::{Error, Result};
pub use cache::{BufGuard, BufferCache, PinnedBlock};
pub use config::{CacheConfig, DEFAULT_BUCKETS, DEFAULT_SLOTS};
pub use slot::SlotId;
pub use stats::CacheStats;
