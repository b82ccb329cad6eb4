//! # blockdev
//!
//! Fixed-size block devices for the buffer cache.
//!
//! ## Contents
//! - **BlockDevice**: synchronous one-block read/write boundary
//! - **MemDisk**: sparse in-memory devices with counters and fault injection
//! - **FileDisk**: one device backed by a memory-mapped image file

#![warn(missing_docs)]

mod block;
mod error;
mod file;
mod header;
mod memory;

pub use block::{Block, BlockDevice, BlockKey, BlockNo, DeviceId, BLOCK_SIZE};
pub use error::{Error, Result};
pub use file::FileDisk;
pub use header::{ImageHeader, IMAGE_MAGIC};
pub use memory::MemDisk;
