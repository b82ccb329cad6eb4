//! Block addressing and the device trait

use std::fmt;

use crate::error::Result;

/// Size of one block in bytes
pub const BLOCK_SIZE: usize = 1024;

/// One block's worth of bytes
pub type Block = [u8; BLOCK_SIZE];

/// Device identifier
pub type DeviceId = u32;

/// Block number within a device
pub type BlockNo = u32;

/// Address of a block: (device, block number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockKey {
    /// Device id
    pub dev: DeviceId,
    /// Block number
    pub blockno: BlockNo,
}

impl BlockKey {
    /// Create a new block key
    pub const fn new(dev: DeviceId, blockno: BlockNo) -> Self {
        Self { dev, blockno }
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.blockno)
    }
}

/// A synchronous block device.
///
/// Each call transfers exactly one block between the device and a
/// caller-supplied buffer. Implementations do no caching or queuing; the
/// caller blocks until the transfer completes.
pub trait BlockDevice: Send + Sync {
    /// Read block `blockno` of device `dev` into `buf`
    fn read_block(&self, dev: DeviceId, blockno: BlockNo, buf: &mut Block) -> Result<()>;

    /// Write `buf` to block `blockno` of device `dev`
    fn write_block(&self, dev: DeviceId, blockno: BlockNo, buf: &Block) -> Result<()>;
}

impl<T: BlockDevice + ?Sized> BlockDevice for &T {
    fn read_block(&self, dev: DeviceId, blockno: BlockNo, buf: &mut Block) -> Result<()> {
        (**self).read_block(dev, blockno, buf)
    }

    fn write_block(&self, dev: DeviceId, blockno: BlockNo, buf: &Block) -> Result<()> {
        (**self).write_block(dev, blockno, buf)
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for std::sync::Arc<T> {
    fn read_block(&self, dev: DeviceId, blockno: BlockNo, buf: &mut Block) -> Result<()> {
        (**self).read_block(dev, blockno, buf)
    }

    fn write_block(&self, dev: DeviceId, blockno: BlockNo, buf: &Block) -> Result<()> {
        (**self).write_block(dev, blockno, buf)
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for Box<T> {
    fn read_block(&self, dev: DeviceId, blockno: BlockNo, buf: &mut Block) -> Result<()> {
        (**self).read_block(dev, blockno, buf)
    }

    fn write_block(&self, dev: DeviceId, blockno: BlockNo, buf: &Block) -> Result<()> {
        (**self).write_block(dev, blockno, buf)
    }
}
