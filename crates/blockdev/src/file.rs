//! File-backed block device
//!
//! A single device id served from a fixed-size image file. The image is
//! memory-mapped; see `header` for the layout.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use parking_lot::RwLock;

use crate::block::{Block, BlockDevice, BlockNo, DeviceId, BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::header::{create_header, parse_header, ImageHeader, HEADER_LEN, HEADER_RESERVED};

/// Block device backed by an mmap'd image file
pub struct FileDisk {
    /// Path to the image file
    path: PathBuf,

    /// Parsed image header
    header: ImageHeader,

    /// Mapping of the whole image; `None` once closed
    map: RwLock<Option<MmapMut>>,
}

impl FileDisk {
    /// Create (or truncate) an image of `nblocks` zeroed blocks for device `dev`
    pub fn create<P: AsRef<Path>>(path: P, dev: DeviceId, nblocks: u32) -> Result<Self> {
        let path = path.as_ref();
        let header = ImageHeader::new(dev, nblocks);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&create_header(&header))?;
        file.set_len(header.image_len())?;
        file.sync_all()?;

        Self::map(path, file, header)
    }

    /// Open an existing image
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut header_buf = vec![0u8; HEADER_LEN];
        file.read_exact(&mut header_buf)?;
        let header = parse_header(&header_buf)?;

        let len = file.metadata()?.len();
        if len < header.image_len() {
            return Err(Error::Parse(format!(
                "Truncated image: {} bytes, expected {}",
                len,
                header.image_len()
            )));
        }

        Self::map(path, file, header)
    }

    fn map(path: &Path, file: File, header: ImageHeader) -> Result<Self> {
        // SAFETY: the image is owned by this device for its lifetime; other
        // processes modifying the file concurrently is unsupported.
        let map = unsafe { MmapMut::map_mut(&file)? };

        Ok(FileDisk {
            path: path.to_path_buf(),
            header,
            map: RwLock::new(Some(map)),
        })
    }

    /// Device id served by this image
    pub fn dev(&self) -> DeviceId {
        self.header.dev
    }

    /// Number of data blocks
    pub fn nblocks(&self) -> u32 {
        self.header.nblocks
    }

    /// Path to the image file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush dirty pages of the mapping to the file
    pub fn flush(&self) -> Result<()> {
        match self.map.read().as_ref() {
            Some(map) => Ok(map.flush()?),
            None => Err(Error::Closed),
        }
    }

    /// Flush and unmap the image
    pub fn close(&mut self) -> Result<()> {
        let mut map = self.map.write();
        if let Some(m) = map.take() {
            m.flush()?;
        }
        Ok(())
    }

    fn offset(&self, dev: DeviceId, blockno: BlockNo) -> Result<usize> {
        if dev != self.header.dev {
            return Err(Error::UnknownDevice(dev));
        }
        if blockno >= self.header.nblocks {
            return Err(Error::OutOfRange {
                dev,
                blockno,
                nblocks: self.header.nblocks,
            });
        }
        Ok(HEADER_RESERVED + blockno as usize * BLOCK_SIZE)
    }
}

impl BlockDevice for FileDisk {
    fn read_block(&self, dev: DeviceId, blockno: BlockNo, buf: &mut Block) -> Result<()> {
        let offset = self.offset(dev, blockno)?;
        let map = self.map.read();
        let map = map.as_ref().ok_or(Error::Closed)?;
        buf.copy_from_slice(&map[offset..offset + BLOCK_SIZE]);
        Ok(())
    }

    fn write_block(&self, dev: DeviceId, blockno: BlockNo, buf: &Block) -> Result<()> {
        let offset = self.offset(dev, blockno)?;
        let mut map = self.map.write();
        let map = map.as_mut().ok_or(Error::Closed)?;
        map[offset..offset + BLOCK_SIZE].copy_from_slice(buf);
        Ok(())
    }
}

impl Drop for FileDisk {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("disk.img");

        let mut disk = FileDisk::create(&path, 1, 16).unwrap();
        assert_eq!(disk.dev(), 1);
        assert_eq!(disk.nblocks(), 16);
        disk.close().unwrap();

        let disk = FileDisk::open(&path).unwrap();
        assert_eq!(disk.dev(), 1);
        assert_eq!(disk.nblocks(), 16);
        assert_eq!(disk.path(), path.as_path());
    }

    #[test]
    fn test_new_image_is_zeroed() {
        let dir = TempDir::new().unwrap();
        let disk = FileDisk::create(dir.path().join("disk.img"), 1, 4).unwrap();

        let mut buf = [0xaau8; BLOCK_SIZE];
        disk.read_block(1, 3, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("disk.img");

        {
            let mut disk = FileDisk::create(&path, 2, 8).unwrap();
            disk.write_block(2, 0, &[1u8; BLOCK_SIZE]).unwrap();
            disk.write_block(2, 7, &[7u8; BLOCK_SIZE]).unwrap();
            disk.close().unwrap();
        }

        {
            let disk = FileDisk::open(&path).unwrap();
            let mut buf = [0u8; BLOCK_SIZE];
            disk.read_block(2, 0, &mut buf).unwrap();
            assert_eq!(buf, [1u8; BLOCK_SIZE]);
            disk.read_block(2, 7, &mut buf).unwrap();
            assert_eq!(buf, [7u8; BLOCK_SIZE]);
        }
    }

    #[test]
    fn test_wrong_device_and_range() {
        let dir = TempDir::new().unwrap();
        let disk = FileDisk::create(dir.path().join("disk.img"), 1, 4).unwrap();
        let mut buf = [0u8; BLOCK_SIZE];

        assert!(matches!(disk.read_block(2, 0, &mut buf), Err(Error::UnknownDevice(2))));
        assert!(matches!(
            disk.write_block(1, 4, &buf),
            Err(Error::OutOfRange { nblocks: 4, .. })
        ));
    }

    #[test]
    fn test_truncated_image() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("disk.img");
        {
            let _disk = FileDisk::create(&path, 1, 4).unwrap();
        }
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len((HEADER_RESERVED + BLOCK_SIZE) as u64).unwrap();
        drop(file);

        assert!(matches!(FileDisk::open(&path), Err(Error::Parse(_))));
    }

    #[test]
    fn test_close_twice() {
        let dir = TempDir::new().unwrap();
        let mut disk = FileDisk::create(dir.path().join("disk.img"), 1, 4).unwrap();

        disk.close().unwrap();
        disk.close().unwrap();
    }

    #[test]
    fn test_io_after_close() {
        let dir = TempDir::new().unwrap();
        let mut disk = FileDisk::create(dir.path().join("disk.img"), 1, 4).unwrap();
        disk.close().unwrap();

        let mut buf = [0u8; BLOCK_SIZE];
        assert!(matches!(disk.read_block(1, 0, &mut buf), Err(Error::Closed)));
        assert!(matches!(disk.write_block(1, 0, &buf), Err(Error::Closed)));
        assert!(matches!(disk.flush(), Err(Error::Closed)));
    }
}
