//! Disk image header using nom
//!
//! Image layout:
//! ```text
//! BDEV001\n
//! [version: u32]
//! [block_size: u32]
//! [nblocks: u32]
//! [dev: u32]
//! ...zero padding to BLOCK_SIZE...
//! [block 0][block 1]...[block nblocks-1]
//! ```
//!
//! All integers are little-endian.

use nom::{
    bytes::complete::tag,
    number::complete::le_u32,
    sequence::{preceded, tuple},
    IResult,
};

use crate::block::BLOCK_SIZE;
use crate::error::{Error, Result};

/// Magic header for block device images
pub const IMAGE_MAGIC: &[u8] = b"BDEV001\n";

/// Current image format version
pub const IMAGE_VERSION: u32 = 1;

/// Encoded header length, before padding
pub const HEADER_LEN: usize = IMAGE_MAGIC.len() + 16;

/// Bytes reserved for the header at the start of the image
pub const HEADER_RESERVED: usize = BLOCK_SIZE;

/// Image header
#[derive(Debug, Clone, PartialEq)]
pub struct ImageHeader {
    /// Format version
    pub version: u32,
    /// Block size the image was created with
    pub block_size: u32,
    /// Number of data blocks
    pub nblocks: u32,
    /// Device id served by this image
    pub dev: u32,
}

impl ImageHeader {
    /// Header for a new image of `nblocks` blocks
    pub fn new(dev: u32, nblocks: u32) -> Self {
        Self {
            version: IMAGE_VERSION,
            block_size: BLOCK_SIZE as u32,
            nblocks,
            dev,
        }
    }

    /// Total image size in bytes, header included
    pub fn image_len(&self) -> u64 {
        HEADER_RESERVED as u64 + self.nblocks as u64 * BLOCK_SIZE as u64
    }
}

fn header_fields(input: &[u8]) -> IResult<&[u8], (u32, u32, u32, u32)> {
    preceded(tag(IMAGE_MAGIC), tuple((le_u32, le_u32, le_u32, le_u32)))(input)
}

/// Parse an image header
///
/// Rejects a bad magic, an unknown version, and images written with a
/// different block size.
pub fn parse_header(input: &[u8]) -> Result<ImageHeader> {
    if input.len() < HEADER_LEN {
        return Err(Error::Parse("Input too short for header".to_string()));
    }

    let (_, (version, block_size, nblocks, dev)) = header_fields(input)?;

    if version != IMAGE_VERSION {
        return Err(Error::Parse(format!("Unsupported image version {}", version)));
    }
    if block_size as usize != BLOCK_SIZE {
        return Err(Error::Parse(format!(
            "Block size mismatch: image has {}, expected {}",
            block_size, BLOCK_SIZE
        )));
    }

    Ok(ImageHeader {
        version,
        block_size,
        nblocks,
        dev,
    })
}

/// Encode an image header, padded to `HEADER_RESERVED` bytes
pub fn create_header(header: &ImageHeader) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_RESERVED);
    out.extend_from_slice(IMAGE_MAGIC);
    out.extend_from_slice(&header.version.to_le_bytes());
    out.extend_from_slice(&header.block_size.to_le_bytes());
    out.extend_from_slice(&header.nblocks.to_le_bytes());
    out.extend_from_slice(&header.dev.to_le_bytes());
    out.resize(HEADER_RESERVED, 0);
    out
}
