//! Error types for blockdev

use std::fmt;
use std::io;

/// Result type alias for block device operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for device operations
#[derive(Debug)]
pub enum Error {
    /// I/O error from the backing file
    Io(io::Error),

    /// Malformed disk image header
    Parse(String),

    /// Block number beyond the end of the device
    OutOfRange {
        /// Device id
        dev: u32,
        /// Requested block
        blockno: u32,
        /// Number of blocks on the device
        nblocks: u32,
    },

    /// No device with this id is attached
    UnknownDevice(u32),

    /// Injected transfer failure
    DeviceFault {
        /// Device id
        dev: u32,
        /// Failing block
        blockno: u32,
    },

    /// Device is closed
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Parse(msg) => write!(f, "Parse error: {}", msg),
            Error::OutOfRange { dev, blockno, nblocks } => write!(
                f,
                "Block {} out of range on device {} ({} blocks)",
                blockno, dev, nblocks
            ),
            Error::UnknownDevice(dev) => write!(f, "Unknown device: {}", dev),
            Error::DeviceFault { dev, blockno } => {
                write!(f, "Device fault: device {} block {}", dev, blockno)
            }
            Error::Closed => write!(f, "Device is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        Error::Parse(format!("{:?}", err))
    }
}
