//! Error types for the sablekv storage engine.

use std::fmt;
use std::io;

/// The result type used throughout sablekv.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for storage-engine operations.
///
/// "Not found" is never an error: lookups return `Option`.
#[derive(Debug)]
pub enum Error {
    /// An I/O error occurred.
    Io(io::Error),

    /// A data block failed to decode (truncated or malformed).
    CorruptedBlock(String),

    /// An SST file is malformed (bad footer, offsets out of range,
    /// key-order invariants violated).
    CorruptedSst(String),

    /// A block's trailing hash did not match its contents.
    ChecksumMismatch {
        /// The hash stored in the block.
        expected: u32,
        /// The hash computed over the block contents.
        actual: u32,
    },

    /// A single entry's encoded size exceeds the block capacity.
    EntryTooLarge {
        /// Encoded size of the rejected entry.
        size: usize,
        /// Capacity of the receiving block.
        capacity: usize,
    },

    /// `build` was called with no completed blocks.
    EmptySst,

    /// An invalid argument was provided.
    InvalidArgument(String),
}

impl Error {
    /// Creates a new corrupted-block error.
    pub fn corrupted_block(msg: impl Into<String>) -> Self {
        Error::CorruptedBlock(msg.into())
    }

    /// Creates a new corrupted-SST error.
    pub fn corrupted_sst(msg: impl Into<String>) -> Self {
        Error::CorruptedSst(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::CorruptedBlock(msg) => write!(f, "Corrupted block: {}", msg),
            Error::CorruptedSst(msg) => write!(f, "Corrupted SST: {}", msg),
            Error::ChecksumMismatch { expected, actual } => {
                write!(f, "Checksum mismatch: expected {:#x}, got {:#x}", expected, actual)
            }
            Error::EntryTooLarge { size, capacity } => {
                write!(f, "Entry of {} bytes exceeds block capacity {}", size, capacity)
            }
            Error::EmptySst => write!(f, "Cannot build an empty SST"),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::corrupted_block("offset table truncated");
        assert_eq!(err.to_string(), "Corrupted block: offset table truncated");

        let err = Error::ChecksumMismatch { expected: 0x12345678, actual: 0x87654321 };
        assert!(err.to_string().contains("0x12345678"));
        assert!(err.to_string().contains("0x87654321"));

        let err = Error::EntryTooLarge { size: 9000, capacity: 4096 };
        assert!(err.to_string().contains("9000"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
