//! Error types for UDIF image reading

use thiserror::Error;

/// Result type alias for UDIF operations
pub type Result<T> = std::result::Result<T, UdifError>;

/// Errors that can occur while reading a UDIF image
#[derive(Error, Debug)]
pub enum UdifError {
    /// I/O error from the underlying byte source
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A structure's magic number did not match
    #[error("bad signature: expected {expected:#010x}, got {actual:#010x}")]
    BadSignature { expected: u32, actual: u32 },

    /// A ranged read returned fewer bytes than requested
    #[error("truncated read: expected {expected} bytes, got {actual}")]
    TruncatedRead { expected: usize, actual: usize },

    /// The embedded XML property list is undecodable or malformed
    #[error("invalid property list: {0}")]
    InvalidPlist(String),

    /// A blkx resource whose Data fails block map parsing
    #[error("invalid block map: {0}")]
    InvalidBlockMap(String),

    /// A checksum descriptor with an out-of-range bit length
    #[error("invalid checksum descriptor: {bits} bits")]
    InvalidChecksum { bits: u32 },

    /// A block carries a compression tag this library does not know
    #[error("unknown compression method for tag {0:#010x}")]
    UnknownCompression(u32),

    /// A block carries a known but unsupported compression method
    #[error("unsupported compression method: {0}")]
    UnsupportedCompression(&'static str),

    /// Verification was requested for a checksum type other than CRC32
    #[error("unsupported checksum type {0:#010x}")]
    UnsupportedChecksum(u32),

    /// Decompression failed
    #[error("decompression error: {0}")]
    Decompression(String),

    /// A reconstructed block did not match its mapped sector span
    /// (only reported when the strict length check is enabled)
    #[error("decompressed length mismatch: expected {expected} bytes, got {actual}")]
    BlockLengthMismatch { expected: u64, actual: u64 },
}
