//! UDIF checksum descriptors
//!
//! Both the koly trailer and each mish block map embed a fixed 128-byte
//! checksum structure: a 4-byte type, a 4-byte digest length in bits, and
//! up to 120 bytes of digest data (zero-padded). Only the first `bits / 8`
//! bytes of the digest field are meaningful.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::io::Write;

use crate::error::{Result, UdifError};

/// Checksum algorithm identifiers found in UDIF images
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumType {
    /// No checksum present
    None,
    /// CRC32 (the only type observed in the wild)
    Crc32,
    /// Reserved / undocumented type (MD5 etc. are rumored but unconfirmed)
    Unknown(u32),
}

impl From<u32> for ChecksumType {
    fn from(value: u32) -> Self {
        match value {
            0x00000000 => ChecksumType::None,
            0x00000002 => ChecksumType::Crc32,
            other => ChecksumType::Unknown(other),
        }
    }
}

impl ChecksumType {
    /// The on-disk tag value
    pub fn tag(self) -> u32 {
        match self {
            ChecksumType::None => 0x00000000,
            ChecksumType::Crc32 => 0x00000002,
            ChecksumType::Unknown(tag) => tag,
        }
    }
}

/// UDIF checksum structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    /// Checksum type
    pub kind: ChecksumType,
    /// Digest length in bits (multiple of 8, at most 960)
    pub bits: u32,
    /// Digest as a lowercase hex string of exactly `bits / 8` bytes
    pub value: String,
}

impl Checksum {
    /// On-disk size of the checksum structure in bytes
    pub const SIZE: usize = 128;

    /// Maximum digest length in bits the 120-byte field can hold
    pub const MAX_BITS: u32 = 960;

    /// Parse a checksum structure from a fixed byte window
    pub fn parse(buffer: &[u8], offset: usize) -> Result<Self> {
        if buffer.len() < offset + Self::SIZE {
            return Err(UdifError::TruncatedRead {
                expected: offset + Self::SIZE,
                actual: buffer.len(),
            });
        }

        let kind = ChecksumType::from(BigEndian::read_u32(&buffer[offset..]));
        let bits = BigEndian::read_u32(&buffer[offset + 4..]);

        if bits % 8 != 0 || bits > Self::MAX_BITS {
            return Err(UdifError::InvalidChecksum { bits });
        }

        let digest = &buffer[offset + 8..offset + 8 + bits as usize / 8];

        Ok(Checksum {
            kind,
            bits,
            value: hex_encode(digest),
        })
    }

    /// Write the structure as exactly 128 bytes, digest zero-padded
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.kind.tag())?;
        writer.write_u32::<BigEndian>(self.bits)?;

        let mut digest = [0u8; 120];
        let bytes = hex_decode(&self.value)?;
        let n = bytes.len().min(digest.len());
        digest[..n].copy_from_slice(&bytes[..n]);
        writer.write_all(&digest)?;

        Ok(())
    }

    /// A CRC32 checksum descriptor covering the given data
    pub fn crc32_of(data: &[u8]) -> Self {
        Checksum {
            kind: ChecksumType::Crc32,
            bits: 32,
            value: format!("{:08x}", crc32(data)),
        }
    }
}

/// Calculate the CRC32 checksum of a byte slice
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

pub(crate) fn hex_decode(text: &str) -> Result<Vec<u8>> {
    // byte-indexed slicing below requires single-byte characters
    if text.len() % 2 != 0 || !text.is_ascii() {
        return Err(UdifError::InvalidChecksum {
            bits: text.len() as u32 * 4,
        });
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&text[i..i + 2], 16).map_err(|_| UdifError::InvalidChecksum {
                bits: text.len() as u32 * 4,
            })
        })
        .collect()
}
