//! Binary format definitions for UDIF images
//!
//! A UDIF file is laid out as:
//! 1. Data fork (compressed block payloads)
//! 2. XML property list describing the resource fork (block maps etc.)
//! 3. Koly trailer (fixed 512 bytes at the very end of the file)
//!
//! All multi-byte integers are big-endian. Field offsets are bit-exact
//! with the format as reverse-engineered; nothing here may be reordered
//! or resized.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::io::Write;

use crate::checksum::Checksum;
use crate::error::{Result, UdifError};

/// Koly trailer signature, "koly" in ASCII
pub const KOLY_SIGNATURE: u32 = 0x6B6F_6C79;

/// Block map signature, "mish" in ASCII
pub const MISH_SIGNATURE: u32 = 0x6D69_7368;

/// Block chunk types found in mish block maps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    /// Zero-filled run, no data stored
    ZeroFill,
    /// Raw, uncompressed data
    Raw,
    /// Free / unallocated run, no data stored
    Free,
    /// ADC-compressed (UDCO)
    Udco,
    /// zlib-compressed (UDZO)
    Udzo,
    /// bzip2-compressed (UDBZ)
    Udbz,
    /// LZFSE-compressed; recognized but never decoded
    Lzfse,
    /// Comment marker, no data
    Comment,
    /// End-of-map marker, no data
    Terminator,
    /// Undocumented tag, preserved verbatim
    Unknown(u32),
}

impl From<u32> for BlockType {
    fn from(value: u32) -> Self {
        match value {
            0x0000_0000 => BlockType::ZeroFill,
            0x0000_0001 => BlockType::Raw,
            0x0000_0002 => BlockType::Free,
            0x8000_0004 => BlockType::Udco,
            0x8000_0005 => BlockType::Udzo,
            0x8000_0006 => BlockType::Udbz,
            0x8000_0007 => BlockType::Lzfse,
            0x7FFF_FFFE => BlockType::Comment,
            0xFFFF_FFFF => BlockType::Terminator,
            other => BlockType::Unknown(other),
        }
    }
}

impl BlockType {
    /// The on-disk tag value
    pub fn tag(self) -> u32 {
        match self {
            BlockType::ZeroFill => 0x0000_0000,
            BlockType::Raw => 0x0000_0001,
            BlockType::Free => 0x0000_0002,
            BlockType::Udco => 0x8000_0004,
            BlockType::Udzo => 0x8000_0005,
            BlockType::Udbz => 0x8000_0006,
            BlockType::Lzfse => 0x8000_0007,
            BlockType::Comment => 0x7FFF_FFFE,
            BlockType::Terminator => 0xFFFF_FFFF,
            BlockType::Unknown(tag) => tag,
        }
    }

    /// Whether this block maps no bytes in the data fork
    pub fn is_marker(self) -> bool {
        matches!(self, BlockType::Comment | BlockType::Terminator)
    }

    /// Whether this block decodes to zeroes without touching the data fork
    pub fn is_zero(self) -> bool {
        matches!(self, BlockType::ZeroFill | BlockType::Free)
    }
}

/// Mish blkx block descriptor (one run of sectors)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Entry / compression type
    pub kind: BlockType,
    /// 4-character ASCII comment, e.g. "+beg" / "+end" on COMMENT entries
    pub comment: String,
    /// Start sector of this run, relative to the owning map's base sector
    pub sector_number: u64,
    /// Number of sectors in this run
    pub sector_count: u64,
    /// Start of the run's payload within the data fork
    pub compressed_offset: u64,
    /// Byte length of the run's payload within the data fork
    pub compressed_length: u64,
}

impl Block {
    /// On-disk size of a block descriptor in bytes
    pub const SIZE: usize = 40;

    /// Parse a block descriptor from a fixed byte window
    pub fn parse(buffer: &[u8], offset: usize) -> Result<Self> {
        if buffer.len() < offset + Self::SIZE {
            return Err(UdifError::TruncatedRead {
                expected: offset + Self::SIZE,
                actual: buffer.len(),
            });
        }

        let kind = BlockType::from(BigEndian::read_u32(&buffer[offset..]));
        let comment: String = buffer[offset + 4..offset + 8]
            .iter()
            .filter(|&&b| b != 0)
            .map(|&b| b as char)
            .collect();

        Ok(Block {
            kind,
            comment,
            sector_number: BigEndian::read_u64(&buffer[offset + 8..]),
            sector_count: BigEndian::read_u64(&buffer[offset + 16..]),
            compressed_offset: BigEndian::read_u64(&buffer[offset + 24..]),
            compressed_length: BigEndian::read_u64(&buffer[offset + 32..]),
        })
    }

    /// Write the descriptor as exactly 40 bytes
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.kind.tag())?;

        let mut comment = [0u8; 4];
        let bytes = self.comment.as_bytes();
        let n = bytes.len().min(4);
        comment[..n].copy_from_slice(&bytes[..n]);
        writer.write_all(&comment)?;

        writer.write_u64::<BigEndian>(self.sector_number)?;
        writer.write_u64::<BigEndian>(self.sector_count)?;
        writer.write_u64::<BigEndian>(self.compressed_offset)?;
        writer.write_u64::<BigEndian>(self.compressed_length)?;
        Ok(())
    }
}

/// Block map ("mish" data), one per blkx resource
///
/// The header is 204 bytes, immediately followed by `block_count`
/// 40-byte block descriptors. The descriptor count lives at offset 200;
/// the field at offset 36 often holds something else entirely (commonly
/// the partition index) and must not be used for counting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMap {
    /// Signature, always "mish"
    pub signature: u32,
    /// Version (latest known == 1)
    pub version: u32,
    /// LBA of the map's starting sector within the whole image
    pub sector_number: u64,
    /// Number of sectors covered by this map
    pub sector_count: u64,
    /// Data offset
    pub data_offset: u64,
    /// Buffers needed
    pub buffers_needed: u32,
    /// Block descriptor number
    pub block_descriptor_count: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    pub reserved3: u32,
    pub reserved4: u32,
    pub reserved5: u32,
    pub reserved6: u32,
    /// Checksum over the decompressed map contents
    pub checksum: Checksum,
    /// Number of block descriptors following the header
    pub block_count: u32,
    /// The mapped blocks, in on-disk order
    pub blocks: Vec<Block>,
}

impl BlockMap {
    /// On-disk size of the map header in bytes (without block descriptors)
    pub const SIZE: usize = 204;

    /// Parse a block map from a fixed byte window
    pub fn parse(buffer: &[u8], offset: usize) -> Result<Self> {
        if buffer.len() < offset + Self::SIZE {
            return Err(UdifError::TruncatedRead {
                expected: offset + Self::SIZE,
                actual: buffer.len(),
            });
        }

        let signature = BigEndian::read_u32(&buffer[offset..]);
        if signature != MISH_SIGNATURE {
            return Err(UdifError::BadSignature {
                expected: MISH_SIGNATURE,
                actual: signature,
            });
        }

        let checksum = Checksum::parse(buffer, offset + 64)?;
        let block_count = BigEndian::read_u32(&buffer[offset + 200..]);

        let mut blocks = Vec::with_capacity(block_count as usize);
        for i in 0..block_count as usize {
            blocks.push(Block::parse(buffer, offset + Self::SIZE + i * Block::SIZE)?);
        }

        Ok(BlockMap {
            signature,
            version: BigEndian::read_u32(&buffer[offset + 4..]),
            sector_number: BigEndian::read_u64(&buffer[offset + 8..]),
            sector_count: BigEndian::read_u64(&buffer[offset + 16..]),
            data_offset: BigEndian::read_u64(&buffer[offset + 24..]),
            buffers_needed: BigEndian::read_u32(&buffer[offset + 32..]),
            block_descriptor_count: BigEndian::read_u32(&buffer[offset + 36..]),
            reserved1: BigEndian::read_u32(&buffer[offset + 40..]),
            reserved2: BigEndian::read_u32(&buffer[offset + 44..]),
            reserved3: BigEndian::read_u32(&buffer[offset + 48..]),
            reserved4: BigEndian::read_u32(&buffer[offset + 52..]),
            reserved5: BigEndian::read_u32(&buffer[offset + 56..]),
            reserved6: BigEndian::read_u32(&buffer[offset + 60..]),
            checksum,
            block_count,
            blocks,
        })
    }

    /// Write the map header and all block descriptors
    ///
    /// The descriptor count at offset 200 is recomputed from
    /// `blocks.len()`; a stale `block_count` field is never propagated.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.signature)?;
        writer.write_u32::<BigEndian>(self.version)?;
        writer.write_u64::<BigEndian>(self.sector_number)?;
        writer.write_u64::<BigEndian>(self.sector_count)?;
        writer.write_u64::<BigEndian>(self.data_offset)?;
        writer.write_u32::<BigEndian>(self.buffers_needed)?;
        writer.write_u32::<BigEndian>(self.block_descriptor_count)?;
        writer.write_u32::<BigEndian>(self.reserved1)?;
        writer.write_u32::<BigEndian>(self.reserved2)?;
        writer.write_u32::<BigEndian>(self.reserved3)?;
        writer.write_u32::<BigEndian>(self.reserved4)?;
        writer.write_u32::<BigEndian>(self.reserved5)?;
        writer.write_u32::<BigEndian>(self.reserved6)?;
        self.checksum.write(writer)?;
        // 8 bytes between the checksum structure and the count at 200
        writer.write_all(&[0u8; 8])?;
        writer.write_u32::<BigEndian>(self.blocks.len() as u32)?;

        for block in &self.blocks {
            block.write(writer)?;
        }

        Ok(())
    }

    /// Total size of the mapped sector range in bytes
    pub fn uncompressed_size(&self) -> u64 {
        self.sector_count * crate::SECTOR_SIZE
    }

    /// Total byte length of the map's payloads in the data fork
    pub fn compressed_size(&self) -> u64 {
        self.blocks.iter().map(|b| b.compressed_length).sum()
    }
}

/// UDIF footer (koly trailer), the final 512 bytes of the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    /// Signature, always "koly"
    pub signature: u32,
    /// Version (latest known == 4)
    pub version: u32,
    /// Size of this structure in bytes (512)
    pub header_size: u32,
    /// Flags
    pub flags: u32,
    /// Running data fork offset
    pub running_data_fork_offset: u64,
    /// Data fork offset; block payload offsets are relative to this
    pub data_fork_offset: u64,
    /// Data fork length in bytes
    pub data_fork_length: u64,
    /// Resource fork offset
    pub resource_fork_offset: u64,
    /// Resource fork length in bytes
    pub resource_fork_length: u64,
    /// Segment number
    pub segment_number: u32,
    /// Segment count
    pub segment_count: u32,
    /// Segment ID
    pub segment_id: [u8; 16],
    /// Checksum over the data fork
    pub data_checksum: Checksum,
    /// XML property list offset
    pub xml_offset: u64,
    /// XML property list length in bytes
    pub xml_length: u64,
    pub reserved1: [u8; 120],
    /// Master checksum
    pub checksum: Checksum,
    /// Image variant
    pub image_variant: u32,
    /// Total sector count of the image
    pub sector_count: u64,
    pub reserved2: u32,
    pub reserved3: u32,
    pub reserved4: u32,
}

impl Footer {
    /// On-disk size of the koly trailer in bytes
    pub const SIZE: usize = 512;

    /// Parse a koly trailer from a fixed byte window
    pub fn parse(buffer: &[u8], offset: usize) -> Result<Self> {
        if buffer.len() < offset + Self::SIZE {
            return Err(UdifError::TruncatedRead {
                expected: offset + Self::SIZE,
                actual: buffer.len(),
            });
        }

        let signature = BigEndian::read_u32(&buffer[offset..]);
        if signature != KOLY_SIGNATURE {
            return Err(UdifError::BadSignature {
                expected: KOLY_SIGNATURE,
                actual: signature,
            });
        }

        let mut segment_id = [0u8; 16];
        segment_id.copy_from_slice(&buffer[offset + 64..offset + 80]);

        let mut reserved1 = [0u8; 120];
        reserved1.copy_from_slice(&buffer[offset + 232..offset + 352]);

        Ok(Footer {
            signature,
            version: BigEndian::read_u32(&buffer[offset + 4..]),
            header_size: BigEndian::read_u32(&buffer[offset + 8..]),
            flags: BigEndian::read_u32(&buffer[offset + 12..]),
            running_data_fork_offset: BigEndian::read_u64(&buffer[offset + 16..]),
            data_fork_offset: BigEndian::read_u64(&buffer[offset + 24..]),
            data_fork_length: BigEndian::read_u64(&buffer[offset + 32..]),
            resource_fork_offset: BigEndian::read_u64(&buffer[offset + 40..]),
            resource_fork_length: BigEndian::read_u64(&buffer[offset + 48..]),
            segment_number: BigEndian::read_u32(&buffer[offset + 56..]),
            segment_count: BigEndian::read_u32(&buffer[offset + 60..]),
            segment_id,
            data_checksum: Checksum::parse(buffer, offset + 80)?,
            xml_offset: BigEndian::read_u64(&buffer[offset + 216..]),
            xml_length: BigEndian::read_u64(&buffer[offset + 224..]),
            reserved1,
            checksum: Checksum::parse(buffer, offset + 352)?,
            image_variant: BigEndian::read_u32(&buffer[offset + 488..]),
            sector_count: BigEndian::read_u64(&buffer[offset + 492..]),
            reserved2: BigEndian::read_u32(&buffer[offset + 500..]),
            reserved3: BigEndian::read_u32(&buffer[offset + 504..]),
            reserved4: BigEndian::read_u32(&buffer[offset + 508..]),
        })
    }

    /// Write the trailer as exactly 512 bytes
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.signature)?;
        writer.write_u32::<BigEndian>(self.version)?;
        writer.write_u32::<BigEndian>(self.header_size)?;
        writer.write_u32::<BigEndian>(self.flags)?;
        writer.write_u64::<BigEndian>(self.running_data_fork_offset)?;
        writer.write_u64::<BigEndian>(self.data_fork_offset)?;
        writer.write_u64::<BigEndian>(self.data_fork_length)?;
        writer.write_u64::<BigEndian>(self.resource_fork_offset)?;
        writer.write_u64::<BigEndian>(self.resource_fork_length)?;
        writer.write_u32::<BigEndian>(self.segment_number)?;
        writer.write_u32::<BigEndian>(self.segment_count)?;
        writer.write_all(&self.segment_id)?;
        // data checksum occupies 80..208; the xml offset sits at 216
        self.data_checksum.write(writer)?;
        writer.write_all(&[0u8; 8])?;
        writer.write_u64::<BigEndian>(self.xml_offset)?;
        writer.write_u64::<BigEndian>(self.xml_length)?;
        writer.write_all(&self.reserved1)?;
        // master checksum occupies 352..480; the image variant sits at 488
        self.checksum.write(writer)?;
        writer.write_all(&[0u8; 8])?;
        writer.write_u32::<BigEndian>(self.image_variant)?;
        writer.write_u64::<BigEndian>(self.sector_count)?;
        writer.write_u32::<BigEndian>(self.reserved2)?;
        writer.write_u32::<BigEndian>(self.reserved3)?;
        writer.write_u32::<BigEndian>(self.reserved4)?;
        Ok(())
    }
}
