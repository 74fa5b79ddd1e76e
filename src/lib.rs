//! UDIF - Apple disk image (DMG) reading library
//!
//! Reads the Universal Disk Image Format: a trailer-described container
//! holding a compressed, sparse representation of a block device.
//!
//! # Features
//!
//! - **Parse** the koly trailer, mish block maps, and the resource fork
//!   directory, with symmetric struct-level serialization
//! - **Stream** the logical volume contents, either contiguously (gaps
//!   zero-filled) or sparsely (backed ranges with placement offsets)
//! - **Verify** the data fork against the trailer's CRC32 checksum
//!
//! # Supported block compression
//!
//! Raw, zlib (UDZO), bzip2 (UDBZ), and ADC (UDCO). LZFSE blocks are
//! recognized but rejected as unsupported.
//!
//! # Example
//!
//! ```no_run
//! use udif::{Image, Result};
//!
//! fn main() -> Result<()> {
//!     let mut image = Image::open("image.dmg")?;
//!
//!     println!("{} bytes uncompressed", image.uncompressed_size());
//!     for entry in &image.resource_fork().blkx {
//!         println!("{}: {} sectors", entry.name, entry.map.sector_count);
//!     }
//!
//!     let mut out = std::fs::File::create("volume.raw")?;
//!     for chunk in image.read_stream() {
//!         std::io::Write::write_all(&mut out, &chunk?)?;
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod blocks;
pub mod checksum;
pub mod error;
pub mod format;
pub mod reader;
pub mod resource;

#[cfg(test)]
pub(crate) mod testutil;

pub use blocks::{BlockIter, MARKER_EXCLUDE, SPARSE_EXCLUDE};
pub use checksum::{crc32, Checksum, ChecksumType};
pub use error::{Result, UdifError};
pub use format::{Block, BlockMap, BlockType, Footer, KOLY_SIGNATURE, MISH_SIGNATURE};
pub use reader::{ReadStream, SparseChunk, SparseReadStream, StreamOptions, DEFAULT_CHUNK_SIZE};
pub use resource::{BlkxEntry, CsumEntry, NsizEntry, RawEntry, ResourceFork};

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::reader::{read_full, read_range};

/// Size of a sector in bytes
pub const SECTOR_SIZE: u64 = 512;

/// An opened Apple disk image
///
/// Construction reads the trailing koly block and the XML resource fork
/// directory it points at; both are immutable afterwards. The image owns
/// the byte source; streams borrow the image mutably, so each stream is
/// the single logical reader for its lifetime. Open independent images
/// over the same file for concurrent streams.
pub struct Image<R> {
    pub(crate) source: R,
    pub(crate) footer: Footer,
    pub(crate) resource_fork: ResourceFork,
}

impl<R: Read + Seek> Image<R> {
    /// Open an image over a seekable byte source
    pub fn new(mut source: R) -> Result<Self> {
        let size = source.seek(SeekFrom::End(0))?;
        if size < Footer::SIZE as u64 {
            return Err(UdifError::TruncatedRead {
                expected: Footer::SIZE,
                actual: size as usize,
            });
        }

        let trailer = read_range(&mut source, size - Footer::SIZE as u64, Footer::SIZE)?;
        let footer = Footer::parse(&trailer, 0)?;

        let xml = read_range(&mut source, footer.xml_offset, footer.xml_length as usize)?;
        let resource_fork = ResourceFork::parse(&xml)?;

        Ok(Image {
            source,
            footer,
            resource_fork,
        })
    }

    /// The koly trailer
    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    /// The typed resource fork directory
    pub fn resource_fork(&self) -> &ResourceFork {
        &self.resource_fork
    }

    /// Iterate all `(entry, block)` pairs, skipping the given block types
    pub fn blocks<'a>(&'a self, exclude: &'a [BlockType]) -> BlockIter<'a> {
        BlockIter::new(&self.resource_fork.blkx, exclude)
    }

    /// Uncompressed size of the contained volume in bytes, including
    /// zero-filled and free regions
    pub fn uncompressed_size(&self) -> u64 {
        self.blocks(&[])
            .map(|(_, block)| block.sector_count * SECTOR_SIZE)
            .sum()
    }

    /// Number of mapped (non-zero, non-free) bytes
    pub fn mapped_size(&self) -> u64 {
        self.blocks(&[BlockType::ZeroFill, BlockType::Free])
            .map(|(_, block)| block.sector_count * SECTOR_SIZE)
            .sum()
    }

    /// Open a contiguous stream of the logical volume contents
    pub fn read_stream(&mut self) -> ReadStream<'_, R> {
        self.read_stream_with(StreamOptions::default())
    }

    /// Open a contiguous stream with custom options
    pub fn read_stream_with(&mut self, options: StreamOptions) -> ReadStream<'_, R> {
        ReadStream::new(self, options)
    }

    /// Open a sparse stream emitting only backed byte ranges
    pub fn sparse_stream(&mut self) -> SparseReadStream<'_, R> {
        self.sparse_stream_with(StreamOptions::default())
    }

    /// Open a sparse stream with custom options
    pub fn sparse_stream_with(&mut self, options: StreamOptions) -> SparseReadStream<'_, R> {
        SparseReadStream::new(self, options)
    }

    /// Verify the data fork against the trailer's checksum
    ///
    /// Returns `None` when the trailer carries no data checksum. This
    /// covers the compressed container, not the reconstructed volume:
    /// container corruption is detectable without decompressing a single
    /// block. Only CRC32 is supported; requesting verification of any
    /// other type is an error.
    pub fn verify_data(&mut self) -> Result<Option<bool>> {
        match self.footer.data_checksum.kind {
            ChecksumType::None => return Ok(None),
            ChecksumType::Crc32 => {}
            other => return Err(UdifError::UnsupportedChecksum(other.tag())),
        }

        self.source
            .seek(SeekFrom::Start(self.footer.data_fork_offset))?;

        let mut hasher = crc32fast::Hasher::new();
        let mut buffer = vec![0u8; DEFAULT_CHUNK_SIZE];
        let mut remaining = self.footer.data_fork_length;

        while remaining > 0 {
            let n = remaining.min(buffer.len() as u64) as usize;
            let actual = read_full(&mut self.source, &mut buffer[..n])?;
            if actual != n {
                return Err(UdifError::TruncatedRead {
                    expected: n,
                    actual,
                });
            }
            hasher.update(&buffer[..n]);
            remaining -= n as u64;
        }

        let computed = format!("{:08x}", hasher.finalize());
        Ok(Some(computed == self.footer.data_checksum.value))
    }
}

impl Image<BufReader<File>> {
    /// Open an image file from a path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

/// Uncompressed size of the image at `path`, without opening a stream
pub fn uncompressed_size_of<P: AsRef<Path>>(path: P) -> Result<u64> {
    Ok(Image::open(path)?.uncompressed_size())
}
