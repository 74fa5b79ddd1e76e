//! Streaming reconstruction of the logical volume
//!
//! Two pull-based read modes over the same block traversal:
//! [`ReadStream`] materializes the full logical byte stream, zero-filling
//! gaps; [`SparseReadStream`] emits only backed ranges, each tagged with
//! the absolute offset at which it belongs in the reconstructed volume.
//! Every pull performs at most one ranged read and one decompression;
//! there is no buffering beyond the block in flight.

use std::io::{Read, Seek, SeekFrom};

use crate::blocks::{BlockCursor, MARKER_EXCLUDE, SPARSE_EXCLUDE};
use crate::error::{Result, UdifError};
use crate::format::{Block, BlockType};
use crate::{Image, SECTOR_SIZE};

/// Default maximum size of an emitted zero-fill chunk
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Read until the buffer is full or EOF.
/// Unlike `read()`, this loops to handle sources that return partial data.
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..])? {
            0 => break, // EOF
            n => total += n,
        }
    }
    Ok(total)
}

/// Read exactly `length` bytes at `position`; a short read is fatal
pub(crate) fn read_range<R: Read + Seek>(
    source: &mut R,
    position: u64,
    length: usize,
) -> Result<Vec<u8>> {
    source.seek(SeekFrom::Start(position))?;
    let mut buffer = vec![0u8; length];
    let actual = read_full(source, &mut buffer)?;
    if actual != length {
        return Err(UdifError::TruncatedRead {
            expected: length,
            actual,
        });
    }
    Ok(buffer)
}

/// Decompress one block payload according to its compression tag
pub(crate) fn decompress_block(kind: BlockType, buffer: &[u8], expected: usize) -> Result<Vec<u8>> {
    match kind {
        BlockType::Udzo => {
            let mut decoder = flate2::read::ZlibDecoder::new(buffer);
            let mut out = Vec::with_capacity(expected);
            decoder
                .read_to_end(&mut out)
                .map_err(|e| UdifError::Decompression(format!("zlib: {e}")))?;
            Ok(out)
        }
        BlockType::Udbz => {
            let mut decoder = bzip2::read::BzDecoder::new(buffer);
            let mut out = Vec::with_capacity(expected);
            decoder
                .read_to_end(&mut out)
                .map_err(|e| UdifError::Decompression(format!("bzip2: {e}")))?;
            Ok(out)
        }
        BlockType::Udco => {
            let mut decoder = adc::AdcDecoder::new(buffer);
            let mut out = Vec::with_capacity(expected);
            decoder
                .read_to_end(&mut out)
                .map_err(|e| UdifError::Decompression(format!("adc: {e}")))?;
            Ok(out)
        }
        BlockType::Lzfse => Err(UdifError::UnsupportedCompression("LZFSE")),
        other => Err(UdifError::UnknownCompression(other.tag())),
    }
}

/// Reconstruct the payload of a single data-bearing block: one ranged
/// read, plus a decompression pass for compressed tags. Zero-fill/free
/// runs and markers never reach here; both stream modes divert them
/// before reconstruction.
pub(crate) fn reconstruct_block<R: Read + Seek>(
    source: &mut R,
    data_fork_offset: u64,
    block: &Block,
) -> Result<Vec<u8>> {
    debug_assert!(!block.kind.is_zero() && !block.kind.is_marker());

    let position = data_fork_offset + block.compressed_offset;
    let length = block.compressed_length as usize;

    if block.kind == BlockType::Raw {
        return read_range(source, position, length);
    }

    let compressed = read_range(source, position, length)?;
    decompress_block(
        block.kind,
        &compressed,
        (block.sector_count * SECTOR_SIZE) as usize,
    )
}

/// Options shared by both stream modes
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Upper bound on the size of emitted zero-fill chunks
    pub chunk_size: usize,
    /// Fail the stream if a reconstructed block is not exactly
    /// `sector_count * SECTOR_SIZE` bytes
    pub strict_length: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        StreamOptions {
            chunk_size: DEFAULT_CHUNK_SIZE,
            strict_length: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Active,
    Done,
    Failed,
}

/// A chunk of a sparse stream, with its placement offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseChunk {
    /// Absolute offset of this chunk within the reconstructed volume
    pub position: u64,
    pub buffer: Vec<u8>,
}

/// Contiguous logical byte stream over an image
///
/// Yields the full volume contents in order, including zero-filled
/// regions. Ends after exactly the image's uncompressed size; the first
/// error is yielded once and fuses the stream.
pub struct ReadStream<'a, R: Read + Seek> {
    image: &'a mut Image<R>,
    options: StreamOptions,
    cursor: BlockCursor,
    zero_remaining: Option<u64>,
    state: StreamState,
    bytes_read: u64,
    bytes_written: u64,
}

impl<'a, R: Read + Seek> ReadStream<'a, R> {
    pub(crate) fn new(image: &'a mut Image<R>, options: StreamOptions) -> Self {
        ReadStream {
            image,
            options,
            cursor: BlockCursor::default(),
            zero_remaining: None,
            state: StreamState::Active,
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    /// Compressed bytes read from the data fork so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Bytes emitted to the consumer so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn emit_block(&mut self, block: &Block) -> Result<Vec<u8>> {
        let buffer = reconstruct_block(
            &mut self.image.source,
            self.image.footer.data_fork_offset,
            block,
        )?;
        self.bytes_read += block.compressed_length;
        check_length(&self.options, block, &buffer)?;
        self.bytes_written += buffer.len() as u64;
        Ok(buffer)
    }
}

impl<'a, R: Read + Seek> Iterator for ReadStream<'a, R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.state != StreamState::Active {
                return None;
            }

            // an in-progress zero-fill run is drained chunk by chunk;
            // the counter must reach exactly 0 before the cursor moves
            if let Some(remaining) = self.zero_remaining {
                if remaining == 0 {
                    self.zero_remaining = None;
                    self.cursor.advance();
                    continue;
                }
                let n = remaining.min(self.options.chunk_size as u64);
                self.zero_remaining = Some(remaining - n);
                self.bytes_written += n;
                return Some(Ok(vec![0u8; n as usize]));
            }

            let block = match self
                .cursor
                .seek_included(&self.image.resource_fork.blkx, MARKER_EXCLUDE)
            {
                Some((_, block)) => block.clone(),
                None => {
                    self.state = StreamState::Done;
                    return None;
                }
            };

            if block.kind.is_zero() {
                self.zero_remaining = Some(block.sector_count * SECTOR_SIZE);
                continue;
            }

            let result = self.emit_block(&block);
            self.cursor.advance();
            return match result {
                Ok(buffer) => Some(Ok(buffer)),
                Err(e) => {
                    self.state = StreamState::Failed;
                    Some(Err(e))
                }
            };
        }
    }
}

/// Sparse stream over an image: only backed byte ranges are emitted
///
/// Zero-fill and free blocks produce nothing; every chunk carries the
/// absolute logical offset at which it must be placed.
pub struct SparseReadStream<'a, R: Read + Seek> {
    image: &'a mut Image<R>,
    options: StreamOptions,
    cursor: BlockCursor,
    state: StreamState,
    bytes_read: u64,
    bytes_written: u64,
}

impl<'a, R: Read + Seek> SparseReadStream<'a, R> {
    pub(crate) fn new(image: &'a mut Image<R>, options: StreamOptions) -> Self {
        SparseReadStream {
            image,
            options,
            cursor: BlockCursor::default(),
            state: StreamState::Active,
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    /// Compressed bytes read from the data fork so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Bytes emitted to the consumer so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl<'a, R: Read + Seek> Iterator for SparseReadStream<'a, R> {
    type Item = Result<SparseChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state != StreamState::Active {
            return None;
        }

        let (map_sector, block) = match self
            .cursor
            .seek_included(&self.image.resource_fork.blkx, SPARSE_EXCLUDE)
        {
            Some((entry, block)) => (entry.map.sector_number, block.clone()),
            None => {
                self.state = StreamState::Done;
                return None;
            }
        };

        let result = reconstruct_block(
            &mut self.image.source,
            self.image.footer.data_fork_offset,
            &block,
        )
        .and_then(|buffer| {
            check_length(&self.options, &block, &buffer)?;
            Ok(buffer)
        });
        self.cursor.advance();

        match result {
            Ok(buffer) => {
                self.bytes_read += block.compressed_length;
                self.bytes_written += buffer.len() as u64;
                Some(Ok(SparseChunk {
                    position: (map_sector + block.sector_number) * SECTOR_SIZE,
                    buffer,
                }))
            }
            Err(e) => {
                self.state = StreamState::Failed;
                Some(Err(e))
            }
        }
    }
}

fn check_length(options: &StreamOptions, block: &Block, buffer: &[u8]) -> Result<()> {
    let expected = block.sector_count * SECTOR_SIZE;
    if options.strict_length && buffer.len() as u64 != expected {
        return Err(UdifError::BlockLengthMismatch {
            expected,
            actual: buffer.len() as u64,
        });
    }
    Ok(())
}
