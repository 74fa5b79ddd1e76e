//! Shared test fixtures: an in-memory image builder and payload encoders.

use std::io::Write;

use base64::Engine;

use crate::checksum::{Checksum, ChecksumType};
use crate::format::{Block, BlockMap, BlockType, Footer, KOLY_SIGNATURE, MISH_SIGNATURE};
use crate::resource::BlkxEntry;

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn bzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Encode data as ADC literal runs (opcode `0x80 | (len - 1)`, max 128
/// literals per run). Wasteful, but any decoder must accept it.
pub fn adc_literal(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 128 + 1);
    for run in data.chunks(128) {
        out.push(0x80 | (run.len() - 1) as u8);
        out.extend_from_slice(run);
    }
    out
}

fn empty_checksum() -> Checksum {
    Checksum {
        kind: ChecksumType::Crc32,
        bits: 32,
        value: "00000000".to_string(),
    }
}

fn map_with_blocks(sector_number: u64, sector_count: u64, blocks: Vec<Block>) -> BlockMap {
    BlockMap {
        signature: MISH_SIGNATURE,
        version: 1,
        sector_number,
        sector_count,
        data_offset: 0,
        buffers_needed: 2048,
        block_descriptor_count: 0,
        reserved1: 0,
        reserved2: 0,
        reserved3: 0,
        reserved4: 0,
        reserved5: 0,
        reserved6: 0,
        checksum: empty_checksum(),
        block_count: blocks.len() as u32,
        blocks,
    }
}

/// A minimal valid block map: one zero-fill run plus the terminator
pub fn zero_map(sector_number: u64, sector_count: u64) -> BlockMap {
    let blocks = vec![
        Block {
            kind: BlockType::ZeroFill,
            comment: String::new(),
            sector_number: 0,
            sector_count,
            compressed_offset: 0,
            compressed_length: 0,
        },
        Block {
            kind: BlockType::Terminator,
            comment: String::new(),
            sector_number: sector_count,
            sector_count: 0,
            compressed_offset: 0,
            compressed_length: 0,
        },
    ];
    map_with_blocks(sector_number, sector_count, blocks)
}

/// A blkx entry wrapping the given blocks verbatim (no terminator added)
pub fn entry_with_blocks(id: i32, map_sector: u64, blocks: Vec<Block>) -> BlkxEntry {
    let sector_count = blocks
        .iter()
        .map(|b| b.sector_number + b.sector_count)
        .max()
        .unwrap_or(0);
    BlkxEntry {
        id,
        attributes: 0x50,
        name: format!("partition {id}"),
        core_foundation_name: None,
        map: map_with_blocks(map_sector, sector_count, blocks),
    }
}

/// Render a resource fork plist from `(key, id, attributes, name, data)`
/// records, grouped by key
pub fn plist_xml(entries: &[(&str, &str, &str, &str, &[u8])]) -> String {
    let mut keys: Vec<&str> = Vec::new();
    for (key, ..) in entries {
        if !keys.contains(key) {
            keys.push(key);
        }
    }

    let mut body = String::new();
    for key in keys {
        body.push_str(&format!("    <key>{key}</key>\n    <array>\n"));
        for (k, id, attributes, name, data) in entries {
            if *k != key {
                continue;
            }
            let encoded = base64::engine::general_purpose::STANDARD.encode(data);
            body.push_str(&format!(
                "      <dict>\n\
                 \x20       <key>ID</key><string>{id}</string>\n\
                 \x20       <key>Attributes</key><string>{attributes}</string>\n\
                 \x20       <key>Name</key><string>{name}</string>\n\
                 \x20       <key>Data</key><data>{encoded}</data>\n\
                 \x20     </dict>\n"
            ));
        }
        body.push_str("    </array>\n");
    }

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <plist version=\"1.0\">\n\
         <dict>\n\
         \x20 <key>resource-fork</key>\n\
         \x20 <dict>\n\
         {body}\
         \x20 </dict>\n\
         </dict>\n\
         </plist>\n"
    )
}

/// One run of sectors in a partition under construction
#[derive(Clone)]
pub enum Chunk {
    Run {
        kind: BlockType,
        payload: Vec<u8>,
        sectors: u64,
    },
    /// A block descriptor taken verbatim, for deliberately broken maps
    Custom(Block),
}

impl Chunk {
    pub fn data(kind: BlockType, payload: Vec<u8>, sectors: u64) -> Self {
        Chunk::Run {
            kind,
            payload,
            sectors,
        }
    }

    pub fn zero(sectors: u64) -> Self {
        Chunk::Run {
            kind: BlockType::ZeroFill,
            payload: Vec::new(),
            sectors,
        }
    }

    pub fn free(sectors: u64) -> Self {
        Chunk::Run {
            kind: BlockType::Free,
            payload: Vec::new(),
            sectors,
        }
    }

    pub fn custom(block: Block) -> Self {
        Chunk::Custom(block)
    }
}

/// Builds a complete, well-formed image in memory: data fork at offset
/// zero, XML directory, koly trailer with a real CRC32 data checksum
pub struct TestImage {
    data: Vec<u8>,
    partitions: Vec<(String, BlockMap)>,
    next_sector: u64,
    data_checksum: Option<ChecksumType>,
}

impl TestImage {
    pub fn new() -> Self {
        TestImage {
            data: Vec::new(),
            partitions: Vec::new(),
            next_sector: 0,
            data_checksum: None,
        }
    }

    /// Emit the trailer with no data checksum at all
    pub fn without_data_checksum(&mut self) {
        self.data_checksum = Some(ChecksumType::None);
    }

    /// Emit the trailer with a placeholder digest of the given type
    pub fn with_data_checksum_type(&mut self, kind: ChecksumType) {
        self.data_checksum = Some(kind);
    }

    /// Append a partition; its map starts where the previous one ended
    pub fn partition(&mut self, name: &str, chunks: &[Chunk]) {
        let base = self.next_sector;
        let mut sector = 0u64;
        let mut blocks = Vec::new();

        for chunk in chunks {
            match chunk {
                Chunk::Custom(block) => {
                    sector = sector.max(block.sector_number + block.sector_count);
                    blocks.push(block.clone());
                }
                Chunk::Run {
                    kind,
                    payload,
                    sectors,
                } => {
                    let compressed_offset = self.data.len() as u64;
                    let stored = !kind.is_zero() && !kind.is_marker();
                    if stored {
                        self.data.extend_from_slice(payload);
                    }
                    blocks.push(Block {
                        kind: *kind,
                        comment: String::new(),
                        sector_number: sector,
                        sector_count: *sectors,
                        compressed_offset,
                        compressed_length: if stored { payload.len() as u64 } else { 0 },
                    });
                    sector += sectors;
                }
            }
        }

        blocks.push(Block {
            kind: BlockType::Terminator,
            comment: String::new(),
            sector_number: sector,
            sector_count: 0,
            compressed_offset: self.data.len() as u64,
            compressed_length: 0,
        });

        self.partitions
            .push((name.to_string(), map_with_blocks(base, sector, blocks)));
        self.next_sector = base + sector;
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = self.data.clone();

        let rendered: Vec<(String, String, Vec<u8>)> = self
            .partitions
            .iter()
            .enumerate()
            .map(|(i, (name, map))| {
                let mut bytes = Vec::new();
                map.write(&mut bytes).unwrap();
                (i.to_string(), name.clone(), bytes)
            })
            .collect();
        let entries: Vec<(&str, &str, &str, &str, &[u8])> = rendered
            .iter()
            .map(|(id, name, bytes)| {
                ("blkx", id.as_str(), "0x0050", name.as_str(), bytes.as_slice())
            })
            .collect();
        let xml = plist_xml(&entries);

        let xml_offset = out.len() as u64;
        out.extend_from_slice(xml.as_bytes());

        let data_checksum = match self.data_checksum {
            None => Checksum::crc32_of(&self.data),
            Some(ChecksumType::None) => Checksum {
                kind: ChecksumType::None,
                bits: 0,
                value: String::new(),
            },
            Some(kind) => Checksum {
                kind,
                bits: 32,
                value: "00000000".to_string(),
            },
        };

        let footer = Footer {
            signature: KOLY_SIGNATURE,
            version: 4,
            header_size: Footer::SIZE as u32,
            flags: 1,
            running_data_fork_offset: 0,
            data_fork_offset: 0,
            data_fork_length: self.data.len() as u64,
            resource_fork_offset: 0,
            resource_fork_length: 0,
            segment_number: 1,
            segment_count: 1,
            segment_id: [0u8; 16],
            data_checksum,
            xml_offset,
            xml_length: xml.len() as u64,
            reserved1: [0u8; 120],
            checksum: Checksum {
                kind: ChecksumType::None,
                bits: 0,
                value: String::new(),
            },
            image_variant: 1,
            sector_count: self.next_sector,
            reserved2: 0,
            reserved3: 0,
            reserved4: 0,
        };
        footer.write(&mut out).unwrap();

        out
    }
}
