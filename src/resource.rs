//! Resource fork directory interpretation
//!
//! The XML region referenced by the koly trailer decodes to a property
//! list whose `resource-fork` dictionary groups generic
//! `{ID, Attributes, Name, Data}` records under 4-character type keys.
//! Each group is resolved into a typed collection exactly once, here;
//! nothing downstream re-inspects raw plist values.

use byteorder::{ByteOrder, LittleEndian};
use plist::Value;

use crate::checksum::{hex_encode, ChecksumType};
use crate::error::{Result, UdifError};
use crate::format::BlockMap;

/// A blkx resource: one partition/segment and its parsed block map
#[derive(Debug, Clone)]
pub struct BlkxEntry {
    pub id: i32,
    pub attributes: u32,
    /// Partition name, e.g. "Apple_HFS" or "Driver Descriptor Map"
    pub name: String,
    /// Core Foundation name, when present
    pub core_foundation_name: Option<String>,
    /// The decoded mish block map
    pub map: BlockMap,
}

/// An nsiz resource; its payload is itself a property list
#[derive(Debug, Clone)]
pub struct NsizEntry {
    pub id: i32,
    pub attributes: u32,
    pub name: String,
    pub data: Value,
}

/// A cSum resource: a small fixed binary checksum record
///
/// Unlike everything else in the format, this little header is
/// little-endian.
#[derive(Debug, Clone)]
pub struct CsumEntry {
    pub id: i32,
    pub attributes: u32,
    pub name: String,
    pub unknown: u16,
    pub kind: ChecksumType,
    /// Remaining payload bytes as lowercase hex
    pub value: String,
}

/// A resource retained without interpretation (plst, size)
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub id: i32,
    pub attributes: u32,
    pub name: String,
    pub data: Vec<u8>,
}

/// The typed resource fork directory of an image
#[derive(Debug, Clone, Default)]
pub struct ResourceFork {
    pub blkx: Vec<BlkxEntry>,
    pub nsiz: Vec<NsizEntry>,
    pub csum: Vec<CsumEntry>,
    pub plst: Vec<RawEntry>,
    pub size: Vec<RawEntry>,
}

impl ResourceFork {
    /// Decode the XML property list region into a typed directory
    ///
    /// Missing groups are simply empty. A blkx record whose Data fails
    /// block map parsing aborts the whole directory parse; a partially
    /// interpreted directory is not a supported state.
    pub fn parse(xml: &[u8]) -> Result<Self> {
        let value: Value = plist::from_bytes(xml)
            .map_err(|e| UdifError::InvalidPlist(format!("plist parse error: {e}")))?;

        let dict = value
            .as_dictionary()
            .ok_or_else(|| UdifError::InvalidPlist("expected dictionary".into()))?;

        let fork = dict
            .get("resource-fork")
            .and_then(|v| v.as_dictionary())
            .ok_or_else(|| UdifError::InvalidPlist("missing resource-fork".into()))?;

        let mut directory = ResourceFork::default();

        for entry in group(fork, "blkx") {
            let record = Record::parse(entry)?;
            let map = BlockMap::parse(record.data, 0)
                .map_err(|e| UdifError::InvalidBlockMap(e.to_string()))?;
            directory.blkx.push(BlkxEntry {
                id: record.id,
                attributes: record.attributes,
                name: record.name,
                core_foundation_name: record.cf_name,
                map,
            });
        }

        for entry in group(fork, "nsiz") {
            let record = Record::parse(entry)?;
            let data: Value = plist::from_bytes(record.data)
                .map_err(|e| UdifError::InvalidPlist(format!("nsiz payload: {e}")))?;
            directory.nsiz.push(NsizEntry {
                id: record.id,
                attributes: record.attributes,
                name: record.name,
                data,
            });
        }

        for entry in group(fork, "cSum") {
            let record = Record::parse(entry)?;
            if record.data.len() < 6 {
                return Err(UdifError::InvalidPlist("cSum payload too short".into()));
            }
            directory.csum.push(CsumEntry {
                id: record.id,
                attributes: record.attributes,
                name: record.name,
                unknown: LittleEndian::read_u16(&record.data[0..]),
                kind: ChecksumType::from(LittleEndian::read_u32(&record.data[2..])),
                value: hex_encode(&record.data[6..]),
            });
        }

        for (key, bucket) in [("plst", &mut directory.plst), ("size", &mut directory.size)] {
            for entry in group(fork, key) {
                let record = Record::parse(entry)?;
                bucket.push(RawEntry {
                    id: record.id,
                    attributes: record.attributes,
                    name: record.name,
                    data: record.data.to_vec(),
                });
            }
        }

        Ok(directory)
    }
}

fn group<'a>(fork: &'a plist::Dictionary, key: &str) -> impl Iterator<Item = &'a Value> {
    fork.get(key)
        .and_then(|v| v.as_array())
        .map(|a| a.as_slice())
        .unwrap_or(&[])
        .iter()
}

/// The generic shape shared by every resource record
struct Record<'a> {
    id: i32,
    attributes: u32,
    name: String,
    cf_name: Option<String>,
    data: &'a [u8],
}

impl<'a> Record<'a> {
    fn parse(entry: &'a Value) -> Result<Self> {
        let dict = entry
            .as_dictionary()
            .ok_or_else(|| UdifError::InvalidPlist("resource entry not a dictionary".into()))?;

        let data = dict
            .get("Data")
            .and_then(|v| v.as_data())
            .ok_or_else(|| UdifError::InvalidPlist("missing Data in resource entry".into()))?;

        Ok(Record {
            id: int_field(dict, "ID") as i32,
            attributes: int_field(dict, "Attributes") as u32,
            name: string_field(dict, "Name").unwrap_or_default(),
            cf_name: string_field(dict, "CFName"),
            data,
        })
    }
}

fn string_field(dict: &plist::Dictionary, key: &str) -> Option<String> {
    dict.get(key).and_then(|v| v.as_string()).map(String::from)
}

/// ID and Attributes appear as plist strings (decimal or "0x…" hex) in
/// most images, but some tools emit real integers; accept both.
fn int_field(dict: &plist::Dictionary, key: &str) -> i64 {
    match dict.get(key) {
        Some(Value::String(s)) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                i64::from_str_radix(hex, 16).unwrap_or(0)
            } else {
                s.parse().unwrap_or(0)
            }
        }
        Some(value) => value.as_signed_integer().unwrap_or(0),
        None => 0,
    }
}
