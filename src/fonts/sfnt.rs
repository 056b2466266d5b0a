//! Minimal sfnt (TrueType/OpenType) table directory reader.

use super::FontError;

/// One table of an sfnt font.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table<'a> {
    pub tag: [u8; 4],
    pub checksum: u32,
    pub data: &'a [u8],
}

/// A parsed font: flavor plus tables sorted by tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sfnt<'a> {
    pub flavor: u32,
    pub tables: Vec<Table<'a>>,
}

const TRUETYPE: u32 = 0x0001_0000;
const OPENTYPE: u32 = u32::from_be_bytes(*b"OTTO");
const APPLE_TRUE: u32 = u32::from_be_bytes(*b"true");

pub fn read_u16(bytes: &[u8], at: usize) -> Option<u16> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
}

pub fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Round up to a multiple of four.
pub fn pad4(n: usize) -> usize {
    (n + 3) & !3
}

impl<'a> Sfnt<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, FontError> {
        let malformed = |msg: &str| FontError::Malformed(msg.to_string());

        let flavor = read_u32(bytes, 0).ok_or_else(|| malformed("file too short"))?;
        if ![TRUETYPE, OPENTYPE, APPLE_TRUE].contains(&flavor) {
            return Err(malformed("not a TrueType/OpenType font"));
        }
        let num_tables = read_u16(bytes, 4).ok_or_else(|| malformed("file too short"))? as usize;
        if num_tables == 0 {
            return Err(malformed("font has no tables"));
        }

        let mut tables = Vec::with_capacity(num_tables);
        for i in 0..num_tables {
            let record = 12 + 16 * i;
            let tag_bytes = bytes
                .get(record..record + 4)
                .ok_or_else(|| malformed("truncated table directory"))?;
            let tag = [tag_bytes[0], tag_bytes[1], tag_bytes[2], tag_bytes[3]];
            let (Some(checksum), Some(offset), Some(length)) = (
                read_u32(bytes, record + 4),
                read_u32(bytes, record + 8),
                read_u32(bytes, record + 12),
            ) else {
                return Err(malformed("truncated table directory"));
            };
            let (offset, length) = (offset as usize, length as usize);
            let data = offset
                .checked_add(length)
                .and_then(|end| bytes.get(offset..end))
                .ok_or_else(|| {
                    FontError::Malformed(format!(
                        "table '{}' extends past end of file",
                        String::from_utf8_lossy(&tag)
                    ))
                })?;
            tables.push(Table {
                tag,
                checksum,
                data,
            });
        }
        tables.sort_by_key(|t| t.tag);
        if tables.windows(2).any(|w| w[0].tag == w[1].tag) {
            return Err(malformed("duplicate table tag"));
        }
        Ok(Self { flavor, tables })
    }

    /// Size of the font as an uncompressed sfnt, tables padded.
    pub fn total_sfnt_size(&self) -> usize {
        12 + 16 * self.tables.len() + self.tables.iter().map(|t| pad4(t.data.len())).sum::<usize>()
    }
}
