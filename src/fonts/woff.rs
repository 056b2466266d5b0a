//! WOFF 1.0 encoder.
//!
//! Layout: 44-byte header, one 20-byte directory entry per table (sorted by
//! tag), then the table data, each table zlib-compressed and starting on a
//! 4-byte boundary. A table is stored uncompressed when zlib does not make it
//! smaller. No metadata or private block.

use super::FontError;
use super::sfnt::{Sfnt, pad4};
use flate2::Compression;
use flate2::write::ZlibEncoder;
use std::io::Write;

const SIGNATURE: u32 = u32::from_be_bytes(*b"wOFF");
const HEADER_LEN: usize = 44;
const ENTRY_LEN: usize = 20;

fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Convert an sfnt font to WOFF.
pub fn encode(ttf: &[u8]) -> Result<Vec<u8>, FontError> {
    let font = Sfnt::parse(ttf)?;

    let mut blobs = Vec::with_capacity(font.tables.len());
    for table in &font.tables {
        let packed = compress(table.data)?;
        blobs.push(if packed.len() < table.data.len() {
            packed
        } else {
            table.data.to_vec()
        });
    }

    let directory_len = ENTRY_LEN * font.tables.len();
    let mut offset = HEADER_LEN + directory_len;
    let mut directory = Vec::with_capacity(directory_len);
    let mut data = Vec::new();
    for (table, blob) in font.tables.iter().zip(&blobs) {
        directory.extend_from_slice(&table.tag);
        directory.extend_from_slice(&(offset as u32).to_be_bytes());
        directory.extend_from_slice(&(blob.len() as u32).to_be_bytes());
        directory.extend_from_slice(&(table.data.len() as u32).to_be_bytes());
        directory.extend_from_slice(&table.checksum.to_be_bytes());
        data.extend_from_slice(blob);
        data.resize(pad4(data.len()), 0);
        offset = HEADER_LEN + directory_len + data.len();
    }

    let total = HEADER_LEN + directory.len() + data.len();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&SIGNATURE.to_be_bytes());
    out.extend_from_slice(&font.flavor.to_be_bytes());
    out.extend_from_slice(&(total as u32).to_be_bytes());
    out.extend_from_slice(&(font.tables.len() as u16).to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&(font.total_sfnt_size() as u32).to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    // metaOffset, metaLength, metaOrigLength, privOffset, privLength
    out.extend_from_slice(&[0u8; 20]);
    out.extend_from_slice(&directory);
    out.extend_from_slice(&data);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fonts::sfnt::{read_u16, read_u32};
    use crate::test_helpers::default_sfnt;
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    #[test]
    fn header_fields() {
        let ttf = default_sfnt();
        let woff = encode(&ttf).unwrap();
        assert_eq!(&woff[0..4], b"wOFF");
        assert_eq!(read_u32(&woff, 4), Some(0x0001_0000));
        assert_eq!(read_u32(&woff, 8), Some(woff.len() as u32));
        assert_eq!(read_u16(&woff, 12), Some(5));
        assert_eq!(read_u32(&woff, 16), Some(ttf.len() as u32));
        assert_eq!(read_u16(&woff, 20), Some(1));
        assert_eq!(woff.len() % 4, 0);
    }

    #[test]
    fn tables_decode_back_to_the_original() {
        let ttf = default_sfnt();
        let font = Sfnt::parse(&ttf).unwrap();
        let woff = encode(&ttf).unwrap();

        for (i, table) in font.tables.iter().enumerate() {
            let entry = HEADER_LEN + ENTRY_LEN * i;
            assert_eq!(&woff[entry..entry + 4], &table.tag);
            let offset = read_u32(&woff, entry + 4).unwrap() as usize;
            let comp_len = read_u32(&woff, entry + 8).unwrap() as usize;
            let orig_len = read_u32(&woff, entry + 12).unwrap() as usize;
            assert_eq!(offset % 4, 0);
            assert_eq!(orig_len, table.data.len());
            assert_eq!(read_u32(&woff, entry + 16), Some(table.checksum));

            let stored = &woff[offset..offset + comp_len];
            let decoded = if comp_len < orig_len {
                let mut out = Vec::new();
                ZlibDecoder::new(stored).read_to_end(&mut out).unwrap();
                out
            } else {
                stored.to_vec()
            };
            assert_eq!(decoded, table.data);
        }
    }

    #[test]
    fn incompressible_tables_are_stored_raw() {
        let ttf = default_sfnt();
        let woff = encode(&ttf).unwrap();
        // "zzzz" (3 bytes) is the last entry and cannot shrink
        let entry = HEADER_LEN + ENTRY_LEN * 4;
        assert_eq!(&woff[entry..entry + 4], b"zzzz");
        assert_eq!(read_u32(&woff, entry + 8), Some(3));
    }

    #[test]
    fn malformed_input_is_an_error() {
        assert!(encode(b"garbage").is_err());
    }
}
