//! WOFF 2.0 encoder, null-transform flavour.
//!
//! Every table goes into a single brotli stream without the `glyf`/`loca`
//! or `hmtx` transforms. Browsers accept this form (transform version 3 on
//! `glyf`/`loca`, version 0 elsewhere); the file is somewhat larger than a
//! fully transformed one but needs no outline processing.

use super::FontError;
use super::sfnt::{Sfnt, pad4};
use std::io::Write;

const SIGNATURE: u32 = u32::from_be_bytes(*b"wOF2");
const HEADER_LEN: usize = 48;

/// Tags with a one-byte code in the table directory, by index.
pub const KNOWN_TAGS: [&[u8; 4]; 63] = [
    b"cmap", b"head", b"hhea", b"hmtx", b"maxp", b"name", b"OS/2", b"post", b"cvt ", b"fpgm",
    b"glyf", b"loca", b"prep", b"CFF ", b"VORG", b"EBDT", b"EBLC", b"gasp", b"hdmx", b"kern",
    b"LTSH", b"PCLT", b"VDMX", b"vhea", b"vmtx", b"BASE", b"GDEF", b"GPOS", b"GSUB", b"EBSC",
    b"JSTF", b"MATH", b"CBDT", b"CBLC", b"COLR", b"CPAL", b"SVG ", b"sbix", b"acnt", b"avar",
    b"bdat", b"bloc", b"bsln", b"cvar", b"fdsc", b"feat", b"fmtx", b"fvar", b"gvar", b"hsty",
    b"just", b"lcar", b"mort", b"morx", b"opbd", b"prop", b"trak", b"Zapf", b"Silf", b"Glat",
    b"Gloc", b"Feat", b"Sill",
];

/// Flag value for a tag stored inline after the flags byte.
const ARBITRARY_TAG: u8 = 63;
/// Transform version 3 on `glyf`/`loca` means "not transformed".
const NULL_TRANSFORM_GLYF: u8 = 3 << 6;

/// UIntBase128: big-endian 7-bit groups, high bit set on all but the last.
pub fn uint_base128(mut value: u32, out: &mut Vec<u8>) {
    let mut groups = [0u8; 5];
    let mut n = 0;
    loop {
        groups[n] = (value & 0x7f) as u8;
        n += 1;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    for i in (0..n).rev() {
        let continuation = if i > 0 { 0x80 } else { 0 };
        out.push(groups[i] | continuation);
    }
}

fn flags_for(tag: &[u8; 4]) -> (u8, bool) {
    let transform = if tag == b"glyf" || tag == b"loca" {
        NULL_TRANSFORM_GLYF
    } else {
        0
    };
    match KNOWN_TAGS.iter().position(|known| *known == tag) {
        Some(index) => (index as u8 | transform, false),
        None => (ARBITRARY_TAG | transform, true),
    }
}

/// Convert an sfnt font to WOFF2.
pub fn encode(ttf: &[u8]) -> Result<Vec<u8>, FontError> {
    let font = Sfnt::parse(ttf)?;

    let mut directory = Vec::new();
    let mut stream = Vec::new();
    for table in &font.tables {
        let (flags, inline_tag) = flags_for(&table.tag);
        directory.push(flags);
        if inline_tag {
            directory.extend_from_slice(&table.tag);
        }
        uint_base128(table.data.len() as u32, &mut directory);
        stream.extend_from_slice(table.data);
    }

    let mut compressed = Vec::new();
    {
        let mut writer = brotli::CompressorWriter::new(&mut compressed, 4096, 11, 22);
        writer.write_all(&stream)?;
        writer.flush()?;
    }

    let body_len = HEADER_LEN + directory.len() + compressed.len();
    let total = pad4(body_len);
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&SIGNATURE.to_be_bytes());
    out.extend_from_slice(&font.flavor.to_be_bytes());
    out.extend_from_slice(&(total as u32).to_be_bytes());
    out.extend_from_slice(&(font.tables.len() as u16).to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&(font.total_sfnt_size() as u32).to_be_bytes());
    out.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    // metaOffset, metaLength, metaOrigLength, privOffset, privLength
    out.extend_from_slice(&[0u8; 20]);
    out.extend_from_slice(&directory);
    out.extend_from_slice(&compressed);
    out.resize(total, 0);
    Ok(out)
}
