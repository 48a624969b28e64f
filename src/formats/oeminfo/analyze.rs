//! Content classification for OEMINFO entry payloads.
//!
//! Several entries hold boot logos and similar resources, usually a gzip
//! member (often with its original file name recorded) wrapping a BMP.
//! This feeds the list command's info column and lets extraction drop
//! decoded images next to the raw entry dumps.

use crate::utils::common::ByteReader;
use crate::utils::compression::decompress_gzip;

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const GZIP_METHOD_DEFLATE: u8 = 0x08;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;

#[derive(Debug, PartialEq)]
pub enum PayloadInfo {
    GzipBmp {
        filename: String,
        gzip_offset: usize,
        width: u32,
        height: u32,
        bpp: u16,
    },
    RawBmp {
        width: u32,
        height: u32,
        bpp: u16,
    },
    GzipData {
        filename: String,
        gzip_offset: usize,
    },
    Opaque,
}

impl PayloadInfo {
    pub fn describe(&self) -> String {
        match self {
            PayloadInfo::GzipBmp {
                filename,
                width,
                height,
                bpp,
                ..
            } => {
                let mut info = format!("gzipped BMP {}x{} {}bpp", width, height, bpp);
                if !filename.is_empty() {
                    info.push_str(&format!(" '{}'", filename));
                }
                info
            }
            PayloadInfo::RawBmp { width, height, bpp } => {
                format!("raw BMP {}x{} {}bpp", width, height, bpp)
            }
            PayloadInfo::GzipData { filename, .. } => {
                let mut info = "gzipped data".to_string();
                if !filename.is_empty() {
                    info.push_str(&format!(" '{}'", filename));
                }
                info
            }
            PayloadInfo::Opaque => String::new(),
        }
    }
}

pub fn analyze(data: &[u8]) -> PayloadInfo {
    if data.len() < 10 {
        return PayloadInfo::Opaque;
    }

    if let Some((gzip_offset, filename)) = find_gzip_member(data) {
        if let Ok(decompressed) = decompress_gzip(&data[gzip_offset..]) {
            if let Some((width, height, bpp)) = bmp_header(&decompressed) {
                return PayloadInfo::GzipBmp {
                    filename,
                    gzip_offset,
                    width,
                    height,
                    bpp,
                };
            }
            return PayloadInfo::GzipData {
                filename,
                gzip_offset,
            };
        }
    }

    if let Some((width, height, bpp)) = bmp_header(data) {
        return PayloadInfo::RawBmp { width, height, bpp };
    }

    PayloadInfo::Opaque
}

/// Scan for a gzip member, returning its offset and the FNAME field if the
/// member records one. Some entries prefix the member with vendor bytes,
/// so this searches rather than anchoring at offset 0.
fn find_gzip_member(data: &[u8]) -> Option<(usize, String)> {
    for i in 0..data.len().saturating_sub(10) {
        if data[i..i + 2] != GZIP_MAGIC || data[i + 2] != GZIP_METHOD_DEFLATE {
            continue;
        }
        if let Some(filename) = parse_member_name(&data[i..]) {
            return Some((i, filename));
        }
    }
    None
}

fn parse_member_name(member: &[u8]) -> Option<String> {
    let mut reader = ByteReader::new(member);
    reader.seek_to(3).ok()?;
    let flags = reader.read_u8().ok()?;
    //mtime + xfl + os
    reader.seek_to(10).ok()?;

    if flags & FEXTRA != 0 {
        let xlen = reader.read_u16_le().ok()?;
        reader.read_bytes(xlen as usize).ok()?;
    }

    let mut filename = String::new();
    if flags & FNAME != 0 {
        let mut name_bytes = Vec::new();
        loop {
            match reader.read_u8().ok()? {
                0 => break,
                b => name_bytes.push(b),
            }
        }
        filename = String::from_utf8_lossy(&name_bytes).to_string();
    }
    Some(filename)
}

fn bmp_header(data: &[u8]) -> Option<(u32, u32, u16)> {
    if data.len() < 54 || &data[..2] != b"BM" {
        return None;
    }
    let mut reader = ByteReader::new(data);
    reader.seek_to(18).ok()?;
    let width = (reader.read_u32_le().ok()? as i32).unsigned_abs();
    let height = (reader.read_u32_le().ok()? as i32).unsigned_abs();
    reader.seek_to(28).ok()?;
    let bpp = reader.read_u16_le().ok()?;
    Some((width, height, bpp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compression, GzBuilder};
    use std::io::Write;

    fn sample_bmp(width: i32, height: i32, bpp: u16) -> Vec<u8> {
        let mut bmp = Vec::new();
        bmp.extend_from_slice(b"BM");
        bmp.resize(18, 0);
        bmp.extend_from_slice(&width.to_le_bytes());
        bmp.extend_from_slice(&height.to_le_bytes());
        bmp.extend_from_slice(&1u16.to_le_bytes()); //planes
        bmp.extend_from_slice(&bpp.to_le_bytes());
        bmp.resize(64, 0);
        bmp
    }

    fn gzip_with_name(data: &[u8], filename: Option<&str>) -> Vec<u8> {
        let mut builder = GzBuilder::new();
        if let Some(name) = filename {
            builder = builder.filename(name);
        }
        let mut encoder = builder.write(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn detects_gzipped_bmp_with_filename() {
        let payload = gzip_with_name(&sample_bmp(360, 640, 24), Some("logo.bmp"));
        let info = analyze(&payload);
        assert_eq!(
            info,
            PayloadInfo::GzipBmp {
                filename: "logo.bmp".to_string(),
                gzip_offset: 0,
                width: 360,
                height: 640,
                bpp: 24,
            }
        );
        assert_eq!(info.describe(), "gzipped BMP 360x640 24bpp 'logo.bmp'");
    }

    #[test]
    fn finds_gzip_member_behind_vendor_prefix() {
        let mut payload = vec![0xEE; 16];
        payload.extend_from_slice(&gzip_with_name(b"not a bitmap", None));
        assert_eq!(
            analyze(&payload),
            PayloadInfo::GzipData {
                filename: String::new(),
                gzip_offset: 16,
            }
        );
    }

    #[test]
    fn detects_raw_bmp_and_negative_height() {
        //top-down BMPs store a negative height
        let info = analyze(&sample_bmp(64, -32, 16));
        assert_eq!(
            info,
            PayloadInfo::RawBmp {
                width: 64,
                height: 32,
                bpp: 16,
            }
        );
    }

    #[test]
    fn opaque_for_plain_and_tiny_payloads() {
        assert_eq!(analyze(b"0123456789abcdef"), PayloadInfo::Opaque);
        assert_eq!(analyze(b"tiny"), PayloadInfo::Opaque);
        assert_eq!(PayloadInfo::Opaque.describe(), "");
    }
}
