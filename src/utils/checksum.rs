//! Payload checksum functions.
//!
//! The checksum algorithm differs between firmware generations and is not
//! confirmed for every vendor variant, so parsers take the function as a
//! parameter instead of hardcoding one.

use simd_adler32::adler32;

pub type ChecksumFn = fn(&[u8]) -> u32;

/// Default for UPDATE.APP block payloads.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

pub fn adler32_sum(data: &[u8]) -> u32 {
    adler32(&data)
}
