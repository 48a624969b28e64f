use binrw::BinRead;

use crate::utils::common;

pub const UPDATE_APP_MAGIC: [u8; 4] = [0x55, 0xAA, 0x5A, 0xA5];
pub const IMAGE_HEADER_SIZE: usize = 12;
pub const BLOCK_HEADER_SIZE: usize = 28;
//block headers start on 4 byte boundaries, payloads are padded up to them
pub const BLOCK_ALIGN: u64 = 4;

#[derive(Debug, BinRead)]
pub struct ImageHeader {
    _magic: [u8; 4],
    pub total_size: u32, //whole image including this header
    pub version: u32,
}

#[derive(Debug, BinRead)]
pub struct BlockHeader {
    pub header_size: u32, //payload begins at block start + header_size
    name_bytes: [u8; 16],
    pub data_size: u32,
    pub checksum: u32, //over the payload bytes
}

impl BlockHeader {
    pub fn name(&self) -> String {
        common::string_from_bytes(&self.name_bytes)
    }
}
