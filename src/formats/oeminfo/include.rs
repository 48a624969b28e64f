use binrw::{BinRead, BinWrite};

pub const OEMINFO_MAGIC: [u8; 8] = *b"OEM_INFO";
pub const TABLE_HEADER_SIZE: usize = 16;
pub const SLOT_DESC_SIZE: usize = 24;
pub const DEFAULT_SLOT_STRIDE: usize = 32;

#[derive(Debug, BinRead)]
pub struct TableHeader {
    _magic: [u8; 8],
    pub version: u32,
    pub slot_count: u32,
}

/// One slot descriptor. Slots are fixed reservations - `capacity` and
/// `data_offset` never change across repacks, only `used` and `age` do.
#[derive(Debug, Clone, BinRead, BinWrite)]
pub struct SlotDesc {
    pub id: u32,
    pub kind: u32, //vendor record type tag
    pub age: u32,  //write counter
    pub used: u32,
    pub capacity: u32,
    pub data_offset: u32, //absolute, into the image
}

/// Table geometry. The slot stride differs between device generations and
/// is not confirmed for all of them, so parsing takes it as a parameter.
#[derive(Debug, Clone, Copy)]
pub struct OemInfoLayout {
    pub slot_stride: usize,
}

impl Default for OemInfoLayout {
    fn default() -> Self {
        Self {
            slot_stride: DEFAULT_SLOT_STRIDE,
        }
    }
}
