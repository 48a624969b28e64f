pub mod analyze;
pub mod include;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Cursor;

use binrw::{BinReaderExt, BinWriterExt};

use crate::container::{ContainerEntry, ExtractReport, Selector, Sink};
use crate::errors::FormatError;
use crate::utils::common::{self, ByteReader};
use include::*;

pub fn is_oeminfo_file(mut file: &File) -> bool {
    matches!(common::read_at(&mut file, 0, 8), Ok(magic) if magic == OEMINFO_MAGIC)
}

pub fn entry_name(id: u32) -> String {
    format!("entry_{:#06x}", id)
}

/// Parsed OEMINFO image.
///
/// The codec owns the whole image buffer - repack needs it, and the images
/// are small. Entry payloads stay inside the buffer until extracted.
pub struct OemInfo {
    image: Vec<u8>,
    layout: OemInfoLayout,
    version: u32,
    slots: Vec<SlotDesc>,
}

impl OemInfo {
    pub fn parse(image: Vec<u8>) -> Result<Self, FormatError> {
        Self::parse_with(image, OemInfoLayout::default())
    }

    pub fn parse_with(image: Vec<u8>, layout: OemInfoLayout) -> Result<Self, FormatError> {
        if layout.slot_stride < SLOT_DESC_SIZE {
            return Err(FormatError::InvalidFormat(format!(
                "slot stride {} is smaller than a slot descriptor",
                layout.slot_stride
            )));
        }

        let mut reader = ByteReader::new(&image);
        if reader
            .peek(8)
            .map(|magic| magic != OEMINFO_MAGIC.as_slice())
            .unwrap_or(true)
        {
            return Err(FormatError::InvalidFormat(
                "not an OEMINFO image (bad magic)".to_string(),
            ));
        }
        let header: TableHeader = reader
            .read_le()
            .map_err(|e| FormatError::from_binrw(e, 0))?;

        let table_end =
            TABLE_HEADER_SIZE as u64 + header.slot_count as u64 * layout.slot_stride as u64;
        if table_end > image.len() as u64 {
            return Err(FormatError::OutOfBounds {
                offset: image.len() as u64,
                needed: (table_end - image.len() as u64) as usize,
            });
        }

        let mut slots = Vec::with_capacity(header.slot_count as usize);
        for i in 0..header.slot_count as usize {
            let desc_offset = TABLE_HEADER_SIZE + i * layout.slot_stride;
            reader.seek_to(desc_offset)?;
            let slot: SlotDesc = reader
                .read_le()
                .map_err(|e| FormatError::from_binrw(e, desc_offset as u64))?;

            if slot.used > slot.capacity {
                return Err(FormatError::InvalidFormat(format!(
                    "slot {:#06x} claims {} used bytes in a {} byte reservation",
                    slot.id, slot.used, slot.capacity
                )));
            }
            let slot_end = slot.data_offset as u64 + slot.capacity as u64;
            if slot_end > image.len() as u64 {
                return Err(FormatError::OutOfBounds {
                    offset: image.len() as u64,
                    needed: (slot_end - image.len() as u64) as usize,
                });
            }
            slots.push(slot);
        }

        Ok(Self {
            image,
            layout,
            version: header.version,
            slots,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Raw slot table, including empty slots.
    pub fn slots(&self) -> &[SlotDesc] {
        &self.slots
    }

    /// One entry per occupied slot, payload view covering exactly the
    /// occupied bytes (not the full reservation).
    pub fn entries(&self) -> Vec<ContainerEntry> {
        self.slots
            .iter()
            .filter(|s| s.used > 0)
            .map(|s| ContainerEntry {
                id: s.id,
                name: entry_name(s.id),
                offset: s.data_offset as u64,
                length: s.used as usize,
                checksum: None,
                capacity: Some(s.capacity as usize),
            })
            .collect()
    }

    fn find_slot(&self, id: u32) -> Option<(usize, &SlotDesc)> {
        self.slots.iter().enumerate().find(|(_, s)| s.id == id)
    }

    /// The occupied bytes of one slot.
    pub fn entry_data(&self, id: u32) -> Result<&[u8], FormatError> {
        let (_, slot) = self
            .find_slot(id)
            .ok_or_else(|| FormatError::UnknownEntry(format!("{:#06x}", id)))?;
        let mut reader = ByteReader::new(&self.image);
        reader.seek_to(slot.data_offset as usize)?;
        reader.read_bytes(slot.used as usize)
    }

    /// Extract the selected entries into `sink`. Same selection and
    /// partial-failure semantics as UPDATE.APP extraction; capacity is
    /// never a failure here.
    pub fn unpack(
        &self,
        selector: &Selector,
        sink: &mut dyn Sink,
    ) -> Result<ExtractReport, FormatError> {
        let mut report = ExtractReport::new();
        let entries = self.entries();
        for label in selector.unmatched(&entries) {
            eprintln!("No entry matching '{}'!", label);
            report
                .failures
                .push((label.clone(), FormatError::UnknownEntry(label)));
        }

        let targets: Vec<&ContainerEntry> =
            entries.iter().filter(|e| selector.matches(e)).collect();

        for (n, entry) in targets.iter().enumerate() {
            println!(
                "\n({}/{}) - {}, Size: {}",
                n + 1,
                targets.len(),
                entry.name,
                entry.length
            );
            let data = self.entry_data(entry.id)?;
            sink.write_entry(&format!("{}.bin", entry.name), data)?;
            println!("- Saved file!");
            report.written.push(entry.name.clone());
        }

        Ok(report)
    }

    /// Build a new image with the given payloads written into their slots.
    ///
    /// Two phases: every replacement is validated against the slot table
    /// before a single byte of output exists, then all of them are
    /// committed into a copy of the base image. A failure in validation
    /// aborts the whole repack and the base image is untouched - writing
    /// an oversized payload into a fixed slot is what bricks devices, so
    /// it is rejected here, not warned about.
    ///
    /// An empty payload erases the slot (`used` drops to 0). Replaced
    /// slots get their slack zero-filled and their write counter bumped;
    /// untouched slots are copied byte for byte. The output always has the
    /// same total size as the input.
    pub fn repack(&self, replacements: &BTreeMap<u32, Vec<u8>>) -> Result<Vec<u8>, FormatError> {
        let mut staged: Vec<(usize, SlotDesc, &[u8])> = Vec::with_capacity(replacements.len());
        for (&id, data) in replacements {
            let (index, slot) = self
                .find_slot(id)
                .ok_or_else(|| FormatError::UnknownEntry(format!("{:#06x}", id)))?;
            if data.len() > slot.capacity as usize {
                return Err(FormatError::PayloadTooLarge {
                    id,
                    len: data.len(),
                    capacity: slot.capacity as usize,
                });
            }
            staged.push((index, slot.clone(), data.as_slice()));
        }

        let mut out = self.image.clone();
        for (index, slot, data) in staged {
            let start = slot.data_offset as usize;
            out[start..start + data.len()].copy_from_slice(data);
            out[start + data.len()..start + slot.capacity as usize].fill(0);

            let mut updated = slot;
            updated.used = data.len() as u32;
            updated.age = updated.age.wrapping_add(1);

            let desc_offset = TABLE_HEADER_SIZE + index * self.layout.slot_stride;
            let mut desc_writer = Cursor::new(&mut out[desc_offset..desc_offset + SLOT_DESC_SIZE]);
            desc_writer
                .write_le(&updated)
                .map_err(|e| FormatError::from_binrw(e, desc_offset as u64))?;
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::MemSink;

    struct TestSlot {
        id: u32,
        age: u32,
        capacity: u32,
        data: &'static [u8],
        used: u32,
    }

    fn slot(id: u32, capacity: u32, data: &'static [u8]) -> TestSlot {
        TestSlot {
            id,
            age: 1,
            capacity,
            data,
            used: data.len() as u32,
        }
    }

    fn build_image(slots: &[TestSlot]) -> Vec<u8> {
        let stride = DEFAULT_SLOT_STRIDE;
        let mut out = Vec::new();
        out.extend_from_slice(&OEMINFO_MAGIC);
        out.extend_from_slice(&2u32.to_le_bytes()); //version
        out.extend_from_slice(&(slots.len() as u32).to_le_bytes());

        let mut data_offset = (TABLE_HEADER_SIZE + slots.len() * stride) as u32;
        for s in slots {
            out.extend_from_slice(&s.id.to_le_bytes());
            out.extend_from_slice(&7u32.to_le_bytes()); //kind
            out.extend_from_slice(&s.age.to_le_bytes());
            out.extend_from_slice(&s.used.to_le_bytes());
            out.extend_from_slice(&s.capacity.to_le_bytes());
            out.extend_from_slice(&data_offset.to_le_bytes());
            out.resize(out.len() + stride - SLOT_DESC_SIZE, 0);
            data_offset += s.capacity;
        }
        for s in slots {
            out.extend_from_slice(s.data);
            out.resize(out.len() + (s.capacity - s.data.len() as u32) as usize, 0);
        }
        out
    }

    //"HELLO" in a 64 byte slot, occupied length padded out to 10 bytes
    fn hello_slot() -> TestSlot {
        TestSlot {
            id: 0x01,
            age: 4,
            capacity: 64,
            data: b"HELLO\0\0\0\0\0",
            used: 10,
        }
    }

    #[test]
    fn unpack_returns_occupied_bytes_not_capacity() {
        let image = build_image(&[hello_slot()]);
        let codec = OemInfo::parse(image).unwrap();

        let entries = codec.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, 0x01);
        assert_eq!(entries[0].length, 10);
        assert_eq!(entries[0].capacity, Some(64));
        assert_eq!(codec.entry_data(0x01).unwrap(), b"HELLO\0\0\0\0\0");

        let mut sink = MemSink::new();
        let report = codec.unpack(&Selector::All, &mut sink).unwrap();
        assert!(report.is_clean());
        assert_eq!(sink.get("entry_0x0001.bin").unwrap().len(), 10);
    }

    #[test]
    fn empty_slots_are_not_listed() {
        let image = build_image(&[hello_slot(), slot(0x02, 32, b"")]);
        let codec = OemInfo::parse(image).unwrap();
        assert_eq!(codec.slots().len(), 2);
        assert_eq!(codec.entries().len(), 1);
    }

    #[test]
    fn repack_with_no_replacements_reproduces_input() {
        let image = build_image(&[hello_slot(), slot(0x02, 32, b"other")]);
        let codec = OemInfo::parse(image.clone()).unwrap();
        let out = codec.repack(&BTreeMap::new()).unwrap();
        assert_eq!(out, image);
    }

    #[test]
    fn repack_is_idempotent_for_same_bytes() {
        let image = build_image(&[hello_slot(), slot(0x02, 32, b"other")]);
        let codec = OemInfo::parse(image).unwrap();

        let mut replacements = BTreeMap::new();
        replacements.insert(0x01, b"WORLD!".to_vec());
        let first = codec.repack(&replacements).unwrap();
        let second = codec.repack(&replacements).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn repack_writes_payload_updates_slot_and_zero_fills() {
        let image = build_image(&[hello_slot(), slot(0x02, 32, b"other")]);
        let codec = OemInfo::parse(image.clone()).unwrap();

        let mut replacements = BTreeMap::new();
        replacements.insert(0x01, b"HI".to_vec());
        let out = codec.repack(&replacements).unwrap();
        assert_eq!(out.len(), image.len());

        let repacked = OemInfo::parse(out).unwrap();
        assert_eq!(repacked.entry_data(0x01).unwrap(), b"HI");
        let (_, slot_desc) = repacked.find_slot(0x01).unwrap();
        assert_eq!(slot_desc.used, 2);
        assert_eq!(slot_desc.age, 5);

        //slack after the payload is zeroed out to the slot boundary
        let start = slot_desc.data_offset as usize;
        let slack = &repacked.image()[start + 2..start + 64];
        assert!(slack.iter().all(|&b| b == 0));

        //the untouched slot is byte for byte identical
        assert_eq!(repacked.entry_data(0x02).unwrap(), b"other");
    }

    #[test]
    fn oversized_payload_rejected_before_any_write() {
        let image = build_image(&[hello_slot()]);
        let codec = OemInfo::parse(image.clone()).unwrap();

        let mut replacements = BTreeMap::new();
        replacements.insert(0x01, vec![0xAB; 65]);
        let err = codec.repack(&replacements).unwrap_err();
        assert!(matches!(
            err,
            FormatError::PayloadTooLarge {
                id: 0x01,
                len: 65,
                capacity: 64
            }
        ));
        //the base image is untouched
        assert_eq!(codec.image(), image.as_slice());
    }

    #[test]
    fn oversized_payload_in_batch_aborts_whole_repack() {
        let image = build_image(&[hello_slot(), slot(0x02, 32, b"other")]);
        let codec = OemInfo::parse(image.clone()).unwrap();

        //0x01 fits but 0x02 does not - nothing may be produced
        let mut replacements = BTreeMap::new();
        replacements.insert(0x01, b"ok".to_vec());
        replacements.insert(0x02, vec![0xAB; 33]);
        assert!(matches!(
            codec.repack(&replacements),
            Err(FormatError::PayloadTooLarge { id: 0x02, .. })
        ));
        assert_eq!(codec.image(), image.as_slice());
    }

    #[test]
    fn unknown_id_aborts_repack() {
        let image = build_image(&[hello_slot()]);
        let codec = OemInfo::parse(image).unwrap();

        let mut replacements = BTreeMap::new();
        replacements.insert(0x99, b"x".to_vec());
        assert!(matches!(
            codec.repack(&replacements),
            Err(FormatError::UnknownEntry(_))
        ));
    }

    #[test]
    fn empty_payload_erases_slot() {
        let image = build_image(&[hello_slot()]);
        let codec = OemInfo::parse(image).unwrap();

        let mut replacements = BTreeMap::new();
        replacements.insert(0x01, Vec::new());
        let repacked = OemInfo::parse(codec.repack(&replacements).unwrap()).unwrap();
        assert!(repacked.entries().is_empty());
        let (_, slot_desc) = repacked.find_slot(0x01).unwrap();
        assert_eq!(slot_desc.used, 0);
    }

    #[test]
    fn unpack_reports_missing_ids_but_extracts_the_rest() {
        let image = build_image(&[hello_slot()]);
        let codec = OemInfo::parse(image).unwrap();

        let mut sink = MemSink::new();
        let report = codec
            .unpack(&Selector::Ids(vec![0x01, 0x42]), &mut sink)
            .unwrap();
        assert_eq!(report.written, vec!["entry_0x0001"]);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].1, FormatError::UnknownEntry(_)));
    }

    #[test]
    fn truncated_image_is_out_of_bounds() {
        let image = build_image(&[hello_slot()]);
        let truncated = image[..image.len() - 16].to_vec();
        assert!(matches!(
            OemInfo::parse(truncated),
            Err(FormatError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn bad_magic_is_invalid_format() {
        let mut image = build_image(&[hello_slot()]);
        image[0] = b'X';
        assert!(matches!(
            OemInfo::parse(image),
            Err(FormatError::InvalidFormat(_))
        ));
    }

    #[test]
    fn used_beyond_capacity_is_invalid_format() {
        let mut image = build_image(&[hello_slot()]);
        //corrupt the used field of slot 0 to exceed its capacity
        let used_offset = TABLE_HEADER_SIZE + 12;
        image[used_offset..used_offset + 4].copy_from_slice(&65u32.to_le_bytes());
        assert!(matches!(
            OemInfo::parse(image),
            Err(FormatError::InvalidFormat(_))
        ));
    }
}
