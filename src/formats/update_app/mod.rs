pub mod include;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use binrw::BinReaderExt;

use crate::container::{ContainerEntry, ExtractReport, Selector, Sink};
use crate::errors::FormatError;
use crate::utils::checksum::{self, ChecksumFn};
use crate::utils::common::{self, ByteReader};
use include::*;

pub fn is_update_app_file(mut file: &File) -> bool {
    matches!(common::read_at(&mut file, 0, 4), Ok(magic) if magic == UPDATE_APP_MAGIC)
}

/// Parsed UPDATE.APP bundle.
///
/// The source stays behind a `Read + Seek` handle and block payloads are
/// only read when an entry is extracted, so multi-GB images never get
/// pulled into memory whole. In-memory buffers work the same way through
/// `ByteReader`.
#[derive(Debug)]
pub struct UpdateApp<R> {
    source: R,
    version: u32,
    total_size: u64,
    entries: Vec<ContainerEntry>,
    checksum: ChecksumFn,
}

impl<R: Read + Seek> UpdateApp<R> {
    pub fn parse(source: R) -> Result<Self, FormatError> {
        //the vendor checksum algorithm is not confirmed, CRC32 until proven otherwise
        Self::parse_with(source, checksum::crc32)
    }

    pub fn parse_with(mut source: R, checksum_fn: ChecksumFn) -> Result<Self, FormatError> {
        let source_len = source.seek(SeekFrom::End(0))?;

        if source_len < IMAGE_HEADER_SIZE as u64 {
            return Err(FormatError::OutOfBounds {
                offset: source_len,
                needed: IMAGE_HEADER_SIZE - source_len as usize,
            });
        }
        let header_bytes = common::read_at(&mut source, 0, IMAGE_HEADER_SIZE)?;
        if header_bytes[0..4] != UPDATE_APP_MAGIC {
            return Err(FormatError::InvalidFormat(
                "not an UPDATE.APP image (bad magic)".to_string(),
            ));
        }
        let mut header_reader = ByteReader::new(&header_bytes);
        let header: ImageHeader = header_reader
            .read_le()
            .map_err(|e| FormatError::from_binrw(e, 0))?;

        let total_size = header.total_size as u64;
        if total_size < IMAGE_HEADER_SIZE as u64 {
            return Err(FormatError::InvalidFormat(format!(
                "declared total size {} is smaller than the image header",
                total_size
            )));
        }
        if total_size > source_len {
            return Err(FormatError::OutOfBounds {
                offset: source_len,
                needed: (total_size - source_len) as usize,
            });
        }

        let mut entries = Vec::new();
        let mut pos = IMAGE_HEADER_SIZE as u64;
        while pos < total_size {
            if pos + BLOCK_HEADER_SIZE as u64 > total_size {
                return Err(FormatError::OutOfBounds {
                    offset: total_size,
                    needed: (pos + BLOCK_HEADER_SIZE as u64 - total_size) as usize,
                });
            }
            let block_bytes = common::read_at(&mut source, pos, BLOCK_HEADER_SIZE)?;
            let mut block_reader = ByteReader::new(&block_bytes);
            let block: BlockHeader = block_reader
                .read_le()
                .map_err(|e| FormatError::from_binrw(e, pos))?;

            if (block.header_size as usize) < BLOCK_HEADER_SIZE {
                return Err(FormatError::InvalidFormat(format!(
                    "block at {:#x} declares impossible header size {}",
                    pos, block.header_size
                )));
            }
            let payload_offset = pos + block.header_size as u64;
            let payload_end = payload_offset + block.data_size as u64;
            if payload_end > total_size {
                return Err(FormatError::OutOfBounds {
                    offset: total_size,
                    needed: (payload_end - total_size) as usize,
                });
            }

            let name = block.name();
            entries.push(ContainerEntry {
                //the format stores no numeric id, the name hash stands in for one
                id: checksum::crc32(name.as_bytes()),
                name,
                offset: payload_offset,
                length: block.data_size as usize,
                checksum: Some(block.checksum),
                capacity: None,
            });

            pos = payload_end.div_ceil(BLOCK_ALIGN) * BLOCK_ALIGN;
        }

        Ok(Self {
            source,
            version: header.version,
            total_size,
            entries,
            checksum: checksum_fn,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Entry metadata in container order. No payload is read.
    pub fn entries(&self) -> &[ContainerEntry] {
        &self.entries
    }

    /// Materialize one block payload, verifying its checksum.
    pub fn entry_data(&mut self, index: usize) -> Result<Vec<u8>, FormatError> {
        let entry = &self.entries[index];
        let data = common::read_at(&mut self.source, entry.offset, entry.length)?;
        let computed = (self.checksum)(&data);
        match entry.checksum {
            Some(expected) if expected != computed => Err(FormatError::Integrity {
                name: entry.name.clone(),
                expected,
                computed,
            }),
            _ => Ok(data),
        }
    }

    /// Extract the selected blocks into `sink`, one payload in memory at a
    /// time. Checksum mismatches and selectors that hit nothing are
    /// recorded in the report and the batch keeps going; source or sink
    /// I/O failures abort.
    pub fn extract(
        &mut self,
        selector: &Selector,
        sink: &mut dyn Sink,
    ) -> Result<ExtractReport, FormatError> {
        let mut report = ExtractReport::new();
        for label in selector.unmatched(&self.entries) {
            eprintln!("No entry matching '{}'!", label);
            report
                .failures
                .push((label.clone(), FormatError::UnknownEntry(label)));
        }

        let targets: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| selector.matches(e))
            .map(|(i, _)| i)
            .collect();

        for (n, &index) in targets.iter().enumerate() {
            let name = self.entries[index].name.clone();
            println!(
                "\n({}/{}) - {}, Size: {}",
                n + 1,
                targets.len(),
                name,
                self.entries[index].length
            );

            match self.entry_data(index) {
                Ok(data) => {
                    sink.write_entry(&format!("{}.bin", name), &data)?;
                    println!("- Saved file!");
                    report.written.push(name);
                }
                Err(err @ FormatError::Integrity { .. }) => {
                    eprintln!("- Skipping {}: {}", name, err);
                    report.failures.push((name, err));
                }
                Err(other) => return Err(other),
            }
        }

        Ok(report)
    }
}
