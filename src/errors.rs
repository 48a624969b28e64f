use std::io;

use thiserror::Error;

/// Failure classes for container parsing, extraction and repacking.
///
/// Structural errors (`InvalidFormat`, `OutOfBounds`) are fatal for the
/// whole parse. `Integrity` and `UnknownEntry` are per-entry: batch
/// extraction records them and keeps going, repack aborts on them.
/// `PayloadTooLarge` always aborts a repack before anything is written.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("read past end of data at offset {offset:#x} (wanted {needed} more bytes)")]
    OutOfBounds { offset: u64, needed: usize },

    #[error("checksum mismatch for '{name}': expected {expected:#010x}, got {computed:#010x}")]
    Integrity {
        name: String,
        expected: u32,
        computed: u32,
    },

    #[error("no entry matching '{0}'")]
    UnknownEntry(String),

    #[error("payload for entry {id:#06x} is {len} bytes but its slot holds {capacity}")]
    PayloadTooLarge { id: u32, len: usize, capacity: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FormatError {
    /// Fold a binrw decode error into the taxonomy. `offset` is where the
    /// decode started, so truncation reports a real position.
    pub fn from_binrw(err: binrw::Error, offset: u64) -> Self {
        match err {
            binrw::Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                FormatError::OutOfBounds { offset, needed: 0 }
            }
            binrw::Error::Io(e) => FormatError::Io(e),
            other => FormatError::InvalidFormat(other.to_string()),
        }
    }
}
