use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::errors::FormatError;

/// One logical record inside a parsed container.
///
/// While the parser/codec is alive this is only metadata - the payload is
/// the `(offset, length)` window into the source, and bytes are copied out
/// only when an entry is materialized through `entry_data`/`extract`.
#[derive(Debug, Clone)]
pub struct ContainerEntry {
    pub id: u32,
    pub name: String,
    /// Payload offset within the source container.
    pub offset: u64,
    /// Declared (UPDATE.APP) or occupied (OEMINFO) payload length.
    pub length: usize,
    /// Declared payload checksum, where the format carries one.
    pub checksum: Option<u32>,
    /// Fixed slot reservation, OEMINFO only.
    pub capacity: Option<usize>,
}

/// Entry selection, parsed from the CLI's `-e` syntax: "all", a single
/// id, a comma-separated id list (hex or decimal), or a partition label.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    All,
    Ids(Vec<u32>),
    Name(String),
}

impl Selector {
    pub fn parse(s: &str) -> Selector {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Selector::All;
        }
        let ids: Option<Vec<u32>> = s.split(',').map(|p| parse_id(p.trim())).collect();
        match ids {
            Some(ids) if !ids.is_empty() => Selector::Ids(ids),
            _ => Selector::Name(s.to_string()),
        }
    }

    pub fn matches(&self, entry: &ContainerEntry) -> bool {
        match self {
            Selector::All => true,
            Selector::Ids(ids) => ids.contains(&entry.id),
            Selector::Name(name) => entry.name.eq_ignore_ascii_case(name),
        }
    }

    /// Labels of selected ids/names that hit no entry at all. These are
    /// reported as `UnknownEntry` without aborting a batch extraction.
    pub fn unmatched(&self, entries: &[ContainerEntry]) -> Vec<String> {
        match self {
            Selector::All => Vec::new(),
            Selector::Ids(ids) => ids
                .iter()
                .filter(|id| !entries.iter().any(|e| e.id == **id))
                .map(|id| format!("{:#06x}", id))
                .collect(),
            Selector::Name(name) => {
                if entries.iter().any(|e| e.name.eq_ignore_ascii_case(name)) {
                    Vec::new()
                } else {
                    vec![name.clone()]
                }
            }
        }
    }
}

fn parse_id(s: &str) -> Option<u32> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

/// Where extracted entries go. The sink is the caller's side of the
/// extraction - filesystem, in-memory, whatever.
pub trait Sink {
    fn write_entry(&mut self, name: &str, data: &[u8]) -> io::Result<()>;
}

/// Filesystem sink. Writes to `<name>.part` first and renames into place,
/// so an aborted extraction never leaves a half-written output file.
pub struct DirSink {
    dir: PathBuf,
}

impl DirSink {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }
}

impl Sink for DirSink {
    fn write_entry(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        let final_path = self.dir.join(name);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = final_path.clone().into_os_string();
        tmp_name.push(".part");
        let tmp_path = PathBuf::from(tmp_name);

        let mut out_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        out_file.write_all(data)?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }
}

/// In-memory sink for library callers and tests.
#[derive(Default)]
pub struct MemSink {
    pub entries: Vec<(String, Vec<u8>)>,
}

impl MemSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.as_slice())
    }
}

impl Sink for MemSink {
    fn write_entry(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        self.entries.push((name.to_string(), data.to_vec()));
        Ok(())
    }
}

/// Outcome of a batch extraction. Per-entry failures do not abort the
/// batch; they end up here for the caller to report.
#[derive(Default)]
pub struct ExtractReport {
    pub written: Vec<String>,
    pub failures: Vec<(String, FormatError)>,
}

impl ExtractReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Collect repack replacements from a folder of `entry_0x<id>.bin` files,
/// the same names the extractor writes. Anything else in the folder is
/// ignored.
pub fn load_replacements(dir: &Path) -> Result<BTreeMap<u32, Vec<u8>>, FormatError> {
    let mut replacements = BTreeMap::new();
    for dir_entry in fs::read_dir(dir)? {
        let path = dir_entry?.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(id_part) = file_name
            .strip_prefix("entry_")
            .and_then(|n| n.strip_suffix(".bin"))
        else {
            continue;
        };
        let Some(id) = parse_id(id_part) else {
            continue;
        };
        replacements.insert(id, fs::read(&path)?);
    }
    Ok(replacements)
}
