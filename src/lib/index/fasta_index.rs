//! The `.fai` offset index: one [`IndexEntry`] per record, in file order.
//!
//! The persisted layout is the samtools/htslib one, a tab-separated row per record:
//!
//! ```text
//! NAME  LENGTH  OFFSET  LINEBASES  LINEWIDTH  [QUALOFFSET]
//! ```
//!
//! The sixth column is only present for FASTQ.
use std::{
    fmt,
    fs::File,
    io::{self, BufReader, BufWriter, Write},
    path::Path,
};

use indexmap::IndexMap;
use log::{debug, warn};
use serde::Deserialize;

use crate::utils::BUFFERSIZE;

/// The flavor of sequence file an index describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SequenceFormat {
    #[default]
    Fasta,
    Fastq,
}

impl SequenceFormat {
    /// The byte that opens a record header.
    pub fn header_marker(self) -> u8 {
        match self {
            SequenceFormat::Fasta => b'>',
            SequenceFormat::Fastq => b'@',
        }
    }

    /// The byte that ends the sequence lines of a record.
    pub fn sequence_terminator(self) -> u8 {
        match self {
            SequenceFormat::Fasta => b'>',
            SequenceFormat::Fastq => b'+',
        }
    }

    pub fn has_quality(self) -> bool {
        self == SequenceFormat::Fastq
    }
}

impl fmt::Display for SequenceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceFormat::Fasta => write!(f, "FASTA"),
            SequenceFormat::Fastq => write!(f, "FASTQ"),
        }
    }
}

/// Converts a 0-based base offset within a wrapped record into an absolute byte offset.
///
/// `first_byte` is the offset of the first base, `line_bases` the number of bases on a full
/// line and `line_bytes` the same line's width including its terminator.
pub fn logical_offset_to_byte_offset(
    first_byte: u64,
    line_bases: u32,
    line_bytes: u32,
    base_offset: u64,
) -> u64 {
    if line_bases == 0 {
        return first_byte;
    }
    let line_bases = u64::from(line_bases);
    first_byte + (base_offset / line_bases) * u64::from(line_bytes) + base_offset % line_bases
}

/// The layout of a single record.
#[derive(Debug, Clone, PartialEq, Hash, Eq)]
pub struct IndexEntry {
    /// Ordinal of the record in the index, in file order.
    pub id: usize,
    pub name: String,
    /// Number of bases in the record.
    pub record_length: u64,
    /// Bases on each full line.
    pub line_bases: u32,
    /// Bytes on each full line, including the line terminator.
    pub line_bytes: u32,
    /// Byte offset of the first base.
    pub sequence_byte_offset: u64,
    /// Byte offset of the first quality character (FASTQ only).
    pub quality_byte_offset: Option<u64>,
}

impl IndexEntry {
    /// Byte offset of the base at `base_offset` in the sequence lines.
    pub fn sequence_offset_of(&self, base_offset: u64) -> u64 {
        logical_offset_to_byte_offset(
            self.sequence_byte_offset,
            self.line_bases,
            self.line_bytes,
            base_offset,
        )
    }

    /// Byte offset of the quality at `base_offset`, if this record has qualities.
    pub fn quality_offset_of(&self, base_offset: u64) -> Option<u64> {
        self.quality_byte_offset.map(|first| {
            logical_offset_to_byte_offset(first, self.line_bases, self.line_bytes, base_offset)
        })
    }
}

/// A single `.fai` row as it is stored on disk.
#[derive(Debug, Deserialize)]
struct FaiRow {
    name: String,
    length: u64,
    offset: u64,
    line_bases: u32,
    line_bytes: u32,
    #[serde(default)]
    qual_offset: Option<u64>,
}

/// An ordered name to [`IndexEntry`] table.
///
/// Names are unique: the first entry inserted under a name wins and later ones are dropped.
#[derive(Debug, Clone, Default)]
pub struct OffsetIndex {
    entries: IndexMap<String, IndexEntry>,
}

impl OffsetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, assigning it the next ordinal. Returns `false` (and keeps the existing
    /// entry) if the name is already present.
    pub fn insert(&mut self, mut entry: IndexEntry) -> bool {
        if self.entries.contains_key(&entry.name) {
            warn!("Ignoring duplicate sequence name '{}' in index", entry.name);
            return false;
        }
        entry.id = self.entries.len();
        self.entries.insert(entry.name.clone(), entry);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&IndexEntry> {
        self.entries.get(name)
    }

    pub fn get_index(&self, ordinal: usize) -> Option<&IndexEntry> {
        self.entries.get_index(ordinal).map(|(_, entry)| entry)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Entries in file order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    /// Reads a `.fai` file. Rows that are short or fail to parse are skipped; an index with no
    /// usable rows is an error.
    #[allow(unknown_lints, clippy::io_other_error)]
    pub fn read(path: &Path) -> io::Result<OffsetIndex> {
        let reader = BufReader::with_capacity(BUFFERSIZE, File::open(path)?);
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);

        let mut index = OffsetIndex::new();
        for (row_number, result) in csv_reader.deserialize::<FaiRow>().enumerate() {
            let row = match result {
                Ok(row) => row,
                Err(e) if e.is_io_error() => {
                    return Err(io::Error::new(io::ErrorKind::Other, e));
                }
                Err(e) => {
                    debug!("Skipping malformed row {} in {:?}: {}", row_number + 1, path, e);
                    continue;
                }
            };
            if row.name.is_empty() || row.line_bytes < row.line_bases {
                debug!("Skipping malformed row {} in {:?}", row_number + 1, path);
                continue;
            }
            index.insert(IndexEntry {
                id: 0,
                name: row.name,
                record_length: row.length,
                line_bases: row.line_bases,
                line_bytes: row.line_bytes,
                sequence_byte_offset: row.offset,
                quality_byte_offset: row.qual_offset,
            });
        }

        if index.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("no valid entries found in index {:?}", path),
            ));
        }
        Ok(index)
    }

    /// Writes the index in `.fai` layout, uncompressed whatever the file name. The quality
    /// column is emitted only for entries that carry a quality offset.
    pub fn write(&self, output: &Path) -> io::Result<()> {
        let mut writer = BufWriter::with_capacity(BUFFERSIZE, File::create(output)?);
        for entry in self.iter() {
            write!(
                writer,
                "{}\t{}\t{}\t{}\t{}",
                entry.name,
                entry.record_length,
                entry.sequence_byte_offset,
                entry.line_bases,
                entry.line_bytes
            )?;
            if let Some(qual_offset) = entry.quality_byte_offset {
                write!(writer, "\t{}", qual_offset)?;
            }
            writeln!(writer)?;
        }
        writer.flush()
    }
}
