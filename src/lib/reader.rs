//! Per-thread random access into an indexed sequence file.
use std::{
    fs::File,
    io::{self, BufRead, BufReader, Seek, SeekFrom},
};

use crate::{
    errors::{Result, SeqFetchError},
    handle::IndexHandle,
    index::fasta_index::IndexEntry,
    io::bgzf::BgzfReader,
    region::Region,
    utils::BUFFERSIZE,
};

/// The open file behind a [`Reader`].
enum Source {
    Plain(BufReader<File>),
    Bgzf(BgzfReader<File>),
}

/// Which part of a record to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Sequence,
    Quality,
}

/// A whole record as returned by [`Reader::fetch_record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedRecord {
    pub name: String,
    pub sequence: Vec<u8>,
    pub quality: Option<Vec<u8>>,
}

/// Clamps `[begin, end)` to a record of `length` bases. A negative `end`, or one past the end
/// of the record, means the end of the record. Returns `None` for an empty region.
pub fn clamp_region(length: u64, begin: i64, end: i64) -> Option<(u64, u64)> {
    let begin = begin.max(0) as u64;
    let end = if end < 0 { length } else { std::cmp::min(end as u64, length) };
    if begin >= end {
        None
    } else {
        Some((begin, end))
    }
}

/// Reads up to `count` bases, dropping line terminators and stopping early at `stop`.
fn read_bases<R: BufRead>(reader: &mut R, count: usize, stop: Option<u8>) -> io::Result<Vec<u8>> {
    let mut bases = Vec::with_capacity(count);
    let mut done = false;
    while !done {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            break;
        }
        let mut consumed = 0;
        for &byte in buf {
            consumed += 1;
            match byte {
                b'\n' | b'\r' => (),
                _ if Some(byte) == stop => {
                    done = true;
                    break;
                }
                _ => {
                    bases.push(byte);
                    if bases.len() == count {
                        done = true;
                        break;
                    }
                }
            }
        }
        reader.consume(consumed);
    }
    Ok(bases)
}

/// A single-owner reader bound to a shared [`IndexHandle`].
///
/// Each reader holds its own open file, so fetches need `&mut self`; use one reader per
/// thread. Dropping the reader closes the file and releases its handle reference.
pub struct Reader {
    index: IndexHandle,
    source: Source,
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader").field("index", &self.index).finish_non_exhaustive()
    }
}

impl Reader {
    /// Opens the indexed source file, taking a reference to `index`.
    pub fn open(index: &IndexHandle) -> Result<Reader> {
        let file = File::open(index.source()).map_err(|source| SeqFetchError::ReaderCreation {
            path: index.source().to_path_buf(),
            source,
        })?;
        let source = if index.is_compressed() {
            Source::Bgzf(BgzfReader::new(file))
        } else {
            Source::Plain(BufReader::with_capacity(BUFFERSIZE, file))
        };
        Ok(Reader { index: index.acquire(), source })
    }

    /// Closes the file and releases the handle reference.
    pub fn close(self) {
        drop(self);
    }

    pub fn index(&self) -> &IndexHandle {
        &self.index
    }

    /// Fetches bases `[begin, end)` (0-based, half-open) of the record `name`.
    ///
    /// `begin` is clamped to zero and `end` to the record length (a negative `end` means the
    /// end of the record). An empty region yields an empty result. A truncated source yields
    /// a short result rather than an error.
    pub fn fetch_sequence(&mut self, name: &str, begin: i64, end: i64) -> Result<Vec<u8>> {
        self.fetch(name, begin, end, Field::Sequence)
    }

    /// Fetches qualities `[begin, end)` of the record `name`, with the same coordinate rules
    /// as [`Reader::fetch_sequence`]. Only available for FASTQ.
    pub fn fetch_quality(&mut self, name: &str, begin: i64, end: i64) -> Result<Vec<u8>> {
        if !self.index.format().has_quality() {
            return Err(SeqFetchError::QualityNotAvailable(format!(
                "{} is indexed as {}",
                name,
                self.index.format()
            )));
        }
        self.fetch(name, begin, end, Field::Quality)
    }

    /// Fetches the complete sequence of `name`.
    pub fn fetch_all(&mut self, name: &str) -> Result<Vec<u8>> {
        self.fetch_sequence(name, 0, -1)
    }

    /// Fetches the bases covered by a parsed region.
    pub fn fetch_region(&mut self, region: &Region) -> Result<Vec<u8>> {
        self.fetch_sequence(&region.name, region.begin, region.end.unwrap_or(-1))
    }

    /// Fetches the complete sequence of `name`, plus its qualities for FASTQ.
    pub fn fetch_record(&mut self, name: &str) -> Result<FetchedRecord> {
        let sequence = self.fetch_all(name)?;
        let quality = if self.index.format().has_quality() {
            Some(self.fetch_quality(name, 0, -1)?)
        } else {
            None
        };
        Ok(FetchedRecord { name: name.to_string(), sequence, quality })
    }

    fn fetch(&mut self, name: &str, begin: i64, end: i64, field: Field) -> Result<Vec<u8>> {
        let entry: &IndexEntry = self
            .index
            .entry(name)
            .ok_or_else(|| SeqFetchError::SequenceNotFound(name.to_string()))?;
        let (begin, end) = match clamp_region(entry.record_length, begin, end) {
            Some(range) => range,
            None => return Ok(vec![]),
        };

        let (offset, stop) = match field {
            Field::Sequence => {
                (entry.sequence_offset_of(begin), Some(self.index.format().sequence_terminator()))
            }
            Field::Quality => {
                let offset = entry.quality_offset_of(begin).ok_or_else(|| {
                    SeqFetchError::QualityNotAvailable(format!("{} has no quality offset", name))
                })?;
                // qualities may contain any printable byte, so only the count bounds the read
                (offset, None)
            }
        };
        let count = (end - begin) as usize;

        let bases = match &mut self.source {
            Source::Plain(reader) => {
                reader.seek(SeekFrom::Start(offset))?;
                read_bases(reader, count, stop)?
            }
            Source::Bgzf(reader) => {
                let block_map = self.index.block_map().ok_or_else(|| {
                    SeqFetchError::CompressedAccessUnavailable(self.index.source().to_path_buf())
                })?;
                reader.seek_to(block_map.find(offset), offset)?;
                read_bases(reader, count, stop)?
            }
        };
        Ok(bases)
    }
}
