//! Builds an [`OffsetIndex`] by scanning a FASTA or FASTQ stream once, line by line.
use std::io::{self, BufRead};

use log::debug;

use crate::index::fasta_index::{IndexEntry, OffsetIndex, SequenceFormat};

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Number of bytes in `line` that are not line terminators.
fn count_bases(line: &[u8], line_number: u64) -> io::Result<u32> {
    let bases = line.iter().filter(|&&b| b != b'\n' && b != b'\r').count();
    u32::try_from(bases).map_err(|_| invalid_data(format!("line {} is too long", line_number)))
}

/// Length of `line` in bytes, terminator included.
fn line_length(line: &[u8], line_number: u64) -> io::Result<u32> {
    u32::try_from(line.len()).map_err(|_| invalid_data(format!("line {} is too long", line_number)))
}

/// Extracts the record name: the token after the header marker, up to the first whitespace.
fn parse_name(line: &[u8], line_number: u64) -> io::Result<String> {
    let name: &[u8] = line[1..]
        .split(|b| b.is_ascii_whitespace())
        .next()
        .unwrap_or_default();
    if name.is_empty() {
        return Err(invalid_data(format!("empty record name at line {}", line_number)));
    }
    String::from_utf8(name.to_vec())
        .map_err(|_| invalid_data(format!("record name is not UTF-8 at line {}", line_number)))
}

/// Layout of a record whose lines are still being scanned.
#[derive(Debug)]
struct PendingRecord {
    name: String,
    sequence_byte_offset: u64,
    record_length: u64,
    line_bases: u32,
    line_bytes: u32,
    // set once a line shorter than `line_bases` has been seen; only the last line may be short
    saw_short_line: bool,
}

impl PendingRecord {
    fn new(name: String, sequence_byte_offset: u64) -> Self {
        PendingRecord {
            name,
            sequence_byte_offset,
            record_length: 0,
            line_bases: 0,
            line_bytes: 0,
            saw_short_line: false,
        }
    }

    fn add_line(&mut self, line: &[u8], line_number: u64) -> io::Result<()> {
        let bases = count_bases(line, line_number)?;
        if bases == 0 {
            self.saw_short_line = true;
            return Ok(());
        }
        if self.line_bases == 0 && !self.saw_short_line {
            self.line_bases = bases;
            self.line_bytes = line_length(line, line_number)?;
        } else {
            self.saw_short_line =
                self.check_line_width(line, bases, self.saw_short_line, line_number, "sequence")?;
        }
        self.record_length += u64::from(bases);
        Ok(())
    }

    /// Checks a line of `bases` against the record's line width. Only the last line of a block
    /// may be shorter, so nothing may follow a short line. Returns whether a short line has now
    /// been seen.
    fn check_line_width(
        &self,
        line: &[u8],
        bases: u32,
        saw_short_line: bool,
        line_number: u64,
        block: &str,
    ) -> io::Result<bool> {
        let mismatch = saw_short_line
            || bases > self.line_bases
            || (bases == self.line_bases
                && line.ends_with(b"\n")
                && line_length(line, line_number)? != self.line_bytes);
        if mismatch {
            return Err(invalid_data(format!(
                "different {} line length in '{}' at line {}",
                block, self.name, line_number
            )));
        }
        Ok(bases < self.line_bases)
    }

    fn finish(self, quality_byte_offset: Option<u64>) -> IndexEntry {
        IndexEntry {
            id: 0,
            name: self.name,
            record_length: self.record_length,
            line_bases: self.line_bases,
            line_bytes: self.line_bytes,
            sequence_byte_offset: self.sequence_byte_offset,
            quality_byte_offset,
        }
    }
}

/// Scans sequence files into an [`OffsetIndex`].
#[derive(Debug, Clone, Copy)]
pub struct IndexBuilder {
    format: SequenceFormat,
}

impl IndexBuilder {
    pub fn new(format: SequenceFormat) -> Self {
        IndexBuilder { format }
    }

    /// Builds an index from the full contents of `reader`.
    pub fn build<R: BufRead>(&self, reader: R) -> io::Result<OffsetIndex> {
        let mut scanner = LineScanner::new(reader);
        match self.format {
            SequenceFormat::Fasta => build_fasta(&mut scanner),
            SequenceFormat::Fastq => build_fastq(&mut scanner),
        }
    }
}

/// Reads lines while tracking the byte offset and line number of the next line.
struct LineScanner<R> {
    reader: R,
    line: Vec<u8>,
    offset: u64,
    line_number: u64,
}

impl<R: BufRead> LineScanner<R> {
    fn new(reader: R) -> Self {
        LineScanner { reader, line: Vec::new(), offset: 0, line_number: 0 }
    }

    /// Reads the next line (terminator included) into `self.line`. Returns `false` at EOF.
    fn next_line(&mut self) -> io::Result<bool> {
        self.line.clear();
        let n = self.reader.read_until(b'\n', &mut self.line)?;
        self.offset += n as u64;
        self.line_number += 1;
        Ok(n > 0)
    }

    /// Consumes the next line if it is blank, leaving any other line unread.
    fn skip_blank_line(&mut self) -> io::Result<()> {
        let buf = self.reader.fill_buf()?;
        let blank = if buf.starts_with(b"\r\n") {
            2
        } else if buf.starts_with(b"\n") {
            1
        } else {
            0
        };
        if blank > 0 {
            self.reader.consume(blank);
            self.offset += blank as u64;
            self.line_number += 1;
        }
        Ok(())
    }
}

fn build_fasta<R: BufRead>(scanner: &mut LineScanner<R>) -> io::Result<OffsetIndex> {
    let mut index = OffsetIndex::new();
    let mut current: Option<PendingRecord> = None;

    while scanner.next_line()? {
        if scanner.line[0] == b'>' {
            if let Some(record) = current.take() {
                index.insert(record.finish(None));
            }
            let name = parse_name(&scanner.line, scanner.line_number)?;
            current = Some(PendingRecord::new(name, scanner.offset));
        } else if let Some(record) = current.as_mut() {
            record.add_line(&scanner.line, scanner.line_number)?;
        } else {
            debug!("Ignoring line {} before the first FASTA header", scanner.line_number);
        }
    }
    if let Some(record) = current.take() {
        index.insert(record.finish(None));
    }
    Ok(index)
}

fn build_fastq<R: BufRead>(scanner: &mut LineScanner<R>) -> io::Result<OffsetIndex> {
    let mut index = OffsetIndex::new();

    loop {
        // header
        if !scanner.next_line()? {
            break;
        }
        if count_bases(&scanner.line, scanner.line_number)? == 0 {
            continue;
        }
        if scanner.line[0] != b'@' {
            return Err(invalid_data(format!(
                "expected '@' at the start of line {}",
                scanner.line_number
            )));
        }
        let name = parse_name(&scanner.line, scanner.line_number)?;
        let mut record = PendingRecord::new(name, scanner.offset);

        // sequence lines, up to the '+' separator
        loop {
            if !scanner.next_line()? {
                return Err(invalid_data(format!(
                    "truncated FASTQ record '{}': missing '+' line",
                    record.name
                )));
            }
            if scanner.line[0] == b'+' {
                break;
            }
            record.add_line(&scanner.line, scanner.line_number)?;
        }
        let quality_byte_offset = scanner.offset;

        // quality lines, wrapped exactly like the sequence lines, until as many qualities as
        // bases have been read
        let mut qualities: u64 = 0;
        let mut saw_short_line = false;
        if record.record_length == 0 {
            scanner.skip_blank_line()?;
        }
        while qualities < record.record_length {
            if !scanner.next_line()? {
                return Err(invalid_data(format!(
                    "truncated FASTQ record '{}': expected {} qualities, found {}",
                    record.name, record.record_length, qualities
                )));
            }
            let bases = count_bases(&scanner.line, scanner.line_number)?;
            saw_short_line = record.check_line_width(
                &scanner.line,
                bases,
                saw_short_line,
                scanner.line_number,
                "quality",
            )?;
            qualities += u64::from(bases);
        }
        if qualities != record.record_length {
            return Err(invalid_data(format!(
                "FASTQ record '{}' has {} bases but {} qualities",
                record.name, record.record_length, qualities
            )));
        }

        index.insert(record.finish(Some(quality_byte_offset)));
    }
    Ok(index)
}
