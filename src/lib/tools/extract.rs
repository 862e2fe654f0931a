use std::{
    io::{self, BufWriter, Write},
    path::PathBuf,
};

use anyhow::{bail, Result};
use clap::Parser;
use log::error;

use crate::{
    handle::{IndexHandle, IndexPaths, LoadOptions},
    index::fasta_index::SequenceFormat,
    reader::Reader,
    region::{CoordinateSystem, Region},
    utils::{built_info, BUFFERSIZE},
};

/// Extracts regions from an indexed FASTA/FASTQ file, plain or bgzip'ed.
///
/// Regions are given as `name`, `name:pos`, `name:start-end` or `name:start-`, in 0-based
/// half-open coordinates unless `--one-based` is given.
#[derive(Parser, Debug)]
#[clap(name = "extract", verbatim_doc_comment, version = built_info::VERSION.as_str())]
pub struct Opts {
    /// The input FASTA/FASTQ file.
    #[clap(display_order = 1)]
    pub input: PathBuf,

    /// The regions to extract.
    #[clap(required = true, display_order = 2)]
    pub regions: Vec<String>,

    /// Treat the input as FASTQ and emit FASTQ records with qualities.
    #[clap(long, display_order = 3)]
    pub fastq: bool,

    /// Regions use 1-based inclusive coordinates (samtools style).
    #[clap(long, display_order = 4)]
    pub one_based: bool,

    /// Wrap output sequence lines at this many bases (0 to disable).
    #[clap(short = 'w', long, default_value = "60", display_order = 5)]
    pub line_width: usize,

    /// Fail rather than build a missing .fai (or .gzi) index.
    #[clap(long, display_order = 6)]
    pub no_create: bool,

    /// The .fai index (default: <input>.fai).
    #[clap(long, display_order = 7)]
    pub fai: Option<PathBuf>,

    /// The .gzi block index (default: <input>.gzi).
    #[clap(long, display_order = 8)]
    pub gzi: Option<PathBuf>,
}

impl Opts {
    fn coordinates(&self) -> CoordinateSystem {
        if self.one_based {
            CoordinateSystem::OneBasedClosed
        } else {
            CoordinateSystem::ZeroBasedHalfOpen
        }
    }

    fn format(&self) -> SequenceFormat {
        if self.fastq {
            SequenceFormat::Fastq
        } else {
            SequenceFormat::Fasta
        }
    }

    fn paths(&self) -> IndexPaths {
        let mut paths = IndexPaths::for_source(&self.input);
        if let Some(fai) = &self.fai {
            paths = paths.with_fai(fai);
        }
        if let Some(gzi) = &self.gzi {
            paths = paths.with_gzi(gzi);
        }
        paths
    }
}

/// Writes `bytes` as lines of at most `line_width` bytes (a single line if zero).
fn write_wrapped<W: Write>(writer: &mut W, bytes: &[u8], line_width: usize) -> io::Result<()> {
    if line_width == 0 || bytes.is_empty() {
        writer.write_all(bytes)?;
        return writer.write_all(b"\n");
    }
    for line in bytes.chunks(line_width) {
        writer.write_all(line)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Fetches one region and writes it as a FASTA or FASTQ record named after `text`.
fn extract_region<W: Write>(
    reader: &mut Reader,
    writer: &mut W,
    text: &str,
    region: &Region,
    line_width: usize,
) -> Result<()> {
    let end = region.end.unwrap_or(-1);
    let sequence = reader.fetch_sequence(&region.name, region.begin, end)?;
    if reader.index().format().has_quality() {
        let quality = reader.fetch_quality(&region.name, region.begin, end)?;
        writeln!(writer, "@{}", text)?;
        write_wrapped(writer, &sequence, line_width)?;
        writeln!(writer, "+")?;
        write_wrapped(writer, &quality, line_width)?;
    } else {
        writeln!(writer, ">{}", text)?;
        write_wrapped(writer, &sequence, line_width)?;
    }
    Ok(())
}

/// Extracts every requested region to `writer`, returning the number that failed.
pub fn extract<W: Write>(opts: &Opts, writer: &mut W) -> Result<usize> {
    let options = LoadOptions::new(opts.format())
        .create_if_missing(!opts.no_create)
        .build_block_map(!opts.no_create);
    let index = IndexHandle::load_with(opts.paths(), options)?;
    let mut reader = Reader::open(&index)?;

    let mut failures = 0;
    for text in &opts.regions {
        let result = Region::resolve(text, opts.coordinates(), &index)
            .map_err(anyhow::Error::from)
            .and_then(|region| extract_region(&mut reader, writer, text, &region, opts.line_width));
        if let Err(err) = result {
            error!("Could not extract {}: {:#}", text, err);
            failures += 1;
        }
    }
    writer.flush()?;
    Ok(failures)
}

// Run extract
pub fn run(opts: &Opts) -> Result<(), anyhow::Error> {
    let mut writer = BufWriter::with_capacity(BUFFERSIZE, io::stdout());
    let failures = extract(opts, &mut writer)?;
    if failures > 0 {
        bail!("{} of {} regions could not be extracted", failures, opts.regions.len());
    }
    Ok(())
}
