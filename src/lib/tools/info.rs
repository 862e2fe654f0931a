use std::{
    io::{self, BufWriter, Write},
    path::PathBuf,
};

use anyhow::Result;
use clap::Parser;
use log::info;

use crate::{
    handle::{IndexHandle, IndexPaths, LoadOptions},
    index::fasta_index::SequenceFormat,
    utils::{built_info, BUFFERSIZE},
};

/// Lists the name and length of every record in an indexed FASTA/FASTQ file
#[derive(Parser, Debug)]
#[clap(name = "info", verbatim_doc_comment, version = built_info::VERSION.as_str())]
pub struct Opts {
    /// The input FASTA/FASTQ file.
    #[clap(display_order = 1)]
    pub input: PathBuf,

    /// Treat the input as FASTQ.
    #[clap(long, display_order = 2)]
    pub fastq: bool,

    /// The .fai index (default: <input>.fai).
    #[clap(long, display_order = 3)]
    pub fai: Option<PathBuf>,
}

/// Writes one `name<TAB>length` line per record, in file order.
pub fn write_info<W: Write>(index: &IndexHandle, writer: &mut W) -> io::Result<()> {
    for entry in index.offset_index().iter() {
        writeln!(writer, "{}\t{}", entry.name, entry.record_length)?;
    }
    writer.flush()
}

// Run info
pub fn run(opts: &Opts) -> Result<(), anyhow::Error> {
    let format = if opts.fastq { SequenceFormat::Fastq } else { SequenceFormat::Fasta };
    let mut paths = IndexPaths::for_source(&opts.input);
    if let Some(fai) = &opts.fai {
        paths = paths.with_fai(fai);
    }
    let index = IndexHandle::load_with(paths, LoadOptions::new(format).create_if_missing(true))?;

    let mut writer = BufWriter::with_capacity(BUFFERSIZE, io::stdout());
    write_info(&index, &mut writer)?;
    info!("{} records in {:?}", index.count(), opts.input);
    Ok(())
}
