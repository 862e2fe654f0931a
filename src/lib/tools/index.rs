use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use crate::{
    handle::{build_block_map, build_offset_index, is_compressed, IndexPaths},
    index::fasta_index::SequenceFormat,
    utils::built_info,
};

/// Index a FASTA or FASTQ file, plain or bgzip'ed
#[derive(Parser, Debug)]
#[clap(name = "index", verbatim_doc_comment, version = built_info::VERSION.as_str())]
pub struct Opts {
    /// The input FASTA/FASTQ file.
    #[clap(display_order = 1)]
    pub input: PathBuf,

    /// Treat the input as FASTQ and record quality offsets.
    #[clap(long, display_order = 2)]
    pub fastq: bool,

    /// The output .fai index (default: <input>.fai).
    #[clap(long, display_order = 3)]
    pub fai: Option<PathBuf>,

    /// The output .gzi block index (default: <input>.gzi).
    #[clap(long, display_order = 4)]
    pub gzi: Option<PathBuf>,

    /// Also write the .gzi block index when the input is bgzip'ed.
    #[clap(short = 'b', long, display_order = 5)]
    pub block_map: bool,
}

impl Opts {
    pub fn format(&self) -> SequenceFormat {
        if self.fastq {
            SequenceFormat::Fastq
        } else {
            SequenceFormat::Fasta
        }
    }

    pub fn paths(&self) -> IndexPaths {
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

// Run index
pub fn run(opts: &Opts) -> Result<(), anyhow::Error> {
    let paths = opts.paths();
    let compressed = is_compressed(&paths.source)
        .with_context(|| format!("Could not read {:?}", paths.source))?;

    let index = build_offset_index(&paths.source, &paths.fai, opts.format(), compressed)
        .with_context(|| format!("Failed to index {:?}", paths.source))?;
    info!("Indexed {} {} records", index.len(), opts.format());

    if compressed && opts.block_map {
        build_block_map(&paths.source, &paths.gzi)
            .with_context(|| format!("Failed to build block index for {:?}", paths.source))?;
    } else if opts.block_map {
        info!("{:?} is not compressed; no block index needed", paths.source);
    }

    Ok(())
}
