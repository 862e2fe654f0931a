use std::{
    fs::File,
    io::{self, BufWriter},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::Parser;
use fgoxide::io::Io;
use log::info;

use crate::{
    index::block_map::BlockMap,
    io::bgzf::{BgzfWriter, BGZF_BLOCK_SIZE},
    utils::{built_info, BUFFERSIZE},
};

/// Compresses a file to BGZF and writes its .gzi block index alongside.
///
/// An input ending in .gz is decompressed first, so gzip files can be converted to BGZF.
#[derive(Parser, Debug)]
#[clap(name = "bgzip", verbatim_doc_comment, version = built_info::VERSION.as_str())]
pub struct Opts {
    /// The file to compress.
    #[clap(display_order = 1)]
    pub input: PathBuf,

    /// The output BGZF file (default: <input>.gz). The block index is written to <output>.gzi.
    #[clap(short = 'o', long, display_order = 2)]
    pub output: Option<PathBuf>,

    /// Maximum number of uncompressed bytes per block.
    #[clap(long, default_value_t = BGZF_BLOCK_SIZE, display_order = 3)]
    pub block_size: usize,
}

impl Opts {
    fn output(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            let mut s = self.input.as_os_str().to_owned();
            s.push(".gz");
            PathBuf::from(s)
        })
    }
}

/// Compresses `input` into `output`, returning the block map of the written file.
#[allow(unknown_lints, clippy::io_other_error)]
pub fn compress(input: &Path, output: &Path, block_size: usize) -> io::Result<BlockMap> {
    let mut reader = Io::default()
        .new_reader(&input)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let mut writer = BgzfWriter::with_block_size(
        BufWriter::with_capacity(BUFFERSIZE, File::create(output)?),
        block_size,
    );
    let bytes = io::copy(&mut reader, &mut writer)?;
    let (_, map) = writer.finish()?;
    info!("Compressed {} bytes from {:?} into {} blocks", bytes, input, map.num_boundaries());
    Ok(map)
}

// Run bgzip
pub fn run(opts: &Opts) -> Result<(), anyhow::Error> {
    let output = opts.output();
    let map = compress(&opts.input, &output, opts.block_size)
        .with_context(|| format!("Failed to compress {:?}", opts.input))?;

    let mut gzi = output.clone().into_os_string();
    gzi.push(".gzi");
    let gzi = PathBuf::from(gzi);
    map.write(&gzi).with_context(|| format!("Failed to write {:?}", gzi))?;
    info!("Wrote {:?} and {:?}", output, gzi);
    Ok(())
}
