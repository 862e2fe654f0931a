#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]
use std::process::exit;

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::error;
use seqfetch_lib::tools::bgzip::{run as bgzip, Opts as BgzipOpts};
use seqfetch_lib::tools::extract::{run as extract, Opts as ExtractOpts};
use seqfetch_lib::tools::index::{run as index, Opts as IndexOpts};
use seqfetch_lib::tools::info::{run as info, Opts as InfoOpts};
use seqfetch_lib::tools::stress::{run as stress, Opts as StressOpts};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

// One variant per tool, each wrapping that tool's option struct
#[derive(Subcommand)]
enum Commands {
    /// Builds the .fai (and optionally .gzi) index of a FASTA/FASTQ file
    Index(IndexOpts),
    /// Extracts regions from an indexed FASTA/FASTQ file
    Extract(ExtractOpts),
    /// Lists record names and lengths
    Info(InfoOpts),
    /// Compresses a file to BGZF with a .gzi block index
    Bgzip(BgzipOpts),
    /// Fetches regions from many threads at once
    Stress(StressOpts),
}

#[cfg(not(tarpaulin_include))]
fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Index(opts) => index(opts),
        Commands::Extract(opts) => extract(opts),
        Commands::Info(opts) => info(opts),
        Commands::Bgzip(opts) => bgzip(opts),
        Commands::Stress(opts) => stress(opts),
    };

    if let Err(err) = result {
        error!("{:#}", err);
        exit(1);
    }
}
