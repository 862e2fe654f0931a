use std::{path::PathBuf, thread, time::Instant};

use anyhow::{anyhow, ensure, Result};
use clap::Parser;
use log::{info, warn};

use crate::{
    handle::IndexHandle, index::fasta_index::SequenceFormat, reader::Reader, utils::built_info,
};

/// Number of bases fetched by each operation.
const FETCH_LENGTH: u64 = 10;

/// Fetches many small regions concurrently, one reader per thread over a shared index
#[derive(Parser, Debug)]
#[clap(name = "stress", verbatim_doc_comment, version = built_info::VERSION.as_str())]
pub struct Opts {
    /// The input FASTA/FASTQ file.
    #[clap(display_order = 1)]
    pub input: PathBuf,

    /// Number of threads.
    #[clap(short = 't', long, default_value = "4", display_order = 2)]
    pub threads: usize,

    /// Number of fetches per thread.
    #[clap(short = 'n', long, default_value = "100", display_order = 3)]
    pub operations: usize,

    /// Treat the input as FASTQ.
    #[clap(long, display_order = 4)]
    pub fastq: bool,
}

/// Runs `operations` fetches on one reader, cycling through the records. Records too short
/// for a full fetch are skipped. Returns the number of fetches that returned all their bases.
fn fetch_many(index: &IndexHandle, operations: usize) -> Result<usize> {
    let names: Vec<String> = index.names().map(String::from).collect();
    let mut reader = Reader::open(index)?;
    let mut successes = 0;
    for i in 0..operations {
        let name = &names[i % names.len()];
        let length = index.length_of(name).unwrap_or(0);
        if length <= FETCH_LENGTH {
            continue;
        }
        let begin = (i as u64 % (length - FETCH_LENGTH)) as i64;
        match reader.fetch_sequence(name, begin, begin + FETCH_LENGTH as i64) {
            Ok(bases) if bases.len() as u64 == FETCH_LENGTH => successes += 1,
            Ok(bases) => warn!("Fetched {} bases from {}:{}", bases.len(), name, begin),
            Err(err) => warn!("Could not fetch {}:{}: {}", name, begin, err),
        }
    }
    Ok(successes)
}

/// Runs `fetch_many` on `threads` threads sharing `index`, returning the successes per thread.
pub fn stress(index: &IndexHandle, threads: usize, operations: usize) -> Result<Vec<usize>> {
    ensure!(index.count() > 0, "No records in {:?}", index.source());
    thread::scope(|scope| {
        let workers: Vec<_> = (0..threads)
            .map(|_| {
                let index = index.acquire();
                scope.spawn(move || fetch_many(&index, operations))
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| {
                worker.join().map_err(|_| anyhow!("A stress thread panicked")).and_then(|r| r)
            })
            .collect()
    })
}

// Run stress
pub fn run(opts: &Opts) -> Result<(), anyhow::Error> {
    let format = if opts.fastq { SequenceFormat::Fastq } else { SequenceFormat::Fasta };
    let index = IndexHandle::load(&opts.input, format, true)?;
    info!("Running {} threads with {} fetches each", opts.threads, opts.operations);

    let start = Instant::now();
    let successes = stress(&index, opts.threads, opts.operations)?;
    let elapsed = start.elapsed();

    for (thread_id, count) in successes.iter().enumerate() {
        info!("Thread {}: {}/{} fetches succeeded", thread_id, count, opts.operations);
    }
    let total: usize = successes.iter().sum();
    info!("Total: {}/{} fetches succeeded", total, opts.threads * opts.operations);
    info!(
        "Elapsed: {:.3}s ({:.0} fetches/s)",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );

    ensure!(
        index.ref_count() == 1,
        "Index still has {} references after all threads finished",
        index.ref_count()
    );
    Ok(())
}
