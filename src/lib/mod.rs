#![deny(unsafe_code)]
#![allow(
    clippy::must_use_candidate,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]
pub mod errors;
pub mod handle;
pub mod index {
    pub mod block_map;
    pub mod builder;
    pub mod fasta_index;
}
pub mod io {
    pub mod bgzf;
}
pub mod reader;
pub mod region;
pub mod tools {
    pub mod bgzip;
    pub mod extract;
    pub mod index;
    pub mod info;
    pub mod stress;
}
pub mod utils;

pub use errors::{Result, SeqFetchError};
pub use handle::{IndexHandle, IndexPaths, LoadOptions};
pub use index::fasta_index::{IndexEntry, OffsetIndex, SequenceFormat};
pub use reader::{FetchedRecord, Reader};
pub use region::{CoordinateSystem, Region};
