use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors returned by the index handle, readers and region parsing.
#[derive(Error, Debug)]
pub enum SeqFetchError {
    #[error("failed to load index for {path}: {reason}")]
    IndexLoad { path: PathBuf, reason: String },

    #[error("failed to open reader for {path}: {source}")]
    ReaderCreation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("sequence not found: {0}")]
    SequenceNotFound(String),

    #[error("invalid region: {0}")]
    InvalidRegion(String),

    #[error("quality data not available for {0}")]
    QualityNotAvailable(String),

    #[error("random access into compressed source {0} requires a .gzi block index")]
    CompressedAccessUnavailable(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SeqFetchError {
    pub(crate) fn index_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        SeqFetchError::IndexLoad { path: path.into(), reason: reason.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, SeqFetchError>;
