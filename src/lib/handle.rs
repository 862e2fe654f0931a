//! The shared, reference-counted index behind every [`Reader`](crate::reader::Reader).
//!
//! An [`IndexHandle`] is loaded once and cloned cheaply into as many threads as needed.
//! Everything it holds is immutable after [`IndexHandle::load_with`] returns; the only
//! shared mutable state is the `Arc` reference count.
use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{info, warn};

use crate::{
    errors::{Result, SeqFetchError},
    index::{
        block_map::BlockMap,
        builder::IndexBuilder,
        fasta_index::{IndexEntry, OffsetIndex, SequenceFormat},
    },
    io::bgzf::{BgzfReader, GZIP_MAGIC},
    utils::BUFFERSIZE,
};

/// Locations of a sequence file and its `.fai` and `.gzi` indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    pub source: PathBuf,
    pub fai: PathBuf,
    pub gzi: PathBuf,
}

impl IndexPaths {
    /// Paths with the conventional `<source>.fai` and `<source>.gzi` index locations.
    pub fn for_source<P: AsRef<Path>>(source: P) -> Self {
        let source = source.as_ref().to_path_buf();
        let fai = append_extension(&source, "fai");
        let gzi = append_extension(&source, "gzi");
        IndexPaths { source, fai, gzi }
    }

    pub fn with_fai<P: AsRef<Path>>(mut self, fai: P) -> Self {
        self.fai = fai.as_ref().to_path_buf();
        self
    }

    pub fn with_gzi<P: AsRef<Path>>(mut self, gzi: P) -> Self {
        self.gzi = gzi.as_ref().to_path_buf();
        self
    }
}

pub(crate) fn append_extension(path: &Path, extension: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".");
    s.push(extension);
    PathBuf::from(s)
}

/// How an index should be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadOptions {
    pub format: SequenceFormat,
    /// Build (and persist) the `.fai` when it does not exist.
    pub create_if_missing: bool,
    /// Build (and persist) the `.gzi` for a compressed source when it does not exist.
    pub build_block_map: bool,
}

impl LoadOptions {
    pub fn new(format: SequenceFormat) -> Self {
        LoadOptions { format, ..Default::default() }
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn build_block_map(mut self, build: bool) -> Self {
        self.build_block_map = build;
        self
    }
}

/// Returns true if the file starts with the gzip magic bytes.
pub fn is_compressed(path: &Path) -> io::Result<bool> {
    let mut magic = [0u8; 2];
    let mut file = File::open(path)?;
    let mut read = 0;
    while read < magic.len() {
        let n = file.read(&mut magic[read..])?;
        if n == 0 {
            return Ok(false);
        }
        read += n;
    }
    Ok(magic == GZIP_MAGIC)
}

/// Scans a sequence file and writes its `.fai`. Nothing is written if the file has no records.
pub fn build_offset_index(
    source: &Path,
    fai: &Path,
    format: SequenceFormat,
    compressed: bool,
) -> io::Result<OffsetIndex> {
    let file = File::open(source)?;
    let builder = IndexBuilder::new(format);
    let index = if compressed {
        builder.build(BgzfReader::new(file))?
    } else {
        builder.build(BufReader::with_capacity(BUFFERSIZE, file))?
    };
    if index.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("no {} records found in {:?}", format, source),
        ));
    }
    index.write(fai)?;
    info!("Wrote {} index entries for {:?} to {:?}", index.len(), source, fai);
    Ok(index)
}

/// Scans the blocks of a BGZF file and writes its `.gzi`.
pub fn build_block_map(source: &Path, gzi: &Path) -> io::Result<BlockMap> {
    let map = BgzfReader::new(BufReader::with_capacity(BUFFERSIZE, File::open(source)?))
        .index_blocks()?;
    map.write(gzi)?;
    info!("Wrote {} block boundaries for {:?} to {:?}", map.num_boundaries(), source, gzi);
    Ok(map)
}

#[derive(Debug)]
struct SharedIndex {
    paths: IndexPaths,
    format: SequenceFormat,
    compressed: bool,
    index: OffsetIndex,
    block_map: Option<BlockMap>,
}

/// A shared, immutable sequence index. Cloning acquires another reference; dropping releases
/// it, and the index is freed with the last reference.
#[derive(Debug, Clone)]
pub struct IndexHandle {
    inner: Arc<SharedIndex>,
}

impl IndexHandle {
    /// Loads the index for `path` using the conventional `.fai`/`.gzi` locations.
    pub fn load<P: AsRef<Path>>(
        path: P,
        format: SequenceFormat,
        create_if_missing: bool,
    ) -> Result<IndexHandle> {
        Self::load_with(
            IndexPaths::for_source(path),
            LoadOptions::new(format).create_if_missing(create_if_missing),
        )
    }

    /// Loads (or builds) the offset index and, for compressed sources, the block map.
    ///
    /// A compressed source without a usable block map still loads: its names and lengths can
    /// be queried, but fetching from it fails with
    /// [`SeqFetchError::CompressedAccessUnavailable`].
    pub fn load_with(paths: IndexPaths, options: LoadOptions) -> Result<IndexHandle> {
        let compressed = is_compressed(&paths.source)
            .map_err(|e| SeqFetchError::index_load(&paths.source, e))?;

        let index = if paths.fai.exists() {
            OffsetIndex::read(&paths.fai).map_err(|e| SeqFetchError::index_load(&paths.fai, e))?
        } else if options.create_if_missing {
            build_offset_index(&paths.source, &paths.fai, options.format, compressed)
                .map_err(|e| SeqFetchError::index_load(&paths.source, e))?
        } else {
            return Err(SeqFetchError::index_load(
                &paths.fai,
                "index does not exist and creation was not requested",
            ));
        };

        let block_map = if !compressed {
            None
        } else if paths.gzi.exists() {
            match BlockMap::read(&paths.gzi) {
                Ok(map) => Some(map),
                Err(e) => {
                    warn!("Ignoring unusable block index {:?}: {}", paths.gzi, e);
                    None
                }
            }
        } else if options.build_block_map {
            Some(
                build_block_map(&paths.source, &paths.gzi)
                    .map_err(|e| SeqFetchError::index_load(&paths.source, e))?,
            )
        } else {
            warn!(
                "No block index {:?} for compressed source {:?}; sequences cannot be fetched",
                paths.gzi, paths.source
            );
            None
        };

        Ok(IndexHandle {
            inner: Arc::new(SharedIndex {
                paths,
                format: options.format,
                compressed,
                index,
                block_map,
            }),
        })
    }

    /// Takes another reference to the same index.
    pub fn acquire(&self) -> IndexHandle {
        self.clone()
    }

    /// Gives up this reference.
    pub fn release(self) {
        drop(self);
    }

    /// The number of live references to this index, readers included.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn count(&self) -> usize {
        self.inner.index.len()
    }

    pub fn name_at(&self, ordinal: usize) -> Option<&str> {
        self.inner.index.get_index(ordinal).map(|entry| entry.name.as_str())
    }

    pub fn length_of(&self, name: &str) -> Option<u64> {
        self.inner.index.get(name).map(|entry| entry.record_length)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.index.contains(name)
    }

    pub fn entry(&self, name: &str) -> Option<&IndexEntry> {
        self.inner.index.get(name)
    }

    /// Record names in file order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inner.index.iter().map(|entry| entry.name.as_str())
    }

    pub fn offset_index(&self) -> &OffsetIndex {
        &self.inner.index
    }

    pub fn format(&self) -> SequenceFormat {
        self.inner.format
    }

    pub fn is_compressed(&self) -> bool {
        self.inner.compressed
    }

    pub fn block_map(&self) -> Option<&BlockMap> {
        self.inner.block_map.as_ref()
    }

    pub fn paths(&self) -> &IndexPaths {
        &self.inner.paths
    }

    pub fn source(&self) -> &Path {
        &self.inner.paths.source
    }
}

#[cfg(test)]
mod test {
    use std::{fs, io::Write, path::PathBuf, thread};

    use byteorder::{LittleEndian, WriteBytesExt};
    use matches::assert_matches;
    use tempfile::TempDir;

    use super::{IndexHandle, IndexPaths, LoadOptions};
    use crate::{
        errors::SeqFetchError,
        index::{block_map::BlockMap, fasta_index::SequenceFormat},
        io::bgzf::BgzfWriter,
        reader::Reader,
    };

    const FASTA: &[u8] = b">chr1 first\nACGTACGTAC\nGTACGTACGT\nACGTACGTAC\nGTACGT\n>chr2\nGGGG\n";

    fn write_fasta(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("test.fa");
        fs::write(&path, FASTA).unwrap();
        path
    }

    /// Writes `FASTA` as BGZF in small blocks, without a `.gzi`.
    fn write_bgzf(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("test.fa.gz");
        let mut writer = BgzfWriter::with_block_size(fs::File::create(&path).unwrap(), 10);
        writer.write_all(FASTA).unwrap();
        writer.finish().unwrap();
        path
    }

    #[test]
    fn test_index_paths_for_source() {
        let paths = IndexPaths::for_source("/data/genome.fa.gz");
        assert_eq!(paths.fai, PathBuf::from("/data/genome.fa.gz.fai"));
        assert_eq!(paths.gzi, PathBuf::from("/data/genome.fa.gz.gzi"));

        let paths = paths.with_fai("/tmp/other.fai").with_gzi("/tmp/other.gzi");
        assert_eq!(paths.source, PathBuf::from("/data/genome.fa.gz"));
        assert_eq!(paths.fai, PathBuf::from("/tmp/other.fai"));
        assert_eq!(paths.gzi, PathBuf::from("/tmp/other.gzi"));
    }

    #[test]
    fn test_load_creates_index() {
        let dir = TempDir::new().unwrap();
        let path = write_fasta(&dir);

        let handle = IndexHandle::load(&path, SequenceFormat::Fasta, true).unwrap();
        assert!(dir.path().join("test.fa.fai").exists());
        assert!(!handle.is_compressed());
        assert!(handle.block_map().is_none());

        assert_eq!(handle.count(), 2);
        assert_eq!(handle.name_at(0), Some("chr1"));
        assert_eq!(handle.name_at(1), Some("chr2"));
        assert_eq!(handle.name_at(2), None);
        assert_eq!(handle.length_of("chr1"), Some(36));
        assert_eq!(handle.length_of("chr2"), Some(4));
        assert_eq!(handle.length_of("chr3"), None);
        assert!(handle.contains("chr2"));
        assert!(!handle.contains("first"));
        assert_eq!(handle.names().collect::<Vec<_>>(), vec!["chr1", "chr2"]);
    }

    #[test]
    fn test_load_reuses_persisted_index() {
        let dir = TempDir::new().unwrap();
        let path = write_fasta(&dir);
        let built = IndexHandle::load(&path, SequenceFormat::Fasta, true).unwrap();

        // a reload must come from the .fai, not a rescan; creation is not allowed here
        let reloaded = IndexHandle::load(&path, SequenceFormat::Fasta, false).unwrap();
        assert_eq!(
            reloaded.offset_index().iter().collect::<Vec<_>>(),
            built.offset_index().iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_load_with_explicit_paths() {
        let dir = TempDir::new().unwrap();
        let path = write_fasta(&dir);
        let fai = dir.path().join("elsewhere.fai");

        let paths = IndexPaths::for_source(&path).with_fai(&fai);
        let options = LoadOptions::new(SequenceFormat::Fasta).create_if_missing(true);
        let handle = IndexHandle::load_with(paths, options).unwrap();
        assert!(fai.exists());
        assert!(!dir.path().join("test.fa.fai").exists());
        assert_eq!(handle.paths().fai, fai);
    }

    #[test]
    fn test_load_without_index_or_creation_fails() {
        let dir = TempDir::new().unwrap();
        let path = write_fasta(&dir);
        assert_matches!(
            IndexHandle::load(&path, SequenceFormat::Fasta, false),
            Err(SeqFetchError::IndexLoad { .. })
        );
    }

    #[test]
    fn test_load_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        assert_matches!(
            IndexHandle::load(dir.path().join("missing.fa"), SequenceFormat::Fasta, true),
            Err(SeqFetchError::IndexLoad { .. })
        );
    }

    #[test]
    fn test_load_source_without_records_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.fa");
        fs::write(&path, b"").unwrap();
        assert_matches!(
            IndexHandle::load(&path, SequenceFormat::Fasta, true),
            Err(SeqFetchError::IndexLoad { .. })
        );
        assert!(!dir.path().join("empty.fa.fai").exists());

        // once the source has records, the next load builds a usable index
        fs::write(&path, b">s\nACGT\n").unwrap();
        let handle = IndexHandle::load(&path, SequenceFormat::Fasta, true).unwrap();
        assert_eq!(handle.length_of("s"), Some(4));
    }

    #[test]
    fn test_load_ignores_unusable_block_map() {
        let dir = TempDir::new().unwrap();
        let path = write_bgzf(&dir);
        // a count of two entries followed by half of one
        let mut gzi = vec![];
        gzi.write_u64::<LittleEndian>(2).unwrap();
        gzi.write_u64::<LittleEndian>(30).unwrap();
        fs::write(dir.path().join("test.fa.gz.gzi"), gzi).unwrap();

        let handle = IndexHandle::load(&path, SequenceFormat::Fasta, true).unwrap();
        assert!(handle.is_compressed());
        assert!(handle.block_map().is_none());
        assert_eq!(handle.length_of("chr1"), Some(36));

        let mut reader = Reader::open(&handle).unwrap();
        assert_matches!(
            reader.fetch_sequence("chr1", 0, 4),
            Err(SeqFetchError::CompressedAccessUnavailable(_))
        );
    }

    #[test]
    fn test_load_builds_missing_block_map() {
        let dir = TempDir::new().unwrap();
        let path = write_bgzf(&dir);
        let gzi = dir.path().join("test.fa.gz.gzi");

        let options =
            LoadOptions::new(SequenceFormat::Fasta).create_if_missing(true).build_block_map(true);
        let handle = IndexHandle::load_with(IndexPaths::for_source(&path), options).unwrap();
        assert!(gzi.exists());
        assert_eq!(handle.block_map(), Some(&BlockMap::read(&gzi).unwrap()));

        let mut reader = Reader::open(&handle).unwrap();
        assert_eq!(reader.fetch_sequence("chr1", 8, 14).unwrap(), b"ACGTAC".to_vec());
        assert_eq!(reader.fetch_all("chr2").unwrap(), b"GGGG".to_vec());
    }

    #[test]
    fn test_load_malformed_source_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.fa");
        fs::write(&path, b">s1\nACGT\nACGTACGT\n").unwrap();
        assert_matches!(
            IndexHandle::load(&path, SequenceFormat::Fasta, true),
            Err(SeqFetchError::IndexLoad { .. })
        );
    }

    #[test]
    fn test_acquire_and_release_track_count() {
        let dir = TempDir::new().unwrap();
        let handle = IndexHandle::load(write_fasta(&dir), SequenceFormat::Fasta, true).unwrap();
        assert_eq!(handle.ref_count(), 1);

        let second = handle.acquire();
        let third = second.clone();
        assert_eq!(handle.ref_count(), 3);

        second.release();
        assert_eq!(handle.ref_count(), 2);
        drop(third);
        assert_eq!(handle.ref_count(), 1);
    }

    #[test]
    fn test_handle_is_shared_across_threads() {
        let dir = TempDir::new().unwrap();
        let handle = IndexHandle::load(write_fasta(&dir), SequenceFormat::Fasta, true).unwrap();

        let lengths: Vec<Option<u64>> = thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|_| {
                    let handle = handle.acquire();
                    scope.spawn(move || handle.length_of("chr1"))
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });
        assert_eq!(lengths, vec![Some(36); 4]);
        assert_eq!(handle.ref_count(), 1);
    }
}
