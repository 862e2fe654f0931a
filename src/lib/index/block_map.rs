//! The `.gzi` block map: checkpoints pairing a BGZF block's compressed offset with the
//! uncompressed offset of its first byte.
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Write},
    path::Path,
};

use crate::utils::BUFFERSIZE;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockMapEntry {
    pub compressed_offset: u64,
    pub uncompressed_offset: u64,
}

impl BlockMapEntry {
    pub const START: BlockMapEntry = BlockMapEntry { compressed_offset: 0, uncompressed_offset: 0 };
}

/// Sorted block checkpoints. The first entry is always the start of the file, `(0, 0)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockMap {
    entries: Vec<BlockMapEntry>,
}

impl Default for BlockMap {
    fn default() -> Self {
        BlockMap { entries: vec![BlockMapEntry::START] }
    }
}

impl BlockMap {
    /// Builds a map from block boundaries (the start of the file may be omitted). Boundaries
    /// must be non-decreasing in both offsets.
    pub fn new(boundaries: impl IntoIterator<Item = BlockMapEntry>) -> io::Result<BlockMap> {
        let mut map = BlockMap::default();
        for entry in boundaries {
            map.push(entry)?;
        }
        Ok(map)
    }

    fn push(&mut self, entry: BlockMapEntry) -> io::Result<()> {
        if entry == BlockMapEntry::START {
            return Ok(());
        }
        let last = self.entries[self.entries.len() - 1];
        if entry.compressed_offset < last.compressed_offset
            || entry.uncompressed_offset < last.uncompressed_offset
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("block map entry {:?} is out of order after {:?}", entry, last),
            ));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Reads a `.gzi` file: a little-endian `u64` count followed by that many
    /// `(compressed, uncompressed)` `u64` pairs.
    pub fn read<P: AsRef<Path>>(gzi_index: P) -> io::Result<BlockMap> {
        let mut reader = BufReader::with_capacity(BUFFERSIZE, File::open(gzi_index)?);

        let file_entry_count = reader.read_u64::<LittleEndian>()?;

        let mut map = BlockMap::default();
        for _ in 0..file_entry_count {
            let compressed_offset = reader.read_u64::<LittleEndian>()?;
            let uncompressed_offset = reader.read_u64::<LittleEndian>()?;
            map.push(BlockMapEntry { compressed_offset, uncompressed_offset })?;
        }

        Ok(map)
    }

    /// Writes the map in `.gzi` layout, leaving out the implicit start-of-file entry.
    pub fn write(&self, output: &Path) -> io::Result<()> {
        let mut writer = BufWriter::with_capacity(BUFFERSIZE, File::create(output)?);
        let boundaries = &self.entries[1..];
        writer.write_u64::<LittleEndian>(boundaries.len() as u64)?;
        for entry in boundaries {
            writer.write_u64::<LittleEndian>(entry.compressed_offset)?;
            writer.write_u64::<LittleEndian>(entry.uncompressed_offset)?;
        }
        writer.flush()
    }

    /// All checkpoints, including the start-of-file entry.
    pub fn entries(&self) -> &[BlockMapEntry] {
        &self.entries
    }

    /// Number of block boundaries, not counting the start of the file.
    pub fn num_boundaries(&self) -> usize {
        self.entries.len() - 1
    }

    /// The checkpoint of the block containing `uncompressed_offset`: the last entry whose
    /// uncompressed offset is `<=` the target. On ties the highest such entry is returned, so
    /// a target on a block boundary maps to the block that starts there.
    pub fn find(&self, uncompressed_offset: u64) -> BlockMapEntry {
        let after = self.entries.partition_point(|e| e.uncompressed_offset <= uncompressed_offset);
        // entries[0] is (0, 0), so `after` is at least 1
        self.entries[after - 1]
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use byteorder::{LittleEndian, WriteBytesExt};
    use rstest::rstest;
    use tempfile::TempDir;

    use super::{BlockMap, BlockMapEntry};

    fn entry(compressed_offset: u64, uncompressed_offset: u64) -> BlockMapEntry {
        BlockMapEntry { compressed_offset, uncompressed_offset }
    }

    fn map() -> BlockMap {
        BlockMap::new(vec![entry(100, 1000), entry(180, 2000), entry(260, 2000), entry(300, 3000)])
            .unwrap()
    }

    #[rstest]
    #[case(0, entry(0, 0))]
    #[case(999, entry(0, 0))]
    #[case(1000, entry(100, 1000))]
    #[case(1999, entry(100, 1000))]
    // the empty block at 180 and the block at 260 both start at 2000; pick the later one
    #[case(2000, entry(260, 2000))]
    #[case(2500, entry(260, 2000))]
    #[case(3000, entry(300, 3000))]
    #[case(u64::MAX, entry(300, 3000))]
    fn test_find(#[case] target: u64, #[case] expected: BlockMapEntry) {
        assert_eq!(map().find(target), expected);
    }

    #[test]
    fn test_find_on_empty_map() {
        let map = BlockMap::default();
        assert_eq!(map.find(12345), BlockMapEntry::START);
        assert_eq!(map.num_boundaries(), 0);
    }

    #[test]
    fn test_new_rejects_out_of_order_entries() {
        assert!(BlockMap::new(vec![entry(100, 1000), entry(90, 2000)]).is_err());
        assert!(BlockMap::new(vec![entry(100, 1000), entry(200, 900)]).is_err());
    }

    #[test]
    fn test_new_skips_explicit_start_entry() {
        let map = BlockMap::new(vec![BlockMapEntry::START, entry(10, 20)]).unwrap();
        assert_eq!(map.entries(), &[BlockMapEntry::START, entry(10, 20)]);
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.fa.gz.gzi");

        let map = map();
        map.write(&path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 8 + 4 * 16);
        assert_eq!(BlockMap::read(&path).unwrap(), map);
    }

    #[test]
    fn test_write_is_uncompressed_for_any_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blocks.gz");

        let map = map();
        map.write(&path).unwrap();
        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 8 + 4 * 16);
        assert_eq!(bytes[..8], 4u64.to_le_bytes());
        assert_eq!(BlockMap::read(&path).unwrap(), map);
    }

    #[test]
    fn test_read_gzi_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.gzi");
        let mut bytes: Vec<u8> = vec![];
        bytes.write_u64::<LittleEndian>(2).unwrap();
        for value in [65_000u64, 65_280, 130_000, 130_560] {
            bytes.write_u64::<LittleEndian>(value).unwrap();
        }
        fs::write(&path, bytes).unwrap();

        let map = BlockMap::read(&path).unwrap();
        assert_eq!(map.entries(), &[entry(0, 0), entry(65_000, 65_280), entry(130_000, 130_560)]);
    }

    #[test]
    fn test_read_truncated_gzi() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.gzi");
        let mut bytes: Vec<u8> = vec![];
        bytes.write_u64::<LittleEndian>(3).unwrap();
        bytes.write_u64::<LittleEndian>(10).unwrap();
        fs::write(&path, bytes).unwrap();
        assert!(BlockMap::read(&path).is_err());
    }
}
