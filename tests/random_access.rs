use std::{
    fs::{self, File},
    io::{Cursor, Write},
    path::{Path, PathBuf},
    thread,
};

use matches::assert_matches;
use seqfetch_lib::{
    index::builder::IndexBuilder, io::bgzf::BgzfWriter, IndexEntry, IndexHandle, OffsetIndex,
    Reader, SeqFetchError, SequenceFormat,
};
use tempfile::TempDir;

/// Records of assorted lengths, wrapped at 7 bases.
fn fasta_records() -> Vec<(String, String)> {
    let alphabet = b"ACGTNacgt";
    (0..6)
        .map(|i| {
            let length = 5 + i * 13;
            let bases: String =
                (0..length).map(|j| alphabet[(i * 3 + j) % alphabet.len()] as char).collect();
            (format!("seq{}", i), bases)
        })
        .collect()
}

fn fasta_text(records: &[(String, String)]) -> String {
    let mut text = String::new();
    for (name, bases) in records {
        text.push_str(&format!(">{} some description\n", name));
        for line in bases.as_bytes().chunks(7) {
            text.push_str(std::str::from_utf8(line).unwrap());
            text.push('\n');
        }
    }
    text
}

fn write_bgzf(path: &Path, data: &[u8], block_size: usize, with_gzi: bool) {
    let mut writer = BgzfWriter::with_block_size(File::create(path).unwrap(), block_size);
    writer.write_all(data).unwrap();
    let (_, map) = writer.finish().unwrap();
    if with_gzi {
        let mut gzi = path.as_os_str().to_owned();
        gzi.push(".gzi");
        map.write(&PathBuf::from(gzi)).unwrap();
    }
}

fn entries(index: &OffsetIndex) -> Vec<IndexEntry> {
    index.iter().cloned().collect()
}

#[test]
fn test_every_region_matches_source() {
    let dir = TempDir::new().unwrap();
    let records = fasta_records();
    let path = dir.path().join("test.fa");
    fs::write(&path, fasta_text(&records)).unwrap();

    let handle = IndexHandle::load(&path, SequenceFormat::Fasta, true).unwrap();
    let mut reader = Reader::open(&handle).unwrap();
    for (name, bases) in &records {
        let length = bases.len();
        assert_eq!(handle.length_of(name), Some(length as u64));
        assert_eq!(reader.fetch_all(name).unwrap(), bases.as_bytes());
        for begin in 0..length {
            for end in begin..=length {
                let fetched = reader.fetch_sequence(name, begin as i64, end as i64).unwrap();
                let expected = bases.as_bytes()[begin..end].to_vec();
                assert_eq!(fetched, expected, "{}:{}-{}", name, begin, end);
            }
        }
    }
}

#[test]
fn test_compressed_matches_plain() {
    let dir = TempDir::new().unwrap();
    let records = fasta_records();
    let text = fasta_text(&records);
    let plain = dir.path().join("test.fa");
    let compressed = dir.path().join("test.fa.gz");
    fs::write(&plain, &text).unwrap();
    // small blocks so most fetches cross block boundaries
    write_bgzf(&compressed, text.as_bytes(), 11, true);

    let plain = IndexHandle::load(&plain, SequenceFormat::Fasta, true).unwrap();
    let compressed = IndexHandle::load(&compressed, SequenceFormat::Fasta, true).unwrap();
    assert!(compressed.is_compressed());
    assert!(compressed.block_map().unwrap().num_boundaries() > 10);
    assert_eq!(entries(plain.offset_index()), entries(compressed.offset_index()));

    let mut plain_reader = Reader::open(&plain).unwrap();
    let mut compressed_reader = Reader::open(&compressed).unwrap();
    for (name, bases) in &records {
        let length = bases.len() as i64;
        for begin in (-2..length).step_by(3) {
            for end in [begin, begin + 1, begin + 9, begin + 30, length, length + 5, -1] {
                assert_eq!(
                    plain_reader.fetch_sequence(name, begin, end).unwrap(),
                    compressed_reader.fetch_sequence(name, begin, end).unwrap(),
                    "{}:{}-{}",
                    name,
                    begin,
                    end
                );
            }
        }
    }
}

#[test]
fn test_concurrent_readers_match_sequential() {
    let dir = TempDir::new().unwrap();
    let records = fasta_records();
    let text = fasta_text(&records);
    let path = dir.path().join("test.fa.gz");
    write_bgzf(&path, text.as_bytes(), 32, true);
    let handle = IndexHandle::load(&path, SequenceFormat::Fasta, true).unwrap();

    let regions: Vec<(String, i64, i64)> = records
        .iter()
        .flat_map(|(name, bases)| {
            let length = bases.len() as i64;
            (0..length).step_by(4).map(move |b| (name.clone(), b, b + 10))
        })
        .collect();

    let mut reader = Reader::open(&handle).unwrap();
    let expected: Vec<Vec<u8>> = regions
        .iter()
        .map(|(name, begin, end)| reader.fetch_sequence(name, *begin, *end).unwrap())
        .collect();
    reader.close();
    assert_eq!(handle.ref_count(), 1);

    let results: Vec<Vec<Vec<u8>>> = thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.acquire();
                let regions = &regions;
                scope.spawn(move || {
                    let mut reader = Reader::open(&handle).unwrap();
                    regions
                        .iter()
                        .rev()
                        .map(|(name, begin, end)| {
                            reader.fetch_sequence(name, *begin, *end).unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let reversed: Vec<Vec<u8>> = expected.into_iter().rev().collect();
    for result in results {
        assert_eq!(result, reversed);
    }
    assert_eq!(handle.ref_count(), 1);
}

#[test]
fn test_compressed_without_block_map() {
    let dir = TempDir::new().unwrap();
    let records = fasta_records();
    let path = dir.path().join("test.fa.gz");
    write_bgzf(&path, fasta_text(&records).as_bytes(), 20, false);

    let handle = IndexHandle::load(&path, SequenceFormat::Fasta, true).unwrap();
    assert!(handle.block_map().is_none());
    assert_eq!(handle.count(), records.len());
    assert_eq!(handle.name_at(2), Some("seq2"));
    assert_eq!(handle.length_of("seq5"), Some(records[5].1.len() as u64));

    let mut reader = Reader::open(&handle).unwrap();
    assert_matches!(
        reader.fetch_sequence("seq1", 0, 5),
        Err(SeqFetchError::CompressedAccessUnavailable(_))
    );
}

#[test]
fn test_index_round_trip() {
    let dir = TempDir::new().unwrap();
    let text = fasta_text(&fasta_records());
    let path = dir.path().join("test.fa");
    fs::write(&path, &text).unwrap();

    let built =
        IndexBuilder::new(SequenceFormat::Fasta).build(Cursor::new(text.as_bytes())).unwrap();
    let handle = IndexHandle::load(&path, SequenceFormat::Fasta, true).unwrap();
    assert_eq!(entries(handle.offset_index()), entries(&built));

    let reread = OffsetIndex::read(&dir.path().join("test.fa.fai")).unwrap();
    assert_eq!(entries(&reread), entries(&built));

    // a second load reads the persisted index instead of rebuilding
    let again = IndexHandle::load(&path, SequenceFormat::Fasta, false).unwrap();
    assert_eq!(entries(again.offset_index()), entries(&built));
}

#[test]
fn test_fastq_over_bgzf() {
    let dir = TempDir::new().unwrap();
    let reads = [
        ("read1", "ACGTACGTACGTAAA", "IIIIIHHHHH@@@++"),
        ("read2", "GGCC", ">>@@"),
        ("read3", "TTTTTTTTTTTTTTTTTTTTTTTTT", "+++++@@@@@>>>>>IIIIIFFFFF"),
    ];
    let mut text = String::new();
    for (name, seq, qual) in &reads {
        text.push_str(&format!("@{}\n{}\n+\n{}\n", name, seq, qual));
    }
    let path = dir.path().join("reads.fq.gz");
    write_bgzf(&path, text.as_bytes(), 9, true);

    let handle = IndexHandle::load(&path, SequenceFormat::Fastq, true).unwrap();
    let mut reader = Reader::open(&handle).unwrap();
    for (name, seq, qual) in &reads {
        let record = reader.fetch_record(name).unwrap();
        assert_eq!(record.sequence, seq.as_bytes());
        assert_eq!(record.quality.as_deref(), Some(qual.as_bytes()));
        assert_eq!(reader.fetch_quality(name, 1, 3).unwrap(), qual.as_bytes()[1..3].to_vec());
    }
}
