//! Block-by-block BGZF reading and writing.
//!
//! [`BgzfReader`] inflates one block at a time and can jump to any [`BlockMapEntry`], reading
//! on across as many blocks as the caller consumes. [`BgzfWriter`] produces BGZF and
//! records the block boundaries it wrote.
use std::io::{self, BufRead, ErrorKind, Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use bytes::BytesMut;
use gzp::{deflate::Bgzf, BlockFormatSpec, FooterValues, FormatSpec, GzpError, BUFSIZE};
use libdeflater::{CompressionLvl, Compressor, Crc, Decompressor};
use log::debug;

use crate::index::block_map::{BlockMap, BlockMapEntry};

/// Maximum number of uncompressed bytes placed in a single block.
pub const BGZF_BLOCK_SIZE: usize = 65280;

/// Maximum size of a compressed block, header and footer included.
const BGZF_MAX_BLOCK_SIZE: usize = 65536;

/// Gzip header with the `BC` extra subfield; the trailing two bytes (BSIZE) are written
/// per block.
const BGZF_HEADER_PREFIX: [u8; 16] = [31, 139, 8, 4, 0, 0, 0, 0, 0, 255, 6, 0, b'B', b'C', 2, 0];

/// The empty block that terminates a BGZF file.
const BGZF_EOF: [u8; 28] = [
    31, 139, 8, 4, 0, 0, 0, 0, 0, 255, 6, 0, b'B', b'C', 2, 0, 27, 0, 3, 0, 0, 0, 0, 0, 0, 0, 0,
    0,
];

/// The two magic bytes that open every gzip member.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

fn gzp_error(e: GzpError) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, e.to_string())
}

pub struct BgzfReader<R> {
    reader: R,
    bgzf: Bgzf,
    header_buf: Vec<u8>,
    compressed_buffer: BytesMut,
    uncompressed_data: BytesMut,
    uncompressed_data_index: usize,
    decompressor: Decompressor,
}

impl<R: Read> BgzfReader<R> {
    /// Wraps `reader`, which must be positioned at the start of a block.
    pub fn new(reader: R) -> Self {
        BgzfReader {
            reader,
            bgzf: Bgzf::new(),
            header_buf: vec![0; Bgzf::HEADER_SIZE],
            compressed_buffer: BytesMut::with_capacity(BGZF_BLOCK_SIZE),
            uncompressed_data: BytesMut::with_capacity(BUFSIZE),
            uncompressed_data_index: 0,
            decompressor: Decompressor::new(),
        }
    }

    fn bytes_available(&self) -> usize {
        self.uncompressed_data.len() - self.uncompressed_data_index
    }

    /// Reads the next raw block into `compressed_buffer` and returns its total size, or `None`
    /// once the stream is exhausted. A block cut short by the end of the file ends the stream.
    fn read_block(&mut self) -> io::Result<Option<usize>> {
        match self.reader.read_exact(&mut self.header_buf) {
            Ok(()) => (),
            Err(ref e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        self.bgzf.check_header(&self.header_buf).map_err(gzp_error)?;

        let size = self.bgzf.get_block_size(&self.header_buf).map_err(gzp_error)?;
        if size < Bgzf::HEADER_SIZE + 8 {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("BGZF block size {} is smaller than its header and footer", size),
            ));
        }
        self.compressed_buffer.clear();
        self.compressed_buffer.resize(size - Bgzf::HEADER_SIZE, 0);
        match self.reader.read_exact(&mut self.compressed_buffer) {
            Ok(()) => Ok(Some(size)),
            Err(ref e) if e.kind() == ErrorKind::UnexpectedEof => {
                debug!("BGZF stream ends inside a block; treating it as the end of the data");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Makes sure there are uncompressed bytes to hand out, inflating blocks as needed (empty
    /// blocks are skipped). Returns the number of bytes available; zero means end of stream.
    fn fill(&mut self) -> io::Result<usize> {
        while self.bytes_available() == 0 {
            if self.read_block()?.is_none() {
                return Ok(0);
            }
            let check = self.bgzf.get_footer_values(&self.compressed_buffer);

            self.uncompressed_data.clear();
            self.uncompressed_data.resize(check.amount as usize, 0);
            decompress(
                &self.compressed_buffer,
                &mut self.decompressor,
                &mut self.uncompressed_data,
                check,
            )
            .map_err(gzp_error)?;
            self.uncompressed_data_index = 0;
        }
        Ok(self.bytes_available())
    }

    /// Walks every block header from the current position without inflating, returning the
    /// block boundaries. Empty blocks (such as the EOF marker) add no boundary.
    pub fn index_blocks(mut self) -> io::Result<BlockMap> {
        let mut boundaries: Vec<BlockMapEntry> = vec![];
        let mut compressed_offset: u64 = 0;
        let mut uncompressed_offset: u64 = 0;
        while let Some(size) = self.read_block()? {
            let check = self.bgzf.get_footer_values(&self.compressed_buffer);
            compressed_offset += size as u64;
            if check.amount == 0 {
                continue;
            }
            uncompressed_offset += u64::from(check.amount);
            boundaries.push(BlockMapEntry { compressed_offset, uncompressed_offset });
        }
        BlockMap::new(boundaries)
    }
}

impl<R: Read + Seek> BgzfReader<R> {
    /// Positions the reader at `uncompressed_offset`, starting from the block at `checkpoint`
    /// and discarding bytes until the target is reached. Stops early if the stream ends.
    pub fn seek_to(
        &mut self,
        checkpoint: BlockMapEntry,
        uncompressed_offset: u64,
    ) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(checkpoint.compressed_offset))?;
        self.uncompressed_data.clear();
        self.uncompressed_data_index = 0;

        let mut to_skip = uncompressed_offset.saturating_sub(checkpoint.uncompressed_offset);
        while to_skip > 0 {
            let available = self.fill()?;
            if available == 0 {
                break;
            }
            let skipped = std::cmp::min(available as u64, to_skip) as usize;
            self.uncompressed_data_index += skipped;
            to_skip -= skipped as u64;
        }
        Ok(())
    }
}

impl<R: Read> Read for BgzfReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = std::cmp::min(available.len(), buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<R: Read> BufRead for BgzfReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.fill()?;
        Ok(&self.uncompressed_data[self.uncompressed_data_index..])
    }

    fn consume(&mut self, amt: usize) {
        self.uncompressed_data_index =
            std::cmp::min(self.uncompressed_data_index + amt, self.uncompressed_data.len());
    }
}

#[inline]
pub fn decompress(
    input: &[u8],
    decoder: &mut libdeflater::Decompressor,
    output: &mut [u8],
    footer_vals: FooterValues,
) -> Result<(), GzpError> {
    if footer_vals.amount != 0 {
        let _bytes_decompressed = decoder.deflate_decompress(&input[..input.len() - 8], output)?;
    }
    let mut new_check = libdeflater::Crc::new();
    new_check.update(output);

    if footer_vals.sum != new_check.sum() {
        return Err(GzpError::InvalidCheck { found: new_check.sum(), expected: footer_vals.sum });
    }
    Ok(())
}

/// Writes BGZF, tracking the boundary of every block written.
///
/// [`BgzfWriter::finish`] must be called to write the final partial block and the EOF marker.
pub struct BgzfWriter<W: Write> {
    writer: W,
    compressor: Compressor,
    block_size: usize,
    buffer: Vec<u8>,
    compressed_buffer: Vec<u8>,
    compressed_offset: u64,
    uncompressed_offset: u64,
    boundaries: Vec<BlockMapEntry>,
}

impl<W: Write> BgzfWriter<W> {
    pub fn new(writer: W) -> Self {
        Self::with_block_size(writer, BGZF_BLOCK_SIZE)
    }

    /// Uses blocks of at most `block_size` uncompressed bytes (capped at [`BGZF_BLOCK_SIZE`]).
    pub fn with_block_size(writer: W, block_size: usize) -> Self {
        let block_size = block_size.clamp(1, BGZF_BLOCK_SIZE);
        BgzfWriter {
            writer,
            compressor: Compressor::new(CompressionLvl::default()),
            block_size,
            buffer: Vec::with_capacity(block_size),
            compressed_buffer: vec![],
            compressed_offset: 0,
            uncompressed_offset: 0,
            boundaries: vec![],
        }
    }

    fn write_block(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let bound = self.compressor.deflate_compress_bound(self.buffer.len());
        self.compressed_buffer.resize(bound, 0);
        let compressed_len = self
            .compressor
            .deflate_compress(&self.buffer, &mut self.compressed_buffer)
            .map_err(|e| io::Error::new(ErrorKind::Other, e.to_string()))?;

        let block_size = Bgzf::HEADER_SIZE + compressed_len + 8;
        if block_size > BGZF_MAX_BLOCK_SIZE {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("compressed BGZF block of {} bytes exceeds the format limit", block_size),
            ));
        }
        let mut crc = Crc::new();
        crc.update(&self.buffer);

        self.writer.write_all(&BGZF_HEADER_PREFIX)?;
        self.writer.write_u16::<LittleEndian>((block_size - 1) as u16)?;
        self.writer.write_all(&self.compressed_buffer[..compressed_len])?;
        self.writer.write_u32::<LittleEndian>(crc.sum())?;
        self.writer.write_u32::<LittleEndian>(self.buffer.len() as u32)?;

        self.compressed_offset += block_size as u64;
        self.uncompressed_offset += self.buffer.len() as u64;
        self.boundaries.push(BlockMapEntry {
            compressed_offset: self.compressed_offset,
            uncompressed_offset: self.uncompressed_offset,
        });
        self.buffer.clear();
        Ok(())
    }

    /// Writes any buffered data and the EOF block, returning the inner writer and the block
    /// map of what was written.
    pub fn finish(mut self) -> io::Result<(W, BlockMap)> {
        self.write_block()?;
        self.writer.write_all(&BGZF_EOF)?;
        self.writer.flush()?;
        let map = BlockMap::new(self.boundaries)?;
        Ok((self.writer, map))
    }
}

impl<W: Write> Write for BgzfWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = std::cmp::min(self.block_size - self.buffer.len(), buf.len());
        self.buffer.extend_from_slice(&buf[..n]);
        if self.buffer.len() == self.block_size {
            self.write_block()?;
        }
        Ok(n)
    }

    /// Ends the current block early and flushes the inner writer.
    fn flush(&mut self) -> io::Result<()> {
        self.write_block()?;
        self.writer.flush()
    }
}
