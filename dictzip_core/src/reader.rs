use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, trace};

use crate::codec::block_decoder;
use crate::compact;
use crate::error::{Error, Result};
use crate::format::{Trailer, TRAILER_SIZE};
use crate::header::{self, DictzipHeader};
use crate::index::BlockIndex;

/// Cap on up-front allocation for a `get`; larger results grow as blocks decode.
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// Random-access reader for dictzip files.
///
/// # Open sequence
/// 1. Seek to 0 and parse the gzip header, pulling the block-length table out
///    of the `RA` extra subfield.
/// 2. Turn the lengths into a [`BlockIndex`] of stream offsets.
///
/// The header is parsed once; no block is touched until it is asked for.
///
/// # Access pattern
/// [`get`](Self::get) maps a raw byte range to the blocks covering it, seeks
/// to each one and inflates it with a fresh decoder. Blocks are independent
/// deflate streams, so a range crossing a block boundary is decoded block by
/// block and stitched together.
///
/// # Sharing
/// The stream sits behind a mutex held for the whole of each call, so one
/// `Reader` can serve many threads, one request at a time. For parallel
/// throughput open several readers on the same file.
pub struct Reader<R = File> {
    stream: Mutex<R>,
    header: DictzipHeader,
    index: BlockIndex,
}

impl Reader<File> {
    /// Open a dictzip file on disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening dictzip file");
        Self::new(File::open(path)?)
    }
}

impl<R: Read + Seek> Reader<R> {
    /// Parse the header of `stream` and build the block index.
    ///
    /// Fails without handing back a reader if the header is not a usable
    /// dictzip header; the stream is dropped in that case.
    pub fn new(mut stream: R) -> Result<Self> {
        stream.seek(SeekFrom::Start(0))?;
        let header = header::parse(&mut stream)?;
        let index = BlockIndex::new(header.payload_start, header.block_lengths());
        Ok(Self {
            stream: Mutex::new(stream),
            header,
            index,
        })
    }

    /// Nominal raw bytes per block (the last block may be shorter).
    #[inline]
    pub fn block_size(&self) -> u64 {
        self.header.block_size() as u64
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.index.block_count()
    }

    pub fn header(&self) -> &DictzipHeader {
        &self.header
    }

    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    /// Return `size` raw bytes starting at raw offset `start`.
    ///
    /// A range ending beyond the last block fails with `UnexpectedEof` before
    /// anything is decoded. A range ending inside the last block but past its
    /// data fails once that block runs dry. No partial result is returned on
    /// failure.
    pub fn get(&self, start: u64, size: u64) -> Result<Vec<u8>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let end = start
            .checked_add(size)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "range end overflows u64"))?;
        if self.block_count() == 0 {
            return Err(past_end(0, 0).into());
        }

        let block_size = self.block_size();
        let first = start / block_size;
        let last = (end - 1) / block_size;
        if last >= self.block_count() as u64 {
            return Err(past_end(last, self.block_count()).into());
        }

        let mut stream = self.lock()?;
        let mut out = Vec::with_capacity(size.min(MAX_PREALLOC) as usize);
        for block in first..=last {
            let block_start = block * block_size;
            let lo = if block == first { start - block_start } else { 0 };
            let hi = if block == last { end - block_start } else { block_size };

            let raw = self.inflate_prefix(&mut *stream, block, hi)?;
            out.extend_from_slice(&raw[lo as usize..]);
        }
        trace!(start, size, first, last, "served range");
        Ok(out)
    }

    /// [`get`](Self::get) with `start` and `size` in compact base-64 form.
    pub fn get_compact(&self, start: &str, size: &str) -> Result<Vec<u8>> {
        let start = compact::decode_unsigned(start)?;
        let size = compact::decode_unsigned(size)?;
        self.get(start, size)
    }

    /// Decompress block `idx` in full.
    pub fn read_block(&self, idx: usize) -> Result<Vec<u8>> {
        let len = self.block_raw_len(idx)?;
        let mut stream = self.lock()?;
        self.inflate_prefix(&mut *stream, idx as u64, len)
    }

    /// Read the CRC-32 and size stored in the last 8 bytes of the stream.
    pub fn trailer(&self) -> Result<Trailer> {
        let mut stream = self.lock()?;
        stream.seek(SeekFrom::End(-(TRAILER_SIZE as i64)))?;
        let mut buf = [0u8; TRAILER_SIZE];
        stream.read_exact(&mut buf)?;
        Ok(Trailer::from_bytes(&buf))
    }

    /// Total raw size, taken from the trailer and checked against the block
    /// table. A block table tops out near 2 GiB, so the 32-bit trailer field
    /// is never wrapped for a valid file.
    pub fn raw_size(&self) -> Result<u64> {
        let raw_size = self.trailer()?.isize as u64;
        let count = self.block_count() as u64;
        let block_size = self.block_size();
        let fits = match count {
            0 => raw_size == 0,
            n => raw_size > (n - 1) * block_size && raw_size <= n * block_size,
        };
        if !fits {
            return Err(Error::InconsistentSize {
                raw_size,
                block_count: self.block_count(),
                block_size: self.header.block_size(),
            });
        }
        Ok(raw_size)
    }

    /// Raw length of block `idx`: the block size for all but the last block.
    pub fn block_raw_len(&self, idx: usize) -> Result<u64> {
        let count = self.block_count();
        if idx >= count {
            return Err(past_end(idx as u64, count).into());
        }
        if idx + 1 < count {
            return Ok(self.block_size());
        }
        Ok(self.raw_size()? - idx as u64 * self.block_size())
    }

    /// Stream every block, in order, into `dst`. Returns bytes written.
    pub fn decompress_to<W: Write>(&self, mut dst: W) -> Result<u64> {
        let mut written = 0u64;
        for idx in 0..self.block_count() {
            let block = self.read_block(idx)?;
            dst.write_all(&block)?;
            written += block.len() as u64;
        }
        dst.flush()?;
        Ok(written)
    }

    /// Decompress the whole file into memory.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.decompress_to(&mut out)?;
        Ok(out)
    }

    /// Decompress every block and check the result against the trailer.
    pub fn verify(&self) -> Result<Trailer> {
        let trailer = self.trailer()?;
        let mut hasher = crc32fast::Hasher::new();
        let mut total = 0u64;
        for idx in 0..self.block_count() {
            let block = self.read_block(idx)?;
            hasher.update(&block);
            total += block.len() as u64;
        }

        let actual = hasher.finalize();
        if actual != trailer.crc32 {
            return Err(Error::ChecksumMismatch {
                expected: trailer.crc32,
                actual,
            });
        }
        if total as u32 != trailer.isize {
            return Err(Error::SizeMismatch {
                expected: trailer.isize,
                actual: total as u32,
            });
        }
        debug!(blocks = self.block_count(), raw_size = total, "verified");
        Ok(trailer)
    }

    /// Release the underlying stream.
    pub fn into_inner(self) -> R {
        self.stream
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock(&self) -> Result<MutexGuard<'_, R>> {
        self.stream.lock().map_err(|_| Error::LockPoisoned)
    }

    /// Seek to block `idx` and inflate its first `len` raw bytes.
    fn inflate_prefix(&self, stream: &mut R, idx: u64, len: u64) -> Result<Vec<u8>> {
        let span = self
            .index
            .span(idx as usize)
            .ok_or_else(|| past_end(idx, self.block_count()))?;

        stream.seek(SeekFrom::Start(span.start))?;
        let mut raw = vec![0u8; len as usize];
        block_decoder(&mut *stream, span.end - span.start).read_exact(&mut raw)?;
        trace!(block = idx, offset = span.start, raw_len = len, "inflated block");
        Ok(raw)
    }
}

fn past_end(idx: u64, count: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("block {idx} is past the last block (file has {count})"),
    )
}
