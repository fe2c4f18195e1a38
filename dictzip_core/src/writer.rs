use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::Compression;
use tracing::{info, trace};

use crate::codec::BlockCompressor;
use crate::error::{Error, Result};
use crate::format::{
    GzipHeader, RaMetadata, Trailer, DEFAULT_BLOCK_SIZE, FLAG_FEXTRA, MAX_BLOCK_COUNT,
    OS_UNKNOWN, XFL_BEST_COMPRESSION, XFL_FASTEST,
};

/// Settings for producing a dictzip file.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Raw bytes per block.
    pub block_size: u16,
    pub level: Compression,
    /// Header MTIME; the current time when `None`.
    pub mtime: Option<u32>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            level: Compression::default(),
            mtime: None,
        }
    }
}

impl WriterOptions {
    pub fn with_level(level: Compression) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }
}

/// What a finished write produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub block_size: u16,
    pub block_count: usize,
    pub raw_size: u64,
    pub crc32: u32,
    /// Bytes written to the destination, header and trailer included.
    pub file_size: u64,
}

/// Streaming writer for dictzip files.
///
/// # Write contract
/// Call [`write`](Self::write) any number of times with arbitrary-sized
/// slices. Every `block_size` raw bytes are compressed into an independent
/// block as soon as they arrive. Call [`finish`](Self::finish) to compress
/// the trailing partial block and emit the file.
///
/// The header carries the block-length table, so nothing reaches `dest`
/// until `finish`; compressed blocks are held in memory until then.
///
/// # Format layout written
/// ```text
/// [gzip header: 10 bytes, FLG = FEXTRA]
/// [extra field: XLEN, 'R' 'A' subfield with block size + block lengths]
/// [BLOCK 0] [BLOCK 1] ... [BLOCK N-1] [final empty deflate block]
/// [trailer: CRC-32, raw size mod 2^32]
/// ```
pub struct Writer<W: Write> {
    dest: W,
    options: WriterOptions,
    compressor: BlockCompressor,
    /// Raw bytes not yet compressed into a block.
    pending: Vec<u8>,
    /// Compressed blocks, back to back.
    body: Vec<u8>,
    block_lengths: Vec<u16>,
    crc: crc32fast::Hasher,
    raw_size: u64,
}

impl<W: Write> Writer<W> {
    pub fn new(dest: W, options: WriterOptions) -> Result<Self> {
        if options.block_size == 0 {
            return Err(Error::InvalidBlockSize(options.block_size));
        }
        Ok(Self {
            dest,
            compressor: BlockCompressor::new(options.level),
            pending: Vec::with_capacity(options.block_size as usize),
            body: Vec::new(),
            block_lengths: Vec::new(),
            crc: crc32fast::Hasher::new(),
            raw_size: 0,
            options,
        })
    }

    /// Compress complete blocks out of `data` and buffer the remainder.
    ///
    /// Only a partial block is ever copied into the pending buffer; whole
    /// blocks are compressed straight from `data`.
    pub fn write(&mut self, mut data: &[u8]) -> Result<()> {
        let block_size = self.options.block_size as usize;

        if !self.pending.is_empty() {
            let take = (block_size - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() < block_size {
                return Ok(());
            }
            let mut raw = std::mem::take(&mut self.pending);
            self.flush_block(&raw)?;
            raw.clear();
            self.pending = raw;
        }

        let mut blocks = data.chunks_exact(block_size);
        for raw in &mut blocks {
            self.flush_block(raw)?;
        }
        self.pending.extend_from_slice(blocks.remainder());
        Ok(())
    }

    /// Compress `raw` as a single block.
    fn flush_block(&mut self, raw: &[u8]) -> Result<()> {
        if self.block_lengths.len() == MAX_BLOCK_COUNT {
            return Err(Error::LimitExceeded {
                what: "block count",
                value: MAX_BLOCK_COUNT as u64 + 1,
                max: MAX_BLOCK_COUNT as u64,
            });
        }

        self.crc.update(raw);
        self.raw_size += raw.len() as u64;

        let compressed_len = self.compressor.compress_block(raw, &mut self.body)?;
        let compressed_len = u16::try_from(compressed_len).map_err(|_| Error::LimitExceeded {
            what: "compressed block length",
            value: compressed_len as u64,
            max: u16::MAX as u64,
        })?;
        self.block_lengths.push(compressed_len);

        trace!(
            block = self.block_lengths.len() - 1,
            raw_len = raw.len(),
            compressed_len,
            "compressed block"
        );
        Ok(())
    }

    /// Compress any remaining buffered data and write header, blocks and
    /// trailer to the destination.
    pub fn finish(mut self) -> Result<WriteSummary> {
        if !self.pending.is_empty() {
            let remaining = std::mem::take(&mut self.pending);
            self.flush_block(&remaining)?;
        }

        let Self {
            mut dest,
            options,
            compressor,
            mut body,
            block_lengths,
            crc,
            raw_size,
            ..
        } = self;
        compressor.finish(&mut body)?;

        let header = GzipHeader {
            flags: FLAG_FEXTRA,
            mtime: options.mtime.unwrap_or_else(unix_now),
            xfl: xfl_for(options.level),
            os: OS_UNKNOWN,
        };
        let block_count = block_lengths.len();
        let extra = RaMetadata {
            block_size: options.block_size,
            block_lengths,
        }
        .to_extra_field()?;
        let trailer = Trailer {
            crc32: crc.finalize(),
            isize: raw_size as u32,
        };

        let header_bytes = header.to_bytes();
        let trailer_bytes = trailer.to_bytes();
        dest.write_all(&header_bytes)?;
        dest.write_all(&extra)?;
        dest.write_all(&body)?;
        dest.write_all(&trailer_bytes)?;
        dest.flush()?;

        let summary = WriteSummary {
            block_size: options.block_size,
            block_count,
            raw_size,
            crc32: trailer.crc32,
            file_size: (header_bytes.len() + extra.len() + body.len() + trailer_bytes.len()) as u64,
        };
        info!(
            blocks = summary.block_count,
            raw_size = summary.raw_size,
            file_size = summary.file_size,
            "dictzip written"
        );
        Ok(summary)
    }
}

/// Compress everything `source` yields into `dest`.
pub fn compress<R: Read, W: Write>(mut source: R, dest: W, options: WriterOptions) -> Result<WriteSummary> {
    let mut buf = vec![0u8; options.block_size.max(1) as usize];
    let mut writer = Writer::new(dest, options)?;
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        writer.write(&buf[..n])?;
    }
    writer.finish()
}

/// Compress `source` into a new file at `path` with the default block size.
///
/// The file is created (or truncated) before any input is read; on failure
/// it is left in whatever state the failure reached.
pub fn write_file(source: impl Read, path: impl AsRef<Path>, level: Compression) -> Result<WriteSummary> {
    let file = File::create(path)?;
    compress(source, BufWriter::new(file), WriterOptions::with_level(level))
}

fn xfl_for(level: Compression) -> u8 {
    if level.level() == Compression::best().level() {
        XFL_BEST_COMPRESSION
    } else if level.level() == Compression::fast().level() {
        XFL_FASTEST
    } else {
        0
    }
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{FLAG_FEXTRA, GZIP_MAGIC};

    fn pinned(block_size: u16, level: Compression) -> WriterOptions {
        WriterOptions {
            block_size,
            level,
            mtime: Some(0x0102_0304),
        }
    }

    #[test]
    fn header_fields() {
        let mut out = Vec::new();
        let summary = compress(&b"hello dictzip"[..], &mut out, pinned(4, Compression::best())).unwrap();
        assert_eq!(summary.block_count, 4);
        assert_eq!(summary.file_size, out.len() as u64);

        assert_eq!(out[0..2], GZIP_MAGIC);
        assert_eq!(out[2], 8);
        assert_eq!(out[3], FLAG_FEXTRA);
        assert_eq!(out[4..8], [4, 3, 2, 1]);
        assert_eq!(out[8], XFL_BEST_COMPRESSION);
        assert_eq!(out[9], OS_UNKNOWN);
        // XLEN = 10 + 2 × 4, then the RA subfield with LEN = 6 + 2 × 4
        assert_eq!(out[10..12], [18, 0]);
        assert_eq!(out[12..16], [b'R', b'A', 14, 0]);
        assert_eq!(out[16..22], [1, 0, 4, 0, 4, 0]);
    }

    #[test]
    fn xfl_tracks_level() {
        assert_eq!(xfl_for(Compression::best()), XFL_BEST_COMPRESSION);
        assert_eq!(xfl_for(Compression::fast()), XFL_FASTEST);
        assert_eq!(xfl_for(Compression::default()), 0);
        assert_eq!(xfl_for(Compression::none()), 0);
    }

    #[test]
    fn trailer_fields() {
        let data = b"0123456789".repeat(1000);
        let mut out = Vec::new();
        let summary = compress(&data[..], &mut out, pinned(3000, Compression::default())).unwrap();

        let tail: [u8; 8] = out[out.len() - 8..].try_into().unwrap();
        let trailer = Trailer::from_bytes(&tail);
        assert_eq!(trailer.crc32, crc32fast::hash(&data));
        assert_eq!(trailer.isize, 10_000);
        assert_eq!(summary.crc32, trailer.crc32);
        assert_eq!(summary.raw_size, 10_000);
        assert_eq!(summary.block_count, 4);
    }

    #[test]
    fn many_small_writes_match_one_large_write() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 256) as u8).collect();

        let mut one = Vec::new();
        let mut w = Writer::new(&mut one, pinned(700, Compression::default())).unwrap();
        w.write(&data).unwrap();
        w.finish().unwrap();

        let mut many = Vec::new();
        let mut w = Writer::new(&mut many, pinned(700, Compression::default())).unwrap();
        for chunk in data.chunks(13) {
            w.write(chunk).unwrap();
        }
        w.finish().unwrap();

        assert_eq!(one, many);
    }

    #[test]
    fn empty_input() {
        let mut out = Vec::new();
        let summary = compress(io::empty(), &mut out, pinned(100, Compression::default())).unwrap();
        assert_eq!(summary.block_count, 0);
        assert_eq!(summary.raw_size, 0);
        assert_eq!(summary.crc32, 0);
        assert_eq!(out[10..18], [10, 0, b'R', b'A', 6, 0, 1, 0]);
    }

    #[test]
    fn zero_block_size_rejected() {
        let err = Writer::new(Vec::new(), pinned(0, Compression::default())).err().unwrap();
        assert!(matches!(err, Error::InvalidBlockSize(0)), "{err}");
        assert!(err.is_format());
    }

    #[test]
    fn partial_writes_straddling_blocks() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 31 % 251) as u8).collect();
        let expected = {
            let mut out = Vec::new();
            compress(&data[..], &mut out, pinned(512, Compression::default())).unwrap();
            out
        };

        // Top up a partial block, then several whole blocks, then a tail
        let mut out = Vec::new();
        let mut w = Writer::new(&mut out, pinned(512, Compression::default())).unwrap();
        w.write(&data[..100]).unwrap();
        w.write(&data[100..412]).unwrap();
        w.write(&data[412..5000]).unwrap();
        w.write(&[]).unwrap();
        w.write(&data[5000..]).unwrap();
        let summary = w.finish().unwrap();

        assert_eq!(summary.block_count, 20);
        assert_eq!(out, expected);
    }

    #[test]
    fn large_single_write_buffers_only_the_tail() {
        let len = (8 << 20) + 100;
        let data = vec![0x5au8; len];
        let mut w = Writer::new(io::sink(), pinned(512, Compression::fast())).unwrap();
        w.write(&data).unwrap();

        assert_eq!(w.block_lengths.len(), (8 << 20) / 512);
        assert_eq!(w.pending.len(), 100);
        assert!(w.pending.capacity() < 4096, "pending grew to {}", w.pending.capacity());

        let summary = w.finish().unwrap();
        assert_eq!(summary.raw_size, len as u64);
        assert_eq!(summary.crc32, crc32fast::hash(&data));
    }

    #[test]
    fn oversized_compressed_block_rejected() {
        // Stored deflate of 65535 incompressible bytes needs more than 65535 bytes
        let mut rng = 0x2545_f491_4f6c_dd1du64;
        let noise: Vec<u8> = (0..u16::MAX as usize)
            .map(|_| {
                rng = rng
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                (rng >> 56) as u8
            })
            .collect();

        let mut out = Vec::new();
        let err = compress(&noise[..], &mut out, pinned(u16::MAX, Compression::none())).unwrap_err();
        match err {
            Error::LimitExceeded { what, value, max } => {
                assert_eq!(what, "compressed block length");
                assert!(value > u16::MAX as u64);
                assert_eq!(max, u16::MAX as u64);
            }
            other => panic!("expected LimitExceeded, got {other}"),
        }
        assert!(out.is_empty(), "nothing reaches the destination on failure");
    }

    #[test]
    fn too_many_blocks_rejected() {
        let data = vec![b'x'; MAX_BLOCK_COUNT];

        let mut w = Writer::new(Vec::new(), pinned(1, Compression::fast())).unwrap();
        w.write(&data).unwrap();
        assert_eq!(w.block_lengths.len(), MAX_BLOCK_COUNT);

        let err = w.write(b"y").unwrap_err();
        match err {
            Error::LimitExceeded { what, value, max } => {
                assert_eq!(what, "block count");
                assert_eq!(value, MAX_BLOCK_COUNT as u64 + 1);
                assert_eq!(max, MAX_BLOCK_COUNT as u64);
            }
            other => panic!("expected LimitExceeded, got {other}"),
        }
    }

    #[test]
    fn too_many_blocks_rejected_at_finish() {
        // The extra block is the trailing partial one
        let mut w = Writer::new(Vec::new(), pinned(2, Compression::fast())).unwrap();
        w.write(&vec![b'x'; 2 * MAX_BLOCK_COUNT + 1]).unwrap();
        let err = w.finish().unwrap_err();
        assert!(matches!(err, Error::LimitExceeded { what: "block count", .. }), "{err}");
        assert!(err.is_format());
    }

    #[test]
    fn destination_errors_propagate() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "disk on fire"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let err = compress(&b"data"[..], Broken, WriterOptions::default()).unwrap_err();
        assert!(err.is_io());
    }
}
