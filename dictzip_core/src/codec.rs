use std::io::{self, Read, Take};

use flate2::read::DeflateDecoder;
use flate2::{Compress, Compression, FlushCompress, Status};

/// Raw-DEFLATE block compressor.
///
/// Every block is sync-flushed (byte-aligned, no BFINAL) and the compressor
/// is reset afterwards, so no block refers back into an earlier one's window.
/// Concatenating the blocks and then [`finish`](Self::finish) yields one
/// valid deflate stream, which keeps the file readable by plain gzip.
pub struct BlockCompressor {
    inner: Compress,
}

impl BlockCompressor {
    pub fn new(level: Compression) -> Self {
        Self {
            inner: Compress::new(level, false),
        }
    }

    /// Compress `raw` as one independent block, appending to `out`.
    /// Returns the number of bytes appended.
    pub fn compress_block(&mut self, raw: &[u8], out: &mut Vec<u8>) -> io::Result<usize> {
        let before = out.len();
        self.run(raw, out, FlushCompress::Sync)?;
        self.inner.reset();
        Ok(out.len() - before)
    }

    /// Append the terminating final block.
    pub fn finish(mut self, out: &mut Vec<u8>) -> io::Result<usize> {
        let before = out.len();
        self.run(&[], out, FlushCompress::Finish)?;
        Ok(out.len() - before)
    }

    fn run(&mut self, input: &[u8], out: &mut Vec<u8>, flush: FlushCompress) -> io::Result<()> {
        let start_in = self.inner.total_in();
        loop {
            let consumed = (self.inner.total_in() - start_in) as usize;
            out.reserve(deflate_bound(input.len() - consumed));
            let written = out.len();

            let status = self
                .inner
                .compress_vec(&input[consumed..], out, flush)
                .map_err(io::Error::from)?;

            let all_in = (self.inner.total_in() - start_in) as usize == input.len();
            let room_left = out.len() < out.capacity();
            match status {
                Status::StreamEnd => return Ok(()),
                // A finish is only complete at StreamEnd.
                _ if matches!(flush, FlushCompress::Finish) => {
                    if out.len() == written && room_left {
                        return Err(io::Error::new(
                            io::ErrorKind::Other,
                            "deflate made no progress while finishing",
                        ));
                    }
                }
                // Flush is complete once all input is taken and output did not fill up.
                _ if all_in && room_left => return Ok(()),
                _ => {}
            }
        }
    }
}

/// Upper bound on deflate output for `n` input bytes, plus flush framing.
fn deflate_bound(n: usize) -> usize {
    n + (n >> 12) + (n >> 14) + 64
}

/// Fresh inflater over one block's compressed bytes, starting at the
/// stream's current position and limited to `compressed_len` bytes.
pub fn block_decoder<R: Read>(stream: R, compressed_len: u64) -> DeflateDecoder<Take<R>> {
    DeflateDecoder::new(stream.take(compressed_len))
}
