use std::io::Read;

use tracing::debug;

use crate::error::{Error, Result};
use crate::format::{
    read_u16, GzipHeader, RaMetadata, FLAG_FCOMMENT, FLAG_FEXTRA, FLAG_FHCRC, FLAG_FNAME,
    GZIP_HEADER_SIZE, RA_SUBFIELD_ID, SUBFIELD_HEADER_SIZE,
};

/// Everything the header of a dictzip file tells us.
///
/// `payload_start` is the number of bytes the header occupied, i.e. the
/// stream position of the first compressed block.
#[derive(Debug, Clone)]
pub struct DictzipHeader {
    pub gzip: GzipHeader,
    pub metadata: RaMetadata,
    /// Original file name (FNAME), without the terminating NUL.
    pub name: Option<Vec<u8>>,
    /// File comment (FCOMMENT), without the terminating NUL.
    pub comment: Option<Vec<u8>>,
    pub payload_start: u64,
}

impl DictzipHeader {
    pub fn block_size(&self) -> u16 {
        self.metadata.block_size
    }

    pub fn block_lengths(&self) -> &[u16] {
        &self.metadata.block_lengths
    }
}

/// `Read` adapter that counts consumed bytes.
struct Counting<R> {
    inner: R,
    consumed: u64,
}

impl<R: Read> Counting<R> {
    fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.inner.read_exact(buf)?;
        self.consumed += buf.len() as u64;
        Ok(())
    }

    fn read_vec(&mut self, len: usize) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read through a NUL terminator, returning the bytes before it.
    fn read_zero_terminated(&mut self) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            self.read_exact(&mut byte)?;
            if byte[0] == 0 {
                return Ok(out);
            }
            out.push(byte[0]);
        }
    }
}

/// Parse a dictzip header from a stream positioned at its first byte.
///
/// On return the stream sits at the first compressed block. Read failures,
/// including running out of input mid-header, surface as [`Error::Io`].
pub fn parse<R: Read>(stream: R) -> Result<DictzipHeader> {
    let mut r = Counting {
        inner: stream,
        consumed: 0,
    };

    let mut fixed = [0u8; GZIP_HEADER_SIZE];
    r.read_exact(&mut fixed)?;
    let gzip = GzipHeader::from_bytes(&fixed)?;

    let mut ra_payload = None;
    if gzip.has_flag(FLAG_FEXTRA) {
        let mut xlen = [0u8; 2];
        r.read_exact(&mut xlen)?;
        let extra = r.read_vec(u16::from_le_bytes(xlen) as usize)?;
        ra_payload = find_ra_subfield(&extra)?.map(<[u8]>::to_vec);
    }

    let name = if gzip.has_flag(FLAG_FNAME) {
        Some(r.read_zero_terminated()?)
    } else {
        None
    };
    let comment = if gzip.has_flag(FLAG_FCOMMENT) {
        Some(r.read_zero_terminated()?)
    } else {
        None
    };
    if gzip.has_flag(FLAG_FHCRC) {
        let mut crc16 = [0u8; 2];
        r.read_exact(&mut crc16)?;
    }

    let payload = ra_payload.ok_or(Error::MissingMetadata)?;
    let metadata = RaMetadata::from_payload(&payload)?;

    debug!(
        flags = gzip.flags,
        block_size = metadata.block_size,
        block_count = metadata.block_lengths.len(),
        payload_start = r.consumed,
        "parsed dictzip header"
    );

    Ok(DictzipHeader {
        gzip,
        metadata,
        name,
        comment,
        payload_start: r.consumed,
    })
}

/// Walk the extra field's `SI1 SI2 LEN payload` records and return the
/// payload of the `RA` record, if any. The last `RA` record wins.
fn find_ra_subfield(extra: &[u8]) -> Result<Option<&[u8]>> {
    let mut found = None;
    let mut pos = 0;
    while pos < extra.len() {
        if extra.len() - pos < SUBFIELD_HEADER_SIZE {
            return Err(Error::Truncated {
                context: "gzip extra subfield header",
                expected: SUBFIELD_HEADER_SIZE,
                found: extra.len() - pos,
            });
        }
        let id = [extra[pos], extra[pos + 1]];
        let len = read_u16(extra, pos + 2) as usize;
        let start = pos + SUBFIELD_HEADER_SIZE;
        if extra.len() - start < len {
            return Err(Error::Truncated {
                context: "gzip extra subfield",
                expected: len,
                found: extra.len() - start,
            });
        }
        if id == RA_SUBFIELD_ID {
            found = Some(&extra[start..start + len]);
        }
        pos = start + len;
    }
    Ok(found)
}
