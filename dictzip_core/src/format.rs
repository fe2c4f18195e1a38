use crate::error::{Error, Result};

/// gzip member magic bytes (RFC 1952 ID1, ID2).
pub const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Compression method byte for DEFLATE, the only method dictzip uses.
pub const METHOD_DEFLATE: u8 = 8;

/// Fixed part of the gzip header:
///   ID1 + ID2 + CM + FLG + MTIME[4] + XFL + OS = 10
pub const GZIP_HEADER_SIZE: usize = 10;

/// gzip trailer: CRC32[4] + ISIZE[4].
pub const TRAILER_SIZE: usize = 8;

// ── Header flags ───────────────────────────────────────────────────────────

pub const FLAG_FTEXT: u8 = 1 << 0;
pub const FLAG_FHCRC: u8 = 1 << 1;
pub const FLAG_FEXTRA: u8 = 1 << 2;
pub const FLAG_FNAME: u8 = 1 << 3;
pub const FLAG_FCOMMENT: u8 = 1 << 4;

// ── XFL / OS ───────────────────────────────────────────────────────────────

pub const XFL_BEST_COMPRESSION: u8 = 2;
pub const XFL_FASTEST: u8 = 4;
pub const OS_UNKNOWN: u8 = 0xFF;

// ── RA subfield ────────────────────────────────────────────────────────────

/// Subfield id of the dictzip random-access record.
pub const RA_SUBFIELD_ID: [u8; 2] = *b"RA";

/// The only dictzip metadata version in existence.
pub const DICTZIP_VERSION: u16 = 1;

/// Fixed prefix of the RA payload:
///   version:u16 + block_size:u16 + block_count:u16 = 6
pub const RA_FIXED_SIZE: usize = 6;

/// Subfield header inside the extra field: SI1 + SI2 + LEN:u16 = 4
pub const SUBFIELD_HEADER_SIZE: usize = 4;

/// Default raw bytes per block. Small enough that a stored (incompressible)
/// block plus deflate framing still fits a 16-bit length.
pub const DEFAULT_BLOCK_SIZE: u16 = 58315;

/// Largest block count whose extra field still fits the 16-bit XLEN:
///   XLEN = 4 + 6 + 2 × count ≤ 65535
pub const MAX_BLOCK_COUNT: usize = (u16::MAX as usize - SUBFIELD_HEADER_SIZE - RA_FIXED_SIZE) / 2;

// ── gzip header ────────────────────────────────────────────────────────────

/// The fixed 10-byte gzip header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GzipHeader {
    pub flags: u8,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: u32,
    pub xfl: u8,
    pub os: u8,
}

impl GzipHeader {
    /// Serialize to exactly `GZIP_HEADER_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; GZIP_HEADER_SIZE] {
        let mut buf = [0u8; GZIP_HEADER_SIZE];
        buf[0..2].copy_from_slice(&GZIP_MAGIC);
        buf[2] = METHOD_DEFLATE;
        buf[3] = self.flags;
        buf[4..8].copy_from_slice(&self.mtime.to_le_bytes());
        buf[8] = self.xfl;
        buf[9] = self.os;
        buf
    }

    /// Deserialize from `GZIP_HEADER_SIZE` bytes, checking magic and method.
    pub fn from_bytes(buf: &[u8; GZIP_HEADER_SIZE]) -> Result<Self> {
        if buf[0..2] != GZIP_MAGIC {
            return Err(Error::BadMagic(buf[0], buf[1]));
        }
        if buf[2] != METHOD_DEFLATE {
            return Err(Error::UnsupportedMethod(buf[2]));
        }
        Ok(Self {
            flags: buf[3],
            mtime: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            xfl: buf[8],
            os: buf[9],
        })
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

// ── RA metadata ────────────────────────────────────────────────────────────

/// Payload of the `RA` subfield: the block size and the compressed length of
/// every block, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaMetadata {
    /// Raw bytes per block (the last block may be shorter).
    pub block_size: u16,
    pub block_lengths: Vec<u16>,
}

impl RaMetadata {
    /// Size of the RA payload: 6 + 2 × block count.
    pub fn payload_len(&self) -> usize {
        RA_FIXED_SIZE + 2 * self.block_lengths.len()
    }

    /// Serialize the complete extra field, XLEN prefix included.
    ///
    /// ```text
    /// XLEN:u16 | 'R' 'A' LEN:u16 | version:u16 block_size:u16 count:u16 | len:u16 × count
    /// ```
    pub fn to_extra_field(&self) -> Result<Vec<u8>> {
        let count = self.block_lengths.len();
        if count > MAX_BLOCK_COUNT {
            return Err(Error::LimitExceeded {
                what: "block count",
                value: count as u64,
                max: MAX_BLOCK_COUNT as u64,
            });
        }
        let payload_len = self.payload_len();
        let xlen = SUBFIELD_HEADER_SIZE + payload_len;

        let mut buf = Vec::with_capacity(2 + xlen);
        buf.extend_from_slice(&(xlen as u16).to_le_bytes());
        buf.extend_from_slice(&RA_SUBFIELD_ID);
        buf.extend_from_slice(&(payload_len as u16).to_le_bytes());
        buf.extend_from_slice(&DICTZIP_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.block_size.to_le_bytes());
        buf.extend_from_slice(&(count as u16).to_le_bytes());
        for len in &self.block_lengths {
            buf.extend_from_slice(&len.to_le_bytes());
        }
        Ok(buf)
    }

    /// Decode an RA payload (the bytes after the subfield's LEN).
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() < RA_FIXED_SIZE {
            return Err(Error::MissingMetadata);
        }
        let version = read_u16(payload, 0);
        if version != DICTZIP_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let block_size = read_u16(payload, 2);
        let count = read_u16(payload, 4);

        let expected = RA_FIXED_SIZE + 2 * count as usize;
        if payload.len() < expected {
            return Err(Error::Truncated {
                context: "dictzip block table",
                expected,
                found: payload.len(),
            });
        }
        if block_size == 0 && count > 0 {
            return Err(Error::ZeroBlockSize(count));
        }

        let block_lengths = (0..count as usize)
            .map(|i| read_u16(payload, RA_FIXED_SIZE + 2 * i))
            .collect();

        Ok(Self {
            block_size,
            block_lengths,
        })
    }
}

// ── Trailer ────────────────────────────────────────────────────────────────

/// The 8-byte gzip trailer closing the member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    /// CRC-32 (IEEE) of all raw bytes.
    pub crc32: u32,
    /// Raw byte count modulo 2^32.
    pub isize: u32,
}

impl Trailer {
    pub fn to_bytes(&self) -> [u8; TRAILER_SIZE] {
        let mut buf = [0u8; TRAILER_SIZE];
        buf[0..4].copy_from_slice(&self.crc32.to_le_bytes());
        buf[4..8].copy_from_slice(&self.isize.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; TRAILER_SIZE]) -> Self {
        Self {
            crc32: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            isize: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

#[inline]
pub(crate) fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_bytes_layout() {
        let header = GzipHeader {
            flags: FLAG_FEXTRA,
            mtime: 0x0403_0201,
            xfl: XFL_BEST_COMPRESSION,
            os: OS_UNKNOWN,
        };
        assert_eq!(
            header.to_bytes(),
            [0x1F, 0x8B, 8, 4, 1, 2, 3, 4, 2, 0xFF]
        );
        assert_eq!(GzipHeader::from_bytes(&header.to_bytes()).unwrap(), header);
    }

    #[test]
    fn header_rejects_bad_magic_and_method() {
        let mut buf = [0x1F, 0x8B, 8, 0, 0, 0, 0, 0, 0, 0xFF];
        buf[1] = 0x8C;
        assert!(matches!(
            GzipHeader::from_bytes(&buf),
            Err(Error::BadMagic(0x1F, 0x8C))
        ));
        buf[1] = 0x8B;
        buf[2] = 7;
        assert!(matches!(
            GzipHeader::from_bytes(&buf),
            Err(Error::UnsupportedMethod(7))
        ));
    }

    #[test]
    fn extra_field_layout() {
        let meta = RaMetadata {
            block_size: 58315,
            block_lengths: vec![0x0102, 0x0304],
        };
        let extra = meta.to_extra_field().unwrap();
        assert_eq!(
            extra,
            vec![
                14, 0, // XLEN = 10 + 2 × 2
                b'R', b'A', 10, 0, // LEN = 6 + 2 × 2
                1, 0, // version
                0xCB, 0xE3, // 58315
                2, 0, // count
                0x02, 0x01, 0x04, 0x03,
            ]
        );
        assert_eq!(RaMetadata::from_payload(&extra[6..]).unwrap(), meta);
    }

    #[test]
    fn payload_validation() {
        assert!(matches!(
            RaMetadata::from_payload(&[1, 0, 0, 4]),
            Err(Error::MissingMetadata)
        ));
        assert!(matches!(
            RaMetadata::from_payload(&[2, 0, 0, 4, 0, 0]),
            Err(Error::UnsupportedVersion(2))
        ));
        assert!(matches!(
            RaMetadata::from_payload(&[1, 0, 0, 4, 2, 0, 9, 0]),
            Err(Error::Truncated { expected: 10, found: 8, .. })
        ));
        assert!(matches!(
            RaMetadata::from_payload(&[1, 0, 0, 0, 1, 0, 9, 0]),
            Err(Error::ZeroBlockSize(1))
        ));
    }

    #[test]
    fn too_many_blocks_rejected() {
        let meta = RaMetadata {
            block_size: 1,
            block_lengths: vec![1; MAX_BLOCK_COUNT + 1],
        };
        assert!(matches!(
            meta.to_extra_field(),
            Err(Error::LimitExceeded { what: "block count", .. })
        ));
    }

    #[test]
    fn trailer_layout() {
        let trailer = Trailer {
            crc32: 0xDEAD_BEEF,
            isize: 150_000,
        };
        let bytes = trailer.to_bytes();
        assert_eq!(bytes, [0xEF, 0xBE, 0xAD, 0xDE, 0xF0, 0x49, 0x02, 0x00]);
        assert_eq!(Trailer::from_bytes(&bytes), trailer);
    }
}
