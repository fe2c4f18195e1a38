//! Error types for dictzip reading, writing, and compact-integer decoding.
//!
//! Errors fall into three families:
//! - format errors: the bytes on disk are not a dictzip file we can use, or a
//!   write would produce a file the format cannot describe
//! - I/O errors: the underlying stream failed, ended early, or carried
//!   corrupt deflate data
//! - encoding errors: a compact base-64 integer could not be decoded

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid gzip header: magic bytes {0:02X} {1:02X}")]
    BadMagic(u8, u8),

    #[error("unsupported compression method {0} (only deflate = 8 is supported)")]
    UnsupportedMethod(u8),

    #[error("missing dictzip metadata (no RA subfield in the gzip extra field)")]
    MissingMetadata,

    #[error("unsupported dictzip version {0} (only version 1 is supported)")]
    UnsupportedVersion(u16),

    #[error("truncated {context}: need {expected} bytes, found {found}")]
    Truncated {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("dictzip block size is 0 but {0} blocks are declared")]
    ZeroBlockSize(u16),

    #[error("block size {0} is invalid: must be between 1 and 65535")]
    InvalidBlockSize(u16),

    #[error("trailer size {raw_size} does not fit {block_count} blocks of {block_size} bytes")]
    InconsistentSize {
        raw_size: u64,
        block_count: usize,
        block_size: u16,
    },

    #[error("{what} {value} exceeds the dictzip limit of {max}")]
    LimitExceeded {
        what: &'static str,
        value: u64,
        max: u64,
    },

    #[error("checksum mismatch: trailer says {expected:08x}, data hashes to {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("size mismatch: trailer says {expected} bytes, data is {actual} bytes (mod 2^32)")]
    SizeMismatch { expected: u32, actual: u32 },

    #[error("illegal character in base64 value: {0:?}")]
    IllegalCharacter(char),

    #[error("base64 value {0:?} does not fit in 64 bits")]
    Overflow(String),

    #[error("base64 value {0:?} decodes to a negative number")]
    Negative(String),

    #[error("reader lock poisoned by a panic in another thread")]
    LockPoisoned,
}

impl Error {
    /// True for errors caused by the file's structure rather than the stream.
    pub fn is_format(&self) -> bool {
        matches!(
            self,
            Error::BadMagic(..)
                | Error::UnsupportedMethod(_)
                | Error::MissingMetadata
                | Error::UnsupportedVersion(_)
                | Error::Truncated { .. }
                | Error::ZeroBlockSize(_)
                | Error::InvalidBlockSize(_)
                | Error::InconsistentSize { .. }
                | Error::LimitExceeded { .. }
                | Error::ChecksumMismatch { .. }
                | Error::SizeMismatch { .. }
        )
    }

    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    pub fn is_encoding(&self) -> bool {
        matches!(
            self,
            Error::IllegalCharacter(_) | Error::Overflow(_) | Error::Negative(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
