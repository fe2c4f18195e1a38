pub mod codec;
pub mod compact;
pub mod error;
pub mod format;
pub mod header;
pub mod index;
pub mod reader;
pub mod writer;

pub use error::{Error, Result};
pub use format::{Trailer, DEFAULT_BLOCK_SIZE};
pub use header::DictzipHeader;
pub use index::BlockIndex;
pub use reader::Reader;
pub use writer::{compress, write_file, WriteSummary, Writer, WriterOptions};

/// Compression level type accepted by [`WriterOptions`].
pub use flate2::Compression;
