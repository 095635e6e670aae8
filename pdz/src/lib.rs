//! Transcoder between the two container formats used to package program
//! debug information: the classic multi-stream PDB (MSF) file and its
//! compressed MSFZ form.
//!
//! [`compress`] reads a PDB, splits every stream into fragments, optionally
//! compresses each fragment with ZSTD and writes an MSFZ container.
//! [`decompress`] performs the inverse: it materialises the original streams
//! and repacks them into the block-oriented PDB layout, including the
//! free-block-map blocks interleaved with regular data.
//!
//! Stream contents are never interpreted; streams are opaque byte sequences.
//! Both directions process streams in parallel on a fixed-size worker pool.

#![warn(missing_docs)]

mod codec;
mod compress;
mod config;
mod decompress;
mod error;
pub mod msf;
pub mod msfz;
mod progress;
pub mod raw;
mod runner;

pub use pdz_common::{ByteView, Reader};

pub use crate::compress::compress;
pub use crate::config::{
    CompressOptions, CompressionStrategy, DecompressOptions, DEFAULT_BLOCK_SIZE,
    DEFAULT_COMPRESSION_LEVEL, DEFAULT_FRAGMENT_SIZE, DEFAULT_MAX_FRAGMENTS_PER_STREAM,
    VALID_BLOCK_SIZES,
};
pub use crate::decompress::{decompress, decompress_dry_run, MAX_BLOCKS, MAX_STREAMS};
pub use crate::error::ConvertError;
