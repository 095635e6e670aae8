use std::fmt;
use std::str::FromStr;

use crate::error::ConvertError;

/// Block sizes a PDB may use.
pub const VALID_BLOCK_SIZES: [u32; 5] = [512, 1024, 2048, 4096, 8192];

/// Block size used when none is configured.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// ZSTD level used when none is configured.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Fragment size used by [`CompressionStrategy::MultiFragment`] by default.
pub const DEFAULT_FRAGMENT_SIZE: u32 = 4096;

/// Fragment cap per stream used by [`CompressionStrategy::MultiFragment`] by
/// default.
pub const DEFAULT_MAX_FRAGMENTS_PER_STREAM: u32 = 4096;

/// How the compressor splits and encodes stream payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionStrategy {
    /// One chunk per stream, stored raw.
    NoCompression,
    /// One chunk per stream, ZSTD-compressed.
    SingleFragment,
    /// Fixed-size fragments per stream, each ZSTD-compressed.
    MultiFragment,
}

impl CompressionStrategy {
    /// Whether chunk payloads are run through the codec.
    pub fn compresses(self) -> bool {
        !matches!(self, CompressionStrategy::NoCompression)
    }

    /// The canonical option spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            CompressionStrategy::NoCompression => "NoCompression",
            CompressionStrategy::SingleFragment => "SingleFragment",
            CompressionStrategy::MultiFragment => "MultiFragment",
        }
    }
}

impl fmt::Display for CompressionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionStrategy {
    type Err = ConvertError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "NoCompression" => Ok(CompressionStrategy::NoCompression),
            "SingleFragment" => Ok(CompressionStrategy::SingleFragment),
            "MultiFragment" => Ok(CompressionStrategy::MultiFragment),
            _ => Err(ConvertError::Config(
                "strategy must be NoCompression, SingleFragment or MultiFragment",
            )),
        }
    }
}

/// Configuration for [`compress`](crate::compress).
#[derive(Debug, Clone)]
pub struct CompressOptions {
    /// Fragmentation and encoding strategy.
    pub strategy: CompressionStrategy,
    /// ZSTD effort, 1 through 22.
    pub level: i32,
    /// Fragment size under [`CompressionStrategy::MultiFragment`].
    pub fragment_size: u32,
    /// Fragment cap per stream under [`CompressionStrategy::MultiFragment`];
    /// takes precedence over `fragment_size`.
    pub max_fragments_per_stream: u32,
    /// Worker-pool size override.
    pub num_threads: Option<u32>,
}

impl CompressOptions {
    /// Creates options for a strategy with all defaults.
    pub fn new(strategy: CompressionStrategy) -> Self {
        CompressOptions {
            strategy,
            level: DEFAULT_COMPRESSION_LEVEL,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            max_fragments_per_stream: DEFAULT_MAX_FRAGMENTS_PER_STREAM,
            num_threads: None,
        }
    }

    /// Checks every option against its accepted range.
    pub fn validate(&self) -> Result<(), ConvertError> {
        if !(1..=22).contains(&self.level) {
            return Err(ConvertError::Config(
                "compression level must be between 1 and 22",
            ));
        }
        if self.fragment_size == 0 {
            return Err(ConvertError::Config("fragment size must not be zero"));
        }
        if self.max_fragments_per_stream < 2 {
            return Err(ConvertError::Config(
                "maximum fragments per stream must be at least 2",
            ));
        }
        Ok(())
    }
}

/// Configuration for [`decompress`](crate::decompress).
#[derive(Debug, Clone)]
pub struct DecompressOptions {
    /// Block size of the produced PDB.
    pub block_size: u32,
    /// Worker-pool size override.
    pub num_threads: Option<u32>,
}

impl Default for DecompressOptions {
    fn default() -> Self {
        DecompressOptions {
            block_size: DEFAULT_BLOCK_SIZE,
            num_threads: None,
        }
    }
}

impl DecompressOptions {
    /// Checks every option against its accepted range.
    pub fn validate(&self) -> Result<(), ConvertError> {
        if !VALID_BLOCK_SIZES.contains(&self.block_size) {
            return Err(ConvertError::Config(
                "block size must be one of 512, 1024, 2048, 4096 or 8192",
            ));
        }
        Ok(())
    }
}
