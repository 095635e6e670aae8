use thiserror::Error;

use pdz_common::RangeError;

/// An error raised while converting between the PDB and MSFZ containers.
///
/// Every error is fatal to the running operation; there is no partial-output
/// recovery. Workers report their first failure back to the coordinator,
/// which drains the pool and surfaces it.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The input does not start with the PDB superblock signature.
    #[error("input is not a PDB file")]
    BadPdbSignature,

    /// The input does not start with the MSFZ container signature.
    #[error("input is not an MSFZ file")]
    BadMsfzSignature,

    /// The PDB superblock declares a block size outside the valid set.
    #[error("unsupported PDB block size {0}")]
    BadBlockSize(u32),

    /// A structure points outside the file or a read was truncated.
    #[error("malformed file: {0}")]
    OutOfBounds(#[from] RangeError),

    /// The chunk-table length does not match the declared chunk count.
    #[error("chunk table is {length} bytes, which does not hold {count} chunk records")]
    ChunkTableMismatch {
        /// Chunk-table length from the header.
        length: u32,
        /// Chunk count from the header.
        count: u32,
    },

    /// A fragment references a chunk index past the end of the chunk table.
    #[error("fragment references chunk {index}, but the file has {count} chunks")]
    ChunkIndexOutOfRange {
        /// The referenced chunk index.
        index: u32,
        /// Number of chunks in the file.
        count: u32,
    },

    /// A fragment's byte range exceeds its chunk's decompressed size.
    #[error("fragment range {offset}..{end} exceeds chunk of {size} decompressed bytes")]
    FragmentOutOfChunk {
        /// Fragment start within the chunk.
        offset: u32,
        /// Fragment end within the chunk.
        end: u64,
        /// The chunk's decompressed size.
        size: u32,
    },

    /// The stream directory disagrees with the header about the stream count.
    #[error("stream directory contains {parsed} streams, but the header claims {expected}")]
    StreamCountMismatch {
        /// Streams found while parsing the directory.
        parsed: u32,
        /// Stream count from the header.
        expected: u32,
    },

    /// The ZSTD encoder reported a failure.
    #[error("compression failed")]
    Compress(#[source] std::io::Error),

    /// The ZSTD decoder reported a failure.
    #[error("decompression failed")]
    Decompress(#[source] std::io::Error),

    /// Decompression produced fewer bytes than the container recorded.
    #[error("decompressed {got} bytes, expected {expected}")]
    ShortDecompression {
        /// Bytes actually produced.
        got: u64,
        /// Bytes the container declared.
        expected: u64,
    },

    /// The output PDB would need more blocks than the format allows.
    #[error("output needs {blocks} blocks, exceeding the limit of {limit}")]
    TooManyBlocks {
        /// Blocks the output would occupy.
        blocks: u32,
        /// The format limit.
        limit: u32,
    },

    /// The output PDB would hold more streams than the format allows.
    #[error("output has {streams} streams, exceeding the limit of {limit}")]
    TooManyStreams {
        /// Streams in the input container.
        streams: u32,
        /// The format limit.
        limit: u32,
    },

    /// A computed value does not fit the narrower on-disk field.
    #[error("value {0} does not fit its on-disk field")]
    ValueTooLarge(u64),

    /// An option carries a value outside its accepted range.
    #[error("invalid configuration: {0}")]
    Config(&'static str),

    /// The input file could not be opened or mapped.
    #[error("failed to open input file")]
    OpenInput(#[source] std::io::Error),

    /// The output file could not be created.
    #[error("failed to create output file")]
    CreateOutput(#[source] std::io::Error),

    /// The output file could not be resized.
    #[error("failed to resize output file")]
    ResizeOutput(#[source] std::io::Error),

    /// A file could not be memory-mapped.
    #[error("failed to map file")]
    MapFile(#[source] std::io::Error),

    /// The output mapping could not be flushed back to disk.
    #[error("failed to flush output file")]
    FlushOutput(#[source] std::io::Error),
}
