//! The raw on-disk records of both container formats.
//!
//! All multi-byte fields are little-endian and records carry no alignment
//! requirement, so they can be referenced at arbitrary offsets of a mapped
//! file or a decompressed buffer.

use zerocopy::byteorder::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Signature at offset 0 of every PDB (MSF 7.00) file.
pub const PDB_SIGNATURE: [u8; 30] = *b"Microsoft C/C++ MSF 7.00\r\n\x1a\x44\x53\x00";

/// Signature at offset 0 of every MSFZ container.
pub const MSFZ_SIGNATURE: [u8; 32] = *b"Microsoft MSFZ Container\r\n\x1aALD\0\0";

/// Stream size value marking a nil stream in a PDB directory.
pub const NIL_STREAM_SIZE: u32 = u32::MAX;

/// Tag bit in [`MsfzFragment::location`] marking a chunk-resident fragment.
pub const FRAGMENT_IN_CHUNK_BIT: u32 = 1 << 31;

/// The fixed-size header at offset 0 of a PDB.
///
/// The directory is located through two levels of indirection: immediately
/// after the superblock lies an array of block indices; those blocks hold the
/// indices of the directory blocks; the directory blocks, concatenated, hold
/// the directory payload.
#[derive(Debug, Clone, IntoBytes, FromBytes, Unaligned, Immutable, KnownLayout)]
#[repr(C)]
pub struct PdbSuperBlock {
    /// Must equal [`PDB_SIGNATURE`].
    pub signature: [u8; 30],
    /// Zero padding up to the first field.
    pub padding: [u8; 2],
    /// Block size; one of 512, 1024, 2048, 4096 or 8192.
    pub block_size: U32,
    /// Index of the active free-block-map block, always 1 or 2.
    pub free_block_map: U32,
    /// Total number of blocks; `block_count * block_size` is the file size.
    pub block_count: U32,
    /// Size of the stream directory payload in bytes.
    pub directory_size: U32,
    /// Reserved.
    pub reserved: U32,
}

/// The fixed-size header at offset 0 of an MSFZ container.
#[derive(Debug, Clone, IntoBytes, FromBytes, Unaligned, Immutable, KnownLayout)]
#[repr(C)]
pub struct MsfzHeader {
    /// Must equal [`MSFZ_SIGNATURE`].
    pub signature: [u8; 32],
    /// Reserved.
    pub reserved: U64,
    /// File offset of the stream directory.
    pub directory_offset: U32,
    /// Reserved origin word for the stream directory.
    pub directory_origin: U32,
    /// File offset of the chunk table.
    pub chunk_table_offset: U32,
    /// Reserved origin word for the chunk table.
    pub chunk_table_origin: U32,
    /// Number of streams described by the directory.
    pub num_streams: U32,
    /// Non-zero when the directory payload is ZSTD-compressed.
    pub directory_compressed: U32,
    /// On-disk size of the directory payload in bytes.
    pub directory_size_compressed: U32,
    /// Size of the directory payload after decompression.
    pub directory_size_uncompressed: U32,
    /// Number of records in the chunk table.
    pub num_chunks: U32,
    /// Size of the chunk table in bytes.
    pub chunk_table_size: U32,
}

/// Describes one chunk in the MSFZ chunk-data region.
#[derive(Debug, Clone, IntoBytes, FromBytes, Unaligned, Immutable, KnownLayout)]
#[repr(C)]
pub struct MsfzChunk {
    /// Absolute file offset of the chunk payload.
    pub offset: U32,
    /// Reserved origin word.
    pub origin: U32,
    /// Non-zero when the payload is ZSTD-compressed.
    pub compressed: U32,
    /// Payload size on disk.
    pub compressed_size: U32,
    /// Payload size after decompression.
    pub uncompressed_size: U32,
}

/// Describes one fragment of a stream in the MSFZ directory.
///
/// The high bit of `location` selects between the two fragment variants; see
/// [`FRAGMENT_IN_CHUNK_BIT`]. Chunk-resident fragments store a chunk index in
/// the low 31 bits; file-resident fragments store nothing there and use
/// `data_offset` as an absolute file offset.
#[derive(Debug, Clone, IntoBytes, FromBytes, Unaligned, Immutable, KnownLayout)]
#[repr(C)]
pub struct MsfzFragment {
    /// Fragment size in bytes.
    pub data_size: U32,
    /// Offset of the fragment within its chunk's decompressed payload, or
    /// within the file for file-resident fragments.
    pub data_offset: U32,
    /// Tagged chunk index or data origin.
    pub location: U32,
}

impl MsfzFragment {
    /// Creates a fragment that covers the start of the given chunk.
    pub fn in_chunk(chunk_index: u32, data_size: u32) -> Self {
        MsfzFragment {
            data_size: U32::new(data_size),
            data_offset: U32::new(0),
            location: U32::new(chunk_index | FRAGMENT_IN_CHUNK_BIT),
        }
    }
}
