//! Reading the block-oriented side: PDB superblock and stream directory.
//!
//! A PDB is an array of fixed-size blocks. The stream directory (stream
//! count, stream sizes and per-stream block lists) is itself stored in
//! blocks, located through two levels of indirection starting right after the
//! superblock. Parsing borrows from the input mapping wherever block runs are
//! contiguous and copies otherwise.

use std::borrow::Cow;

use zerocopy::byteorder::little_endian::U32;

use pdz_common::Reader;

use crate::config::VALID_BLOCK_SIZES;
use crate::error::ConvertError;
use crate::raw::{PdbSuperBlock, NIL_STREAM_SIZE, PDB_SIGNATURE};

/// One stream of a PDB: its byte size and its ordered block-index list.
///
/// `blocks` holds exactly `ceil(size / block_size)` indices; an empty stream
/// has none.
#[derive(Debug, Clone, Default)]
pub struct StreamInfo {
    /// Byte size of the stream.
    pub size: u32,
    /// Blocks holding the stream payload, in stream order.
    pub blocks: Vec<u32>,
}

/// Number of blocks needed to store `bytes` bytes.
pub fn blocks_needed(bytes: u32, block_size: u32) -> u32 {
    (bytes as u64).div_ceil(block_size as u64) as u32
}

/// Resolves and validates the superblock of a mapped PDB.
pub fn parse_superblock<'d>(reader: &Reader<'d>) -> Result<&'d PdbSuperBlock, ConvertError> {
    let superblock = reader.peek_at::<PdbSuperBlock>(0)?;
    if superblock.signature != PDB_SIGNATURE {
        return Err(ConvertError::BadPdbSignature);
    }
    let block_size = superblock.block_size.get();
    if !VALID_BLOCK_SIZES.contains(&block_size) {
        return Err(ConvertError::BadBlockSize(block_size));
    }
    Ok(superblock)
}

/// Whether a block-index list forms one ascending, gap-free run.
fn blocks_are_contiguous(blocks: &[u32]) -> bool {
    let (Some(&first), Some(&last)) = (blocks.first(), blocks.last()) else {
        return true;
    };
    blocks.windows(2).all(|pair| pair[0] < pair[1]) && last - first == blocks.len() as u32 - 1
}

/// Concatenates the first `size` bytes stored in the given blocks.
///
/// Contiguous block runs borrow directly from the mapping; scattered runs are
/// copied block by block. The resulting byte sequence is identical either
/// way.
pub fn coalesce_stream<'d>(
    reader: &Reader<'d>,
    blocks: &[u32],
    size: u32,
    block_size: u32,
) -> Result<Cow<'d, [u8]>, ConvertError> {
    if size == 0 || blocks.is_empty() {
        return Ok(Cow::Borrowed(&[]));
    }

    if blocks_are_contiguous(blocks) {
        let offset = blocks[0] as usize * block_size as usize;
        return Ok(Cow::Borrowed(reader.bytes_at(offset, size as usize)?));
    }

    let mut data = Vec::with_capacity(size as usize);
    let mut remaining = size;
    for &block in blocks {
        let take = remaining.min(block_size);
        let offset = block as usize * block_size as usize;
        data.extend_from_slice(reader.bytes_at(offset, take as usize)?);
        remaining -= take;
    }
    Ok(Cow::Owned(data))
}

/// Reads a list of block indices out of a byte range.
fn read_block_list(reader: &Reader<'_>, offset: usize, count: u32) -> Result<Vec<u32>, ConvertError> {
    let words = reader.slice_at::<U32>(offset, count as usize)?;
    Ok(words.iter().map(|word| word.get()).collect())
}

/// Parses the stream directory of a mapped PDB into stream records.
///
/// Walks both levels of indirection: the block-index array after the
/// superblock locates the blocks holding the directory-block list, which in
/// turn locates the directory payload.
pub fn parse_stream_directory(
    reader: &Reader<'_>,
    superblock: &PdbSuperBlock,
) -> Result<Vec<StreamInfo>, ConvertError> {
    let block_size = superblock.block_size.get();
    let directory_size = superblock.directory_size.get();

    let directory_blocks = blocks_needed(directory_size, block_size);
    let index_bytes = directory_blocks
        .checked_mul(4)
        .ok_or(ConvertError::ValueTooLarge(directory_blocks as u64 * 4))?;
    let index_blocks = blocks_needed(index_bytes, block_size);

    // First level: block indices of the directory-index blocks.
    let index_block_list =
        read_block_list(reader, std::mem::size_of::<PdbSuperBlock>(), index_blocks)?;

    // Second level: the directory-index blocks hold the directory-block list.
    let index_data = coalesce_stream(reader, &index_block_list, index_bytes, block_size)?;
    let directory_block_list =
        read_block_list(&Reader::new(&index_data), 0, directory_blocks)?;

    // The directory blocks hold the directory payload itself.
    let directory_data =
        coalesce_stream(reader, &directory_block_list, directory_size, block_size)?;
    let mut directory = Reader::new(&directory_data);

    let num_streams = directory.read_u32()?;
    let mut streams = Vec::with_capacity(num_streams as usize);
    for _ in 0..num_streams {
        let size = directory.read_u32()?;
        streams.push(StreamInfo {
            // A nil stream is treated as empty.
            size: if size == NIL_STREAM_SIZE { 0 } else { size },
            blocks: Vec::new(),
        });
    }

    for stream in &mut streams {
        let count = blocks_needed(stream.size, block_size);
        stream.blocks.reserve_exact(count as usize);
        for _ in 0..count {
            stream.blocks.push(directory.read_u32()?);
        }
    }

    Ok(streams)
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_blocks_needed() {
        assert_eq!(blocks_needed(0, 512), 0);
        assert_eq!(blocks_needed(1, 512), 1);
        assert_eq!(blocks_needed(512, 512), 1);
        assert_eq!(blocks_needed(513, 512), 2);
        assert_eq!(blocks_needed(u32::MAX, 512), 8_388_608);
    }

    #[test]
    fn test_contiguity() {
        assert!(blocks_are_contiguous(&[]));
        assert!(blocks_are_contiguous(&[7]));
        assert!(blocks_are_contiguous(&[3, 4, 5]));
        // Sorted but gapped: borrowing would include an unassigned block.
        assert!(!blocks_are_contiguous(&[3, 5, 6]));
        assert!(!blocks_are_contiguous(&[4, 3, 5]));
        // Duplicates must not pass as a run.
        assert!(!blocks_are_contiguous(&[3, 3, 4]));
    }

    #[test]
    fn test_coalesce_borrows_contiguous_run() {
        let mut file = vec![0u8; 64];
        file[16..24].copy_from_slice(b"abcdefgh");
        let reader = Reader::new(&file);

        let data = coalesce_stream(&reader, &[2, 3], 10, 8).unwrap();
        assert!(matches!(data, Cow::Borrowed(_)));
        assert_eq!(&data[..8], b"abcdefgh");
    }

    #[test]
    fn test_coalesce_copies_scattered_run() {
        let mut file = vec![0u8; 64];
        file[32..40].copy_from_slice(b"abcdefgh");
        file[8..16].copy_from_slice(b"ijklmnop");
        let reader = Reader::new(&file);

        let data = coalesce_stream(&reader, &[4, 1], 12, 8).unwrap();
        assert!(matches!(data, Cow::Owned(_)));
        assert_eq!(&data[..], b"abcdefghijkl");
    }

    #[test]
    fn test_coalesce_out_of_range() {
        let file = vec![0u8; 16];
        let reader = Reader::new(&file);

        assert!(coalesce_stream(&reader, &[4], 8, 8).is_err());
    }
}
