//! The PDB writer: materialises MSFZ streams and repacks them into the
//! block-oriented layout.
//!
//! Block indices are handed out by a cursor that skips the interleaved
//! free-block-map positions, so a stream's blocks are ascending but not
//! necessarily contiguous. Each stream's byte range of the output file is
//! wrapped in a [`HoleWriter`] whose holes are exactly the reserved blocks,
//! letting workers write logically contiguous stream bytes without touching
//! them.

use std::fs::File;
use std::mem::size_of;
use std::path::Path;
use std::sync::Mutex;

use bitvec::prelude::*;
use memmap2::MmapMut;
use zerocopy::byteorder::little_endian::U32;

use pdz_common::{ByteView, FixedWriter, HoleWriter, Reader};

use crate::codec;
use crate::config::DecompressOptions;
use crate::error::ConvertError;
use crate::msf::blocks_needed;
use crate::msfz::{self, FragmentLocation, StreamFragments};
use crate::progress::ProgressLog;
use crate::raw::{MsfzChunk, PdbSuperBlock, PDB_SIGNATURE};
use crate::runner::ParallelRunner;

/// Most blocks a produced PDB may occupy.
pub const MAX_BLOCKS: u32 = 1 << 20;

/// Most streams a produced PDB may hold.
pub const MAX_STREAMS: u32 = 1 << 16;

/// Block index of the active free block map.
const PRIMARY_FPM_BLOCK: u32 = 1;

/// First block available for data; blocks 0 through 2 are the superblock and
/// the two free-block-map slots.
const FIRST_DATA_BLOCK: u32 = 3;

/// Whether a block index is one of the interleaved free-block-map positions.
fn is_reserved_block(index: u32, block_size: u32) -> bool {
    index % block_size == 1 || index % block_size == 2
}

/// The block layout of the output PDB.
struct BlockAssignment {
    /// Block lists per stream, in stream order.
    stream_blocks: Vec<Vec<u32>>,
    /// Decompressed stream sizes, in stream order.
    stream_sizes: Vec<u32>,
    /// Blocks holding the stream directory.
    directory: Vec<u32>,
    /// Blocks holding the directory-block list.
    directory_index: Vec<u32>,
    /// The free-block-map blocks, at their fixed reserved positions.
    free_block_map: Vec<u32>,
    /// Total number of blocks in the file.
    block_count: u32,
    /// Byte size of the stream directory payload.
    directory_bytes: u32,
}

/// Assigns block indices to all streams, the directory, the directory-block
/// list and the free block map.
fn assign_blocks(
    streams: &[StreamFragments],
    block_size: u32,
) -> Result<BlockAssignment, ConvertError> {
    let mut cursor = FIRST_DATA_BLOCK as u64;
    let mut assign_next = |count: u32| -> Result<Vec<u32>, ConvertError> {
        let mut blocks = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut index =
                u32::try_from(cursor).map_err(|_| ConvertError::ValueTooLarge(cursor))?;
            cursor += 1;
            while is_reserved_block(index, block_size) {
                index = u32::try_from(cursor).map_err(|_| ConvertError::ValueTooLarge(cursor))?;
                cursor += 1;
            }
            blocks.push(index);
        }
        Ok(blocks)
    };

    let mut stream_blocks = Vec::with_capacity(streams.len());
    let mut stream_sizes = Vec::with_capacity(streams.len());
    let mut directory_bytes = size_of::<U32>() as u64;
    for stream in streams {
        let size = stream.size()?;
        let count = blocks_needed(size, block_size);
        stream_blocks.push(assign_next(count)?);
        stream_sizes.push(size);
        directory_bytes += (size_of::<U32>() + size_of::<U32>() * count as usize) as u64;
    }
    let directory_bytes =
        u32::try_from(directory_bytes).map_err(|_| ConvertError::ValueTooLarge(directory_bytes))?;

    let directory = assign_next(blocks_needed(directory_bytes, block_size))?;
    let index_bytes = directory.len() as u32 * size_of::<U32>() as u32;
    let directory_index = assign_next(blocks_needed(index_bytes, block_size))?;

    let block_count = u32::try_from(cursor).map_err(|_| ConvertError::ValueTooLarge(cursor))?;

    let fpm_blocks = blocks_needed(block_count.div_ceil(8), block_size);
    let free_block_map = (0..fpm_blocks)
        .map(|i| i * block_size + PRIMARY_FPM_BLOCK)
        .collect::<Vec<_>>();
    debug_assert!(free_block_map.iter().all(|&b| b < block_count));

    Ok(BlockAssignment {
        stream_blocks,
        stream_sizes,
        directory,
        directory_index,
        free_block_map,
        block_count,
        directory_bytes,
    })
}

/// Registers a hole for every gap in an ascending block list.
///
/// `writer` covers the byte range of the first through last block; holes are
/// block-aligned by construction.
fn add_block_holes(writer: &mut HoleWriter<'_>, blocks: &[u32], block_size: u32) {
    let block_size = block_size as usize;
    let first = blocks[0] as usize;
    let mut prev = first;
    for &block in &blocks[1..] {
        let block = block as usize;
        if block != prev + 1 {
            writer.add_hole((prev + 1 - first) * block_size, (block - first) * block_size);
        }
        prev = block;
    }
}

/// Wraps the byte range spanned by a block list into a [`HoleWriter`].
fn hole_writer_for_blocks<'d>(
    file: &'d mut [u8],
    blocks: &[u32],
    block_size: u32,
) -> HoleWriter<'d> {
    let (Some(&first), Some(&last)) = (blocks.first(), blocks.last()) else {
        return HoleWriter::new(Default::default());
    };
    let begin = first as usize * block_size as usize;
    let end = (last as usize + 1) * block_size as usize;
    let mut writer = HoleWriter::new(&mut file[begin..end]);
    add_block_holes(&mut writer, blocks, block_size);
    writer
}

/// Carves the output file into one disjoint [`HoleWriter`] per stream.
///
/// Stream ranges ascend and never overlap, so the file can be split from the
/// front; the mutexes give each worker exclusive access to its own writer.
fn carve_stream_writers<'d>(
    mut rest: &'d mut [u8],
    stream_blocks: &[Vec<u32>],
    block_size: u32,
) -> Vec<Mutex<HoleWriter<'d>>> {
    let block_size = block_size as usize;
    let mut writers = Vec::with_capacity(stream_blocks.len());
    let mut base = 0usize;
    for blocks in stream_blocks {
        let (Some(&first), Some(&last)) = (blocks.first(), blocks.last()) else {
            writers.push(Mutex::new(HoleWriter::new(Default::default())));
            continue;
        };
        let skip = first as usize * block_size - base;
        let len = (last as usize + 1 - first as usize) * block_size;

        let tail = std::mem::take(&mut rest);
        let (_gap, tail) = tail.split_at_mut(skip);
        let (window, tail) = tail.split_at_mut(len);
        rest = tail;
        base = (last as usize + 1) * block_size;

        let mut writer = HoleWriter::new(window);
        add_block_holes(&mut writer, blocks, block_size as u32);
        writers.push(Mutex::new(writer));
    }
    writers
}

/// Materialises one stream's fragments and writes them into its blocks.
fn write_stream(
    msfz: &Reader<'_>,
    chunks: &[MsfzChunk],
    stream: &StreamFragments,
    out: &mut HoleWriter<'_>,
) -> Result<(), ConvertError> {
    for fragment in &stream.fragments {
        match fragment.location {
            FragmentLocation::File { offset } => {
                let bytes = msfz.bytes_at(offset as usize, fragment.size as usize)?;
                out.write_bytes(bytes)?;
            }
            FragmentLocation::Chunk { index } => {
                let chunk =
                    chunks
                        .get(index as usize)
                        .ok_or(ConvertError::ChunkIndexOutOfRange {
                            index,
                            count: chunks.len() as u32,
                        })?;
                let end = fragment.data_offset as u64 + fragment.size as u64;
                if end > chunk.uncompressed_size.get() as u64 {
                    return Err(ConvertError::FragmentOutOfChunk {
                        offset: fragment.data_offset,
                        end,
                        size: chunk.uncompressed_size.get(),
                    });
                }

                let raw = msfz.bytes_at(
                    chunk.offset.get() as usize,
                    chunk.compressed_size.get() as usize,
                )?;
                let payload = if chunk.compressed.get() != 0 {
                    std::borrow::Cow::Owned(codec::decompress_exact(
                        raw,
                        chunk.uncompressed_size.get() as usize,
                    )?)
                } else {
                    std::borrow::Cow::Borrowed(raw)
                };

                let slice = payload
                    .get(fragment.data_offset as usize..end as usize)
                    .ok_or(ConvertError::FragmentOutOfChunk {
                        offset: fragment.data_offset,
                        end,
                        size: chunk.uncompressed_size.get(),
                    })?;
                out.write_bytes(slice)?;
            }
        }
    }
    Ok(())
}

fn le_words(values: &[u32]) -> Vec<U32> {
    values.iter().map(|&value| U32::new(value)).collect()
}

fn run(
    input: &Path,
    output: &Path,
    options: &DecompressOptions,
    enforce_limits: bool,
) -> Result<bool, ConvertError> {
    options.validate()?;
    let block_size = options.block_size;

    let view = ByteView::open(input).map_err(ConvertError::OpenInput)?;
    let msfz = Reader::new(&view);
    let header = msfz::parse_header(&msfz)?;

    let streams = {
        let _span = tracing::debug_span!("parse stream directory").entered();
        let directory = msfz::read_directory(&msfz, header)?;
        let streams = msfz::parse_directory(&directory)?;
        if streams.len() as u64 != header.num_streams.get() as u64 {
            return Err(ConvertError::StreamCountMismatch {
                parsed: streams.len() as u32,
                expected: header.num_streams.get(),
            });
        }
        streams
    };

    let chunks = msfz::chunk_table(&msfz, header)?;
    let assignment = assign_blocks(&streams, block_size)?;

    if assignment.block_count > MAX_BLOCKS {
        if enforce_limits {
            return Err(ConvertError::TooManyBlocks {
                blocks: assignment.block_count,
                limit: MAX_BLOCKS,
            });
        }
        return Ok(false);
    }
    if streams.len() > MAX_STREAMS as usize {
        if enforce_limits {
            return Err(ConvertError::TooManyStreams {
                streams: streams.len() as u32,
                limit: MAX_STREAMS,
            });
        }
        return Ok(false);
    }

    let total_len = assignment.block_count as u64 * block_size as u64;
    let file = File::options()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(output)
        .map_err(ConvertError::CreateOutput)?;
    file.set_len(total_len).map_err(ConvertError::ResizeOutput)?;
    let mut map = unsafe { MmapMut::map_mut(&file) }.map_err(ConvertError::MapFile)?;

    {
        let _span = tracing::debug_span!("convert streams").entered();
        let writers = carve_stream_writers(&mut map, &assignment.stream_blocks, block_size);

        let total_bytes: u64 = assignment.stream_sizes.iter().map(|&s| s as u64).sum();
        let progress = ProgressLog::new("converting streams", streams.len() as u64, total_bytes);

        let runner = ParallelRunner::new(options.num_threads);
        runner.execute_scored(
            &streams,
            |_, index| assignment.stream_sizes[index],
            |stream, index| {
                write_stream(&msfz, chunks, stream, &mut writers[index].lock().unwrap())?;
                progress.update(assignment.stream_sizes[index] as u64);
                Ok::<(), ConvertError>(())
            },
        )?;
        progress.finish();
    }

    // Directory payload: stream count and sizes up front, the per-stream
    // block lists after them, interleaved through two sub-writers.
    {
        let directory = hole_writer_for_blocks(&mut map, &assignment.directory, block_size);
        let sizes_len = size_of::<U32>() * (1 + streams.len());
        let (mut sizes_writer, mut blocks_writer) = directory.split_at(sizes_len)?;

        sizes_writer.write(&U32::new(streams.len() as u32))?;
        for index in 0..streams.len() {
            sizes_writer.write(&U32::new(assignment.stream_sizes[index]))?;
            blocks_writer.write(le_words(&assignment.stream_blocks[index]).as_slice())?;
        }
    }

    // The directory-block list, in its own blocks.
    hole_writer_for_blocks(&mut map, &assignment.directory_index, block_size)
        .write(le_words(&assignment.directory).as_slice())?;

    // Superblock, followed by the first-level indirection pointing at the
    // directory-index blocks.
    {
        let mut writer = FixedWriter::new(&mut map[..]);
        writer.write(&PdbSuperBlock {
            signature: PDB_SIGNATURE,
            padding: [0; 2],
            block_size: U32::new(block_size),
            free_block_map: U32::new(PRIMARY_FPM_BLOCK),
            block_count: U32::new(assignment.block_count),
            directory_size: U32::new(assignment.directory_bytes),
            reserved: U32::new(0),
        })?;
        writer.write(le_words(&assignment.directory_index).as_slice())?;
    }

    // Free block map: everything beyond the file is free, all used blocks
    // are cleared, and stream 0's blocks are re-marked free (required of
    // PDBs since early 2023).
    {
        let _span = tracing::debug_span!("write free block map").entered();
        let bits = assignment.free_block_map.len() * block_size as usize * 8;
        let mut free = bitvec![u8, Lsb0; 1; bits];
        free[..assignment.block_count as usize].fill(false);
        if let Some(blocks) = assignment.stream_blocks.first() {
            for &block in blocks {
                free.set(block as usize, true);
            }
        }
        hole_writer_for_blocks(&mut map, &assignment.free_block_map, block_size)
            .write_bytes(free.as_raw_slice())?;
    }

    map.flush().map_err(ConvertError::FlushOutput)?;
    drop(map);

    tracing::info!(
        "decompressed {} bytes into {} bytes ({:.2}%)",
        view.len(),
        total_len,
        view.len() as f64 * 100.0 / total_len.max(1) as f64
    );
    Ok(true)
}

/// Decompresses the MSFZ container at `input` into a PDB at `output`.
pub fn decompress(
    input: &Path,
    output: &Path,
    options: &DecompressOptions,
) -> Result<(), ConvertError> {
    run(input, output, options, true).map(|_| ())
}

/// Like [`decompress`], but returns `Ok(false)` instead of failing when the
/// output would exceed the block or stream limits. No output is produced in
/// that case.
pub fn decompress_dry_run(
    input: &Path,
    output: &Path,
    options: &DecompressOptions,
) -> Result<bool, ConvertError> {
    run(input, output, options, false)
}
