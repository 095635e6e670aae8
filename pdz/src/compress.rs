//! The MSFZ writer: fragments every PDB stream, compresses the fragments and
//! lays out the container.
//!
//! The output file has four regions, in order: header, chunk table, chunk
//! data, stream directory. The chunk-table size is exact and known up front;
//! the chunk-data region is reserved at a compression upper bound and trimmed
//! at the end; the directory goes last because its size is only known after
//! compression. Streams are converted in parallel, reserving chunk-table
//! slots and chunk-data windows from two shared allocators.

use std::fs::File;
use std::mem::size_of;
use std::path::Path;
use std::sync::Mutex;

use memmap2::MmapMut;
use zerocopy::byteorder::little_endian::{U32, U64};

use pdz_common::{ByteView, DynamicWriter, FixedWriter, Reader, RegionWriter};

use crate::codec;
use crate::config::{CompressOptions, CompressionStrategy};
use crate::error::ConvertError;
use crate::msf::{self, StreamInfo};
use crate::progress::ProgressLog;
use crate::raw::{MsfzChunk, MsfzFragment, MsfzHeader, MSFZ_SIGNATURE};
use crate::runner::ParallelRunner;

/// Level used for the stream directory itself, independent of the configured
/// chunk level.
const DIRECTORY_COMPRESSION_LEVEL: i32 = 3;

/// Fragment size used for a stream of `stream_size` bytes.
///
/// `NoCompression` and `SingleFragment` put the whole stream in one fragment.
/// `MultiFragment` uses the configured fixed size, raised as far as needed so
/// the stream never exceeds the fragment cap.
fn fragment_size_for(stream_size: u32, options: &CompressOptions) -> u32 {
    match options.strategy {
        CompressionStrategy::MultiFragment => {
            let capped =
                (stream_size as u64).div_ceil(options.max_fragments_per_stream as u64) as u32;
            stream_size.min(options.fragment_size.max(capped))
        }
        _ => stream_size,
    }
}

struct RegionSizes {
    /// Exact decompressed size of the stream directory.
    directory_bytes: usize,
    /// Exact size of the chunk table.
    chunk_table_bytes: usize,
    /// Upper bound on the chunk-data region.
    chunk_data_bound: usize,
    /// Total chunk count.
    num_chunks: u64,
}

/// The upper-bound sizing pass over all streams.
fn compute_region_sizes(streams: &[StreamInfo], options: &CompressOptions) -> RegionSizes {
    let mut sizes = RegionSizes {
        directory_bytes: 0,
        chunk_table_bytes: 0,
        chunk_data_bound: 0,
        num_chunks: 0,
    };

    for stream in streams {
        let fragments = if stream.size == 0 {
            0
        } else {
            let fragment_size = fragment_size_for(stream.size, options);
            (stream.size as u64).div_ceil(fragment_size as u64) as usize
        };

        // Each stream contributes its fragment records plus a separator word.
        sizes.directory_bytes += size_of::<U32>() + size_of::<MsfzFragment>() * fragments;
        sizes.chunk_table_bytes += size_of::<MsfzChunk>() * fragments;
        sizes.num_chunks += fragments as u64;

        if options.strategy.compresses() {
            let fragment_size = fragment_size_for(stream.size, options);
            sizes.chunk_data_bound += fragments * codec::compress_bound(fragment_size as usize);
        } else {
            sizes.chunk_data_bound += stream.size as usize;
        }
    }

    sizes
}

/// Fragments one stream and writes its chunks into the shared regions.
///
/// Fragment records accumulate in `out_fragments`; chunk records go straight
/// into the reserved chunk-table slots.
fn convert_stream(
    pdb: &Reader<'_>,
    stream: &StreamInfo,
    block_size: u32,
    chunk_data_offset: usize,
    options: &CompressOptions,
    chunk_table: &RegionWriter<'_>,
    chunk_data: &RegionWriter<'_>,
    out_fragments: &Mutex<Vec<MsfzFragment>>,
) -> Result<(), ConvertError> {
    if stream.size == 0 {
        return Ok(());
    }

    let data = msf::coalesce_stream(pdb, &stream.blocks, stream.size, block_size)?;
    let fragment_size = fragment_size_for(stream.size, options);
    let mut fragments = Vec::with_capacity(data.len().div_ceil(fragment_size as usize));

    for fragment in data.chunks(fragment_size as usize) {
        let (slot_offset, mut slot) = chunk_table.reserve(size_of::<MsfzChunk>())?;
        let chunk_index = (slot_offset / size_of::<MsfzChunk>()) as u32;
        fragments.push(MsfzFragment::in_chunk(chunk_index, fragment.len() as u32));

        let mut compressed = Vec::new();
        let payload: &[u8] = if options.strategy.compresses() {
            compressed.resize(codec::compress_bound(fragment.len()), 0);
            let written = codec::compress_into(&mut compressed, fragment, options.level)?;
            compressed.truncate(written);
            &compressed
        } else {
            fragment
        };

        let (payload_offset, mut window) = chunk_data.reserve(payload.len())?;
        window.write_bytes(payload)?;

        let file_offset = chunk_data_offset as u64 + payload_offset as u64;
        slot.write(&MsfzChunk {
            offset: U32::new(
                u32::try_from(file_offset).map_err(|_| ConvertError::ValueTooLarge(file_offset))?,
            ),
            origin: U32::new(0),
            compressed: U32::new(options.strategy.compresses() as u32),
            compressed_size: U32::new(payload.len() as u32),
            uncompressed_size: U32::new(fragment.len() as u32),
        })?;
    }

    *out_fragments.lock().unwrap() = fragments;
    Ok(())
}

fn checked_u32(value: u64) -> Result<U32, ConvertError> {
    u32::try_from(value)
        .map(U32::new)
        .map_err(|_| ConvertError::ValueTooLarge(value))
}

/// Compresses the PDB at `input` into an MSFZ container at `output`.
pub fn compress(input: &Path, output: &Path, options: &CompressOptions) -> Result<(), ConvertError> {
    options.validate()?;

    let view = ByteView::open(input).map_err(ConvertError::OpenInput)?;
    let pdb = Reader::new(&view);
    let superblock = msf::parse_superblock(&pdb)?;
    let block_size = superblock.block_size.get();

    let streams = {
        let _span = tracing::debug_span!("parse stream directory").entered();
        msf::parse_stream_directory(&pdb, superblock)?
    };

    let sizes = compute_region_sizes(&streams, options);

    // The directory lands behind the chunk data once its size is known; its
    // region is reserved at the compressed upper bound so a tiny directory
    // whose ZSTD frame outgrows its payload still fits.
    let directory_reserve = if options.strategy.compresses() {
        codec::compress_bound(sizes.directory_bytes)
    } else {
        sizes.directory_bytes
    };

    let chunk_table_offset = size_of::<MsfzHeader>();
    let chunk_data_offset = chunk_table_offset + sizes.chunk_table_bytes;
    let upper_bound = chunk_data_offset + sizes.chunk_data_bound + directory_reserve;

    let file = File::options()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(output)
        .map_err(ConvertError::CreateOutput)?;
    file.set_len(upper_bound as u64)
        .map_err(ConvertError::ResizeOutput)?;
    let mut map = unsafe { MmapMut::map_mut(&file) }.map_err(ConvertError::MapFile)?;

    let fragment_lists: Vec<Mutex<Vec<MsfzFragment>>> =
        streams.iter().map(|_| Mutex::new(Vec::new())).collect();

    let chunk_data_len = {
        let _span = tracing::debug_span!("convert streams").entered();
        let (_, rest) = map.split_at_mut(chunk_table_offset);
        let (table_region, rest) = rest.split_at_mut(sizes.chunk_table_bytes);
        let chunk_table = RegionWriter::new(table_region);
        let chunk_data = RegionWriter::new(&mut rest[..sizes.chunk_data_bound]);

        let total_bytes: u64 = streams.iter().map(|s| s.size as u64).sum();
        let progress = ProgressLog::new("converting streams", streams.len() as u64, total_bytes);

        let runner = ParallelRunner::new(options.num_threads);
        runner.execute_scored(
            &streams,
            |stream, _| stream.size,
            |stream, index| {
                convert_stream(
                    &pdb,
                    stream,
                    block_size,
                    chunk_data_offset,
                    options,
                    &chunk_table,
                    &chunk_data,
                    &fragment_lists[index],
                )?;
                progress.update(stream.size as u64);
                Ok::<(), ConvertError>(())
            },
        )?;
        progress.finish();

        debug_assert_eq!(chunk_table.reserved(), sizes.chunk_table_bytes);
        chunk_data.reserved()
    };

    // Concatenate per-stream fragment records, a separator word after each
    // stream, then compress the whole directory if the strategy calls for it.
    let mut directory = DynamicWriter::with_capacity(sizes.directory_bytes);
    for list in &fragment_lists {
        directory.write(list.lock().unwrap().as_slice());
        directory.write(&U32::new(0));
    }
    debug_assert_eq!(directory.len(), sizes.directory_bytes);

    let (directory_bytes, directory_compressed) = if options.strategy.compresses() {
        let _span = tracing::debug_span!("compress stream directory").entered();
        let mut compressed = vec![0u8; codec::compress_bound(directory.len())];
        let written = codec::compress_into(
            &mut compressed,
            directory.as_bytes(),
            DIRECTORY_COMPRESSION_LEVEL,
        )?;
        compressed.truncate(written);
        (compressed, true)
    } else {
        (directory.into_bytes(), false)
    };

    let directory_offset = chunk_data_offset + chunk_data_len;
    FixedWriter::new(&mut map[directory_offset..directory_offset + directory_bytes.len()])
        .write_bytes(&directory_bytes)?;

    let header = MsfzHeader {
        signature: MSFZ_SIGNATURE,
        reserved: U64::new(0),
        directory_offset: checked_u32(directory_offset as u64)?,
        directory_origin: U32::new(0),
        chunk_table_offset: checked_u32(chunk_table_offset as u64)?,
        chunk_table_origin: U32::new(0),
        num_streams: checked_u32(streams.len() as u64)?,
        directory_compressed: U32::new(directory_compressed as u32),
        directory_size_compressed: checked_u32(directory_bytes.len() as u64)?,
        directory_size_uncompressed: checked_u32(sizes.directory_bytes as u64)?,
        num_chunks: checked_u32(sizes.num_chunks)?,
        chunk_table_size: checked_u32(sizes.chunk_table_bytes as u64)?,
    };
    FixedWriter::new(&mut map[..size_of::<MsfzHeader>()]).write(&header)?;

    map.flush().map_err(ConvertError::FlushOutput)?;
    drop(map);

    let final_len = (directory_offset + directory_bytes.len()) as u64;
    file.set_len(final_len).map_err(ConvertError::ResizeOutput)?;

    tracing::info!(
        "compressed {} bytes into {} bytes ({:.2}%)",
        view.len(),
        final_len,
        final_len as f64 * 100.0 / view.len().max(1) as f64
    );
    Ok(())
}
