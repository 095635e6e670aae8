//! End-to-end conversion scenarios: PDB → MSFZ → PDB.

mod common;

use std::path::PathBuf;

use similar_asserts::assert_eq;
use tempfile::TempDir;

use common::{build_pdb, lcg_bytes, read_u32};
use pdz::msfz::{Fragment, FragmentLocation};
use pdz::{
    compress, decompress, msf, msfz, CompressOptions, CompressionStrategy, DecompressOptions,
};
use pdz_common::Reader;

fn write_temp(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn compress_to_vec(pdb: &[u8], options: &CompressOptions) -> Vec<u8> {
    let dir = TempDir::new().unwrap();
    let input = write_temp(&dir, "input.pdb", pdb);
    let output = dir.path().join("output.msfz");
    compress(&input, &output, options).unwrap();
    std::fs::read(&output).unwrap()
}

fn decompress_to_vec(msfz_bytes: &[u8], options: &DecompressOptions) -> Vec<u8> {
    let dir = TempDir::new().unwrap();
    let input = write_temp(&dir, "input.msfz", msfz_bytes);
    let output = dir.path().join("output.pdb");
    decompress(&input, &output, options).unwrap();
    std::fs::read(&output).unwrap()
}

/// Parses a PDB and returns each stream's payload bytes.
fn read_pdb_streams(file: &[u8]) -> Vec<Vec<u8>> {
    let reader = Reader::new(file);
    let superblock = msf::parse_superblock(&reader).unwrap();
    let streams = msf::parse_stream_directory(&reader, superblock).unwrap();
    streams
        .iter()
        .map(|stream| {
            msf::coalesce_stream(
                &reader,
                &stream.blocks,
                stream.size,
                superblock.block_size.get(),
            )
            .unwrap()
            .into_owned()
        })
        .collect()
}

fn multi_fragment(fragment_size: u32, max_fragments: u32) -> CompressOptions {
    let mut options = CompressOptions::new(CompressionStrategy::MultiFragment);
    options.fragment_size = fragment_size;
    options.max_fragments_per_stream = max_fragments;
    options
}

#[test]
fn test_empty_stream_contributes_only_a_separator() {
    let pdb = build_pdb(4096, &[vec![]]);
    let msfz_bytes = compress_to_vec(&pdb, &multi_fragment(4096, 4096));

    let reader = Reader::new(&msfz_bytes);
    let header = msfz::parse_header(&reader).unwrap();
    assert_eq!(header.num_streams.get(), 1);
    assert_eq!(header.num_chunks.get(), 0);
    assert_eq!(header.chunk_table_size.get(), 0);
    assert_eq!(header.directory_size_uncompressed.get(), 4);

    let directory = msfz::read_directory(&reader, header).unwrap();
    assert_eq!(&directory[..], &[0, 0, 0, 0]);

    let streams = msfz::parse_directory(&directory).unwrap();
    assert_eq!(streams.len(), 1);
    assert!(streams[0].fragments.is_empty());
}

#[test]
fn test_single_byte_stream_uncompressed() {
    let pdb = build_pdb(512, &[vec![0x5A]]);
    let options = CompressOptions::new(CompressionStrategy::NoCompression);
    let msfz_bytes = compress_to_vec(&pdb, &options);

    let reader = Reader::new(&msfz_bytes);
    let header = msfz::parse_header(&reader).unwrap();
    assert_eq!(header.num_streams.get(), 1);
    assert_eq!(header.num_chunks.get(), 1);
    assert_eq!(header.directory_compressed.get(), 0);

    let chunks = msfz::chunk_table(&reader, header).unwrap();
    assert_eq!(chunks[0].uncompressed_size.get(), 1);
    assert_eq!(chunks[0].compressed_size.get(), 1);
    assert_eq!(chunks[0].compressed.get(), 0);
    assert_eq!(msfz_bytes[chunks[0].offset.get() as usize], 0x5A);

    let directory = msfz::read_directory(&reader, header).unwrap();
    let streams = msfz::parse_directory(&directory).unwrap();
    assert_eq!(
        streams[0].fragments,
        vec![Fragment {
            size: 1,
            data_offset: 0,
            location: FragmentLocation::Chunk { index: 0 },
        }]
    );
}

#[test]
fn test_multi_fragment_splits_and_compresses() {
    let pdb = build_pdb(4096, &[vec![0xAA; 10_000]]);
    let msfz_bytes = compress_to_vec(&pdb, &multi_fragment(4096, 4096));

    let reader = Reader::new(&msfz_bytes);
    let header = msfz::parse_header(&reader).unwrap();
    assert_eq!(header.num_chunks.get(), 3);
    assert_eq!(header.directory_compressed.get(), 1);

    let directory = msfz::read_directory(&reader, header).unwrap();
    let streams = msfz::parse_directory(&directory).unwrap();
    let fragments = &streams[0].fragments;
    assert_eq!(
        fragments.iter().map(|f| f.size).collect::<Vec<_>>(),
        vec![4096, 4096, 1808]
    );

    let chunks = msfz::chunk_table(&reader, header).unwrap();
    for fragment in fragments {
        let FragmentLocation::Chunk { index } = fragment.location else {
            panic!("expected chunk-resident fragment");
        };
        let chunk = &chunks[index as usize];
        assert_eq!(chunk.compressed.get(), 1);
        assert_eq!(chunk.uncompressed_size.get(), fragment.size);
        // 0xAA runs compress to a small fraction of the payload.
        assert!(chunk.compressed_size.get() < chunk.uncompressed_size.get() / 4);
    }
}

#[test]
fn test_block_layout_and_free_block_map() {
    let pdb = build_pdb(4096, &[vec![0x5A], vec![0xBB; 8192]]);
    let options = CompressOptions::new(CompressionStrategy::NoCompression);
    let msfz_bytes = compress_to_vec(&pdb, &options);
    let out = decompress_to_vec(&msfz_bytes, &DecompressOptions::default());

    // superblock + 2 FPM slots + 1 + 2 stream blocks + directory + index
    assert_eq!(read_u32(&out, 40), 8);
    assert_eq!(out.len(), 8 * 4096);
    // count word + two sizes + three block indices
    assert_eq!(read_u32(&out, 44), 24);

    let reader = Reader::new(&out);
    let superblock = msf::parse_superblock(&reader).unwrap();
    let streams = msf::parse_stream_directory(&reader, superblock).unwrap();
    assert_eq!(streams[0].blocks, vec![3]);
    assert_eq!(streams[1].blocks, vec![4, 5]);

    // Free block map: blocks 0..8 are in use, but stream 0's block 3 is
    // re-marked free; everything past the file is free.
    assert_eq!(out[4096], 0b0000_1000);
    assert_eq!(out[4097], 0xFF);
}

#[test]
fn test_directory_spanning_scattered_blocks() {
    // A directory whose two blocks sit out of order in the file: block 5
    // holds the first 512 payload bytes, block 3 the last 4.
    let block_size = 512usize;
    let stream_blocks: Vec<u32> = (1000..1127).collect();
    let stream_size = 127 * 512u32;

    let mut file = vec![0u8; 6 * block_size];
    file[..30].copy_from_slice(&pdz::raw::PDB_SIGNATURE);
    common::put_u32(&mut file, 32, block_size as u32);
    common::put_u32(&mut file, 36, 1);
    common::put_u32(&mut file, 40, 6);
    common::put_u32(&mut file, 44, 4 + 4 + 127 * 4);
    common::put_u32(&mut file, 52, 4); // directory-index block

    // Block 4: the directory-block list.
    common::put_u32(&mut file, 4 * block_size, 5);
    common::put_u32(&mut file, 4 * block_size + 4, 3);

    // Directory payload, split across blocks 5 and 3.
    let mut directory = Vec::new();
    common::push_u32(&mut directory, 1);
    common::push_u32(&mut directory, stream_size);
    for &block in &stream_blocks {
        common::push_u32(&mut directory, block);
    }
    assert_eq!(directory.len(), 516);
    file[5 * block_size..6 * block_size].copy_from_slice(&directory[..512]);
    file[3 * block_size..3 * block_size + 4].copy_from_slice(&directory[512..]);

    let reader = Reader::new(&file);
    let superblock = msf::parse_superblock(&reader).unwrap();
    let streams = msf::parse_stream_directory(&reader, superblock).unwrap();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].size, stream_size);
    assert_eq!(streams[0].blocks, stream_blocks);
}

#[test]
fn test_compressed_directory_reparses_identically() {
    let streams = vec![vec![0x11; 5000], vec![], lcg_bytes(300, 7)];
    let pdb = build_pdb(512, &streams);
    let msfz_bytes = compress_to_vec(&pdb, &CompressOptions::new(CompressionStrategy::SingleFragment));

    let reader = Reader::new(&msfz_bytes);
    let header = msfz::parse_header(&reader).unwrap();
    assert_eq!(header.directory_compressed.get(), 1);

    let first = msfz::parse_directory(&msfz::read_directory(&reader, header).unwrap()).unwrap();
    let second = msfz::parse_directory(&msfz::read_directory(&reader, header).unwrap()).unwrap();

    assert_eq!(first.len(), 3);
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.fragments, b.fragments);
    }
    // SingleFragment: one fragment per non-empty stream.
    assert_eq!(first[0].fragments.len(), 1);
    assert!(first[1].fragments.is_empty());
    assert_eq!(first[2].fragments.len(), 1);
    assert_eq!(first[0].size().unwrap(), 5000);
}

fn roundtrip_streams(
    streams: &[Vec<u8>],
    input_block_size: u32,
    options: &CompressOptions,
    output_block_size: u32,
) {
    let pdb = build_pdb(input_block_size, streams);
    let msfz_bytes = compress_to_vec(&pdb, options);
    let out = decompress_to_vec(
        &msfz_bytes,
        &DecompressOptions {
            block_size: output_block_size,
            num_threads: None,
        },
    );

    let restored = read_pdb_streams(&out);
    assert_eq!(restored.len(), streams.len());
    for (index, (original, restored)) in streams.iter().zip(&restored).enumerate() {
        assert_eq!(original, restored, "stream {index} diverged");
    }

    // No stream, directory or directory-index block may sit on a reserved
    // free-block-map position.
    let reader = Reader::new(&out);
    let superblock = msf::parse_superblock(&reader).unwrap();
    let parsed = msf::parse_stream_directory(&reader, superblock).unwrap();
    for stream in &parsed {
        for &block in &stream.blocks {
            assert!(block % output_block_size != 1 && block % output_block_size != 2);
        }
    }
}

#[test]
fn test_roundtrip_no_compression() {
    let streams = vec![
        vec![],
        vec![0x5A],
        vec![0xCC; 600],
        lcg_bytes(5000, 1),
        vec![0x77; 512],
    ];
    roundtrip_streams(
        &streams,
        512,
        &CompressOptions::new(CompressionStrategy::NoCompression),
        512,
    );
}

#[test]
fn test_roundtrip_across_strategies_and_block_sizes() {
    let streams = vec![
        vec![],
        lcg_bytes(10_000, 3),
        vec![0xAB; 4096],
        lcg_bytes(333, 9),
        b"interleaved".repeat(700),
        // Large enough to cross the reserved blocks at 513/514 when packed
        // with 512-byte blocks, on both the input and the output side.
        lcg_bytes(400_000, 21),
    ];

    let mut high_effort = multi_fragment(1024, 16);
    high_effort.level = 19;

    let cases: Vec<(CompressOptions, u32, u32)> = vec![
        (CompressOptions::new(CompressionStrategy::NoCompression), 512, 4096),
        (CompressOptions::new(CompressionStrategy::SingleFragment), 4096, 1024),
        (multi_fragment(4096, 4096), 512, 512),
        (high_effort, 4096, 8192),
    ];

    for (options, input_bs, output_bs) in cases {
        roundtrip_streams(&streams, input_bs, &options, output_bs);
    }
}

#[test]
fn test_many_streams_in_parallel() {
    let streams: Vec<Vec<u8>> = (0..40)
        .map(|index| lcg_bytes((index * 379) % 9000, index as u32))
        .collect();
    roundtrip_streams(&streams, 4096, &multi_fragment(2048, 8), 4096);
}

#[test]
fn test_fragment_cap_and_chunk_consistency() {
    let pdb = build_pdb(512, &[lcg_bytes(1001, 5)]);
    let msfz_bytes = compress_to_vec(&pdb, &multi_fragment(10, 4));

    let reader = Reader::new(&msfz_bytes);
    let header = msfz::parse_header(&reader).unwrap();
    let directory = msfz::read_directory(&reader, header).unwrap();
    let streams = msfz::parse_directory(&directory).unwrap();
    let chunks = msfz::chunk_table(&reader, header).unwrap();

    assert_eq!(streams.len() as u32, header.num_streams.get());

    let fragments = &streams[0].fragments;
    assert!(fragments.len() <= 4);
    // The cap raises the fragment size to ceil(1001 / 4) = 251.
    let chosen = fragments[0].size;
    assert_eq!(chosen, 251);
    for (index, fragment) in fragments.iter().enumerate() {
        if index + 1 < fragments.len() {
            assert_eq!(fragment.size, chosen);
        } else {
            assert!(fragment.size <= chosen);
        }

        let FragmentLocation::Chunk { index } = fragment.location else {
            panic!("expected chunk-resident fragment");
        };
        assert!(index < header.num_chunks.get());
        let chunk = &chunks[index as usize];
        assert!(fragment.data_offset as u64 + fragment.size as u64
            <= chunk.uncompressed_size.get() as u64);
    }
}

#[test]
fn test_single_thread_output_is_deterministic() {
    let streams = vec![lcg_bytes(5000, 2), vec![0x42; 1200], lcg_bytes(800, 11)];
    let pdb = build_pdb(512, &streams);

    let mut options = multi_fragment(1024, 64);
    options.num_threads = Some(1);

    let first = compress_to_vec(&pdb, &options);
    let second = compress_to_vec(&pdb, &options);
    assert_eq!(first, second);
}

#[test]
fn test_compress_rejects_non_pdb_input() {
    let dir = TempDir::new().unwrap();
    let input = write_temp(&dir, "garbage.bin", &lcg_bytes(256, 1));
    let output = dir.path().join("out.msfz");

    let result = compress(
        &input,
        &output,
        &CompressOptions::new(CompressionStrategy::NoCompression),
    );
    assert!(matches!(result, Err(pdz::ConvertError::BadPdbSignature)));
}
