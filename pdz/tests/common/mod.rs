#![allow(dead_code)]

//! Helpers shared by the integration tests.
//!
//! PDB fixtures are built here with plain byte arithmetic, independent of the
//! library's own writers, so the tests cross-check the wire layout rather
//! than the implementation against itself.

use pdz::raw::PDB_SIGNATURE;

pub fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

pub fn push_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Deterministic pseudo-random payload for incompressible-ish test streams.
pub fn lcg_bytes(len: usize, mut seed: u32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(len);
    for _ in 0..len {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        bytes.push((seed >> 24) as u8);
    }
    bytes
}

fn div_ceil(value: usize, divisor: usize) -> usize {
    value.div_ceil(divisor)
}

/// Copies `data` into the given blocks, in list order.
pub fn write_blocks(file: &mut [u8], blocks: &[u32], block_size: usize, data: &[u8]) {
    for (chunk, &block) in data.chunks(block_size).zip(blocks) {
        let offset = block as usize * block_size;
        file[offset..offset + chunk.len()].copy_from_slice(chunk);
    }
}

/// Builds a complete PDB holding the given streams.
///
/// Blocks are assigned from index 3 upwards, skipping the reserved
/// free-block-map positions, mirroring how Microsoft's tooling lays out
/// small files.
pub fn build_pdb(block_size: u32, streams: &[Vec<u8>]) -> Vec<u8> {
    let bs = block_size as usize;
    let mut cursor = 3u32;
    let mut assign = |count: usize| -> Vec<u32> {
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            let mut block = cursor;
            cursor += 1;
            while block % block_size == 1 || block % block_size == 2 {
                block = cursor;
                cursor += 1;
            }
            blocks.push(block);
        }
        blocks
    };

    let stream_blocks: Vec<Vec<u32>> = streams
        .iter()
        .map(|stream| assign(div_ceil(stream.len(), bs)))
        .collect();
    let total_blocks: usize = stream_blocks.iter().map(|blocks| blocks.len()).sum();

    let dir_bytes = 4 + 4 * streams.len() + 4 * total_blocks;
    let dir_blocks = assign(div_ceil(dir_bytes, bs));
    let index_blocks = assign(div_ceil(dir_blocks.len() * 4, bs));
    let block_count = cursor;

    let mut file = vec![0u8; block_count as usize * bs];

    // Superblock and the indirection array right behind it.
    file[..30].copy_from_slice(&PDB_SIGNATURE);
    put_u32(&mut file, 32, block_size);
    put_u32(&mut file, 36, 1);
    put_u32(&mut file, 40, block_count);
    put_u32(&mut file, 44, dir_bytes as u32);
    for (i, &block) in index_blocks.iter().enumerate() {
        put_u32(&mut file, 52 + 4 * i, block);
    }

    // Directory-index blocks hold the directory-block list.
    let mut index_payload = Vec::new();
    for &block in &dir_blocks {
        push_u32(&mut index_payload, block);
    }
    write_blocks(&mut file, &index_blocks, bs, &index_payload);

    // Directory payload: count, sizes, block lists.
    let mut directory = Vec::new();
    push_u32(&mut directory, streams.len() as u32);
    for stream in streams {
        push_u32(&mut directory, stream.len() as u32);
    }
    for blocks in &stream_blocks {
        for &block in blocks {
            push_u32(&mut directory, block);
        }
    }
    write_blocks(&mut file, &dir_blocks, bs, &directory);

    for (stream, blocks) in streams.iter().zip(&stream_blocks) {
        write_blocks(&mut file, blocks, bs, stream);
    }

    file
}
