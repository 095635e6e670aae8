//! Thin adapter over the ZSTD bulk API.
//!
//! Chunks and the stream directory are compressed independently, one buffer
//! at a time; no streaming state is kept. Codec failures surface as
//! [`ConvertError::Compress`] / [`ConvertError::Decompress`].

use crate::error::ConvertError;

/// Upper bound on the compressed size of `len` input bytes.
pub fn compress_bound(len: usize) -> usize {
    zstd::zstd_safe::compress_bound(len)
}

/// Compresses `src` into `dst`, returning the compressed byte count.
///
/// `dst` must be at least [`compress_bound`] of `src.len()` bytes.
pub fn compress_into(dst: &mut [u8], src: &[u8], level: i32) -> Result<usize, ConvertError> {
    zstd::bulk::compress_to_buffer(src, dst, level).map_err(ConvertError::Compress)
}

/// Decompresses `src`, which must inflate to exactly `expected` bytes.
///
/// A short result means the container lied about the decompressed size and is
/// treated as corruption.
pub fn decompress_exact(src: &[u8], expected: usize) -> Result<Vec<u8>, ConvertError> {
    let mut dst = vec![0u8; expected];
    let got = zstd::bulk::decompress_to_buffer(src, &mut dst).map_err(ConvertError::Decompress)?;
    if got < expected {
        return Err(ConvertError::ShortDecompression {
            got: got as u64,
            expected: expected as u64,
        });
    }
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let payload = b"abcabcabcabc".repeat(64);
        let mut compressed = vec![0u8; compress_bound(payload.len())];
        let written = compress_into(&mut compressed, &payload, 3).unwrap();
        assert!(written < payload.len());

        let restored = decompress_exact(&compressed[..written], payload.len()).unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn test_invalid_frame() {
        assert!(decompress_exact(&[1, 2, 3, 4], 16).is_err());
    }

    #[test]
    fn test_short_decompression() {
        let payload = [0u8; 8];
        let mut compressed = vec![0u8; compress_bound(payload.len())];
        let written = compress_into(&mut compressed, &payload, 1).unwrap();

        // Asking for more bytes than the frame holds is corruption.
        let result = decompress_exact(&compressed[..written], 64);
        assert!(matches!(
            result,
            Err(ConvertError::ShortDecompression {
                got: 8,
                expected: 64
            })
        ));
    }
}
