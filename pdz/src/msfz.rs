//! Reading the compressed side: MSFZ header, stream directory and chunk
//! table.

use std::borrow::Cow;

use zerocopy::byteorder::little_endian::U32;

use pdz_common::Reader;

use crate::codec;
use crate::error::ConvertError;
use crate::raw::{MsfzChunk, MsfzFragment, MsfzHeader, FRAGMENT_IN_CHUNK_BIT, MSFZ_SIGNATURE};

/// Where a fragment's payload lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentLocation {
    /// Inside a chunk's decompressed payload.
    Chunk {
        /// Index into the chunk table.
        index: u32,
    },
    /// Directly inside the MSFZ file. Produced by other writers; this
    /// implementation reads but never emits the variant.
    File {
        /// Absolute file offset of the payload.
        offset: u32,
    },
}

/// One fragment of a stream, decoded from its wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    /// Payload size in bytes.
    pub size: u32,
    /// Offset within the chunk's decompressed payload. Unused for
    /// file-resident fragments, whose offset lives in the location.
    pub data_offset: u32,
    /// Where the payload lives.
    pub location: FragmentLocation,
}

impl Fragment {
    pub(crate) fn from_raw(raw: &MsfzFragment) -> Self {
        let tag = raw.location.get();
        let data_offset = raw.data_offset.get();
        let location = if tag & FRAGMENT_IN_CHUNK_BIT != 0 {
            FragmentLocation::Chunk {
                index: tag & !FRAGMENT_IN_CHUNK_BIT,
            }
        } else {
            FragmentLocation::File {
                offset: data_offset,
            }
        };
        Fragment {
            size: raw.data_size.get(),
            data_offset,
            location,
        }
    }
}

/// One stream of an MSFZ container: its ordered fragment list.
#[derive(Debug, Clone, Default)]
pub struct StreamFragments {
    /// The fragments making up the stream payload, in stream order.
    pub fragments: Vec<Fragment>,
}

impl StreamFragments {
    /// The stream's decompressed byte size: the sum of its fragment sizes.
    pub fn size(&self) -> Result<u32, ConvertError> {
        let total: u64 = self.fragments.iter().map(|f| f.size as u64).sum();
        u32::try_from(total).map_err(|_| ConvertError::ValueTooLarge(total))
    }
}

/// Resolves and validates the header of a mapped MSFZ container.
pub fn parse_header<'d>(reader: &Reader<'d>) -> Result<&'d MsfzHeader, ConvertError> {
    let header = reader.peek_at::<MsfzHeader>(0)?;
    if header.signature != MSFZ_SIGNATURE {
        return Err(ConvertError::BadMsfzSignature);
    }
    Ok(header)
}

/// Loads the stream-directory payload, decompressing it when flagged.
pub fn read_directory<'d>(
    reader: &Reader<'d>,
    header: &MsfzHeader,
) -> Result<Cow<'d, [u8]>, ConvertError> {
    let bytes = reader.bytes_at(
        header.directory_offset.get() as usize,
        header.directory_size_compressed.get() as usize,
    )?;

    if header.directory_compressed.get() != 0 {
        let expected = header.directory_size_uncompressed.get() as usize;
        Ok(Cow::Owned(codec::decompress_exact(bytes, expected)?))
    } else {
        Ok(Cow::Borrowed(bytes))
    }
}

/// Word terminating each stream's fragment group in the directory.
const STREAM_SEPARATOR: u32 = 0;

/// Parses the directory payload into per-stream fragment lists.
///
/// Streams are delimited by a zero separator word; two separators in a row
/// denote an empty stream.
pub fn parse_directory(data: &[u8]) -> Result<Vec<StreamFragments>, ConvertError> {
    let mut reader = Reader::new(data);
    let mut streams: Vec<StreamFragments> = Vec::new();
    let mut open = false;

    while reader.remaining() > 0 {
        if !open {
            streams.push(StreamFragments::default());
            open = true;
        }
        if reader.peek::<U32>()?.get() == STREAM_SEPARATOR {
            reader.read::<U32>()?;
            open = false;
        } else if let Some(stream) = streams.last_mut() {
            stream
                .fragments
                .push(Fragment::from_raw(reader.read::<MsfzFragment>()?));
        }
    }

    Ok(streams)
}

/// Borrows the chunk table in place, validating its length.
pub fn chunk_table<'d>(
    reader: &Reader<'d>,
    header: &MsfzHeader,
) -> Result<&'d [MsfzChunk], ConvertError> {
    let length = header.chunk_table_size.get();
    let count = header.num_chunks.get();
    if length as u64 != count as u64 * std::mem::size_of::<MsfzChunk>() as u64 {
        return Err(ConvertError::ChunkTableMismatch { length, count });
    }
    reader
        .slice_at::<MsfzChunk>(header.chunk_table_offset.get() as usize, count as usize)
        .map_err(ConvertError::from)
}
