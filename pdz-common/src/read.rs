//! A bounds-checked sequential reader over an immutable byte range.

use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

use crate::RangeError;

/// Marker for fixed-layout records that can be referenced at any byte offset.
///
/// Implemented automatically for every type that derives the required
/// `zerocopy` traits. Records use explicit little-endian field types, so no
/// alignment is required of the underlying buffer.
pub trait Record: FromBytes + KnownLayout + Immutable + Unaligned {}

impl<T: FromBytes + KnownLayout + Immutable + Unaligned> Record for T {}

/// A cursor over a byte slice.
///
/// All operations are total: a read that would cross the end of the range
/// returns a [`RangeError`] instead. Typed reads borrow records directly out
/// of the underlying slice and never copy.
#[derive(Clone, Debug)]
pub struct Reader<'d> {
    data: &'d [u8],
    pos: usize,
}

impl<'d> Reader<'d> {
    /// Creates a reader over the full slice, positioned at the start.
    pub fn new(data: &'d [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    /// Total size of the underlying range in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the underlying range is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The current cursor position.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Number of bytes between the cursor and the end of the range.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Whether `len` bytes can be read at the current cursor.
    pub fn can_read(&self, len: usize) -> bool {
        len <= self.remaining()
    }

    /// Whether `len` bytes can be read starting at `offset`.
    pub fn can_read_at(&self, offset: usize, len: usize) -> bool {
        offset <= self.data.len() && len <= self.data.len() - offset
    }

    /// Moves the cursor to an absolute offset.
    pub fn seek(&mut self, offset: usize) -> Result<(), RangeError> {
        if offset > self.data.len() {
            return Err(RangeError::SeekOutOfBounds {
                offset: offset as u64,
                size: self.data.len() as u64,
            });
        }
        self.pos = offset;
        Ok(())
    }

    /// Borrows `len` bytes starting at `offset` without moving the cursor.
    pub fn bytes_at(&self, offset: usize, len: usize) -> Result<&'d [u8], RangeError> {
        if !self.can_read_at(offset, len) {
            return Err(RangeError::ReadOutOfBounds {
                offset: offset as u64,
                len: len as u64,
                size: self.data.len() as u64,
            });
        }
        Ok(&self.data[offset..offset + len])
    }

    /// Borrows a record at `offset` without moving the cursor.
    pub fn peek_at<T: Record>(&self, offset: usize) -> Result<&'d T, RangeError> {
        let bytes = self.bytes_at(offset, std::mem::size_of::<T>())?;
        // The slice has the exact size and records are unaligned; the
        // conversion cannot fail.
        T::ref_from_bytes(bytes).map_err(|_| RangeError::ReadOutOfBounds {
            offset: offset as u64,
            len: std::mem::size_of::<T>() as u64,
            size: self.data.len() as u64,
        })
    }

    /// Borrows a record at the current cursor without moving it.
    pub fn peek<T: Record>(&self) -> Result<&'d T, RangeError> {
        self.peek_at(self.pos)
    }

    /// Borrows a record at the current cursor and advances past it.
    pub fn read<T: Record>(&mut self) -> Result<&'d T, RangeError> {
        let value = self.peek::<T>()?;
        self.pos += std::mem::size_of::<T>();
        Ok(value)
    }

    /// Reads a little-endian `u32` at the current cursor and advances.
    pub fn read_u32(&mut self) -> Result<u32, RangeError> {
        self.read::<U32>().map(|value| value.get())
    }

    /// Borrows `len` bytes at the current cursor and advances past them.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'d [u8], RangeError> {
        let bytes = self.bytes_at(self.pos, len)?;
        self.pos += len;
        Ok(bytes)
    }

    /// Borrows a slice of `count` records starting at `offset`.
    pub fn slice_at<T: Record>(&self, offset: usize, count: usize) -> Result<&'d [T], RangeError> {
        let len = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(RangeError::ReadOutOfBounds {
                offset: offset as u64,
                len: u64::MAX,
                size: self.data.len() as u64,
            })?;
        let bytes = self.bytes_at(offset, len)?;
        <[T]>::ref_from_bytes(bytes).map_err(|_| RangeError::ReadOutOfBounds {
            offset: offset as u64,
            len: len as u64,
            size: self.data.len() as u64,
        })
    }

    /// Returns a reader over the sub-range `[offset, offset + len)`.
    pub fn sub_reader(&self, offset: usize, len: usize) -> Result<Reader<'d>, RangeError> {
        Ok(Reader::new(self.bytes_at(offset, len)?))
    }
}
