//! Writers over owned or pre-sized output ranges.
//!
//! Output files are resized up front and memory-mapped, so almost all writes
//! in this crate target a fixed window somewhere inside the mapping. The
//! exceptions are small variable-length buffers (the MSFZ stream directory),
//! which use [`DynamicWriter`].

use std::sync::Mutex;

use zerocopy::{Immutable, IntoBytes};

use crate::RangeError;

/// A growable little-endian record writer backed by a vector.
#[derive(Debug, Default)]
pub struct DynamicWriter {
    buf: Vec<u8>,
}

impl DynamicWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty writer with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        DynamicWriter {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the writer and returns its buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Appends raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Appends a fixed-layout record or a slice of records.
    pub fn write<T: IntoBytes + Immutable + ?Sized>(&mut self, value: &T) {
        self.write_bytes(value.as_bytes());
    }
}

/// A writer over a pre-sized output window.
///
/// Unlike [`DynamicWriter`], the backing range never grows; a write past the
/// end of the window is an error.
#[derive(Debug)]
pub struct FixedWriter<'d> {
    data: &'d mut [u8],
    pos: usize,
}

impl<'d> FixedWriter<'d> {
    /// Creates a writer over the window, positioned at the start.
    pub fn new(data: &'d mut [u8]) -> Self {
        FixedWriter { data, pos: 0 }
    }

    /// Total size of the window in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The current cursor position.
    pub fn pos(&self) -> usize {
        self.pos
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

    /// Copies raw bytes to the current cursor and advances past them.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), RangeError> {
        if bytes.len() > self.data.len() - self.pos {
            return Err(RangeError::WriteOverflow {
                offset: self.pos as u64,
                len: bytes.len() as u64,
                size: self.data.len() as u64,
            });
        }
        self.data[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    /// Writes a fixed-layout record or a slice of records at the cursor.
    pub fn write<T: IntoBytes + Immutable + ?Sized>(&mut self, value: &T) -> Result<(), RangeError> {
        self.write_bytes(value.as_bytes())
    }
}

struct RegionState<'d> {
    /// The yet-unreserved tail of the region.
    rest: &'d mut [u8],
    /// Offset of `rest[0]` relative to the start of the region.
    cursor: usize,
}

/// A thread-safe bump allocator over one shared output region.
///
/// [`reserve`](Self::reserve) atomically advances a cursor and hands out a
/// disjoint [`FixedWriter`] over the reserved window together with the
/// window's offset within the region. The window can then be written without
/// further locking; windows returned from one `RegionWriter` never overlap.
pub struct RegionWriter<'d> {
    state: Mutex<RegionState<'d>>,
    capacity: usize,
}

impl<'d> RegionWriter<'d> {
    /// Creates an allocator over the full region.
    pub fn new(data: &'d mut [u8]) -> Self {
        let capacity = data.len();
        RegionWriter {
            state: Mutex::new(RegionState {
                rest: data,
                cursor: 0,
            }),
            capacity,
        }
    }

    /// Total size of the region in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes reserved so far.
    pub fn reserved(&self) -> usize {
        self.state.lock().unwrap().cursor
    }

    /// Reserves the next `len` bytes of the region.
    ///
    /// Returns the offset of the window within the region and a writer over
    /// it. Fails when the region cannot fit the reservation.
    pub fn reserve(&self, len: usize) -> Result<(usize, FixedWriter<'d>), RangeError> {
        let mut state = self.state.lock().unwrap();
        if len > state.rest.len() {
            return Err(RangeError::RegionExhausted {
                offset: state.cursor as u64,
                len: len as u64,
                size: self.capacity as u64,
            });
        }
        let rest = std::mem::take(&mut state.rest);
        let (window, rest) = rest.split_at_mut(len);
        state.rest = rest;
        let offset = state.cursor;
        state.cursor += len;
        Ok((offset, FixedWriter::new(window)))
    }
}

/// A writer over a range containing reserved intervals ("holes") that must
/// never be written.
///
/// The writer presents a contiguous *virtual* address space that skips the
/// holes: its virtual length is the real length minus the hole sum, and a
/// single logical write is materialised as one copy per hole-free span.
/// Holes must be registered in ascending order, pairwise disjoint and within
/// the range.
#[derive(Debug)]
pub struct HoleWriter<'d> {
    data: &'d mut [u8],
    /// Half-open `[begin, end)` intervals in real offsets, ascending.
    holes: Vec<(usize, usize)>,
    /// Virtual cursor.
    pos: usize,
}

impl<'d> HoleWriter<'d> {
    /// Creates a writer over the range with no holes.
    pub fn new(data: &'d mut [u8]) -> Self {
        HoleWriter {
            data,
            holes: Vec::new(),
            pos: 0,
        }
    }

    /// Registers the hole `[begin, end)`.
    ///
    /// Holes must be added in ascending order and must not overlap.
    pub fn add_hole(&mut self, begin: usize, end: usize) {
        assert!(begin < end && end <= self.data.len());
        if let Some(&(_, prev_end)) = self.holes.last() {
            assert!(begin >= prev_end);
        }
        self.holes.push((begin, end));
    }

    /// The writable size of the range: real length minus the hole sum.
    pub fn virtual_len(&self) -> usize {
        let holes: usize = self.holes.iter().map(|&(b, e)| e - b).sum();
        self.data.len() - holes
    }

    /// The current virtual cursor position.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Maps a virtual offset to the corresponding real offset.
    fn adjust(&self, virt: usize) -> usize {
        let mut real = virt;
        for &(begin, end) in &self.holes {
            if begin <= real {
                real += end - begin;
            }
        }
        real
    }

    /// Splits the real range `[begin, end)` into hole-free spans.
    fn write_spans(&self, begin: usize, end: usize) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        let mut cursor = begin;
        for &(hole_begin, hole_end) in &self.holes {
            if hole_begin >= cursor && hole_begin < end {
                if cursor != hole_begin {
                    spans.push((cursor, hole_begin));
                }
                cursor = hole_end;
            }
        }
        if cursor != end {
            spans.push((cursor, end));
        }
        spans
    }

    /// Copies raw bytes to the virtual cursor, skipping holes, and advances.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), RangeError> {
        let begin = self.adjust(self.pos);
        let end = self.adjust(self.pos + bytes.len());
        if end > self.data.len() {
            return Err(RangeError::WriteOverflow {
                offset: self.pos as u64,
                len: bytes.len() as u64,
                size: self.virtual_len() as u64,
            });
        }

        let mut written = 0;
        for (span_begin, span_end) in self.write_spans(begin, end) {
            let len = span_end - span_begin;
            self.data[span_begin..span_end].copy_from_slice(&bytes[written..written + len]);
            written += len;
        }
        debug_assert_eq!(written, bytes.len());
        self.pos += bytes.len();
        Ok(())
    }

    /// Writes a fixed-layout record or a slice of records at the virtual
    /// cursor.
    pub fn write<T: IntoBytes + Immutable + ?Sized>(&mut self, value: &T) -> Result<(), RangeError> {
        self.write_bytes(value.as_bytes())
    }

    /// Splits the writer into two at a virtual offset.
    ///
    /// The left writer covers virtual offsets `[0, virt)`, the right one the
    /// remainder. Hole intervals are clipped to each side and re-based; the
    /// current cursor carries over to whichever side it falls into.
    pub fn split_at(self, virt: usize) -> Result<(HoleWriter<'d>, HoleWriter<'d>), RangeError> {
        if virt > self.virtual_len() {
            return Err(RangeError::SeekOutOfBounds {
                offset: virt as u64,
                size: self.virtual_len() as u64,
            });
        }

        let real_split = self.adjust(virt);
        let (left_data, right_data) = self.data.split_at_mut(real_split);

        let mut left_holes = Vec::new();
        let mut right_holes = Vec::new();
        for (begin, end) in self.holes {
            let clipped_begin = begin.min(real_split);
            let clipped_end = end.min(real_split);
            if clipped_begin != clipped_end {
                left_holes.push((clipped_begin, clipped_end));
            }
            if end > real_split {
                right_holes.push((begin.max(real_split) - real_split, end - real_split));
            }
        }

        let left = HoleWriter {
            data: left_data,
            holes: left_holes,
            pos: self.pos.min(virt),
        };
        let right = HoleWriter {
            data: right_data,
            holes: right_holes,
            pos: self.pos.saturating_sub(virt),
        };
        Ok((left, right))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;
    use zerocopy::byteorder::little_endian::U32;

    #[test]
    fn test_dynamic_writer_records() {
        let mut writer = DynamicWriter::new();
        writer.write(&U32::new(0x11223344));
        writer.write(&[U32::new(1), U32::new(2)][..]);

        assert_eq!(
            writer.as_bytes(),
            &[0x44, 0x33, 0x22, 0x11, 1, 0, 0, 0, 2, 0, 0, 0]
        );
    }

    #[test]
    fn test_fixed_writer_overflow() {
        let mut buf = [0u8; 4];
        let mut writer = FixedWriter::new(&mut buf);

        writer.write_bytes(&[1, 2, 3]).unwrap();
        assert!(writer.write_bytes(&[4, 5]).is_err());
        // A failed write leaves the cursor in place.
        writer.write_bytes(&[4]).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn test_region_writer_disjoint() {
        let mut buf = [0u8; 8];
        let region = RegionWriter::new(&mut buf);

        let (off_a, mut a) = region.reserve(2).unwrap();
        let (off_b, mut b) = region.reserve(4).unwrap();
        assert_eq!((off_a, off_b), (0, 2));

        // Windows can be written in any order, without the lock.
        b.write_bytes(&[4, 5, 6, 7]).unwrap();
        a.write_bytes(&[1, 2]).unwrap();

        assert_eq!(region.reserved(), 6);
        assert!(region.reserve(3).is_err());
        assert_eq!(buf, [1, 2, 4, 5, 6, 7, 0, 0]);
    }

    #[test]
    fn test_hole_writer_spans() {
        let mut buf = [0xEEu8; 12];
        let mut writer = HoleWriter::new(&mut buf);
        writer.add_hole(4, 8);

        assert_eq!(writer.virtual_len(), 8);
        writer.write_bytes(&[1, 2, 3, 4, 5, 6]).unwrap();
        writer.write_bytes(&[7, 8]).unwrap();
        assert!(writer.write_bytes(&[9]).is_err());

        // Bytes 4..8 are a hole and must remain untouched.
        assert_eq!(buf, [1, 2, 3, 4, 0xEE, 0xEE, 0xEE, 0xEE, 5, 6, 7, 8]);
    }

    #[test]
    fn test_hole_writer_write_into_trailing_hole_fails() {
        let mut buf = [0u8; 8];
        let mut writer = HoleWriter::new(&mut buf);
        writer.add_hole(6, 8);

        assert_eq!(writer.virtual_len(), 6);
        assert!(writer.write_bytes(&[0; 7]).is_err());
        writer.write_bytes(&[1; 6]).unwrap();
    }

    #[test]
    fn test_hole_writer_split() {
        let mut buf = [0xEEu8; 16];
        {
            let mut writer = HoleWriter::new(&mut buf);
            writer.add_hole(2, 4);
            writer.add_hole(10, 12);

            // Virtual space: 12 bytes; split into 6 + 6.
            let (mut left, mut right) = writer.split_at(6).unwrap();
            assert_eq!(left.virtual_len(), 6);
            assert_eq!(right.virtual_len(), 6);

            right.write_bytes(&[7, 8, 9, 10, 11, 12]).unwrap();
            left.write_bytes(&[1, 2, 3, 4, 5, 6]).unwrap();
        }

        assert_eq!(
            buf,
            [1, 2, 0xEE, 0xEE, 3, 4, 5, 6, 7, 8, 0xEE, 0xEE, 9, 10, 11, 12]
        );
    }

    #[test]
    fn test_hole_writer_split_at_hole_boundary() {
        let mut buf = [0xEEu8; 8];
        {
            let writer = {
                let mut writer = HoleWriter::new(&mut buf);
                writer.add_hole(2, 4);
                writer
            };

            // Virtual offset 2 sits exactly where the hole begins; the hole
            // lands on the left side.
            let (left, mut right) = writer.split_at(2).unwrap();
            assert_eq!(left.virtual_len(), 2);
            assert_eq!(right.virtual_len(), 4);
            right.write_bytes(&[5, 6, 7, 8]).unwrap();
        }

        assert_eq!(buf, [0xEE, 0xEE, 0xEE, 0xEE, 5, 6, 7, 8]);
    }
}
