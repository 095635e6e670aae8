//! Common byte-range primitives for `pdz`.
//!
//! This crate exposes the building blocks the transcoder is assembled from:
//!
//!  - [`ByteView`]: uniform access to file bytes, memory-mapped or in-memory.
//!  - [`Reader`]: a bounds-checked cursor over an immutable byte range.
//!  - [`DynamicWriter`]: a growable little-endian record writer.
//!  - [`FixedWriter`]: a writer over a pre-sized output window.
//!  - [`RegionWriter`]: a thread-safe bump allocator that hands out disjoint
//!    [`FixedWriter`] windows over one shared output range.
//!  - [`HoleWriter`]: a writer over a range with reserved intervals that must
//!    never be touched, presenting a contiguous virtual address space.
//!
//! None of these types know anything about PDB or MSFZ; they only move bytes.

#![warn(missing_docs)]

mod byteview;
mod read;
mod write;

pub use crate::byteview::*;
pub use crate::read::*;
pub use crate::write::*;

use thiserror::Error;

/// An error raised by the byte-range primitives.
///
/// Every operation in this crate is total: instead of reading or writing out
/// of bounds, it reports where the violation would have happened.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RangeError {
    /// A read would have crossed the end of the underlying range.
    #[error("read of {len} bytes at offset {offset} exceeds range of {size} bytes")]
    ReadOutOfBounds {
        /// Offset the read started at.
        offset: u64,
        /// Number of bytes requested.
        len: u64,
        /// Total size of the range.
        size: u64,
    },

    /// A write would have crossed the end of a fixed-size window.
    #[error("write of {len} bytes at offset {offset} exceeds window of {size} bytes")]
    WriteOverflow {
        /// Offset the write started at.
        offset: u64,
        /// Number of bytes to be written.
        len: u64,
        /// Total size of the window.
        size: u64,
    },

    /// A reservation would have exhausted a shared output region.
    #[error("reservation of {len} bytes at offset {offset} exhausts region of {size} bytes")]
    RegionExhausted {
        /// Bump-cursor position at the time of the reservation.
        offset: u64,
        /// Number of bytes requested.
        len: u64,
        /// Total size of the region.
        size: u64,
    },

    /// A seek target lies outside the underlying range.
    #[error("seek to offset {offset} exceeds range of {size} bytes")]
    SeekOutOfBounds {
        /// The requested cursor position.
        offset: u64,
        /// Total size of the range.
        size: u64,
    },
}
