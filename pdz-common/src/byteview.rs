//! Uniform access to binary data, whether memory-mapped or in-memory.

use std::borrow::Cow;
use std::fs::File;
use std::io;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

/// The owner of data behind a [`ByteView`].
#[derive(Debug)]
enum ByteViewBacking<'a> {
    Buf(Cow<'a, [u8]>),
    Mmap(Mmap),
}

impl Deref for ByteViewBacking<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match *self {
            ByteViewBacking::Buf(ref buf) => buf,
            ByteViewBacking::Mmap(ref mmap) => mmap,
        }
    }
}

/// A smart pointer for file bytes.
///
/// A `ByteView` dereferences into `&[u8]` regardless of whether it was
/// created by memory-mapping a file, from an owned vector, or from a borrowed
/// slice. Input files are opened and mapped exactly once per conversion; all
/// parse results borrow from the view for the duration of the operation.
///
/// Cloning is cheap: the backing storage is reference-counted.
#[derive(Clone, Debug)]
pub struct ByteView<'a> {
    backing: Arc<ByteViewBacking<'a>>,
}

impl<'a> ByteView<'a> {
    fn with_backing(backing: ByteViewBacking<'a>) -> Self {
        ByteView {
            backing: Arc::new(backing),
        }
    }

    /// Constructs a `ByteView` from a borrowed byte slice.
    pub fn from_slice(buffer: &'a [u8]) -> Self {
        ByteView::with_backing(ByteViewBacking::Buf(Cow::Borrowed(buffer)))
    }

    /// Constructs a `ByteView` from a vector of bytes.
    pub fn from_vec(buffer: Vec<u8>) -> Self {
        ByteView::with_backing(ByteViewBacking::Buf(Cow::Owned(buffer)))
    }

    /// Constructs a `ByteView` by memory-mapping an open file handle.
    pub fn map_file(file: &File) -> Result<Self, io::Error> {
        let backing = match unsafe { Mmap::map(file) } {
            Ok(mmap) => ByteViewBacking::Mmap(mmap),
            // Mapping an empty file is rejected by some platforms; treat it
            // as an empty buffer instead.
            Err(err) if err.kind() == io::ErrorKind::InvalidInput => {
                ByteViewBacking::Buf(Cow::Borrowed(b""))
            }
            Err(err) => return Err(err),
        };

        Ok(ByteView::with_backing(backing))
    }

    /// Constructs a `ByteView` by memory-mapping the file at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, io::Error> {
        let file = File::open(path)?;
        Self::map_file(&file)
    }

    /// Returns a slice of the underlying data.
    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        self.backing.deref()
    }
}

impl AsRef<[u8]> for ByteView<'_> {
    #[inline(always)]
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Deref for ByteView<'_> {
    type Target = [u8];

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}
