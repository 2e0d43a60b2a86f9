//! Memory-mapped, read-only view over a source video file.
//!
//! Slices handed out by [`SourceBuffer::read_range`] borrow the mapping
//! through a shared read guard, so the mapping cannot be released while any
//! view is alive: [`SourceBuffer::close`] takes the exclusive side of the
//! same lock.

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use hlsduo_common::{Error, Result};
use memmap2::Mmap;
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};

/// A zero-copy borrow of part of a [`SourceBuffer`].
pub type SourceView<'a> = MappedRwLockReadGuard<'a, [u8]>;

enum Mapping {
    /// Zero-length files cannot be mapped.
    Empty,
    Mapped(Mmap),
    Closed,
}

/// Immutable bytes of one source file, shared by both pipelines.
pub struct SourceBuffer {
    path: PathBuf,
    len: u64,
    mapping: RwLock<Mapping>,
}

impl SourceBuffer {
    /// Map `path` into memory.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the file does not exist.
    /// - [`Error::Io`] for permission and other read failures.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::not_found(path),
            _ => Error::io(format!("failed to open {}", path.display()), e),
        })?;
        let metadata = file
            .metadata()
            .map_err(|e| Error::io(format!("failed to stat {}", path.display()), e))?;
        if !metadata.is_file() {
            return Err(Error::io(
                format!("failed to open {}", path.display()),
                std::io::Error::new(ErrorKind::InvalidInput, "not a regular file"),
            ));
        }
        let len = metadata.len();

        let mapping = if len == 0 {
            Mapping::Empty
        } else {
            // SAFETY: the file is opened read-only and sources are treated as
            // immutable for as long as they are being streamed.
            let map = unsafe { Mmap::map(&file) }
                .map_err(|e| Error::io(format!("failed to map {}", path.display()), e))?;
            Mapping::Mapped(map)
        };

        tracing::debug!(path = %path.display(), bytes = len, "Mapped source buffer");

        Ok(Self {
            path: path.to_path_buf(),
            len,
            mapping: RwLock::new(mapping),
        })
    }

    /// Borrow `[offset, offset + length)` without copying.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyClosed`] once the buffer has been released.
    /// - [`Error::OutOfBounds`] if the range exceeds the mapped size.
    pub fn read_range(&self, offset: u64, length: u64) -> Result<SourceView<'_>> {
        let guard = self.mapping.read();
        if matches!(*guard, Mapping::Closed) {
            return Err(Error::AlreadyClosed);
        }

        let end = offset
            .checked_add(length)
            .filter(|&end| end <= self.len)
            .ok_or(Error::OutOfBounds {
                offset,
                length,
                size: self.len,
            })?;
        let (start, end) = (offset as usize, end as usize);

        Ok(RwLockReadGuard::map(guard, |mapping| match mapping {
            Mapping::Mapped(map) => &map[start..end],
            Mapping::Empty | Mapping::Closed => &[][..],
        }))
    }

    /// Release the mapping.
    ///
    /// Blocks until outstanding views are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyClosed`] on the second and later calls.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.mapping.write();
        match std::mem::replace(&mut *guard, Mapping::Closed) {
            Mapping::Closed => Err(Error::AlreadyClosed),
            _released => {
                tracing::debug!(path = %self.path.display(), "Released source buffer");
                Ok(())
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.mapping.read(), Mapping::Closed)
    }

    /// Size of the file at open time.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for SourceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceBuffer")
            .field("path", &self.path)
            .field("len", &self.len)
            .field("closed", &self.is_closed())
            .finish()
    }
}
