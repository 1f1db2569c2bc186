//! The backend trait.

use crate::error::{StorageError, StorageResult};

/// An append-only byte store.
///
/// Offsets returned by [`append`](Self::append) stay valid until the store is
/// truncated or replaced. Implementations must be `Send + Sync` so a log can
/// sit behind a shared lock.
pub trait StorageBackend: Send + Sync {
    /// Reads exactly `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// [`StorageError::OutOfRange`] if the range is not fully inside the store.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures.
    fn flush(&mut self) -> StorageResult<()>;

    /// Forces data and metadata to stable storage.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures.
    fn sync(&mut self) -> StorageResult<()>;

    /// Current size in bytes, i.e. the offset of the next append.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures.
    fn size(&self) -> StorageResult<u64>;

    /// Drops every byte at or after `new_size`.
    ///
    /// # Errors
    ///
    /// [`StorageError::InvalidTruncate`] if `new_size` exceeds the store size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically swaps the whole contents for `data`.
    ///
    /// Readers see either the old image or the new one, never a mix.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures; on error the old contents remain.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;

    /// Reads the entire store.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| StorageError::OutOfRange {
            offset: 0,
            len: usize::MAX,
            size,
        })?;
        self.read_at(0, len)
    }
}

/// Checks that `offset..offset+len` lies inside a store of `size` bytes.
pub(crate) fn check_range(offset: u64, len: usize, size: u64) -> StorageResult<()> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(StorageError::OutOfRange { offset, len, size }),
    }
}
