//! Append-only file backend.

use crate::backend::{check_range, StorageBackend};
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A log kept in a single file.
///
/// `flush` hands data to the OS; `sync` calls `fsync`. [`replace`] writes the
/// new image next to the file, syncs it, then renames it into place.
///
/// [`replace`]: StorageBackend::replace
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    file: File,
    size: u64,
}

impl FileBackend {
    /// Opens `path`, creating an empty file if it does not exist.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures (missing parent, path is a directory, ...).
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = open_rw(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner { file, size }),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn scratch_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn open_rw(path: &Path) -> StorageResult<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    Ok(file)
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> StorageResult<()> {
    Ok(())
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        check_range(offset, len, inner.size)?;
        let mut buf = vec![0u8; len];
        if len > 0 {
            inner.file.seek(SeekFrom::Start(offset))?;
            inner.file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let inner = self.inner.get_mut();
        let offset = inner.size;
        if !data.is_empty() {
            inner.file.seek(SeekFrom::End(0))?;
            inner.file.write_all(data)?;
            inner.size += data.len() as u64;
        }
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().size)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let inner = self.inner.get_mut();
        if new_size > inner.size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size: inner.size,
            });
        }
        inner.file.set_len(new_size)?;
        inner.file.sync_all()?;
        inner.size = new_size;
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        let scratch = self.scratch_path();
        {
            let mut tmp = File::create(&scratch)?;
            tmp.write_all(data)?;
            tmp.sync_all()?;
        }
        if let Err(e) = fs::rename(&scratch, &self.path) {
            let _ = fs::remove_file(&scratch);
            return Err(e.into());
        }
        sync_parent(&self.path)?;

        let file = open_rw(&self.path)?;
        let inner = self.inner.get_mut();
        inner.size = file.metadata()?.len();
        inner.file = file;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");

        let log = FileBackend::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(log.size().unwrap(), 0);
        assert_eq!(log.path(), path);
    }

    #[test]
    fn appended_bytes_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");

        {
            let mut log = FileBackend::open(&path).unwrap();
            assert_eq!(log.append(b"abc").unwrap(), 0);
            assert_eq!(log.append(b"defg").unwrap(), 3);
            log.sync().unwrap();
        }

        let log = FileBackend::open(&path).unwrap();
        assert_eq!(log.size().unwrap(), 7);
        assert_eq!(log.read_at(3, 4).unwrap(), b"defg");
        assert_eq!(log.read_all().unwrap(), b"abcdefg");
    }

    #[test]
    fn out_of_range_read_is_rejected() {
        let dir = tempdir().unwrap();
        let mut log = FileBackend::open(&dir.path().join("x")).unwrap();
        log.append(b"12345").unwrap();

        assert!(matches!(
            log.read_at(4, 2),
            Err(StorageError::OutOfRange { size: 5, .. })
        ));
        assert!(log.read_at(5, 0).unwrap().is_empty());
    }

    #[test]
    fn open_on_directory_fails() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            FileBackend::open(dir.path()),
            Err(StorageError::Io(_))
        ));
    }

    #[test]
    fn truncate_drops_tail() {
        let dir = tempdir().unwrap();
        let mut log = FileBackend::open(&dir.path().join("x")).unwrap();
        log.append(b"keep-drop").unwrap();

        log.truncate(4).unwrap();
        assert_eq!(log.read_all().unwrap(), b"keep");
        assert!(matches!(
            log.truncate(10),
            Err(StorageError::InvalidTruncate { requested: 10, size: 4 })
        ));
    }

    #[test]
    fn replace_swaps_contents_and_keeps_appending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.log");
        let mut log = FileBackend::open(&path).unwrap();
        log.append(b"old old old").unwrap();

        log.replace(b"new").unwrap();
        assert_eq!(log.size().unwrap(), 3);
        assert_eq!(log.append(b"+1").unwrap(), 3);
        log.flush().unwrap();

        drop(log);
        assert_eq!(fs::read(&path).unwrap(), b"new+1");
        assert!(!dir.path().join("index.log.tmp").exists());
    }
}
