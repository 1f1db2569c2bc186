//! Directory ownership.
//!
//! ```text
//! <root>/
//! ├─ database/
//! │  ├─ LOCK        # advisory lock, held while the DB is open
//! │  └─ wal.log     # primary engine write-ahead log
//! └─ search-index/
//!    ├─ MAPPING     # index mapping, written at creation
//!    └─ index.log   # index operation log
//! ```

use crate::error::{EngineError, EngineResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const WAL_FILE: &str = "wal.log";

/// The primary engine's directory, exclusively locked for as long as this
/// value lives.
#[derive(Debug)]
pub(crate) struct EngineDir {
    path: PathBuf,
    lock: File,
}

impl EngineDir {
    /// Creates the directory if needed and takes the lock.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Io`] if the path cannot be created or is not a
    ///   directory.
    /// - [`EngineError::DatabaseLocked`] if another handle holds the lock.
    pub(crate) fn open(path: &Path) -> EngineResult<Self> {
        fs::create_dir_all(path)?;
        if !path.is_dir() {
            return Err(EngineError::invalid_format(format!(
                "not a directory: {}",
                path.display()
            )));
        }

        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(EngineError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            lock,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn wal_path(&self) -> PathBuf {
        self.path.join(WAL_FILE)
    }

    /// Releases the lock early; dropping the value does the same.
    pub(crate) fn unlock(self) -> EngineResult<()> {
        FileExt::unlock(&self.lock)?;
        Ok(())
    }
}
