//! Database options.

use crate::index::IndexMapping;
use std::path::{Path, PathBuf};

/// Sub-directory holding the primary engine's files.
pub const DATABASE_DIR: &str = "database";

/// Sub-directory holding the search index's files.
pub const SEARCH_INDEX_DIR: &str = "search-index";

/// Default number of pooled buffers.
pub const BUFFER_POOL_SIZE: usize = 500;

/// Default byte cap of a pooled buffer.
pub const BUFFER_POOL_MAX_BYTES: usize = 5 * 1024;

/// Tuning for the primary key-value engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Fsync the write-ahead log on every commit. When false the log is only
    /// flushed to the OS.
    pub sync_writes: bool,

    /// Maximum number of distinct keys one transaction may write.
    pub max_batch_count: usize,

    /// Maximum number of key and value bytes one transaction may write.
    pub max_batch_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            sync_writes: true,
            max_batch_count: 100_000,
            max_batch_size: 10 * 1024 * 1024,
        }
    }
}

impl EngineOptions {
    /// Sets whether commits fsync.
    #[must_use]
    pub const fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }

    /// Sets the per-transaction key limit.
    #[must_use]
    pub const fn max_batch_count(mut self, count: usize) -> Self {
        self.max_batch_count = count;
        self
    }

    /// Sets the per-transaction byte limit.
    #[must_use]
    pub const fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }
}

/// Options for [`crate::DB::open_with`].
#[derive(Debug, Clone)]
pub struct Options {
    /// Root directory. `None` keeps both engines in memory.
    pub directory: Option<PathBuf>,

    /// Primary engine sub-directory under `directory`.
    pub database_dir: String,

    /// Search index sub-directory under `directory`.
    pub search_index_dir: String,

    /// Primary engine tuning.
    pub engine: EngineOptions,

    /// Field mappings used when the index is created.
    pub mapping: IndexMapping,

    /// Number of idle buffers the pool keeps.
    pub buffer_pool_size: usize,

    /// Buffers grown past this many bytes are not returned to the pool.
    pub buffer_pool_max_bytes: usize,

    /// Preallocate the pool at open.
    pub buffer_pool_fill: bool,

    /// Label attached to every log event emitted for this database.
    pub log_label: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            directory: None,
            database_dir: DATABASE_DIR.to_string(),
            search_index_dir: SEARCH_INDEX_DIR.to_string(),
            engine: EngineOptions::default(),
            mapping: IndexMapping::default(),
            buffer_pool_size: BUFFER_POOL_SIZE,
            buffer_pool_max_bytes: BUFFER_POOL_MAX_BYTES,
            buffer_pool_fill: false,
            log_label: "sdb".to_string(),
        }
    }
}

impl Options {
    /// Defaults rooted at `dir`. An empty path means in memory.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self::default().directory(dir)
    }

    /// Defaults for an in-memory database. Commits skip fsync since there is
    /// nothing to sync.
    #[must_use]
    pub fn in_memory() -> Self {
        let mut opts = Self::default();
        opts.engine.sync_writes = false;
        opts
    }

    /// Sets the root directory. An empty path selects in-memory storage.
    #[must_use]
    pub fn directory(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        self.directory = if dir.as_os_str().is_empty() {
            None
        } else {
            Some(dir.to_path_buf())
        };
        self
    }

    /// Sets the engine tuning.
    #[must_use]
    pub fn engine(mut self, engine: EngineOptions) -> Self {
        self.engine = engine;
        self
    }

    /// Sets the index mapping.
    #[must_use]
    pub fn mapping(mut self, mapping: IndexMapping) -> Self {
        self.mapping = mapping;
        self
    }

    /// Sets the buffer pool size, byte cap and prefill flag.
    #[must_use]
    pub fn buffer_pool(mut self, size: usize, max_bytes: usize, fill: bool) -> Self {
        self.buffer_pool_size = size;
        self.buffer_pool_max_bytes = max_bytes;
        self.buffer_pool_fill = fill;
        self
    }

    /// Sets the log label.
    #[must_use]
    pub fn log_label(mut self, label: impl Into<String>) -> Self {
        self.log_label = label.into();
        self
    }

    /// True when no directory is configured.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.directory.is_none()
    }

    pub(crate) fn database_path(&self) -> Option<PathBuf> {
        self.directory.as_ref().map(|d| d.join(&self.database_dir))
    }

    pub(crate) fn search_index_path(&self) -> Option<PathBuf> {
        self.directory.as_ref().map(|d| d.join(&self.search_index_dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = Options::default();
        assert!(opts.is_in_memory());
        assert_eq!(opts.buffer_pool_size, 500);
        assert_eq!(opts.buffer_pool_max_bytes, 5 * 1024);
        assert!(!opts.buffer_pool_fill);
        assert!(opts.engine.sync_writes);
        assert_eq!(opts.mapping.doctype_field, "Doctype");
        assert_eq!(opts.log_label, "sdb");
    }

    #[test]
    fn empty_directory_means_memory() {
        assert!(Options::new("").is_in_memory());
        assert!(!Options::in_memory().engine.sync_writes);

        let opts = Options::new("/var/lib/app");
        assert_eq!(
            opts.database_path(),
            Some(PathBuf::from("/var/lib/app/database"))
        );
        assert_eq!(
            opts.search_index_path(),
            Some(PathBuf::from("/var/lib/app/search-index"))
        );
    }

    #[test]
    fn builders_chain() {
        let opts = Options::in_memory()
            .engine(EngineOptions::default().max_batch_count(3).max_batch_size(64))
            .buffer_pool(5, 128, true)
            .log_label("usersd");

        assert_eq!(opts.engine.max_batch_count, 3);
        assert_eq!(opts.engine.max_batch_size, 64);
        assert_eq!(opts.buffer_pool_size, 5);
        assert!(opts.buffer_pool_fill);
        assert_eq!(opts.log_label, "usersd");
    }
}
