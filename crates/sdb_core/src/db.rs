//! The database handle.

use crate::config::Options;
use crate::engine::{CompactStats, Engine};
use crate::error::{Error, Result};
use crate::index::SearchIndex;
use crate::pool::BufferPool;
use crate::tx::Tx;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// A document store: the primary key-value engine plus its search index.
///
/// `DB` owns both engines and the buffer pool. Transactions borrow it, so
/// the borrow checker keeps a `DB` alive while any [`Tx`] exists.
///
/// # Example
///
/// ```rust
/// use sdb_core::DB;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Note {
///     title: String,
/// }
///
/// let db = DB::open("")?; // in memory
/// let mut tx = db.new_tx(DB::READ_WRITE)?;
/// tx.set(b"note:1", &Note { title: "groceries".into() })?;
/// tx.commit()?;
///
/// let tx = db.new_tx(DB::READ_ONLY)?;
/// assert_eq!(tx.find("groceries", &[])?, vec![b"note:1".to_vec()]);
/// # Ok::<(), sdb_core::Error>(())
/// ```
pub struct DB {
    options: Options,
    engine: Engine,
    index: SearchIndex,
    pool: BufferPool,
    closed: AtomicBool,
}

impl DB {
    /// Argument to [`new_tx`](Self::new_tx) for a read-write transaction.
    pub const READ_WRITE: bool = true;
    /// Argument to [`new_tx`](Self::new_tx) for a read-only transaction.
    pub const READ_ONLY: bool = false;

    /// Opens (or creates) a database rooted at `dir` with default options.
    /// An empty path opens a throwaway in-memory database.
    ///
    /// # Errors
    ///
    /// See [`open_with`](Self::open_with).
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let options = if dir.as_os_str().is_empty() {
            Options::in_memory()
        } else {
            Options::new(dir)
        };
        Self::open_with(options)
    }

    /// Opens (or creates) a database with `options`.
    ///
    /// # Errors
    ///
    /// - [`Error::Engine`] if the primary store cannot be opened (the path
    ///   is unusable, another handle holds the lock, the log is corrupt).
    /// - [`Error::Index`] if the search index cannot be opened.
    pub fn open_with(options: Options) -> Result<Self> {
        let pool = BufferPool::new(options.buffer_pool_size, options.buffer_pool_max_bytes);
        if options.buffer_pool_fill {
            pool.fill();
        }

        let engine = Engine::open(options.database_path().as_deref(), options.engine)?;
        let index = match SearchIndex::open(
            options.search_index_path().as_deref(),
            options.mapping.clone(),
        ) {
            Ok(index) => index,
            Err(e) => {
                if let Err(close) = engine.close() {
                    tracing::warn!(db = %options.log_label, error = %close, "closing primary engine after failed open");
                }
                return Err(Error::Index(e));
            }
        };

        tracing::info!(
            db = %options.log_label,
            directory = ?options.directory,
            in_memory = options.is_in_memory(),
            documents = index.doc_count(),
            "database opened"
        );

        Ok(Self {
            options,
            engine,
            index,
            pool,
            closed: AtomicBool::new(false),
        })
    }

    /// Starts a transaction; see [`READ_WRITE`](Self::READ_WRITE) and
    /// [`READ_ONLY`](Self::READ_ONLY).
    ///
    /// # Errors
    ///
    /// [`EngineError::DatabaseClosed`](crate::EngineError::DatabaseClosed)
    /// after [`close`](Self::close).
    pub fn new_tx(&self, writable: bool) -> Result<Tx<'_>> {
        let txn = self.engine.begin(writable)?;
        Ok(Tx::new(self, txn))
    }

    /// Closes the primary engine, then the index.
    ///
    /// Both are closed even if the first fails; the first error is
    /// returned. Calling `close` again does nothing.
    ///
    /// # Errors
    ///
    /// The first failure from either engine.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let engine = self.engine.close().map_err(Error::from);
        let index = self.index.close().map_err(Error::from);
        tracing::info!(db = %self.options.log_label, "database closed");
        engine.and(index)
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Rewrites both logs down to their live contents.
    ///
    /// # Errors
    ///
    /// The first failure; a failed rewrite leaves that log as it was.
    pub fn compact(&self) -> Result<CompactStats> {
        let stats = self.engine.compact()?;
        self.index.compact()?;
        Ok(stats)
    }

    /// Latest committed sequence number of the primary store.
    #[must_use]
    pub fn committed_seq(&self) -> u64 {
        self.engine.committed_seq()
    }

    /// The options this database was opened with.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The search index.
    #[must_use]
    pub fn index(&self) -> &SearchIndex {
        &self.index
    }

    /// The scratch buffer pool.
    #[must_use]
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(db = %self.options.log_label, error = %e, "error closing database on drop");
        }
    }
}

impl std::fmt::Debug for DB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DB")
            .field("label", &self.options.log_label)
            .field("directory", &self.options.directory)
            .field("closed", &self.is_closed())
            .field("engine", &self.engine)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineOptions;
    use crate::error::EngineError;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        body: String,
    }

    fn entry(body: &str) -> Entry {
        Entry { body: body.into() }
    }

    #[test]
    fn in_memory_open_and_close() {
        let db = DB::open("").unwrap();
        assert!(db.options().is_in_memory());
        assert!(!db.options().engine.sync_writes);
        db.close().unwrap();
        db.close().unwrap();
        assert!(db.is_closed());
        assert!(matches!(
            db.new_tx(DB::READ_ONLY).unwrap_err(),
            Error::Engine(EngineError::DatabaseClosed)
        ));
    }

    #[test]
    fn on_disk_layout() {
        let dir = tempdir().unwrap();
        let db = DB::open(dir.path()).unwrap();
        assert!(dir.path().join("database").is_dir());
        assert!(dir.path().join("search-index").join("MAPPING").is_file());
        db.close().unwrap();
    }

    #[test]
    fn second_open_is_locked_out() {
        let dir = tempdir().unwrap();
        let db = DB::open(dir.path()).unwrap();
        let err = DB::open(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Engine(EngineError::DatabaseLocked)), "{err:?}");
        db.close().unwrap();
        DB::open(dir.path()).unwrap().close().unwrap();
    }

    #[test]
    fn custom_subdirectories() {
        let dir = tempdir().unwrap();
        let mut options = Options::new(dir.path());
        options.database_dir = "kv".into();
        options.search_index_dir = "fts".into();
        let db = DB::open_with(options).unwrap();
        assert!(dir.path().join("kv").is_dir());
        assert!(dir.path().join("fts").is_dir());
        drop(db);
    }

    #[test]
    fn batch_limits_come_from_options() {
        let db = DB::open_with(
            Options::in_memory().engine(EngineOptions::default().max_batch_count(2)),
        )
        .unwrap();
        let mut tx = db.new_tx(DB::READ_WRITE).unwrap();
        tx.set(b"a", &entry("1")).unwrap();
        tx.set(b"b", &entry("2")).unwrap();
        let err = tx.set(b"c", &entry("3")).unwrap_err();
        assert!(err.is_transaction_too_large(), "{err:?}");
        tx.commit().unwrap();

        let mut tx = db.new_tx(DB::READ_ONLY).unwrap();
        assert_eq!(tx.prefix(b"").unwrap().len(), 2);
    }

    #[test]
    fn compact_keeps_data() {
        let dir = tempdir().unwrap();
        {
            let db = DB::open(dir.path()).unwrap();
            for round in 0..10 {
                let mut tx = db.new_tx(DB::READ_WRITE).unwrap();
                tx.set(b"doc", &entry(&format!("round {round}"))).unwrap();
                tx.commit().unwrap();
            }
            let stats = db.compact().unwrap();
            assert!(stats.bytes_after < stats.bytes_before);
            assert_eq!(stats.live_keys, 1);
        }
        let db = DB::open(dir.path()).unwrap();
        let mut tx = db.new_tx(DB::READ_ONLY).unwrap();
        assert_eq!(tx.get::<Entry>(b"doc").unwrap(), entry("round 9"));
        assert_eq!(tx.find("body:9", &[]).unwrap(), vec![b"doc".to_vec()]);
    }

    #[test]
    fn pool_is_sized_and_filled_from_options() {
        let db = DB::open_with(Options::in_memory().buffer_pool(8, 1024, true)).unwrap();
        assert_eq!(db.pool().size(), 8);
        assert_eq!(db.pool().max_bytes(), 1024);
        assert_eq!(db.pool().idle(), 8);

        let mut tx = db.new_tx(DB::READ_WRITE).unwrap();
        tx.set(b"k", &entry("small")).unwrap();
        tx.commit().unwrap();
        assert_eq!(db.pool().idle(), 8);
    }
}
