//! Rebuilding the search index from the primary store.

use crate::db::DB;
use crate::error::Result;
use crate::index::SearchRequest;
use crate::tx::Tx;
use sdb_codec::Document;
use serde::Serialize;

impl DB {
    /// Rebuilds the search index from the primary store.
    ///
    /// Every indexed document is removed, then every key in the store is
    /// read in key order inside one read-only transaction, turned into a
    /// document by `decode` and indexed under its key. Returns the number of
    /// documents indexed.
    ///
    /// `decode` receives the transaction and the key; it usually just calls
    /// [`Tx::get`]. Decoding into [`Document`] works for any stored document.
    ///
    /// Running it twice in a row gives the same index as running it once,
    /// so a failed reload is fixed by running it again.
    ///
    /// # Errors
    ///
    /// The first error from the index, the store or `decode`. The index is
    /// then left part-way rebuilt.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sdb_core::{Document, DB};
    ///
    /// let db = DB::open("")?;
    /// let reindexed = db.reload_index(|tx, key| tx.get::<Document>(key))?;
    /// assert_eq!(reindexed, 0);
    /// # Ok::<(), sdb_core::Error>(())
    /// ```
    pub fn reload_index<T, F>(&self, mut decode: F) -> Result<usize>
    where
        T: Serialize,
        F: FnMut(&mut Tx<'_>, &[u8]) -> Result<T>,
    {
        let label = &self.options().log_label;
        let index = self.index();

        let stale = index.search(&SearchRequest::new("*"))?;
        for hit in &stale.hits {
            index.delete(&hit.id)?;
        }
        tracing::info!(db = %label, removed = stale.total, "index cleared; rebuilding");

        let mut tx = self.new_tx(DB::READ_ONLY)?;
        let keys = tx.prefix(b"")?;
        for key in &keys {
            let value = decode(&mut tx, key)?;
            let doc = Document::from_serialize(&value)?;
            index.index(key, &doc)?;
        }
        tx.discard();

        index.compact()?;
        tracing::info!(db = %label, documents = keys.len(), "index rebuilt");
        Ok(keys.len())
    }
}
