//! Transactions.

use crate::db::DB;
use crate::engine::EngineTxn;
use crate::error::{EngineError, Error, Result};
use crate::index::{SearchRequest, SearchResult};
use sdb_codec::Document;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

/// A transaction over the primary store plus query access to the index.
///
/// Reads see a snapshot of the store taken when the transaction began,
/// together with the transaction's own staged writes. Writes stay private
/// until [`commit`](Self::commit); index changes are queued and applied
/// only once the primary commit has succeeded.
///
/// Dropping an active transaction discards it.
pub struct Tx<'db> {
    db: &'db DB,
    txn: EngineTxn,
    /// Key -> document to index, or `None` to drop it from the index.
    ops: BTreeMap<Vec<u8>, Option<Document>>,
}

impl<'db> Tx<'db> {
    pub(crate) fn new(db: &'db DB, txn: EngineTxn) -> Self {
        Self {
            db,
            txn,
            ops: BTreeMap::new(),
        }
    }

    /// Whether this transaction may write.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.txn.is_writable()
    }

    /// Whether this transaction has been neither committed nor discarded.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.txn.is_active()
    }

    fn ensure_writable(&self) -> Result<()> {
        self.txn.ensure_active()?;
        if !self.txn.is_writable() {
            return Err(EngineError::ReadOnlyTransaction.into());
        }
        Ok(())
    }

    /// Loads and decodes the value stored at `key`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::KeyNotFound`] if there is no value.
    /// - An encoding error if the stored bytes do not decode as `T`.
    pub fn get<T: DeserializeOwned>(&mut self, key: &[u8]) -> Result<T> {
        let mut buf = self.db.pool().get();
        self.db.engine().get_into(&mut self.txn, key, &mut buf)?;
        Ok(sdb_codec::decode(&buf)?)
    }

    /// Raw bytes stored at `key`.
    ///
    /// # Errors
    ///
    /// [`EngineError::KeyNotFound`] if there is no value.
    pub fn get_bytes(&mut self, key: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.db.engine().get_into(&mut self.txn, key, &mut out)?;
        Ok(out)
    }

    /// Whether `key` holds a value.
    ///
    /// # Errors
    ///
    /// [`EngineError::TransactionClosed`] after a commit or discard.
    pub fn exists(&mut self, key: &[u8]) -> Result<bool> {
        Ok(self.db.engine().exists(&mut self.txn, key)?)
    }

    /// Stages `value` under `key` and queues it for indexing.
    ///
    /// `value` must serialize to a map (a struct or a map); anything else is
    /// rejected with [`CodecError::NotADocument`](sdb_codec::CodecError::NotADocument)
    /// before the store is touched.
    ///
    /// # Errors
    ///
    /// - [`EngineError::ReadOnlyTransaction`] on a read-only transaction.
    /// - [`EngineError::TransactionTooLarge`] if the write would exceed the
    ///   batch limits. The transaction stays usable.
    /// - An encoding error if `value` is not a document.
    pub fn set<T: Serialize + ?Sized>(&mut self, key: &[u8], value: &T) -> Result<()> {
        self.ensure_writable()?;
        let doc = Document::from_serialize(value)?;

        let mut buf = self.db.pool().get();
        doc.encode_into(&mut buf)?;
        self.db.engine().put(&mut self.txn, key, buf.to_vec())?;
        self.ops.insert(key.to_vec(), Some(doc));
        Ok(())
    }

    /// Stages raw bytes under `key`.
    ///
    /// The bytes are not decoded or indexed; any indexed document at `key` is
    /// dropped from the index on commit.
    ///
    /// # Errors
    ///
    /// As for [`set`](Self::set), minus the encoding errors.
    pub fn set_bytes(&mut self, key: &[u8], bytes: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        self.db.engine().put(&mut self.txn, key, bytes.to_vec())?;
        self.ops.insert(key.to_vec(), None);
        Ok(())
    }

    /// Stages the removal of `key` from the store and the index.
    ///
    /// Deleting a key that does not exist is not an error.
    ///
    /// # Errors
    ///
    /// [`EngineError::ReadOnlyTransaction`] on a read-only transaction.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        self.db.engine().delete(&mut self.txn, key)?;
        self.ops.insert(key.to_vec(), None);
        Ok(())
    }

    /// Keys of the documents matching `query`, ordered by `sort`.
    ///
    /// Each sort entry is a field name, `_id` or `_score`, with a leading `-`
    /// for descending order. Without sort fields hits come best match first.
    /// A blank query with no sort fields returns nothing; a blank query with
    /// sort fields matches every document.
    ///
    /// Only the index is consulted, so staged writes of this transaction
    /// are not visible.
    ///
    /// # Errors
    ///
    /// Index errors for a malformed query or sort field.
    pub fn find(&self, query: &str, sort: &[&str]) -> Result<Vec<Vec<u8>>> {
        self.txn.ensure_active()?;
        if query.trim().is_empty() && sort.is_empty() {
            return Ok(Vec::new());
        }
        let request = SearchRequest::new(query).sort(sort.iter().copied());
        Ok(self.db.index().search(&request)?.ids())
    }

    /// Runs a paged search against the index.
    ///
    /// # Errors
    ///
    /// - [`EngineError::TransactionClosed`] after a commit or discard.
    /// - Index errors for a malformed query or sort field, or a closed index.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResult> {
        self.txn.ensure_active()?;
        Ok(self.db.index().search(request)?)
    }

    /// Keys starting with `prefix`, in key order. Staged writes of this
    /// transaction are included.
    ///
    /// # Errors
    ///
    /// [`EngineError::TransactionClosed`] after a commit or discard.
    pub fn prefix(&mut self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self.db.engine().keys_with_prefix(&mut self.txn, prefix)?)
    }

    /// Commits the staged writes, then brings the index up to date.
    ///
    /// The transaction is closed afterwards whatever the outcome.
    ///
    /// # Errors
    ///
    /// - An engine error (for example a conflict) if the primary commit
    ///   fails. Nothing was written and the index is untouched.
    /// - An index error if the primary commit went through but applying
    ///   the index changes did not. The store is then ahead of the index
    ///   until [`DB::reload_index`] runs.
    pub fn commit(&mut self) -> Result<()> {
        let ops = std::mem::take(&mut self.ops);
        self.db.engine().commit(&mut self.txn)?;

        let total = ops.len();
        let index = self.db.index();
        for (applied, (key, op)) in ops.into_iter().enumerate() {
            let outcome = match op {
                Some(doc) => index.index(&key, &doc),
                None => index.delete(&key).map(|_| ()),
            };
            if let Err(e) = outcome {
                tracing::warn!(
                    db = %self.db.options().log_label,
                    error = %e,
                    stale = total - applied,
                    "index update failed after commit; reload the index"
                );
                return Err(Error::Index(e));
            }
        }
        Ok(())
    }

    /// Abandons the transaction. Harmless after a commit or a discard.
    pub fn discard(&mut self) {
        self.ops.clear();
        self.db.engine().discard(&mut self.txn);
    }
}

impl Drop for Tx<'_> {
    fn drop(&mut self) {
        self.discard();
    }
}

impl std::fmt::Debug for Tx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx")
            .field("id", &self.txn.id())
            .field("writable", &self.txn.is_writable())
            .field("active", &self.txn.is_active())
            .field("pending_index_ops", &self.ops.len())
            .finish()
    }
}
