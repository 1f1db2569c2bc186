//! Per-transaction state of the primary engine.

use crate::config::EngineOptions;
use crate::error::{EngineError, EngineResult};
use std::collections::{BTreeMap, HashSet};

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxnState {
    Active,
    Committed,
    Discarded,
}

/// A staged write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingWrite {
    Put(Vec<u8>),
    Delete,
}

impl PendingWrite {
    fn weight(&self, key: &[u8]) -> usize {
        key.len()
            + match self {
                Self::Put(v) => v.len(),
                Self::Delete => 0,
            }
    }
}

/// Buffered writes, read set and snapshot of one transaction.
#[derive(Debug)]
pub(crate) struct EngineTxn {
    id: u64,
    snapshot: u64,
    writable: bool,
    state: TxnState,
    writes: BTreeMap<Vec<u8>, PendingWrite>,
    reads: HashSet<Vec<u8>>,
    staged_bytes: usize,
}

impl EngineTxn {
    pub(crate) fn new(id: u64, snapshot: u64, writable: bool) -> Self {
        Self {
            id,
            snapshot,
            writable,
            state: TxnState::Active,
            writes: BTreeMap::new(),
            reads: HashSet::new(),
            staged_bytes: 0,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn snapshot(&self) -> u64 {
        self.snapshot
    }

    pub(crate) fn is_writable(&self) -> bool {
        self.writable
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }

    pub(crate) fn ensure_active(&self) -> EngineResult<()> {
        match self.state {
            TxnState::Active => Ok(()),
            TxnState::Committed | TxnState::Discarded => Err(EngineError::TransactionClosed),
        }
    }

    fn ensure_writable(&self) -> EngineResult<()> {
        self.ensure_active()?;
        if self.writable {
            Ok(())
        } else {
            Err(EngineError::ReadOnlyTransaction)
        }
    }

    /// Stages a write, enforcing the batch limits.
    ///
    /// A rejected write leaves the transaction exactly as it was.
    pub(crate) fn stage(
        &mut self,
        key: &[u8],
        write: PendingWrite,
        limits: &EngineOptions,
    ) -> EngineResult<()> {
        self.ensure_writable()?;
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }

        let previous = self.writes.get(key).map_or(0, |w| w.weight(key));
        let size = self.staged_bytes - previous + write.weight(key);
        let count = self.writes.len() + usize::from(!self.writes.contains_key(key));
        if count > limits.max_batch_count || size > limits.max_batch_size {
            return Err(EngineError::TransactionTooLarge { count, size });
        }

        self.writes.insert(key.to_vec(), write);
        self.staged_bytes = size;
        Ok(())
    }

    pub(crate) fn pending(&self, key: &[u8]) -> Option<&PendingWrite> {
        self.writes.get(key)
    }

    pub(crate) fn writes(&self) -> &BTreeMap<Vec<u8>, PendingWrite> {
        &self.writes
    }

    /// Moves the staged writes out, leaving the transaction with none.
    pub(crate) fn take_writes(&mut self) -> BTreeMap<Vec<u8>, PendingWrite> {
        self.staged_bytes = 0;
        std::mem::take(&mut self.writes)
    }

    /// Records a read for conflict detection; read-only transactions never
    /// conflict so they skip it.
    pub(crate) fn record_read(&mut self, key: &[u8]) {
        if self.writable && !self.writes.contains_key(key) {
            self.reads.insert(key.to_vec());
        }
    }

    /// Every key whose concurrent modification invalidates this transaction.
    pub(crate) fn conflict_keys(&self) -> impl Iterator<Item = &[u8]> {
        self.reads
            .iter()
            .map(Vec::as_slice)
            .chain(self.writes.keys().map(Vec::as_slice))
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TxnState::Committed;
        self.clear();
    }

    pub(crate) fn mark_discarded(&mut self) {
        self.state = TxnState::Discarded;
        self.clear();
    }

    fn clear(&mut self) {
        self.writes.clear();
        self.reads.clear();
        self.staged_bytes = 0;
    }
}
