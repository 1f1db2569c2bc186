//! The primary key-value engine.
//!
//! An ordered, multi-version key-value store made durable by a write-ahead
//! log. It gives the rest of the crate:
//!
//! - **Snapshot reads.** A transaction reads the state as of the last commit
//!   before it began, no matter what commits afterwards.
//! - **Optimistic concurrency.** Writes are buffered in the transaction. At
//!   commit, if any key the transaction read or wrote has a committed version
//!   newer than its snapshot, the commit fails with
//!   [`EngineError::Conflict`] and nothing is written.
//! - **Atomic, durable commits.** A transaction's writes hit the log as one
//!   batch ending in a commit record; recovery applies only complete batches.
//!
//! There is one commit at a time; readers never block on commits.

mod memtable;
mod txn;
mod wal;

pub(crate) use txn::EngineTxn;

use crate::config::EngineOptions;
use crate::dir::EngineDir;
use crate::error::{EngineError, EngineResult};
use memtable::MemTable;
use parking_lot::{Mutex, RwLock};
use sdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use txn::PendingWrite;
use wal::{Wal, WalRecord};

/// Result of [`Engine::compact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactStats {
    /// Log size before compaction.
    pub bytes_before: u64,
    /// Log size after compaction.
    pub bytes_after: u64,
    /// Live keys written to the new log.
    pub live_keys: usize,
}

pub(crate) struct Engine {
    options: EngineOptions,
    dir: Mutex<Option<EngineDir>>,
    /// Held for the whole of a commit, which serializes commits.
    wal: Mutex<Wal>,
    mem: RwLock<MemTable>,
    next_txid: AtomicU64,
    committed_seq: AtomicU64,
    /// Snapshot sequence -> number of open transactions reading at it.
    snapshots: Mutex<BTreeMap<u64, usize>>,
    closed: AtomicBool,
}

impl Engine {
    /// Opens the engine in `path`, or in memory when `path` is `None`.
    pub(crate) fn open(path: Option<&Path>, options: EngineOptions) -> EngineResult<Self> {
        let (dir, backend): (Option<EngineDir>, Box<dyn StorageBackend>) = match path {
            Some(path) => {
                let dir = EngineDir::open(path)?;
                let backend = FileBackend::open(&dir.wal_path())?;
                (Some(dir), Box::new(backend))
            }
            None => (None, Box::new(InMemoryBackend::new())),
        };

        let mut wal = Wal::new(backend, options.sync_writes);
        let records = wal.replay()?;
        let (mem, max_txid, committed, applied) = recover(records);

        tracing::debug!(
            path = ?dir.as_ref().map(EngineDir::path),
            transactions = applied,
            keys = mem.len(),
            sequence = committed,
            "primary engine recovered"
        );

        Ok(Self {
            options,
            dir: Mutex::new(dir),
            wal: Mutex::new(wal),
            mem: RwLock::new(mem),
            next_txid: AtomicU64::new(max_txid + 1),
            committed_seq: AtomicU64::new(committed),
            snapshots: Mutex::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(EngineError::DatabaseClosed)
        } else {
            Ok(())
        }
    }

    /// Starts a transaction reading at the latest committed state.
    pub(crate) fn begin(&self, writable: bool) -> EngineResult<EngineTxn> {
        self.ensure_open()?;
        let id = self.next_txid.fetch_add(1, Ordering::Relaxed);
        let mut snapshots = self.snapshots.lock();
        let snapshot = self.committed_seq.load(Ordering::Acquire);
        *snapshots.entry(snapshot).or_insert(0) += 1;
        Ok(EngineTxn::new(id, snapshot, writable))
    }

    fn release(&self, snapshot: u64) {
        let horizon = {
            let mut snapshots = self.snapshots.lock();
            if let Some(n) = snapshots.get_mut(&snapshot) {
                *n -= 1;
                if *n == 0 {
                    snapshots.remove(&snapshot);
                }
            }
            self.horizon(&snapshots)
        };
        self.mem.write().prune(horizon);
    }

    fn horizon(&self, snapshots: &BTreeMap<u64, usize>) -> u64 {
        let committed = self.committed_seq.load(Ordering::Acquire);
        snapshots
            .keys()
            .next()
            .map_or(committed, |&oldest| oldest.min(committed))
    }

    /// Copies the value of `key` into `buf`.
    ///
    /// The transaction's own staged writes win over committed state.
    pub(crate) fn get_into(
        &self,
        txn: &mut EngineTxn,
        key: &[u8],
        buf: &mut Vec<u8>,
    ) -> EngineResult<()> {
        self.ensure_open()?;
        txn.ensure_active()?;
        match txn.pending(key) {
            Some(PendingWrite::Put(value)) => {
                buf.extend_from_slice(value);
                return Ok(());
            }
            Some(PendingWrite::Delete) => return Err(EngineError::KeyNotFound),
            None => {}
        }

        txn.record_read(key);
        let mem = self.mem.read();
        let value = mem.get(key, txn.snapshot()).ok_or(EngineError::KeyNotFound)?;
        buf.extend_from_slice(value);
        Ok(())
    }

    /// Whether `key` has a value visible to `txn`.
    pub(crate) fn exists(&self, txn: &mut EngineTxn, key: &[u8]) -> EngineResult<bool> {
        self.ensure_open()?;
        txn.ensure_active()?;
        if let Some(write) = txn.pending(key) {
            return Ok(matches!(write, PendingWrite::Put(_)));
        }
        txn.record_read(key);
        Ok(self.mem.read().get(key, txn.snapshot()).is_some())
    }

    /// Stages `key = value`.
    pub(crate) fn put(&self, txn: &mut EngineTxn, key: &[u8], value: Vec<u8>) -> EngineResult<()> {
        self.ensure_open()?;
        txn.stage(key, PendingWrite::Put(value), &self.options)
    }

    /// Stages a tombstone for `key`.
    pub(crate) fn delete(&self, txn: &mut EngineTxn, key: &[u8]) -> EngineResult<()> {
        self.ensure_open()?;
        txn.stage(key, PendingWrite::Delete, &self.options)
    }

    /// Keys starting with `prefix` visible to `txn`, staged writes included,
    /// in key order.
    pub(crate) fn keys_with_prefix(
        &self,
        txn: &mut EngineTxn,
        prefix: &[u8],
    ) -> EngineResult<Vec<Vec<u8>>> {
        Ok(self
            .scan(txn, prefix)?
            .into_iter()
            .map(|(k, _)| k)
            .collect())
    }

    /// `(key, value)` pairs starting with `prefix` visible to `txn`.
    pub(crate) fn scan(
        &self,
        txn: &mut EngineTxn,
        prefix: &[u8],
    ) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.ensure_open()?;
        txn.ensure_active()?;

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .mem
            .read()
            .scan_prefix(prefix, txn.snapshot())
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();
        let committed: Vec<Vec<u8>> = merged.keys().cloned().collect();

        let staged = txn
            .writes()
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded));
        for (key, write) in staged {
            if !key.starts_with(prefix) {
                break;
            }
            match write {
                PendingWrite::Put(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                PendingWrite::Delete => {
                    merged.remove(key);
                }
            }
        }
        for key in &committed {
            txn.record_read(key);
        }
        Ok(merged.into_iter().collect())
    }

    /// Commits `txn`. Returns the commit sequence, or `None` when there was
    /// nothing to write.
    ///
    /// Whatever the outcome, `txn` is closed afterwards.
    pub(crate) fn commit(&self, txn: &mut EngineTxn) -> EngineResult<Option<u64>> {
        txn.ensure_active()?;
        if let Err(e) = self.ensure_open() {
            self.discard(txn);
            return Err(e);
        }
        if txn.writes().is_empty() {
            txn.mark_committed();
            self.release(txn.snapshot());
            return Ok(None);
        }

        let outcome = self.write_batch(txn);
        match outcome {
            Ok(_) => txn.mark_committed(),
            Err(_) => txn.mark_discarded(),
        }
        self.release(txn.snapshot());
        outcome.map(Some)
    }

    fn write_batch(&self, txn: &mut EngineTxn) -> EngineResult<u64> {
        let mut wal = self.wal.lock();
        {
            let mem = self.mem.read();
            let snapshot = txn.snapshot();
            let conflicted = txn
                .conflict_keys()
                .any(|key| mem.latest_seq(key).is_some_and(|seq| seq > snapshot));
            if conflicted {
                return Err(EngineError::Conflict);
            }
        }

        let txid = txn.id();
        let seq = self.committed_seq.load(Ordering::Acquire) + 1;
        let writes = txn.take_writes();

        let mut records = Vec::with_capacity(writes.len() + 2);
        records.push(WalRecord::Begin { txid });
        for (key, write) in &writes {
            records.push(match write {
                PendingWrite::Put(value) => WalRecord::Put {
                    txid,
                    key: key.clone(),
                    value: value.clone(),
                },
                PendingWrite::Delete => WalRecord::Delete {
                    txid,
                    key: key.clone(),
                },
            });
        }
        records.push(WalRecord::Commit { txid, seq });
        wal.append(&records)?;
        drop(records);

        let mut mem = self.mem.write();
        for (key, write) in writes {
            let value = match write {
                PendingWrite::Put(value) => Some(value),
                PendingWrite::Delete => None,
            };
            mem.apply(key, seq, value);
        }
        self.committed_seq.store(seq, Ordering::Release);
        Ok(seq)
    }

    /// Abandons `txn`. Harmless on a transaction that is already closed.
    pub(crate) fn discard(&self, txn: &mut EngineTxn) {
        if txn.is_active() {
            txn.mark_discarded();
            self.release(txn.snapshot());
        }
    }

    /// Rewrites the log so it holds only the latest live value of each key.
    pub(crate) fn compact(&self) -> EngineResult<CompactStats> {
        self.ensure_open()?;
        let mut wal = self.wal.lock();
        let bytes_before = wal.size()?;
        let seq = self.committed_seq.load(Ordering::Acquire);
        let txid = self.next_txid.fetch_add(1, Ordering::Relaxed);

        let mut records = vec![WalRecord::Begin { txid }];
        records.extend(
            self.mem
                .read()
                .scan_prefix(&[], seq)
                .map(|(k, v)| WalRecord::Put {
                    txid,
                    key: k.to_vec(),
                    value: v.to_vec(),
                }),
        );
        let live_keys = records.len() - 1;
        if live_keys == 0 {
            wal.rewrite(&[])?;
        } else {
            records.push(WalRecord::Commit { txid, seq });
            wal.rewrite(&records)?;
        }

        let stats = CompactStats {
            bytes_before,
            bytes_after: wal.size()?,
            live_keys,
        };
        tracing::info!(
            before = stats.bytes_before,
            after = stats.bytes_after,
            live_keys,
            "write-ahead log compacted"
        );
        Ok(stats)
    }

    /// Latest committed sequence number.
    pub(crate) fn committed_seq(&self) -> u64 {
        self.committed_seq.load(Ordering::Acquire)
    }

    /// Syncs the log and releases the directory lock. Later calls are no-ops.
    pub(crate) fn close(&self) -> EngineResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let synced = self.wal.lock().sync();
        let unlocked = match self.dir.lock().take() {
            Some(dir) => dir.unlock(),
            None => Ok(()),
        };
        synced.and(unlocked)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("committed_seq", &self.committed_seq())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Rebuilds the table from log records, applying only committed
/// transactions. Returns the table, highest txid seen, last committed
/// sequence and the number of transactions applied.
fn recover(records: Vec<WalRecord>) -> (MemTable, u64, u64, usize) {
    let mut open: HashMap<u64, Vec<(Vec<u8>, Option<Vec<u8>>)>> = HashMap::new();
    let mut mem = MemTable::new();
    let mut max_txid = 0;
    let mut committed = 0;
    let mut applied = 0;

    for record in records {
        match record {
            WalRecord::Begin { txid } => {
                max_txid = max_txid.max(txid);
                open.insert(txid, Vec::new());
            }
            WalRecord::Put { txid, key, value } => {
                if let Some(ops) = open.get_mut(&txid) {
                    ops.push((key, Some(value)));
                }
            }
            WalRecord::Delete { txid, key } => {
                if let Some(ops) = open.get_mut(&txid) {
                    ops.push((key, None));
                }
            }
            WalRecord::Commit { txid, seq } => {
                if let Some(ops) = open.remove(&txid) {
                    for (key, value) in ops {
                        mem.apply(key, seq, value);
                    }
                    committed = committed.max(seq);
                    applied += 1;
                }
            }
        }
    }
    mem.prune(committed);
    (mem, max_txid, committed, applied)
}
