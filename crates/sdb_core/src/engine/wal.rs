//! Write-ahead log records and the log itself.
//!
//! A transaction is written as one contiguous batch:
//! `Begin`, then its `Put`/`Delete` records, then `Commit`. Replay applies a
//! transaction only once its `Commit` has been read, so a batch torn by a
//! crash is ignored.

use crate::error::{EngineError, EngineResult};
use crate::frame::{put_bytes, write_frame, Cursor, Frames};
use sdb_storage::StorageBackend;

/// Magic bytes of a WAL record.
pub(crate) const WAL_MAGIC: [u8; 4] = *b"SWAL";

/// Record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum RecordKind {
    Begin = 1,
    Put = 2,
    Delete = 3,
    Commit = 4,
}

impl RecordKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Begin),
            2 => Some(Self::Put),
            3 => Some(Self::Delete),
            4 => Some(Self::Commit),
            _ => None,
        }
    }
}

/// One logged operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WalRecord {
    Begin { txid: u64 },
    Put { txid: u64, key: Vec<u8>, value: Vec<u8> },
    Delete { txid: u64, key: Vec<u8> },
    Commit { txid: u64, seq: u64 },
}

impl WalRecord {
    fn kind(&self) -> RecordKind {
        match self {
            Self::Begin { .. } => RecordKind::Begin,
            Self::Put { .. } => RecordKind::Put,
            Self::Delete { .. } => RecordKind::Delete,
            Self::Commit { .. } => RecordKind::Commit,
        }
    }

    fn encode_payload(&self, out: &mut Vec<u8>) {
        match self {
            Self::Begin { txid } => out.extend_from_slice(&txid.to_le_bytes()),
            Self::Put { txid, key, value } => {
                out.extend_from_slice(&txid.to_le_bytes());
                put_bytes(out, key);
                put_bytes(out, value);
            }
            Self::Delete { txid, key } => {
                out.extend_from_slice(&txid.to_le_bytes());
                put_bytes(out, key);
            }
            Self::Commit { txid, seq } => {
                out.extend_from_slice(&txid.to_le_bytes());
                out.extend_from_slice(&seq.to_le_bytes());
            }
        }
    }

    fn decode(kind: u8, payload: &[u8], offset: u64) -> EngineResult<Self> {
        let kind = RecordKind::from_byte(kind).ok_or_else(|| {
            EngineError::wal_corruption(format!("unknown record type {kind} at offset {offset}"))
        })?;
        let short = || EngineError::wal_corruption(format!("short {kind:?} record at offset {offset}"));

        let mut c = Cursor::new(payload);
        let txid = c.u64().ok_or_else(short)?;
        let record = match kind {
            RecordKind::Begin => Self::Begin { txid },
            RecordKind::Put => Self::Put {
                txid,
                key: c.bytes().ok_or_else(short)?.to_vec(),
                value: c.bytes().ok_or_else(short)?.to_vec(),
            },
            RecordKind::Delete => Self::Delete {
                txid,
                key: c.bytes().ok_or_else(short)?.to_vec(),
            },
            RecordKind::Commit => Self::Commit {
                txid,
                seq: c.u64().ok_or_else(short)?,
            },
        };
        if !c.is_empty() {
            return Err(EngineError::wal_corruption(format!(
                "trailing bytes in {kind:?} record at offset {offset}"
            )));
        }
        Ok(record)
    }
}

/// Frames `records` into one contiguous byte batch.
pub(crate) fn encode_batch(records: &[WalRecord]) -> EngineResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut payload = Vec::new();
    for record in records {
        payload.clear();
        record.encode_payload(&mut payload);
        write_frame(&mut out, WAL_MAGIC, record.kind() as u8, &payload).map_err(|len| {
            EngineError::invalid_format(format!("WAL record of {len} bytes is too large"))
        })?;
    }
    Ok(out)
}

/// The log file (or buffer) of the primary engine.
pub(crate) struct Wal {
    backend: Box<dyn StorageBackend>,
    sync_writes: bool,
}

impl Wal {
    pub(crate) fn new(backend: Box<dyn StorageBackend>, sync_writes: bool) -> Self {
        Self {
            backend,
            sync_writes,
        }
    }

    /// Reads every intact record and cuts off a torn tail so later appends
    /// land right after the last good record.
    pub(crate) fn replay(&mut self) -> EngineResult<Vec<WalRecord>> {
        let image = self.backend.read_all()?;
        let mut frames = Frames::new(&image, WAL_MAGIC);
        let mut records = Vec::new();
        for frame in frames.by_ref() {
            let frame = frame?;
            records.push(WalRecord::decode(frame.kind, frame.payload, frame.offset)?);
        }

        let valid = frames.valid_len();
        if valid < image.len() as u64 {
            tracing::warn!(
                valid,
                size = image.len(),
                "discarding torn tail of write-ahead log"
            );
            self.backend.truncate(valid)?;
        }
        Ok(records)
    }

    /// Appends a transaction batch and makes it durable per `sync_writes`.
    ///
    /// On failure the log is cut back to where it was so a half-written
    /// batch never sits in front of later ones.
    pub(crate) fn append(&mut self, records: &[WalRecord]) -> EngineResult<()> {
        let batch = encode_batch(records)?;
        let before = self.backend.size()?;
        let written = self.backend.append(&batch).and_then(|_| {
            if self.sync_writes {
                self.backend.sync()
            } else {
                self.backend.flush()
            }
        });
        if let Err(e) = written {
            if let Err(undo) = self.backend.truncate(before) {
                tracing::error!(error = %undo, "failed to roll back partial WAL append");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Swaps the whole log for `records`.
    pub(crate) fn rewrite(&mut self, records: &[WalRecord]) -> EngineResult<()> {
        let image = encode_batch(records)?;
        self.backend.replace(&image)?;
        Ok(())
    }

    pub(crate) fn size(&self) -> EngineResult<u64> {
        Ok(self.backend.size()?)
    }

    pub(crate) fn sync(&mut self) -> EngineResult<()> {
        self.backend.sync()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdb_storage::InMemoryBackend;

    fn txn(txid: u64, seq: u64) -> Vec<WalRecord> {
        vec![
            WalRecord::Begin { txid },
            WalRecord::Put {
                txid,
                key: b"users/1".to_vec(),
                value: b"ada".to_vec(),
            },
            WalRecord::Delete {
                txid,
                key: b"users/0".to_vec(),
            },
            WalRecord::Commit { txid, seq },
        ]
    }

    #[test]
    fn appended_batches_replay_in_order() {
        let mut wal = Wal::new(Box::new(InMemoryBackend::new()), false);
        wal.append(&txn(1, 1)).unwrap();
        wal.append(&txn(2, 2)).unwrap();

        let records = wal.replay().unwrap();
        assert_eq!(records.len(), 8);
        assert_eq!(&records[..4], &txn(1, 1)[..]);
        assert_eq!(records[7], WalRecord::Commit { txid: 2, seq: 2 });
    }

    #[test]
    fn torn_batch_is_cut_off() {
        let mut image = encode_batch(&txn(1, 1)).unwrap();
        let good = image.len() as u64;
        let second = encode_batch(&txn(2, 2)).unwrap();
        image.extend_from_slice(&second[..second.len() / 2]);

        let mut wal = Wal::new(Box::new(InMemoryBackend::with_data(image)), false);
        let records = wal.replay().unwrap();

        assert!(records.iter().all(|r| !matches!(r, WalRecord::Commit { txid: 2, .. })));
        assert_eq!(wal.size().unwrap(), good);
    }

    #[test]
    fn checksum_damage_is_fatal() {
        let mut image = encode_batch(&txn(1, 1)).unwrap();
        let last = image.len() - 6;
        image[last] ^= 0xFF;

        let mut wal = Wal::new(Box::new(InMemoryBackend::with_data(image)), false);
        assert!(matches!(
            wal.replay(),
            Err(EngineError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn unknown_kind_is_corruption() {
        let mut image = Vec::new();
        write_frame(&mut image, WAL_MAGIC, 42, &7u64.to_le_bytes()).unwrap();

        let mut wal = Wal::new(Box::new(InMemoryBackend::with_data(image)), false);
        assert!(matches!(
            wal.replay(),
            Err(EngineError::WalCorruption { .. })
        ));
    }

    #[test]
    fn rewrite_replaces_history() {
        let mut wal = Wal::new(Box::new(InMemoryBackend::new()), true);
        wal.append(&txn(1, 1)).unwrap();
        wal.append(&txn(2, 2)).unwrap();

        let compacted = vec![
            WalRecord::Begin { txid: 3 },
            WalRecord::Put {
                txid: 3,
                key: b"k".to_vec(),
                value: b"v".to_vec(),
            },
            WalRecord::Commit { txid: 3, seq: 2 },
        ];
        wal.rewrite(&compacted).unwrap();
        assert_eq!(wal.replay().unwrap(), compacted);
    }
}
