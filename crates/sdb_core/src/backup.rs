//! Backup and restore of the primary store.
//!
//! ```text
//! | magic "SDBK" (4) | version (2) | timestamp ms (8) | sequence (8) | count (4) |
//! | count x ( key len (4) | key | value len (4) | value ) |
//! | crc32 of everything before (4) |
//! ```
//!
//! All integers are little-endian. Only the primary store is backed up: the
//! index is derived data, so after a restore run [`DB::reload_index`].

use crate::db::DB;
use crate::error::{EngineError, EngineResult, Result};
use crate::frame::{crc32, put_bytes, Cursor};
use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

const BACKUP_MAGIC: [u8; 4] = *b"SDBK";
const BACKUP_VERSION: u16 = 1;
const HEADER_SIZE: usize = 4 + 2 + 8 + 8 + 4;
const FOOTER_SIZE: usize = 4;

/// Describes a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupMetadata {
    /// When the backup was taken, in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Committed sequence number of the snapshot that was backed up.
    pub sequence: u64,
    /// Number of key/value records.
    pub record_count: u32,
    /// Size of the backup in bytes.
    pub size: usize,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

fn encode(sequence: u64, records: &[(Vec<u8>, Vec<u8>)]) -> EngineResult<(Vec<u8>, BackupMetadata)> {
    let record_count = u32::try_from(records.len())
        .map_err(|_| EngineError::invalid_format("too many records for one backup"))?;
    let timestamp = now_millis();

    let body: usize = records.iter().map(|(k, v)| 8 + k.len() + v.len()).sum();
    let mut data = Vec::with_capacity(HEADER_SIZE + body + FOOTER_SIZE);
    data.extend_from_slice(&BACKUP_MAGIC);
    data.extend_from_slice(&BACKUP_VERSION.to_le_bytes());
    data.extend_from_slice(&timestamp.to_le_bytes());
    data.extend_from_slice(&sequence.to_le_bytes());
    data.extend_from_slice(&record_count.to_le_bytes());
    for (key, value) in records {
        put_bytes(&mut data, key);
        put_bytes(&mut data, value);
    }
    let crc = crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());

    let metadata = BackupMetadata {
        timestamp,
        sequence,
        record_count,
        size: data.len(),
    };
    Ok((data, metadata))
}

/// Checks and parses a backup image.
fn decode(data: &[u8]) -> EngineResult<(BackupMetadata, Vec<(Vec<u8>, Vec<u8>)>)> {
    if data.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(EngineError::invalid_format("backup too small"));
    }
    if data[0..4] != BACKUP_MAGIC {
        return Err(EngineError::invalid_format("not a backup: bad magic"));
    }

    let body_end = data.len() - FOOTER_SIZE;
    let mut footer = Cursor::new(&data[body_end..]);
    let expected = footer.u32().unwrap_or_default();
    let actual = crc32(&data[..body_end]);
    if expected != actual {
        return Err(EngineError::ChecksumMismatch {
            offset: body_end as u64,
            expected,
            actual,
        });
    }

    let truncated = || EngineError::invalid_format("truncated backup");
    let mut c = Cursor::new(&data[4..body_end]);
    let version = c.u16().ok_or_else(truncated)?;
    if version != BACKUP_VERSION {
        return Err(EngineError::invalid_format(format!(
            "unsupported backup version {version}"
        )));
    }
    let timestamp = c.u64().ok_or_else(truncated)?;
    let sequence = c.u64().ok_or_else(truncated)?;
    let record_count = c.u32().ok_or_else(truncated)?;

    let mut records = Vec::new();
    for _ in 0..record_count {
        let key = c.bytes().ok_or_else(truncated)?.to_vec();
        let value = c.bytes().ok_or_else(truncated)?.to_vec();
        records.push((key, value));
    }
    if !c.is_empty() {
        return Err(EngineError::invalid_format("trailing bytes after last record"));
    }

    let metadata = BackupMetadata {
        timestamp,
        sequence,
        record_count,
        size: data.len(),
    };
    Ok((metadata, records))
}

impl DB {
    /// Writes every live key and value of a consistent snapshot to `writer`.
    ///
    /// # Errors
    ///
    /// Engine errors from reading the snapshot, or [`EngineError::Io`] if
    /// `writer` fails.
    pub fn backup<W: Write>(&self, mut writer: W) -> Result<BackupMetadata> {
        let mut txn = self.engine().begin(false)?;
        let sequence = txn.snapshot();
        let scanned = self.engine().scan(&mut txn, b"");
        self.engine().discard(&mut txn);

        let (data, metadata) = encode(sequence, &scanned?)?;
        writer
            .write_all(&data)
            .and_then(|()| writer.flush())
            .map_err(EngineError::from)?;
        tracing::info!(
            db = %self.options().log_label,
            records = metadata.record_count,
            sequence,
            "backup written"
        );
        Ok(metadata)
    }

    /// Loads a backup read from `reader` into the primary store in one
    /// transaction.
    ///
    /// Keys in the backup overwrite existing values; other keys are left
    /// alone. The search index is not updated: call
    /// [`reload_index`](Self::reload_index) afterwards.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidFormat`] or [`EngineError::ChecksumMismatch`]
    ///   for a damaged backup. Nothing is written.
    /// - [`EngineError::TransactionTooLarge`] if the backup does not fit the
    ///   batch limits.
    /// - Any commit error.
    pub fn restore<R: Read>(&self, mut reader: R) -> Result<BackupMetadata> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).map_err(EngineError::from)?;
        let (metadata, records) = decode(&data)?;

        let engine = self.engine();
        let mut txn = engine.begin(true)?;
        for (key, value) in records {
            if let Err(e) = engine.put(&mut txn, &key, value) {
                engine.discard(&mut txn);
                return Err(e.into());
            }
        }
        engine.commit(&mut txn)?;

        tracing::info!(
            db = %self.options().log_label,
            records = metadata.record_count,
            sequence = metadata.sequence,
            "backup restored; index needs a reload"
        );
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use sdb_codec::Document;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Item {
        name: String,
    }

    fn item(name: &str) -> Item {
        Item { name: name.into() }
    }

    fn seeded() -> DB {
        let db = DB::open("").unwrap();
        let mut tx = db.new_tx(DB::READ_WRITE).unwrap();
        tx.set(b"item:1", &item("anvil")).unwrap();
        tx.set(b"item:2", &item("bucket")).unwrap();
        tx.set(b"item:3", &item("crate")).unwrap();
        tx.commit().unwrap();
        drop(tx);
        let mut tx = db.new_tx(DB::READ_WRITE).unwrap();
        tx.delete(b"item:3").unwrap();
        tx.commit().unwrap();
        drop(tx);
        db
    }

    #[test]
    fn backup_then_restore_elsewhere() {
        let source = seeded();
        let mut image = Vec::new();
        let meta = source.backup(&mut image).unwrap();
        assert_eq!(meta.record_count, 2);
        assert_eq!(meta.sequence, source.committed_seq());
        assert_eq!(meta.size, image.len());

        let dir = tempdir().unwrap();
        let target = DB::open(dir.path()).unwrap();
        let restored = target.restore(image.as_slice()).unwrap();
        assert_eq!(restored.record_count, 2);
        assert_eq!(restored.timestamp, meta.timestamp);

        let mut tx = target.new_tx(DB::READ_ONLY).unwrap();
        assert_eq!(tx.get::<Item>(b"item:2").unwrap(), item("bucket"));
        assert!(tx.get::<Item>(b"item:3").unwrap_err().is_not_found());
        // Restore leaves the index for a reload.
        assert!(tx.find("anvil", &[]).unwrap().is_empty());
        drop(tx);

        target.reload_index(|tx, key| tx.get::<Document>(key)).unwrap();
        let tx = target.new_tx(DB::READ_ONLY).unwrap();
        assert_eq!(tx.find("anvil", &[]).unwrap(), vec![b"item:1".to_vec()]);
    }

    #[test]
    fn damaged_backups_are_refused() {
        let db = seeded();
        let mut image = Vec::new();
        db.backup(&mut image).unwrap();

        let target = DB::open("").unwrap();
        let mut flipped = image.clone();
        flipped[HEADER_SIZE + 5] ^= 0x01;
        assert!(matches!(
            target.restore(flipped.as_slice()).unwrap_err(),
            Error::Engine(EngineError::ChecksumMismatch { .. })
        ));

        let mut foreign = image.clone();
        foreign[0] = b'X';
        assert!(matches!(
            target.restore(foreign.as_slice()).unwrap_err(),
            Error::Engine(EngineError::InvalidFormat { .. })
        ));

        assert!(target.restore(&image[..10]).is_err());
        let mut tx = target.new_tx(DB::READ_ONLY).unwrap();
        assert!(tx.prefix(b"").unwrap().is_empty());
    }

    #[test]
    fn empty_store_round_trips() {
        let db = DB::open("").unwrap();
        let mut image = Vec::new();
        let meta = db.backup(&mut image).unwrap();
        assert_eq!(meta.record_count, 0);
        assert_eq!(image.len(), HEADER_SIZE + FOOTER_SIZE);
        assert_eq!(db.restore(image.as_slice()).unwrap().record_count, 0);
    }
}
