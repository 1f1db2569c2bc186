//! On-disk layout of the search index.
//!
//! The index directory holds a `MAPPING` file, written once when the index
//! is created, and `index.log`, a framed log of upserts and deletes that is
//! replayed into memory on open.

use super::mapping::IndexMapping;
use crate::error::{IndexError, IndexResult};
use crate::frame::{put_bytes, write_frame, Cursor, Frames};
use sdb_codec::Document;
use sdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::fs;
use std::path::Path;

/// Magic bytes of an index log record.
pub(crate) const INDEX_MAGIC: [u8; 4] = *b"SIDX";

const MAPPING_FILE: &str = "MAPPING";
const LOG_FILE: &str = "index.log";

const KIND_UPSERT: u8 = 1;
const KIND_DELETE: u8 = 2;

/// One logged index change.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum IndexOp {
    Upsert { id: Vec<u8>, doc: Document },
    Delete { id: Vec<u8> },
}

impl IndexOp {
    fn encode(&self, out: &mut Vec<u8>) -> IndexResult<()> {
        let mut payload = Vec::new();
        let kind = match self {
            Self::Upsert { id, doc } => {
                put_bytes(&mut payload, id);
                doc.encode_into(&mut payload)?;
                KIND_UPSERT
            }
            Self::Delete { id } => {
                put_bytes(&mut payload, id);
                KIND_DELETE
            }
        };
        write_frame(out, INDEX_MAGIC, kind, &payload)
            .map_err(|len| IndexError::corrupted(format!("index record of {len} bytes is too large")))
    }

    fn decode(kind: u8, payload: &[u8], offset: u64) -> IndexResult<Self> {
        let mut c = Cursor::new(payload);
        let id = c
            .bytes()
            .ok_or_else(|| IndexError::corrupted(format!("short index record at offset {offset}")))?
            .to_vec();
        match kind {
            KIND_UPSERT => {
                let doc = Document::decode(c.rest())
                    .map_err(|e| IndexError::corrupted(format!("document at offset {offset}: {e}")))?;
                Ok(Self::Upsert { id, doc })
            }
            KIND_DELETE if c.is_empty() => Ok(Self::Delete { id }),
            KIND_DELETE => Err(IndexError::corrupted(format!(
                "trailing bytes in delete record at offset {offset}"
            ))),
            other => Err(IndexError::corrupted(format!(
                "unknown index record type {other} at offset {offset}"
            ))),
        }
    }
}

/// Storage behind a [`SearchIndex`](super::SearchIndex).
pub(crate) struct IndexStore {
    log: Box<dyn StorageBackend>,
    mapping: IndexMapping,
}

impl IndexStore {
    /// Opens (or creates) the index at `path`. `None` keeps it in memory.
    ///
    /// An existing index keeps the mapping it was created with; `mapping`
    /// only applies to a fresh one.
    pub(crate) fn open(path: Option<&Path>, mapping: IndexMapping) -> IndexResult<Self> {
        mapping.validate()?;
        let Some(path) = path else {
            return Ok(Self {
                log: Box::new(InMemoryBackend::new()),
                mapping,
            });
        };

        fs::create_dir_all(path)?;
        let mapping = load_or_create_mapping(&path.join(MAPPING_FILE), mapping)?;
        let log = FileBackend::open(&path.join(LOG_FILE))?;
        Ok(Self {
            log: Box::new(log),
            mapping,
        })
    }

    pub(crate) fn mapping(&self) -> &IndexMapping {
        &self.mapping
    }

    /// Reads every intact operation, cutting off a torn tail.
    pub(crate) fn replay(&mut self) -> IndexResult<Vec<IndexOp>> {
        let image = self.log.read_all()?;
        let mut frames = Frames::new(&image, INDEX_MAGIC);
        let mut ops = Vec::new();
        for frame in frames.by_ref() {
            let frame = frame?;
            ops.push(IndexOp::decode(frame.kind, frame.payload, frame.offset)?);
        }
        let valid = frames.valid_len();
        if valid < image.len() as u64 {
            tracing::warn!(valid, size = image.len(), "discarding torn tail of index log");
            self.log.truncate(valid)?;
        }
        Ok(ops)
    }

    pub(crate) fn append(&mut self, op: &IndexOp) -> IndexResult<()> {
        let mut buf = Vec::new();
        op.encode(&mut buf)?;
        self.log.append(&buf)?;
        self.log.flush()?;
        Ok(())
    }

    /// Replaces the log with `ops`.
    pub(crate) fn rewrite<'a>(&mut self, ops: impl IntoIterator<Item = &'a IndexOp>) -> IndexResult<u64> {
        let mut image = Vec::new();
        for op in ops {
            op.encode(&mut image)?;
        }
        self.log.replace(&image)?;
        Ok(image.len() as u64)
    }

    pub(crate) fn size(&self) -> IndexResult<u64> {
        Ok(self.log.size()?)
    }

    pub(crate) fn sync(&mut self) -> IndexResult<()> {
        self.log.sync()?;
        Ok(())
    }
}

fn load_or_create_mapping(path: &Path, requested: IndexMapping) -> IndexResult<IndexMapping> {
    let mut file = FileBackend::open(path)?;
    let bytes = file.read_all()?;
    if bytes.is_empty() {
        file.replace(&sdb_codec::encode(&requested)?)?;
        return Ok(requested);
    }

    let stored: IndexMapping = sdb_codec::decode(&bytes)
        .map_err(|e| IndexError::corrupted(format!("unreadable mapping: {e}")))?;
    if stored != requested {
        tracing::debug!("index already exists; keeping its stored mapping");
    }
    stored.validate()?;
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::mapping::{DocumentMapping, FieldMapping};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn doc(text: &str) -> Document {
        let mut m = BTreeMap::new();
        m.insert("Text", text);
        Document::from_serialize(&m).unwrap()
    }

    #[test]
    fn ops_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut store = IndexStore::open(Some(dir.path()), IndexMapping::new()).unwrap();
            assert!(store.replay().unwrap().is_empty());
            store.append(&IndexOp::Upsert { id: b"a".to_vec(), doc: doc("one") }).unwrap();
            store.append(&IndexOp::Delete { id: b"a".to_vec() }).unwrap();
            store.sync().unwrap();
        }
        let mut store = IndexStore::open(Some(dir.path()), IndexMapping::new()).unwrap();
        assert_eq!(
            store.replay().unwrap(),
            vec![
                IndexOp::Upsert { id: b"a".to_vec(), doc: doc("one") },
                IndexOp::Delete { id: b"a".to_vec() },
            ]
        );
    }

    #[test]
    fn stored_mapping_wins_over_requested() {
        let dir = tempdir().unwrap();
        let keyword = IndexMapping::new().document(
            "user",
            DocumentMapping::new().field("Email", FieldMapping::keyword()),
        );
        drop(IndexStore::open(Some(dir.path()), keyword.clone()).unwrap());

        let store = IndexStore::open(Some(dir.path()), IndexMapping::new()).unwrap();
        assert_eq!(store.mapping(), &keyword);
    }

    #[test]
    fn garbage_mapping_is_corruption() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(MAPPING_FILE), b"\xff\x00junk").unwrap();
        let err = IndexStore::open(Some(dir.path()), IndexMapping::new()).err().unwrap();
        assert!(matches!(err, IndexError::Corrupted { .. }), "{err:?}");
    }

    #[test]
    fn file_in_place_of_directory_is_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("search-index");
        fs::write(&path, b"not a dir").unwrap();
        let err = IndexStore::open(Some(&path), IndexMapping::new()).err().unwrap();
        assert!(matches!(err, IndexError::Io(_)), "{err:?}");
    }

    #[test]
    fn torn_tail_is_dropped_and_flipped_bit_is_fatal() {
        let dir = tempdir().unwrap();
        {
            let mut store = IndexStore::open(Some(dir.path()), IndexMapping::new()).unwrap();
            store.append(&IndexOp::Delete { id: b"x".to_vec() }).unwrap();
        }
        let log = dir.path().join(LOG_FILE);
        let mut image = fs::read(&log).unwrap();
        let good = image.len() as u64;
        image.extend_from_slice(b"SIDX\x01");
        fs::write(&log, &image).unwrap();

        let mut store = IndexStore::open(Some(dir.path()), IndexMapping::new()).unwrap();
        assert_eq!(store.replay().unwrap().len(), 1);
        assert_eq!(store.size().unwrap(), good);
        drop(store);

        let mut image = fs::read(&log).unwrap();
        image[crate::frame::HEADER_LEN] ^= 0x40;
        fs::write(&log, &image).unwrap();
        let mut store = IndexStore::open(Some(dir.path()), IndexMapping::new()).unwrap();
        assert!(matches!(store.replay(), Err(IndexError::Corrupted { .. })));
    }

    #[test]
    fn rewrite_keeps_only_given_ops() {
        let mut store = IndexStore::open(None, IndexMapping::new()).unwrap();
        for id in [b"a", b"b", b"c"] {
            store.append(&IndexOp::Upsert { id: id.to_vec(), doc: doc("x") }).unwrap();
        }
        let keep = [IndexOp::Upsert { id: b"b".to_vec(), doc: doc("x") }];
        let size = store.rewrite(&keep).unwrap();
        assert_eq!(store.size().unwrap(), size);
        assert_eq!(store.replay().unwrap(), keep.to_vec());
    }
}
