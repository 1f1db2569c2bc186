//! # sdb core
//!
//! An embedded document store that keeps a key-value engine and a full-text
//! search index in step.
//!
//! - [`DB`] owns both engines and a pool of scratch buffers. It opens them
//!   under one directory (`database/` and `search-index/`) or in memory.
//! - [`Tx`] reads and writes documents in a snapshot-isolated transaction.
//!   Index updates are queued and applied only after the primary commit
//!   succeeds; [`Tx::find`] queries the index.
//! - [`DB::reload_index`] rebuilds the index from the primary store when the
//!   two have drifted apart, for example after an index update failed.
//!
//! The primary store is the source of truth. If a commit succeeds but the
//! index update after it fails, the commit stands and the error is reported
//! as [`Error::Index`]; a reload brings the index back in line.
//!
//! ```rust
//! use sdb_core::DB;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct User {
//!     email: String,
//! }
//!
//! let db = DB::open("")?;
//! let mut tx = db.new_tx(DB::READ_WRITE)?;
//! for (key, email) in [("u:1", "a@x"), ("u:2", "b@x"), ("u:3", "c@x")] {
//!     tx.set(key.as_bytes(), &User { email: email.into() })?;
//! }
//! tx.commit()?;
//!
//! let tx = db.new_tx(DB::READ_ONLY)?;
//! let keys = tx.find("", &["-email"])?;
//! assert_eq!(keys, vec![b"u:3".to_vec(), b"u:2".to_vec(), b"u:1".to_vec()]);
//! # Ok::<(), sdb_core::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backup;
mod config;
mod db;
mod dir;
mod engine;
mod error;
mod frame;
pub mod index;
mod pool;
mod recovery;
mod tx;

pub use backup::BackupMetadata;
pub use config::{
    EngineOptions, Options, BUFFER_POOL_MAX_BYTES, BUFFER_POOL_SIZE, DATABASE_DIR,
    SEARCH_INDEX_DIR,
};
pub use db::DB;
pub use engine::CompactStats;
pub use error::{EngineError, EngineResult, Error, IndexError, IndexResult, Result};
pub use index::{IndexMapping, SearchHit, SearchIndex, SearchRequest, SearchResult};
pub use pool::{BufferPool, PooledBuffer};
pub use sdb_codec::{CodecError, Document, FieldValue};
pub use tx::Tx;
