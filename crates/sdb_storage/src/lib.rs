//! # sdb storage
//!
//! Byte-store backends shared by the primary engine's write-ahead log and
//! the search index's operation log.
//!
//! A backend knows nothing about record framing. It appends bytes, reads
//! them back by offset, makes them durable on request, and can atomically
//! swap its whole contents for a compacted image.
//!
//! - [`InMemoryBackend`] keeps everything in a `Vec<u8>`; used for
//!   ephemeral databases and tests.
//! - [`FileBackend`] keeps an append-only file on disk.
//!
//! ```rust
//! use sdb_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut log = InMemoryBackend::new();
//! let at = log.append(b"record").unwrap();
//! assert_eq!(log.read_at(at, 6).unwrap(), b"record");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
