//! Error types.
//!
//! Every failure a caller can see is an [`Error`], tagged with the subsystem
//! it came from so callers can decide between retrying, reloading the index,
//! or giving up:
//!
//! - [`Error::Engine`]: the primary key-value engine (I/O, conflicts,
//!   missing keys, oversized transactions).
//! - [`Error::Index`]: the search index (I/O, corrupt log, bad queries).
//! - [`Error::Encoding`]: the caller handed over something that cannot be
//!   stored as a document, or stored bytes do not decode into the requested
//!   type.

use sdb_codec::CodecError;
use sdb_storage::StorageError;
use std::io;
use thiserror::Error;

/// Result alias for public operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result alias for the primary engine.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Result alias for the search index.
pub type IndexResult<T> = std::result::Result<T, IndexError>;

/// Top-level error returned by [`crate::DB`] and [`crate::Tx`].
#[derive(Debug, Error)]
pub enum Error {
    /// Failure inside the primary key-value engine.
    #[error("engine: {0}")]
    Engine(#[from] EngineError),

    /// Failure inside the search index.
    #[error("index: {0}")]
    Index(#[from] IndexError),

    /// The value could not be encoded, or stored bytes could not be decoded.
    #[error("encoding: {0}")]
    Encoding(#[from] CodecError),
}

impl Error {
    /// True for any primary engine failure.
    #[must_use]
    pub fn is_engine_error(&self) -> bool {
        matches!(self, Self::Engine(_))
    }

    /// True for any search index failure.
    #[must_use]
    pub fn is_index_error(&self) -> bool {
        matches!(self, Self::Index(_))
    }

    /// True for encode/decode failures.
    #[must_use]
    pub fn is_encoding_error(&self) -> bool {
        matches!(self, Self::Encoding(_))
    }

    /// True when a lookup found no value for the key.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Engine(EngineError::KeyNotFound))
    }

    /// True when a commit lost an optimistic concurrency race.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Engine(EngineError::Conflict))
    }

    /// True when a write would push the transaction past its limits.
    #[must_use]
    pub fn is_transaction_too_large(&self) -> bool {
        matches!(self, Self::Engine(EngineError::TransactionTooLarge { .. }))
    }
}

/// Failures of the primary key-value engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error outside a storage backend (directories, lock file).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The write-ahead log holds something that is not a valid record.
    #[error("WAL corruption: {message}")]
    WalCorruption {
        /// What was wrong.
        message: String,
    },

    /// A record's checksum does not match its contents.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the record.
        offset: u64,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// No value is stored under the key.
    #[error("key not found")]
    KeyNotFound,

    /// Another transaction committed a change to a key this one read or wrote.
    #[error("transaction conflict, please retry")]
    Conflict,

    /// The write would exceed the per-transaction entry or byte limit.
    #[error("transaction too large: {count} entries, {size} bytes")]
    TransactionTooLarge {
        /// Entries the transaction would hold.
        count: usize,
        /// Bytes the transaction would hold.
        size: usize,
    },

    /// A write was attempted through a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnlyTransaction,

    /// The transaction was already committed or discarded.
    #[error("transaction has been committed or discarded")]
    TransactionClosed,

    /// Another handle holds the directory lock.
    #[error("database locked: another handle has exclusive access")]
    DatabaseLocked,

    /// The database was closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// On-disk state is not in a format this build understands.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// What was wrong.
        message: String,
    },

    /// Keys must be at least one byte long.
    #[error("key cannot be empty")]
    EmptyKey,
}

impl EngineError {
    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }
}

/// Failures of the search index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error on the index directory or mapping file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An operation or mapping could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The operation log or mapping file is damaged.
    #[error("index corrupted: {message}")]
    Corrupted {
        /// What was wrong.
        message: String,
    },

    /// The query string could not be parsed.
    #[error("query syntax error at {position}: {message}")]
    QuerySyntax {
        /// Byte offset in the query string.
        position: usize,
        /// What was wrong.
        message: String,
    },

    /// A sort field is empty.
    #[error("invalid sort field {field:?}")]
    InvalidSort {
        /// The offending sort specification.
        field: String,
    },

    /// The mapping is not usable.
    #[error("invalid mapping: {message}")]
    InvalidMapping {
        /// What was wrong.
        message: String,
    },

    /// The index was closed.
    #[error("index is closed")]
    Closed,
}

impl IndexError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a query syntax error.
    pub fn query_syntax(position: usize, message: impl Into<String>) -> Self {
        Self::QuerySyntax {
            position,
            message: message.into(),
        }
    }
}
