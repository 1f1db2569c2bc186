//! Codec errors.

use thiserror::Error;

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Failures while encoding or decoding a document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Serialization failed.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// What went wrong.
        message: String,
    },

    /// Stored bytes could not be decoded into the requested type.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// What went wrong.
        message: String,
    },

    /// The value does not serialize to a map, so it cannot be stored as a
    /// document.
    #[error("value must be a document (struct or map), got {found}")]
    NotADocument {
        /// Kind of value that was supplied.
        found: &'static str,
    },
}

impl CodecError {
    /// Shorthand for [`CodecError::EncodingFailed`].
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Shorthand for [`CodecError::DecodingFailed`].
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }
}
