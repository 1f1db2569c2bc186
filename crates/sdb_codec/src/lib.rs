//! # sdb codec
//!
//! How documents become bytes and how they become indexable fields.
//!
//! Values are encoded as CBOR through `serde` and `ciborium`. Before a value
//! is encoded it is checked to be *document shaped*: it must serialize to a
//! map (a struct, a map, or a newtype around one). Scalars, sequences and
//! unit values are rejected with [`CodecError::NotADocument`] so a bad
//! argument never reaches storage.
//!
//! ```
//! use sdb_codec::{decode, Document, FieldValue};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Person { name: String, age: u32 }
//!
//! let p = Person { name: "Ada".into(), age: 36 };
//! let doc = Document::from_serialize(&p).unwrap();
//! assert_eq!(doc.first("name").as_ref().and_then(FieldValue::as_text), Some("Ada"));
//!
//! let mut buf = Vec::new();
//! doc.encode_into(&mut buf).unwrap();
//! let back: Person = decode(&buf).unwrap();
//! assert_eq!(back, p);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod document;
mod error;

pub use document::{Document, FieldValue};
pub use error::{CodecError, CodecResult};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes any serializable value into `buf` without a shape check.
///
/// `buf` is appended to, not cleared.
///
/// # Errors
///
/// [`CodecError::EncodingFailed`] if serialization fails.
pub fn encode_into<T: Serialize + ?Sized>(value: &T, buf: &mut Vec<u8>) -> CodecResult<()> {
    ciborium::into_writer(value, buf).map_err(|e| CodecError::encoding_failed(e.to_string()))
}

/// Encodes a value into a fresh vector.
///
/// # Errors
///
/// [`CodecError::EncodingFailed`] if serialization fails.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    encode_into(value, &mut buf)?;
    Ok(buf)
}

/// Decodes stored bytes into `T`.
///
/// # Errors
///
/// [`CodecError::DecodingFailed`] if the bytes are not valid CBOR or do not
/// fit the shape of `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}
