//! Document trees and their flattened field view.

use crate::error::{CodecError, CodecResult};
use ciborium::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A value that passed the document shape check.
///
/// Internally this is the serialized `ciborium` tree of the caller's value.
/// The tree is what gets written to the primary engine; [`fields`] is what
/// the search index sees.
///
/// [`fields`]: Document::fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Document(Value);

/// One scalar found while flattening a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Boolean scalar.
    Bool(bool),
    /// Integer or float scalar, widened to `f64`.
    Number(f64),
    /// String scalar.
    Text(String),
}

impl FieldValue {
    /// The string, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The number, if this is numeric.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The boolean, if this is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Number(_) => 1,
            Self::Text(_) => 2,
        }
    }

    /// Total order used for sorting search results.
    ///
    /// Values of different kinds order as bool < number < text.
    #[must_use]
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Integer(_) => "integer",
        Value::Bytes(_) => "bytes",
        Value::Float(_) => "float",
        Value::Text(_) => "text",
        Value::Bool(_) => "bool",
        Value::Null => "null",
        Value::Tag(..) => "tag",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        _ => "unknown",
    }
}

impl Document {
    /// Serializes `value` and checks that it is document shaped.
    ///
    /// # Errors
    ///
    /// - [`CodecError::EncodingFailed`] if serialization itself fails.
    /// - [`CodecError::NotADocument`] if the value is not a map.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> CodecResult<Self> {
        let tree =
            Value::serialized(value).map_err(|e| CodecError::encoding_failed(e.to_string()))?;
        Self::from_value(tree)
    }

    /// Wraps an already built tree.
    ///
    /// # Errors
    ///
    /// [`CodecError::NotADocument`] if `tree` is not a map.
    pub fn from_value(tree: Value) -> CodecResult<Self> {
        match tree {
            Value::Map(_) => Ok(Self(tree)),
            other => Err(CodecError::NotADocument { found: kind(&other) }),
        }
    }

    /// Decodes stored bytes into a document tree.
    ///
    /// # Errors
    ///
    /// [`CodecError::DecodingFailed`] on malformed bytes,
    /// [`CodecError::NotADocument`] if the bytes hold a non-map value.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        Self::from_value(crate::decode(bytes)?)
    }

    /// Appends the CBOR encoding of the tree to `buf`.
    ///
    /// # Errors
    ///
    /// [`CodecError::EncodingFailed`] if writing fails.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> CodecResult<()> {
        crate::encode_into(&self.0, buf)
    }

    /// Borrow the underlying tree.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Flattens the tree into `(path, scalar)` pairs.
    ///
    /// Nested map keys are joined with `.`, every array element is reported
    /// under the array's own path, tags are looked through, and nulls,
    /// byte strings and NaN are skipped. Pairs come out in document order.
    #[must_use]
    pub fn fields(&self) -> Vec<(String, FieldValue)> {
        let mut out = Vec::new();
        let mut path = String::new();
        flatten(&mut path, &self.0, &mut out);
        out
    }

    /// First scalar found at `path`.
    #[must_use]
    pub fn first(&self, path: &str) -> Option<FieldValue> {
        self.fields()
            .into_iter()
            .find(|(p, _)| p == path)
            .map(|(_, v)| v)
    }
}

impl TryFrom<Value> for Document {
    type Error = CodecError;

    fn try_from(tree: Value) -> CodecResult<Self> {
        Self::from_value(tree)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        doc.0
    }
}

fn key_name(key: &Value) -> Option<String> {
    match key {
        Value::Text(s) => Some(s.clone()),
        Value::Integer(i) => Some(i128::from(*i).to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn flatten(path: &mut String, value: &Value, out: &mut Vec<(String, FieldValue)>) {
    match value {
        Value::Map(entries) => {
            for (k, child) in entries {
                let Some(name) = key_name(k) else { continue };
                let mark = path.len();
                if !path.is_empty() {
                    path.push('.');
                }
                path.push_str(&name);
                flatten(path, child, out);
                path.truncate(mark);
            }
        }
        Value::Array(items) => {
            for item in items {
                flatten(path, item, out);
            }
        }
        Value::Tag(_, inner) => flatten(path, inner, out),
        Value::Text(s) => out.push((path.clone(), FieldValue::Text(s.clone()))),
        Value::Bool(b) => out.push((path.clone(), FieldValue::Bool(*b))),
        Value::Integer(i) => out.push((path.clone(), FieldValue::Number(i128::from(*i) as f64))),
        Value::Float(f) if !f.is_nan() => out.push((path.clone(), FieldValue::Number(*f))),
        _ => {}
    }
}
