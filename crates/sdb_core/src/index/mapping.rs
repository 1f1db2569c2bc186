//! Field mappings: which document fields are indexed and how.

use crate::error::{IndexError, IndexResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default name of the field that carries a document's type.
pub const DOCTYPE_FIELD: &str = "Doctype";

/// How text is turned into terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Analyzer {
    /// Split on whitespace and ASCII punctuation, lowercase each token.
    #[default]
    Standard,
    /// The whole value is one term, verbatim.
    Keyword,
}

/// Mapping of one field path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Analyzer applied to text values.
    pub analyzer: Analyzer,
    /// Whether the field is searchable at all.
    pub indexed: bool,
}

impl FieldMapping {
    /// A searchable field using the standard analyzer.
    #[must_use]
    pub const fn text() -> Self {
        Self {
            analyzer: Analyzer::Standard,
            indexed: true,
        }
    }

    /// A searchable field matched only as a whole value.
    #[must_use]
    pub const fn keyword() -> Self {
        Self {
            analyzer: Analyzer::Keyword,
            indexed: true,
        }
    }

    /// A field kept out of the index. It can still be used for sorting.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            analyzer: Analyzer::Standard,
            indexed: false,
        }
    }
}

/// Field mappings for documents of one type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMapping {
    /// Dotted field path -> mapping. Unlisted fields use the index default.
    pub fields: BTreeMap<String, FieldMapping>,
}

impl DocumentMapping {
    /// An empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the mapping of `path`.
    #[must_use]
    pub fn field(mut self, path: impl Into<String>, mapping: FieldMapping) -> Self {
        self.fields.insert(path.into(), mapping);
        self
    }
}

/// Mapping of a whole index.
///
/// A document's type is read from [`doctype_field`](Self::doctype_field);
/// the field is always indexed as a keyword. Documents whose type has no
/// entry in [`types`](Self::types) use only the default analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMapping {
    /// Name of the type discriminator field.
    pub doctype_field: String,
    /// Analyzer for fields no mapping mentions.
    pub default_analyzer: Analyzer,
    /// Doctype -> per-type mapping.
    pub types: BTreeMap<String, DocumentMapping>,
}

impl Default for IndexMapping {
    fn default() -> Self {
        Self {
            doctype_field: DOCTYPE_FIELD.to_string(),
            default_analyzer: Analyzer::Standard,
            types: BTreeMap::new(),
        }
    }
}

impl IndexMapping {
    /// The default mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the type discriminator field.
    #[must_use]
    pub fn doctype_field(mut self, field: impl Into<String>) -> Self {
        self.doctype_field = field.into();
        self
    }

    /// Sets the fallback analyzer.
    #[must_use]
    pub fn default_analyzer(mut self, analyzer: Analyzer) -> Self {
        self.default_analyzer = analyzer;
        self
    }

    /// Registers the mapping for documents of type `doctype`.
    #[must_use]
    pub fn document(mut self, doctype: impl Into<String>, mapping: DocumentMapping) -> Self {
        self.types.insert(doctype.into(), mapping);
        self
    }

    /// Rejects mappings that cannot work.
    pub(crate) fn validate(&self) -> IndexResult<()> {
        if self.doctype_field.is_empty() {
            return Err(IndexError::InvalidMapping {
                message: "doctype field name is empty".into(),
            });
        }
        if let Some(path) = self
            .types
            .values()
            .flat_map(|t| t.fields.keys())
            .find(|p| p.is_empty() || p.starts_with('_'))
        {
            return Err(IndexError::InvalidMapping {
                message: format!("field path {path:?} is empty or reserved"),
            });
        }
        Ok(())
    }

    /// Mapping used for `path` in a document of type `doctype`.
    pub(crate) fn resolve(&self, doctype: Option<&str>, path: &str) -> FieldMapping {
        if path == self.doctype_field {
            return FieldMapping::keyword();
        }
        doctype
            .and_then(|t| self.types.get(t))
            .and_then(|m| m.fields.get(path))
            .copied()
            .unwrap_or(FieldMapping {
                analyzer: self.default_analyzer,
                indexed: true,
            })
    }

    /// Analyzer for query text aimed at `path`, whatever the document type.
    ///
    /// The first type mapping that mentions `path` wins.
    pub(crate) fn query_analyzer(&self, path: &str) -> Analyzer {
        if path == self.doctype_field {
            return Analyzer::Keyword;
        }
        self.types
            .values()
            .find_map(|m| m.fields.get(path))
            .map_or(self.default_analyzer, |f| f.analyzer)
    }
}
