//! Full-text search index.
//!
//! The index is a derived view of the primary store: documents are added
//! and removed one at a time, each change logged to `index.log` before it
//! becomes searchable. There are no transactions here. Readers see every
//! change as soon as it has been applied.

mod analysis;
mod mapping;
mod persistence;
mod query;
mod store;

pub use mapping::{Analyzer, DocumentMapping, FieldMapping, IndexMapping, DOCTYPE_FIELD};
pub use query::{Clause, Comparison, Matcher, Occur, Query};

use crate::error::{IndexError, IndexResult};
use parking_lot::RwLock;
use persistence::{IndexOp, IndexStore};
use sdb_codec::Document;
use std::path::Path;
use store::{parse_sort, IndexState};

/// A paged search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRequest {
    /// Query string; blank matches every document.
    pub query: String,
    /// Sort fields in priority order. `-` in front sorts descending;
    /// `_id` and `_score` are built in.
    pub sort: Vec<String>,
    /// Maximum number of hits to return.
    pub limit: Option<usize>,
    /// Hits to skip before the first one returned.
    pub offset: usize,
}

impl SearchRequest {
    /// A request for `query` with default ordering and no paging.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Sets the sort fields.
    #[must_use]
    pub fn sort<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sort = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the page size.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the number of hits to skip.
    #[must_use]
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// One matching document.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Document id (the primary key).
    pub id: Vec<u8>,
    /// Relevance score.
    pub score: f64,
}

/// The outcome of a search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    /// The requested page of hits, in order.
    pub hits: Vec<SearchHit>,
    /// Number of matching documents before paging.
    pub total: usize,
}

impl SearchResult {
    /// Ids of the hits, in order.
    #[must_use]
    pub fn ids(&self) -> Vec<Vec<u8>> {
        self.hits.iter().map(|h| h.id.clone()).collect()
    }
}

struct Inner {
    store: IndexStore,
    state: IndexState,
    closed: bool,
}

impl Inner {
    fn ensure_open(&self) -> IndexResult<()> {
        if self.closed {
            Err(IndexError::Closed)
        } else {
            Ok(())
        }
    }
}

/// The search index handle.
///
/// Safe to share between threads; writers take an exclusive lock per
/// document, searches a shared one.
pub struct SearchIndex {
    inner: RwLock<Inner>,
}

impl SearchIndex {
    /// Opens the index stored under `path`, or an in-memory one for `None`.
    ///
    /// A fresh index is created with `mapping`. An existing one keeps the
    /// mapping it was created with.
    ///
    /// # Errors
    ///
    /// [`IndexError::Io`] / [`IndexError::Storage`] if the directory or its
    /// files cannot be used, [`IndexError::Corrupted`] if the log or the
    /// mapping cannot be read, [`IndexError::InvalidMapping`] for a mapping
    /// that cannot work.
    pub fn open(path: Option<&Path>, mapping: IndexMapping) -> IndexResult<Self> {
        let mut store = IndexStore::open(path, mapping)?;
        let ops = store.replay()?;
        let replayed = ops.len();

        let mut state = IndexState::default();
        for op in ops {
            match op {
                IndexOp::Upsert { id, doc } => state.upsert(&id, doc, store.mapping()),
                IndexOp::Delete { id } => {
                    state.remove(&id);
                }
            }
        }
        tracing::debug!(
            path = ?path,
            replayed,
            documents = state.len(),
            "search index opened"
        );

        Ok(Self {
            inner: RwLock::new(Inner {
                store,
                state,
                closed: false,
            }),
        })
    }

    /// The mapping in effect.
    #[must_use]
    pub fn mapping(&self) -> IndexMapping {
        self.inner.read().store.mapping().clone()
    }

    /// Adds or replaces the document `id`.
    ///
    /// # Errors
    ///
    /// Fails if the change cannot be logged; the in-memory index is then
    /// left as it was.
    pub fn index(&self, id: &[u8], doc: &Document) -> IndexResult<()> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;
        let op = IndexOp::Upsert {
            id: id.to_vec(),
            doc: doc.clone(),
        };
        inner.store.append(&op)?;
        let Inner { store, state, .. } = &mut *inner;
        state.upsert(id, doc.clone(), store.mapping());
        Ok(())
    }

    /// Removes the document `id`. Returns whether it was indexed.
    ///
    /// # Errors
    ///
    /// Fails if the change cannot be logged.
    pub fn delete(&self, id: &[u8]) -> IndexResult<bool> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;
        if !inner.state.contains(id) {
            return Ok(false);
        }
        inner.store.append(&IndexOp::Delete { id: id.to_vec() })?;
        Ok(inner.state.remove(id))
    }

    /// Runs a search.
    ///
    /// # Errors
    ///
    /// [`IndexError::QuerySyntax`] for a malformed query,
    /// [`IndexError::InvalidSort`] for an empty sort field.
    pub fn search(&self, request: &SearchRequest) -> IndexResult<SearchResult> {
        let query = Query::parse(&request.query)?;
        let sort = request
            .sort
            .iter()
            .map(|s| parse_sort(s))
            .collect::<IndexResult<Vec<_>>>()?;

        let inner = self.inner.read();
        inner.ensure_open()?;
        let mut hits = inner.state.evaluate(&query, inner.store.mapping());
        inner.state.sort(&mut hits, &sort);

        let total = hits.len();
        let hits = hits
            .into_iter()
            .skip(request.offset)
            .take(request.limit.unwrap_or(usize::MAX))
            .map(|(id, score)| SearchHit { id, score })
            .collect();
        Ok(SearchResult { hits, total })
    }

    /// Number of indexed documents.
    #[must_use]
    pub fn doc_count(&self) -> usize {
        self.inner.read().state.len()
    }

    /// Whether `id` is indexed.
    #[must_use]
    pub fn contains(&self, id: &[u8]) -> bool {
        self.inner.read().state.contains(id)
    }

    /// Rewrites the log so it holds one upsert per indexed document.
    /// Returns the log size before and after.
    ///
    /// # Errors
    ///
    /// Fails if the new log cannot be written; the old one stays in place.
    pub fn compact(&self) -> IndexResult<(u64, u64)> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;
        let before = inner.store.size()?;
        let ops: Vec<IndexOp> = inner
            .state
            .documents()
            .map(|(id, doc)| IndexOp::Upsert {
                id: id.to_vec(),
                doc: doc.clone(),
            })
            .collect();
        let after = inner.store.rewrite(&ops)?;
        tracing::info!(before, after, documents = ops.len(), "search index compacted");
        Ok((before, after))
    }

    /// Syncs the log and refuses further use. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Fails if the final sync fails; the index counts as closed anyway.
    pub fn close(&self) -> IndexResult<()> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        inner.store.sync()
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }
}

impl std::fmt::Debug for SearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SearchIndex")
            .field("documents", &inner.state.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use tempfile::tempdir;

    #[derive(Serialize)]
    struct Account<'a> {
        #[serde(rename = "Doctype")]
        doctype: &'a str,
        email: &'a str,
        bio: &'a str,
        secret: &'a str,
    }

    fn account(email: &str, bio: &str) -> Document {
        Document::from_serialize(&Account {
            doctype: "account",
            email,
            bio,
            secret: "hunter2",
        })
        .unwrap()
    }

    fn mapping() -> IndexMapping {
        IndexMapping::new().document(
            "account",
            DocumentMapping::new()
                .field("email", FieldMapping::keyword())
                .field("secret", FieldMapping::disabled()),
        )
    }

    fn ids(result: &SearchResult) -> Vec<&[u8]> {
        result.hits.iter().map(|h| h.id.as_slice()).collect()
    }

    #[test]
    fn index_search_delete() {
        let index = SearchIndex::open(None, mapping()).unwrap();
        index.index(b"1", &account("a@x", "likes rust")).unwrap();
        index.index(b"2", &account("b@x", "likes go")).unwrap();

        let r = index.search(&SearchRequest::new("likes")).unwrap();
        assert_eq!(r.total, 2);
        let r = index.search(&SearchRequest::new("email:b@x")).unwrap();
        assert_eq!(ids(&r), vec![&b"2"[..]]);

        assert!(index.delete(b"2").unwrap());
        assert!(!index.delete(b"2").unwrap());
        assert_eq!(index.doc_count(), 1);
        assert!(!index.contains(b"2"));
    }

    #[test]
    fn disabled_fields_are_invisible() {
        let index = SearchIndex::open(None, mapping()).unwrap();
        index.index(b"1", &account("a@x", "bio")).unwrap();
        assert_eq!(index.search(&SearchRequest::new("hunter2")).unwrap().total, 0);
        assert_eq!(index.search(&SearchRequest::new("secret:*")).unwrap().total, 0);
    }

    #[test]
    fn paging_reports_the_full_total() {
        let index = SearchIndex::open(None, mapping()).unwrap();
        for (id, email) in [(b"1", "a@x"), (b"2", "b@x"), (b"3", "c@x"), (b"4", "d@x")] {
            index.index(id, &account(email, "same")).unwrap();
        }
        let page = index
            .search(&SearchRequest::new("").sort(["-email"]).offset(1).limit(2))
            .unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(ids(&page), vec![&b"3"[..], b"2"]);

        let past_end = index.search(&SearchRequest::new("*").offset(10)).unwrap();
        assert_eq!(past_end.total, 4);
        assert!(past_end.hits.is_empty());
    }

    #[test]
    fn bad_requests_are_rejected() {
        let index = SearchIndex::open(None, mapping()).unwrap();
        assert!(matches!(
            index.search(&SearchRequest::new("\"open")),
            Err(IndexError::QuerySyntax { .. })
        ));
        assert!(matches!(
            index.search(&SearchRequest::new("*").sort(["-"])),
            Err(IndexError::InvalidSort { .. })
        ));
    }

    #[test]
    fn reopen_replays_and_compacts() {
        let dir = tempdir().unwrap();
        {
            let index = SearchIndex::open(Some(dir.path()), mapping()).unwrap();
            for round in 0..5 {
                index.index(b"1", &account("a@x", &format!("round {round}"))).unwrap();
            }
            index.index(b"2", &account("b@x", "gone")).unwrap();
            index.delete(b"2").unwrap();
            index.close().unwrap();
        }

        let index = SearchIndex::open(Some(dir.path()), IndexMapping::new()).unwrap();
        assert_eq!(index.mapping(), mapping());
        assert_eq!(index.doc_count(), 1);
        assert_eq!(index.search(&SearchRequest::new("bio:4")).unwrap().total, 1);
        assert_eq!(index.search(&SearchRequest::new("bio:3")).unwrap().total, 0);

        let (before, after) = index.compact().unwrap();
        assert!(after < before);
        index.close().unwrap();

        let index = SearchIndex::open(Some(dir.path()), mapping()).unwrap();
        assert_eq!(index.doc_count(), 1);
        assert_eq!(index.search(&SearchRequest::new("round")).unwrap().total, 1);
    }

    #[test]
    fn closed_index_refuses_work() {
        let index = SearchIndex::open(None, mapping()).unwrap();
        index.close().unwrap();
        index.close().unwrap();
        assert!(index.is_closed());
        assert!(matches!(
            index.index(b"1", &account("a@x", "x")),
            Err(IndexError::Closed)
        ));
        assert!(matches!(
            index.search(&SearchRequest::new("*")),
            Err(IndexError::Closed)
        ));
    }
}
