//! In-memory inverted index and query evaluation.

use super::analysis::Token;
use super::mapping::{Analyzer, IndexMapping};
use super::query::{Clause, Matcher, Occur, Query};
use crate::error::{IndexError, IndexResult};
use sdb_codec::{Document, FieldValue};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;

/// Pseudo-field holding the terms of every indexed field.
pub(crate) const ALL_FIELD: &str = "_all";

/// Doc id -> positions of one term.
type Postings = HashMap<Vec<u8>, Vec<u32>>;

/// Doc id -> score.
type Scored = HashMap<Vec<u8>, f64>;

#[derive(Debug)]
struct StoredDoc {
    source: Document,
    /// Every scalar by path, in document order.
    values: BTreeMap<String, Vec<FieldValue>>,
    /// Indexed term count per field.
    lengths: HashMap<String, u32>,
    /// `(field, term)` pairs this document appears under.
    terms: HashSet<(String, String)>,
}

impl StoredDoc {
    fn first(&self, path: &str) -> Option<&FieldValue> {
        self.values.get(path).and_then(|v| v.first())
    }
}

/// Sort criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SortKey {
    Id,
    Score,
    Field(String),
}

/// Parses a sort specification; a leading `-` means descending.
pub(crate) fn parse_sort(spec: &str) -> IndexResult<(SortKey, bool)> {
    let (name, desc) = match spec.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (spec, false),
    };
    let key = match name {
        "" => {
            return Err(IndexError::InvalidSort {
                field: spec.to_string(),
            })
        }
        "_id" => SortKey::Id,
        "_score" => SortKey::Score,
        other => SortKey::Field(other.to_string()),
    };
    Ok((key, desc))
}

/// The searchable state of an index.
#[derive(Debug, Default)]
pub(crate) struct IndexState {
    docs: BTreeMap<Vec<u8>, StoredDoc>,
    fields: HashMap<String, BTreeMap<String, Postings>>,
}

impl IndexState {
    pub(crate) fn len(&self) -> usize {
        self.docs.len()
    }

    pub(crate) fn contains(&self, id: &[u8]) -> bool {
        self.docs.contains_key(id)
    }

    /// Indexed documents in id order.
    pub(crate) fn documents(&self) -> impl Iterator<Item = (&[u8], &Document)> {
        self.docs.iter().map(|(id, d)| (id.as_slice(), &d.source))
    }

    /// Indexes `doc` under `id`, replacing what was there.
    pub(crate) fn upsert(&mut self, id: &[u8], doc: Document, mapping: &IndexMapping) {
        self.remove(id);

        let doctype = doc
            .first(&mapping.doctype_field)
            .and_then(|v| v.as_text().map(str::to_owned));
        let mut values: BTreeMap<String, Vec<FieldValue>> = BTreeMap::new();
        let mut lengths: HashMap<String, u32> = HashMap::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut next_pos: HashMap<String, u32> = HashMap::new();

        for (path, value) in doc.fields() {
            let field = mapping.resolve(doctype.as_deref(), &path);
            if !field.indexed {
                continue;
            }
            let tokens: Vec<Token> = match &value {
                FieldValue::Text(s) => field.analyzer.tokens(s),
                FieldValue::Bool(b) => Analyzer::Keyword.tokens(if *b { "true" } else { "false" }),
                FieldValue::Number(_) => Vec::new(),
            };
            values.entry(path.clone()).or_default().push(value);
            if tokens.is_empty() {
                continue;
            }

            let span = tokens.len() as u32;
            for name in [path.as_str(), ALL_FIELD] {
                let base = next_pos.entry(name.to_string()).or_insert(0);
                let postings = self.fields.entry(name.to_string()).or_default();
                for (term, pos) in &tokens {
                    postings
                        .entry(term.clone())
                        .or_default()
                        .entry(id.to_vec())
                        .or_default()
                        .push(*base + pos);
                    seen.insert((name.to_string(), term.clone()));
                }
                // Leave a gap so phrases never span two values.
                *base += span + 1;
                *lengths.entry(name.to_string()).or_insert(0) += span;
            }
        }

        self.docs.insert(
            id.to_vec(),
            StoredDoc {
                source: doc,
                values,
                lengths,
                terms: seen,
            },
        );
    }

    /// Drops `id` from the index. Returns whether it was present.
    pub(crate) fn remove(&mut self, id: &[u8]) -> bool {
        let Some(stored) = self.docs.remove(id) else {
            return false;
        };
        for (field, term) in stored.terms {
            let Some(terms) = self.fields.get_mut(&field) else {
                continue;
            };
            if let Some(postings) = terms.get_mut(&term) {
                postings.remove(id);
                if postings.is_empty() {
                    terms.remove(&term);
                }
            }
            if terms.is_empty() {
                self.fields.remove(&field);
            }
        }
        true
    }

    /// Matching document ids with their scores, unordered.
    pub(crate) fn evaluate(&self, query: &Query, mapping: &IndexMapping) -> Vec<(Vec<u8>, f64)> {
        if query.clauses.is_empty() {
            return self.docs.keys().map(|id| (id.clone(), 1.0)).collect();
        }

        let mut must = Vec::new();
        let mut should = Vec::new();
        let mut excluded: HashSet<Vec<u8>> = HashSet::new();
        for clause in &query.clauses {
            let hits = self.clause_hits(clause, mapping);
            match clause.occur {
                Occur::Must => must.push(hits),
                Occur::Should => should.push(hits),
                Occur::MustNot => excluded.extend(hits.into_keys()),
            }
        }

        let candidates: Vec<&Vec<u8>> = if let Some((first, rest)) = must.split_first() {
            first
                .keys()
                .filter(|id| rest.iter().all(|m| m.contains_key(*id)))
                .collect()
        } else if !should.is_empty() {
            let mut union: Vec<&Vec<u8>> = should.iter().flat_map(|s| s.keys()).collect();
            union.sort();
            union.dedup();
            union
        } else {
            self.docs.keys().collect()
        };

        candidates
            .into_iter()
            .filter(|id| !excluded.contains(*id))
            .map(|id| {
                let score = must
                    .iter()
                    .chain(should.iter())
                    .filter_map(|hits| hits.get(id))
                    .sum::<f64>();
                (id.clone(), if must.is_empty() && should.is_empty() { 1.0 } else { score })
            })
            .collect()
    }

    fn clause_hits(&self, clause: &Clause, mapping: &IndexMapping) -> Scored {
        let field = clause.field.as_deref();
        let analyzer = field.map_or(Analyzer::Standard, |f| mapping.query_analyzer(f));
        let target = field.unwrap_or(ALL_FIELD);

        match &clause.matcher {
            Matcher::All => self.docs.keys().map(|id| (id.clone(), 1.0)).collect(),
            Matcher::Term(text) => {
                let mut hits = Scored::new();
                let mut terms = analyzer.terms(text);
                if field.is_none() && !terms.iter().any(|t| t == text) {
                    // Keyword values land in `_all` whole.
                    terms.push(text.clone());
                }
                for term in terms {
                    self.score_term(target, &term, &mut hits);
                }
                if let (Some(path), Ok(n)) = (field, text.parse::<f64>()) {
                    for (id, doc) in &self.docs {
                        let equal = doc
                            .values
                            .get(path)
                            .is_some_and(|vs| vs.iter().any(|v| v.as_number() == Some(n)));
                        if equal {
                            *hits.entry(id.clone()).or_insert(0.0) += 1.0;
                        }
                    }
                }
                hits
            }
            Matcher::Phrase(text) => self.phrase_hits(target, &analyzer.tokens(text)),
            Matcher::Prefix(prefix) if prefix.is_empty() => match field {
                Some(path) => self
                    .docs
                    .iter()
                    .filter(|(_, d)| d.values.contains_key(path))
                    .map(|(id, _)| (id.clone(), 1.0))
                    .collect(),
                None => self.docs.keys().map(|id| (id.clone(), 1.0)).collect(),
            },
            Matcher::Prefix(prefix) => {
                let prefix = match analyzer {
                    Analyzer::Standard => prefix.to_lowercase(),
                    Analyzer::Keyword => prefix.clone(),
                };
                let mut hits = Scored::new();
                if let Some(terms) = self.fields.get(target) {
                    let range = terms.range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded));
                    for (_, postings) in range.take_while(|(t, _)| t.starts_with(&prefix)) {
                        for id in postings.keys() {
                            hits.insert(id.clone(), 1.0);
                        }
                    }
                }
                hits
            }
            Matcher::Range(cmp, bound) => self
                .docs
                .iter()
                .filter(|(_, doc)| {
                    let mut numbers = match field {
                        Some(path) => doc.values.get(path).into_iter().flatten().collect::<Vec<_>>(),
                        None => doc.values.values().flatten().collect(),
                    }
                    .into_iter()
                    .filter_map(FieldValue::as_number);
                    numbers.any(|n| cmp.holds(n, *bound))
                })
                .map(|(id, _)| (id.clone(), 1.0))
                .collect(),
        }
    }

    fn idf(&self, doc_freq: usize) -> f64 {
        1.0 + (self.docs.len() as f64 / (doc_freq as f64 + 1.0)).ln()
    }

    fn field_norm(&self, id: &[u8], field: &str) -> f64 {
        let len = self
            .docs
            .get(id)
            .and_then(|d| d.lengths.get(field))
            .copied()
            .unwrap_or(1)
            .max(1);
        1.0 / f64::from(len).sqrt()
    }

    fn score_term(&self, field: &str, term: &str, hits: &mut Scored) {
        let Some(postings) = self.fields.get(field).and_then(|t| t.get(term)) else {
            return;
        };
        let idf = self.idf(postings.len());
        for (id, positions) in postings {
            let tf = (positions.len() as f64).sqrt();
            *hits.entry(id.clone()).or_insert(0.0) += tf * idf * idf * self.field_norm(id, field);
        }
    }

    fn phrase_hits(&self, field: &str, tokens: &[Token]) -> Scored {
        let mut hits = Scored::new();
        let Some(((first, _), rest)) = tokens.split_first() else {
            return hits;
        };
        let Some(terms) = self.fields.get(field) else {
            return hits;
        };
        let Some(head) = terms.get(first) else {
            return hits;
        };
        let mut tails = Vec::with_capacity(rest.len());
        for (term, _) in rest {
            match terms.get(term) {
                Some(p) => tails.push(p),
                None => return hits,
            }
        }

        for (id, starts) in head {
            let adjacent = starts.iter().any(|&start| {
                tails.iter().zip(1u32..).all(|(postings, offset)| {
                    postings
                        .get(id)
                        .is_some_and(|ps| ps.contains(&(start + offset)))
                })
            });
            if adjacent {
                let mut score = 0.0;
                for (term, _) in tokens {
                    let mut single = Scored::new();
                    self.score_term(field, term, &mut single);
                    score += single.get(id).copied().unwrap_or(0.0);
                }
                hits.insert(id.clone(), score);
            }
        }
        hits
    }

    /// Orders hits by `sort`, falling back to score descending. Ties are
    /// broken by id ascending. Documents missing a sort field go last.
    pub(crate) fn sort(&self, hits: &mut [(Vec<u8>, f64)], sort: &[(SortKey, bool)]) {
        let default = [(SortKey::Score, true)];
        let keys: &[(SortKey, bool)] = if sort.is_empty() { &default } else { sort };

        hits.sort_by(|(a_id, a_score), (b_id, b_score)| {
            for (key, desc) in keys {
                let ord = match key {
                    SortKey::Id => directed(a_id.cmp(b_id), *desc),
                    SortKey::Score => directed(a_score.total_cmp(b_score), *desc),
                    SortKey::Field(path) => {
                        let a = self.docs.get(a_id).and_then(|d| d.first(path));
                        let b = self.docs.get(b_id).and_then(|d| d.first(path));
                        match (a, b) {
                            (Some(a), Some(b)) => directed(a.sort_cmp(b), *desc),
                            (Some(_), None) => Ordering::Less,
                            (None, Some(_)) => Ordering::Greater,
                            (None, None) => Ordering::Equal,
                        }
                    }
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a_id.cmp(b_id)
        });
    }
}

fn directed(ord: Ordering, desc: bool) -> Ordering {
    if desc {
        ord.reverse()
    } else {
        ord
    }
}
